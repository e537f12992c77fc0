use rand::{distr::Alphanumeric, Rng};
use std::{
    os::{fd::OwnedFd, unix::ffi::OsStrExt},
    path::Path,
};

use rustix::{
    fs::{readlinkat, renameat, symlinkat, unlinkat, AtFlags},
    io::{Errno, Result as ErrnoResult},
};

pub(crate) trait ErrnoFilter<T> {
    fn filter_errno(self, ignored: Errno) -> ErrnoResult<Option<T>>;
}

impl<T> ErrnoFilter<T> for ErrnoResult<T> {
    fn filter_errno(self, ignored: Errno) -> ErrnoResult<Option<T>> {
        match self {
            Ok(result) => Ok(Some(result)),
            Err(err) if err == ignored => Ok(None),
            Err(err) => Err(err),
        }
    }
}

fn generate_tmpname(prefix: &str) -> String {
    let rand_string: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, rand_string)
}

/// Creates a symlink at `name` (relative to `dirfd`), replacing whatever is there already.
///
/// The replacement is atomic: a temporary link is created next to `name` and renamed over it.
pub(crate) fn replace_symlinkat(
    target: impl AsRef<Path>,
    dirfd: &OwnedFd,
    name: impl AsRef<Path>,
) -> ErrnoResult<()> {
    let name = name.as_ref();
    let target = target.as_ref();

    // Step 1: try to create the symlink
    if symlinkat(target, dirfd, name)
        .filter_errno(Errno::EXIST)?
        .is_some()
    {
        return Ok(());
    };

    // Step 2: something already exists.  Maybe it's a symlink with the correct target?
    match readlinkat(dirfd, name, []) {
        Ok(current_target) if current_target.as_bytes() == target.as_os_str().as_bytes() => {
            return Ok(());
        }
        // EINVAL: not a symlink
        Ok(_) | Err(Errno::NOENT) | Err(Errno::INVAL) => {}
        Err(e) => return Err(e),
    }

    // Step 3: full atomic replace path
    for _ in 0..16 {
        let tmp_name = name.with_file_name(generate_tmpname(".symlink-"));
        if symlinkat(target, dirfd, &tmp_name)
            .filter_errno(Errno::EXIST)?
            .is_none()
        {
            // This temporary filename already exists, try another
            continue;
        }

        match renameat(dirfd, &tmp_name, dirfd, name) {
            Ok(_) => return Ok(()),
            Err(e) => {
                let _ = unlinkat(dirfd, &tmp_name, AtFlags::empty());
                return Err(e);
            }
        }
    }

    Err(Errno::EXIST)
}
