//! Writing archive members to disk.
//!
//! All paths are resolved relative to an output directory file descriptor using the `*at()`
//! family of syscalls.  Member names are sanitized first: leading `/` is dropped and names which
//! would climb out of the output directory with `..` are refused.

use std::{
    ffi::OsStr,
    fs::File,
    io::Write,
    os::{fd::OwnedFd, unix::ffi::OsStrExt},
    path::{Component, Path, PathBuf},
};

use log::debug;
use rustix::{
    fs::{fchmod, mkdirat, openat, statat, AtFlags, Mode, OFlags, CWD},
    io::Errno,
};
use thiserror::Error;

use crate::{archive::Member, format::FileType, util::replace_symlinkat};

/// Permissions for every directory we create.
const DIRECTORY_MODE: u32 = 0o755;

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("Refusing to extract {0:?} outside of the output directory")]
    UnsafePath(PathBuf),
    #[error("Refusing to extract a member with an empty name")]
    EmptyName,
    #[error("Failed to {op} {path:?}")]
    Filesystem {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn fs_error<'a, E: Into<std::io::Error>>(
    op: &'static str,
    path: &'a Path,
) -> impl FnOnce(E) -> MaterializeError + 'a {
    move |source| MaterializeError::Filesystem {
        op,
        path: path.to_path_buf(),
        source: source.into(),
    }
}

/// Converts a member name into a path relative to the output directory.
///
/// Returns `None` for names that refer to the output directory itself, like `.`.
fn relative_path(name: &OsStr) -> Result<Option<PathBuf>, MaterializeError> {
    if name.is_empty() {
        return Err(MaterializeError::EmptyName);
    }
    let mut path = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(MaterializeError::UnsafePath(PathBuf::from(name)))
            }
        }
    }
    Ok((!path.as_os_str().is_empty()).then_some(path))
}

/// Writes members into one output directory.
#[derive(Debug)]
pub struct Materializer {
    dirfd: OwnedFd,
}

impl Materializer {
    /// Extracts into `output_dir`, which must exist.
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self, MaterializeError> {
        let output_dir = output_dir.as_ref();
        let dirfd = openat(
            CWD,
            output_dir,
            OFlags::PATH | OFlags::DIRECTORY | OFlags::CLOEXEC,
            Mode::empty(),
        )
        .map_err(fs_error("open output directory", output_dir))?;
        Ok(Self { dirfd })
    }

    /// Extracts into the current working directory.
    pub fn cwd() -> Result<Self, MaterializeError> {
        Self::new(".")
    }

    /// Creates `path` and any missing parents.  Directories which already exist are fine, so
    /// this is safe to race against itself.
    fn create_dirs(&self, path: &Path) -> Result<(), MaterializeError> {
        let mut prefix = PathBuf::new();
        for component in path.components() {
            prefix.push(component);
            match mkdirat(&self.dirfd, &prefix, Mode::from_raw_mode(DIRECTORY_MODE)) {
                Ok(()) | Err(Errno::EXIST) => {}
                Err(e) => Err(fs_error("create directory", &prefix)(e))?,
            }
        }

        // EEXIST also covers files and symlinks sitting where the directory should go
        let stat = statat(&self.dirfd, path, AtFlags::SYMLINK_NOFOLLOW)
            .map_err(fs_error("stat", path))?;
        if !rustix::fs::FileType::from_raw_mode(stat.st_mode).is_dir() {
            return Err(fs_error("create directory", path)(Errno::NOTDIR));
        }
        Ok(())
    }

    fn create_parent(&self, path: &Path) -> Result<(), MaterializeError> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.create_dirs(parent),
            _ => Ok(()),
        }
    }

    fn write_file(&self, path: &Path, permissions: u32, data: &[u8]) -> Result<(), MaterializeError> {
        let mode = Mode::from_raw_mode(permissions);
        let fd = openat(
            &self.dirfd,
            path,
            OFlags::CREATE | OFlags::WRONLY | OFlags::TRUNC | OFlags::NOFOLLOW | OFlags::CLOEXEC,
            mode,
        )
        .map_err(fs_error("create", path))?;
        // the mode passed to open() is subject to the umask and ignored for existing files
        fchmod(&fd, mode).map_err(fs_error("chmod", path))?;
        File::from(fd)
            .write_all(data)
            .map_err(fs_error("write", path))
    }

    /// Writes one member below the output directory.
    ///
    /// Directories are created along with their parents.  Symlinks take their target from the
    /// member data.  Everything else, including device nodes, FIFOs and sockets, is written as a
    /// regular file holding the member data, with the permission bits from the archive.
    pub fn materialize(&self, member: &Member) -> Result<(), MaterializeError> {
        let Some(path) = relative_path(member.name())? else {
            return Ok(());
        };

        let file_type = member.file_type();
        debug!("extracting {path:?} ({file_type:?}, {} bytes)", member.data().len());

        match file_type {
            FileType::Directory => self.create_dirs(&path),
            FileType::Symlink => {
                self.create_parent(&path)?;
                let target = OsStr::from_bytes(member.data());
                replace_symlinkat(target, &self.dirfd, &path).map_err(fs_error("symlink", &path))
            }
            FileType::Regular
            | FileType::Block
            | FileType::Char
            | FileType::Fifo
            | FileType::Socket => {
                self.create_parent(&path)?;
                self.write_file(&path, member.permissions(), member.data())
            }
        }
    }
}
