//! The decoded contents of an archive and the operations on them.

use std::{
    ffi::OsStr,
    fmt,
    os::unix::ffi::OsStrExt,
    path::Path,
    sync::Arc,
};

use log::debug;
use thiserror::Error;

use crate::{
    format::{FileType, Header, ModeString},
    fs::{MaterializeError, Materializer},
    reader::{ArchiveWalker, ParseError, ParseOptions},
};

/// One named entry of an archive.
///
/// The data is shared: all of the names in a hardlink group point at the same bytes.
#[derive(Clone, Debug)]
pub struct Member {
    header: Header,
    name: Box<OsStr>,
    data: Arc<[u8]>,
}

impl Member {
    pub fn new(header: Header, name: Box<OsStr>, data: Arc<[u8]>) -> Self {
        Self { header, name, data }
    }

    pub(crate) fn set_data(&mut self, data: Arc<[u8]>) {
        self.data = data;
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn name(&self) -> &OsStr {
        &self.name
    }

    /// The file contents, or the link target for symlinks.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn file_type(&self) -> FileType {
        self.header.file_type()
    }

    pub fn permissions(&self) -> u32 {
        self.header.permissions()
    }

    /// True if both members were resolved to the same data, as the names of one hardlinked file
    /// are.
    pub fn is_hardlink_of(&self, other: &Member) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

/// `ls -l`-style rendering, used for verbose listings.
impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let header = &self.header;
        write!(
            f,
            "{} {:>3} {:>5}/{:<5} {:>10} {:>10} {}",
            ModeString(header.mode),
            header.nlink,
            header.uid,
            header.gid,
            header.file_size,
            header.mtime,
            Path::new(&self.name).display()
        )?;
        if self.file_type() == FileType::Symlink {
            write!(f, " -> {}", Path::new(OsStr::from_bytes(&self.data)).display())?;
        }
        Ok(())
    }
}

/// A member which failed to extract during a batch extraction.
#[derive(Debug)]
pub struct ExtractFailure {
    pub name: Box<OsStr>,
    pub error: MaterializeError,
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("No archive member matches {0:?}")]
    NotFound(Box<OsStr>),
    #[error("Failed to extract {} of {attempted} members", failures.len())]
    Partial {
        attempted: usize,
        failures: Vec<ExtractFailure>,
    },
}

/// An archive, decoded in full.
///
/// Members are kept in the order they appear in the archive.  The trailer is not one of them.
#[derive(Debug, Default)]
pub struct Archive {
    members: Vec<Member>,
}

impl Archive {
    /// Decodes an archive held in memory.
    pub fn parse(data: &[u8], options: ParseOptions) -> Result<Self, ParseError> {
        let members = ArchiveWalker::new(data, options).walk()?;
        Ok(Self { members })
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The names of all members, in archive order.
    pub fn list(&self) -> impl Iterator<Item = &OsStr> {
        self.members.iter().map(Member::name)
    }

    pub fn regular_files(&self) -> impl Iterator<Item = &Member> {
        self.members
            .iter()
            .filter(|member| member.file_type() == FileType::Regular)
    }

    /// Finds the first member named exactly `name`.
    pub fn find(&self, name: impl AsRef<OsStr>) -> Option<&Member> {
        let name = name.as_ref();
        self.members.iter().find(|member| member.name() == name)
    }

    /// Collects every member whose name contains `pattern`, in archive order.
    pub fn find_matching(&self, pattern: impl AsRef<OsStr>) -> Vec<&Member> {
        let pattern = pattern.as_ref().as_bytes();
        self.members
            .iter()
            .filter(|member| contains(member.name().as_bytes(), pattern))
            .collect()
    }

    /// Resolves a request for `name`: an exact match if there is one, otherwise every member whose
    /// name contains `name`.
    pub fn select(&self, name: impl AsRef<OsStr>) -> Result<Vec<&Member>, ExtractError> {
        let name = name.as_ref();
        if let Some(member) = self.find(name) {
            return Ok(vec![member]);
        }

        let matches = self.find_matching(name);
        if matches.is_empty() {
            return Err(ExtractError::NotFound(Box::from(name)));
        }
        debug!("{name:?} has no exact match, using {} partial matches", matches.len());
        Ok(matches)
    }

    /// Extracts the member(s) that [`Archive::select`] picks for `name`.
    pub fn extract_one(
        &self,
        name: impl AsRef<OsStr>,
        materializer: &Materializer,
    ) -> Result<(), ExtractError> {
        extract(self.select(name)?, materializer)
    }

    /// Extracts every member in archive order.
    pub fn extract_all(&self, materializer: &Materializer) -> Result<(), ExtractError> {
        extract(&self.members, materializer)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|window| window == needle)
}

/// Materializes each member in turn.  A failure doesn't stop the rest from being attempted.
fn extract<'a>(
    members: impl IntoIterator<Item = &'a Member>,
    materializer: &Materializer,
) -> Result<(), ExtractError> {
    let mut attempted = 0;
    let mut failures = vec![];

    for member in members {
        attempted += 1;
        if let Err(error) = materializer.materialize(member) {
            failures.push(ExtractFailure {
                name: Box::from(member.name()),
                error,
            });
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ExtractError::Partial {
            attempted,
            failures,
        })
    }
}

/// Reads and decodes the archive at `path` with the default options.
pub fn parse_archive(path: impl AsRef<Path>) -> Result<Archive, ParseError> {
    parse_archive_with(path, ParseOptions::default())
}

pub fn parse_archive_with(
    path: impl AsRef<Path>,
    options: ParseOptions,
) -> Result<Archive, ParseError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Archive::parse(&data, options)
}

#[cfg(test)]
mod test {
    use std::os::unix::fs::PermissionsExt;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::test::{tempdir, ArchiveBuilder, FILE, SYMLINK};

    fn parse(data: &[u8]) -> Archive {
        Archive::parse(data, ParseOptions::default()).unwrap()
    }

    fn selected(archive: &Archive, name: &str) -> Vec<String> {
        archive
            .select(name)
            .unwrap()
            .iter()
            .map(|m| m.name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_list_round_trip() {
        let names = ["one", "two/three", "four.txt", "z", "a"];
        let mut builder = ArchiveBuilder::new();
        for name in names {
            builder = builder.file(name, name.as_bytes());
        }
        let archive = parse(&builder.finish());

        assert_eq!(archive.len(), names.len());
        assert_eq!(archive.list().collect::<Vec<_>>(), names);
        for member in archive.members() {
            assert_eq!(member.data(), member.name().as_bytes());
        }
    }

    #[test]
    fn test_trailer_not_listed() {
        let archive = parse(&ArchiveBuilder::new().file("a", b"1").finish());
        assert_eq!(archive.list().collect::<Vec<_>>(), ["a"]);
        assert!(archive.find("TRAILER!!!").is_none());
        assert!(archive.find_matching("TRAILER").is_empty());
    }

    #[test]
    fn test_hardlinks_listed() {
        let data = ArchiveBuilder::new()
            .entry("A", FILE | 0o644, 3, 3, b"")
            .entry("B", FILE | 0o644, 3, 3, b"")
            .entry("C", FILE | 0o644, 3, 3, b"hello world")
            .finish();
        let archive = parse(&data);
        assert_eq!(archive.list().collect::<Vec<_>>(), ["A", "B", "C"]);
        for name in ["A", "B", "C"] {
            assert_eq!(archive.find(name).unwrap().data(), b"hello world");
        }
    }

    #[test]
    fn test_select_exact_first() {
        let archive = parse(
            &ArchiveBuilder::new()
                .file("a/b.txt", b"nested")
                .file("b.txt", b"top")
                .finish(),
        );
        assert_eq!(selected(&archive, "b.txt"), ["b.txt"]);
        assert_eq!(selected(&archive, "a/b.txt"), ["a/b.txt"]);
    }

    #[test]
    fn test_select_partial() {
        let archive = parse(
            &ArchiveBuilder::new()
                .file("foo.txt", b"1")
                .file("bar", b"2")
                .file("foo.txt.bak", b"3")
                .finish(),
        );
        assert_eq!(selected(&archive, "foo"), ["foo.txt", "foo.txt.bak"]);
        assert_eq!(selected(&archive, "foo.txt"), ["foo.txt"]);
        assert!(matches!(
            archive.select("nothing"),
            Err(ExtractError::NotFound(name)) if &*name == "nothing"
        ));
    }

    #[test]
    fn test_regular_files() {
        let archive = parse(
            &ArchiveBuilder::new()
                .directory("d")
                .file("d/f", b"x")
                .symlink("l", "d/f")
                .finish(),
        );
        let names: Vec<_> = archive.regular_files().map(Member::name).collect();
        assert_eq!(names, ["d/f"]);
    }

    #[test]
    fn test_display() {
        let archive = parse(
            &ArchiveBuilder::new()
                .file("hello", b"Hello, world")
                .symlink("link", "hello")
                .finish(),
        );
        assert_eq!(
            archive.members()[0].to_string(),
            "-rw-r--r--   1  1000/1000          12 1600000000 hello"
        );
        assert_eq!(
            archive.members()[1].to_string(),
            "lrwxrwxrwx   1  1000/1000           5 1600000000 link -> hello"
        );
    }

    #[test]
    fn test_extract_one() {
        let archive = parse(
            &ArchiveBuilder::new()
                .file("foo.txt", b"1")
                .file("foo.txt.bak", b"2")
                .file("other", b"3")
                .finish(),
        );
        let dir = tempdir();
        let materializer = Materializer::new(dir.path()).unwrap();

        archive.extract_one("foo", &materializer).unwrap();
        assert_eq!(std::fs::read(dir.path().join("foo.txt")).unwrap(), b"1");
        assert_eq!(std::fs::read(dir.path().join("foo.txt.bak")).unwrap(), b"2");
        assert!(!dir.path().join("other").exists());

        assert!(matches!(
            archive.extract_one("missing", &materializer),
            Err(ExtractError::NotFound(_))
        ));
    }

    #[test]
    fn test_extract_all() {
        let archive = parse(
            &ArchiveBuilder::new()
                .directory(".")
                .directory("bin")
                .entry("bin/tool", FILE | 0o755, 50, 1, b"#!/bin/sh\n")
                .entry("bin/alias", SYMLINK | 0o777, 51, 1, b"tool")
                .entry("data/x", FILE | 0o600, 52, 2, b"")
                .entry("data/y", FILE | 0o600, 52, 2, b"linked")
                .finish(),
        );
        let dir = tempdir();
        archive
            .extract_all(&Materializer::new(dir.path()).unwrap())
            .unwrap();

        let tool = dir.path().join("bin/tool");
        assert_eq!(std::fs::read(&tool).unwrap(), b"#!/bin/sh\n");
        assert_eq!(
            std::fs::metadata(&tool).unwrap().permissions().mode() & 0o777,
            0o755
        );
        assert_eq!(
            std::fs::read_link(dir.path().join("bin/alias")).unwrap(),
            Path::new("tool")
        );
        assert_eq!(std::fs::read(dir.path().join("data/x")).unwrap(), b"linked");
        assert_eq!(std::fs::read(dir.path().join("data/y")).unwrap(), b"linked");
    }

    #[test]
    fn test_extract_all_continues_after_failure() {
        let archive = parse(
            &ArchiveBuilder::new()
                .file("blocker", b"i am a file")
                .file("blocker/child", b"can't exist")
                .file("../escape", b"nope")
                .file("fine", b"ok")
                .finish(),
        );
        let dir = tempdir();
        let result = archive.extract_all(&Materializer::new(dir.path()).unwrap());

        match result {
            Err(ExtractError::Partial {
                attempted,
                failures,
            }) => {
                assert_eq!(attempted, 4);
                let names: Vec<_> = failures.iter().map(|f| &*f.name).collect();
                assert_eq!(names, ["blocker/child", "../escape"]);
                assert!(matches!(
                    failures[1].error,
                    MaterializeError::UnsafePath(_)
                ));
            }
            other => panic!("expected a partial failure, got {other:?}"),
        }
        assert_eq!(std::fs::read(dir.path().join("fine")).unwrap(), b"ok");
        assert!(!dir.path().parent().unwrap().join("escape").exists());
    }

    #[test]
    fn test_parse_archive_file() {
        let dir = tempdir();
        let path = dir.path().join("test.cpio");
        std::fs::write(&path, ArchiveBuilder::new().file("x", b"y").finish()).unwrap();
        let archive = parse_archive(&path).unwrap();
        assert_eq!(archive.list().collect::<Vec<_>>(), ["x"]);

        assert!(matches!(
            parse_archive(dir.path().join("missing.cpio")),
            Err(ParseError::Io { .. })
        ));
    }

    #[test]
    fn test_parse_archive_bad_magic() {
        let dir = tempdir();
        let path = dir.path().join("bad.cpio");
        let mut data = ArchiveBuilder::new().file("x", b"y").finish();
        data[..6].copy_from_slice(b"070702");
        std::fs::write(&path, data).unwrap();
        assert!(matches!(
            parse_archive(&path),
            Err(ParseError::BadMagic { offset: 0, .. })
        ));
    }
}
