//! Decoding a whole archive into its list of members.
//!
//! Records are read strictly in order: where one record ends depends on the sizes declared in
//! its header, so there's no way to find a record without decoding all of the ones before it.
//!
//! Hardlinks need special care.  A writer that finds several names for the same inode emits one
//! record per name, but only the last of those records carries the file contents: the earlier
//! ones have a size of zero.  The walker collects such runs of empty records and, once the
//! record carrying the data shows up, hands a reference to the same bytes to every name.

use std::{
    ffi::OsStr,
    os::unix::ffi::OsStrExt,
    path::PathBuf,
    sync::Arc,
};

use log::{debug, trace, warn};
use thiserror::Error;

use crate::{
    archive::Member,
    cursor::Cursor,
    format::{FileType, Header, ALIGNMENT, HEADER_LEN, TRAILER},
};

/// Decoding an archive failed.  None of these are recoverable: once one record has been misread
/// the position of every following record is unknown.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to read archive {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid magic \"{}\" at offset {offset} (not a newc archive)", .found.escape_ascii())]
    BadMagic { offset: usize, found: [u8; 6] },
    #[error("Invalid name in record at offset {offset}: {reason}")]
    InvalidName { offset: usize, reason: &'static str },
    #[error("Archive truncated at offset {offset}: needed {wanted} bytes but only {available} remain")]
    Truncated {
        offset: usize,
        wanted: usize,
        available: usize,
    },
    #[error("Header field {field} is not a hexadecimal number: {value:?}")]
    FieldDecode { field: &'static str, value: String },
}

/// How the padding after names and file data is located.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Padding {
    /// Skip to the next 4-byte boundary, as newc writers produce.
    #[default]
    Aligned,
    /// Skip NUL bytes until something else shows up.  This misreads file data that starts with
    /// NUL bytes, but copes with writers that don't align at all.
    Scan,
}

/// Which records are considered to be names for the same hardlinked file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HardlinkPolicy {
    /// Any run of empty non-directory records belongs to the record that follows it.
    #[default]
    Consecutive,
    /// Like `Consecutive`, but the records must also share their device and inode numbers and
    /// have a link count above one.  Empty files stay empty.
    SameInode,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ParseOptions {
    pub padding: Padding,
    pub hardlinks: HardlinkPolicy,
}

#[derive(Debug)]
enum State {
    Scanning,
    CollectingHardlinkRun(Vec<Member>),
    Done,
}

/// Drives the decode of one archive.
#[derive(Debug)]
pub struct ArchiveWalker<'a> {
    cursor: Cursor<'a>,
    options: ParseOptions,
}

impl<'a> ArchiveWalker<'a> {
    pub fn new(data: &'a [u8], options: ParseOptions) -> Self {
        Self {
            cursor: Cursor::new(data),
            options,
        }
    }

    fn skip_padding(&mut self) {
        match self.options.padding {
            Padding::Aligned => self.cursor.align(ALIGNMENT),
            Padding::Scan => self.cursor.skip_padding(),
        };
    }

    /// Reads one header and its name, leaving the cursor at the start of the file data.
    fn read_record(&mut self) -> Result<(Header, Box<OsStr>), ParseError> {
        let offset = self.cursor.position();
        let header = Header::decode(self.cursor.read(HEADER_LEN)?)?;
        if !header.verify_magic() {
            return Err(ParseError::BadMagic {
                offset,
                found: header.magic,
            });
        }

        let name_size = usize::try_from(header.name_size).map_err(|_| ParseError::Truncated {
            offset: self.cursor.position(),
            wanted: usize::MAX,
            available: self.cursor.remaining(),
        })?;
        let Some((&0, name)) = self.cursor.read(name_size)?.split_last() else {
            return Err(ParseError::InvalidName {
                offset,
                reason: "missing NUL terminator",
            });
        };
        // some writers pad the name itself with extra NULs
        let end = name.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        let name = Box::from(OsStr::from_bytes(&name[..end]));

        self.skip_padding();
        trace!(
            "record at {offset}: {name:?} mode={:o} size={} ino={} nlink={}",
            header.mode,
            header.file_size,
            header.ino,
            header.nlink
        );
        Ok((header, name))
    }

    fn read_data(&mut self, header: &Header) -> Result<Arc<[u8]>, ParseError> {
        if header.file_size == 0 {
            return Ok(Arc::from([]));
        }
        let size = usize::try_from(header.file_size).map_err(|_| ParseError::Truncated {
            offset: self.cursor.position(),
            wanted: usize::MAX,
            available: self.cursor.remaining(),
        })?;
        let data = Arc::from(self.cursor.read(size)?);
        self.skip_padding();
        Ok(data)
    }

    fn starts_run(&self, header: &Header) -> bool {
        header.file_size == 0
            && header.file_type() != FileType::Directory
            && match self.options.hardlinks {
                HardlinkPolicy::Consecutive => true,
                HardlinkPolicy::SameInode => header.nlink > 1,
            }
    }

    fn joins_run(&self, first: &Header, header: &Header) -> bool {
        header.file_type() != FileType::Directory
            && match self.options.hardlinks {
                HardlinkPolicy::Consecutive => true,
                HardlinkPolicy::SameInode => {
                    (header.dev_major, header.dev_minor, header.ino)
                        == (first.dev_major, first.dev_minor, first.ino)
                }
            }
    }

    /// Handles a record read while not collecting a hardlink run.
    fn scan(
        &mut self,
        header: Header,
        name: Box<OsStr>,
        members: &mut Vec<Member>,
    ) -> Result<State, ParseError> {
        if name.as_bytes() == TRAILER.as_bytes() {
            return Ok(State::Done);
        }

        if self.starts_run(&header) {
            return Ok(State::CollectingHardlinkRun(vec![Member::new(
                header,
                name,
                Arc::from([]),
            )]));
        }

        let data = self.read_data(&header)?;
        members.push(Member::new(header, name, data));
        Ok(State::Scanning)
    }

    fn collect(
        &mut self,
        mut run: Vec<Member>,
        members: &mut Vec<Member>,
    ) -> Result<State, ParseError> {
        let (header, name) = self.read_record()?;

        if name.as_bytes() == TRAILER.as_bytes() || !self.joins_run(run[0].header(), &header) {
            // no record carried data for this run: those really were empty files
            if run.len() > 1 {
                warn!(
                    "{} empty records starting at {:?} not followed by their data",
                    run.len(),
                    run[0].name()
                );
            }
            members.append(&mut run);
            return self.scan(header, name, members);
        }

        if header.file_size == 0 {
            run.push(Member::new(header, name, Arc::from([])));
            return Ok(State::CollectingHardlinkRun(run));
        }

        let data = self.read_data(&header)?;
        debug!(
            "{:?} carries the data for {} hardlinked name(s)",
            name,
            run.len()
        );
        for member in run.iter_mut() {
            member.set_data(Arc::clone(&data));
        }
        members.append(&mut run);
        members.push(Member::new(header, name, data));
        Ok(State::Scanning)
    }

    /// Decodes every record up to the trailer.
    pub fn walk(mut self) -> Result<Vec<Member>, ParseError> {
        let mut members = vec![];
        let mut state = State::Scanning;

        loop {
            state = match state {
                State::Scanning => {
                    let (header, name) = self.read_record()?;
                    self.scan(header, name, &mut members)?
                }
                State::CollectingHardlinkRun(run) => self.collect(run, &mut members)?,
                State::Done => break,
            };
        }

        debug!(
            "decoded {} members, {} trailing bytes ignored",
            members.len(),
            self.cursor.remaining()
        );
        Ok(members)
    }
}
