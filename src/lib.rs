//! Reading and extracting `newc` (SVR4 "new ASCII") cpio archives.
//!
//! An archive is decoded in one sequential pass into an [`archive::Archive`], an ordered
//! store of members.  Hardlinked names, which the format encodes as a run of empty records
//! followed by one record carrying the data, are resolved during the decode so that every name
//! in the run shares the same bytes.  Members can then be written to disk with
//! [`fs::Materializer`].

pub mod archive;
pub mod cursor;
pub mod format;
pub mod fs;
pub mod reader;
pub mod util;


pub use archive::{parse_archive, parse_archive_with, Archive, ExtractError, Member};
pub use reader::{HardlinkPolicy, Padding, ParseError, ParseOptions};
