//! The newc header: on-disk layout, decoding, and file type classification.
//!
//! Every header is 110 bytes of ASCII: the 6-byte magic `070701` followed by thirteen 8-digit
//! hexadecimal fields.  The header is followed by the NUL-terminated name and then the file data,
//! each padded out to a 4-byte boundary.

use std::fmt;

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::reader::ParseError;

pub const MAGIC: &[u8; 6] = b"070701";
pub const HEADER_LEN: usize = 110;
pub const ALIGNMENT: usize = 4;

/// Name of the sentinel record that ends an archive.
pub const TRAILER: &str = "TRAILER!!!";

pub const S_IFMT: u64 = 0o170000;
pub const S_IFSOCK: u64 = 0o140000;
pub const S_IFLNK: u64 = 0o120000;
pub const S_IFREG: u64 = 0o100000;
pub const S_IFBLK: u64 = 0o060000;
pub const S_IFDIR: u64 = 0o040000;
pub const S_IFCHR: u64 = 0o020000;
pub const S_IFIFO: u64 = 0o010000;
pub const PERMISSION_MASK: u64 = 0o777;

type HexField = [u8; 8];

/// The header exactly as it appears in the archive.
#[derive(Debug, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct RawHeader {
    pub magic: [u8; 6],
    pub ino: HexField,
    pub mode: HexField,
    pub uid: HexField,
    pub gid: HexField,
    pub nlink: HexField,
    pub mtime: HexField,
    pub file_size: HexField,
    pub dev_major: HexField,
    pub dev_minor: HexField,
    pub rdev_major: HexField,
    pub rdev_minor: HexField,
    pub name_size: HexField,
    /// Only meaningful for the `070702` CRC variant; never interpreted here.
    pub check: HexField,
}

/// A decoded header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 6],
    pub ino: u64,
    pub mode: u64,
    pub uid: u64,
    pub gid: u64,
    pub nlink: u64,
    pub mtime: u64,
    pub file_size: u64,
    pub dev_major: u64,
    pub dev_minor: u64,
    pub rdev_major: u64,
    pub rdev_minor: u64,
    /// Length of the name including its terminating NUL.
    pub name_size: u64,
}

/// The file type bits of a mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileType {
    Directory,
    Symlink,
    Regular,
    Block,
    Char,
    Fifo,
    Socket,
}

impl FileType {
    /// Classifies the type bits of `mode`.  Anything unrecognized is treated as a regular file.
    pub fn from_mode(mode: u64) -> Self {
        match mode & S_IFMT {
            S_IFDIR => FileType::Directory,
            S_IFLNK => FileType::Symlink,
            S_IFBLK => FileType::Block,
            S_IFCHR => FileType::Char,
            S_IFIFO => FileType::Fifo,
            S_IFSOCK => FileType::Socket,
            _ => FileType::Regular,
        }
    }

    /// The character `ls -l` uses for this type.
    pub fn as_char(self) -> char {
        match self {
            FileType::Directory => 'd',
            FileType::Symlink => 'l',
            FileType::Regular => '-',
            FileType::Block => 'b',
            FileType::Char => 'c',
            FileType::Fifo => 'p',
            FileType::Socket => 's',
        }
    }
}

fn decode_hex(field: &'static str, bytes: &HexField) -> Result<u64, ParseError> {
    let mut value = [0u8; 4];
    hex::decode_to_slice(bytes, &mut value).map_err(|_| ParseError::FieldDecode {
        field,
        value: String::from_utf8_lossy(bytes).into_owned(),
    })?;
    Ok(u32::from_be_bytes(value).into())
}

impl Header {
    /// Decodes the first [`HEADER_LEN`] bytes of `bytes`.
    ///
    /// The magic is copied as-is; it's up to the caller to check it with
    /// [`Header::verify_magic`].
    pub fn decode(bytes: &[u8]) -> Result<Header, ParseError> {
        let raw = bytes
            .get(..HEADER_LEN)
            .and_then(|bytes| RawHeader::ref_from_bytes(bytes).ok())
            .ok_or(ParseError::Truncated {
                offset: 0,
                wanted: HEADER_LEN,
                available: bytes.len(),
            })?;

        Ok(Header {
            magic: raw.magic,
            ino: decode_hex("ino", &raw.ino)?,
            mode: decode_hex("mode", &raw.mode)?,
            uid: decode_hex("uid", &raw.uid)?,
            gid: decode_hex("gid", &raw.gid)?,
            nlink: decode_hex("nlink", &raw.nlink)?,
            mtime: decode_hex("mtime", &raw.mtime)?,
            file_size: decode_hex("filesize", &raw.file_size)?,
            dev_major: decode_hex("devmajor", &raw.dev_major)?,
            dev_minor: decode_hex("devminor", &raw.dev_minor)?,
            rdev_major: decode_hex("rdevmajor", &raw.rdev_major)?,
            rdev_minor: decode_hex("rdevminor", &raw.rdev_minor)?,
            name_size: decode_hex("namesize", &raw.name_size)?,
        })
    }

    pub fn verify_magic(&self) -> bool {
        &self.magic == MAGIC
    }

    pub fn file_type(&self) -> FileType {
        FileType::from_mode(self.mode)
    }

    pub fn permissions(&self) -> u32 {
        (self.mode & PERMISSION_MASK) as u32
    }
}

/// Renders a mode the way `ls -l` does, e.g. `drwxr-xr-x`.
pub struct ModeString(pub u64);

impl fmt::Display for ModeString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mode = self.0;
        let bit = |mask: u64, c: char| if mode & mask != 0 { c } else { '-' };
        // setuid/setgid/sticky replace the matching execute bit
        let exec = |x: u64, special: u64, set: char, unset: char| match (mode & x, mode & special) {
            (0, 0) => '-',
            (_, 0) => 'x',
            (0, _) => unset,
            _ => set,
        };

        write!(
            f,
            "{}{}{}{}{}{}{}{}{}{}",
            FileType::from_mode(mode).as_char(),
            bit(0o400, 'r'),
            bit(0o200, 'w'),
            exec(0o100, 0o4000, 's', 'S'),
            bit(0o040, 'r'),
            bit(0o020, 'w'),
            exec(0o010, 0o2000, 's', 'S'),
            bit(0o004, 'r'),
            bit(0o002, 'w'),
            exec(0o001, 0o1000, 't', 'T'),
        )
    }
}
