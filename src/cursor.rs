//! A forward-only reader over an in-memory archive.

use crate::reader::ParseError;

/// Sequential reader over the bytes of one archive.
///
/// The position only ever moves forward, except for the single byte that
/// [`Cursor::skip_padding`] puts back when it finds the end of a padding run.
#[derive(Debug)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// The offset of the next unread byte, from the start of the archive.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns exactly `n` bytes and advances past them.
    ///
    /// Fails with [`ParseError::Truncated`] (without moving) if fewer than `n` bytes remain.
    pub fn read(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if n > self.remaining() {
            return Err(ParseError::Truncated {
                offset: self.pos,
                wanted: n,
                available: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    /// Consumes NUL bytes until a non-zero byte or the end of the input.
    ///
    /// The non-zero byte is left unconsumed.  Note that this can't tell padding apart from data
    /// which happens to start with NUL bytes: they get swallowed too.
    pub fn skip_padding(&mut self) -> usize {
        let start = self.pos;
        while let Some(&byte) = self.data.get(self.pos) {
            if byte != 0 {
                break;
            }
            self.pos += 1;
        }
        self.pos - start
    }

    /// Skips forward to the next multiple of `alignment`, stopping early at the end of the input.
    ///
    /// Returns the number of bytes skipped.
    pub fn align(&mut self, alignment: usize) -> usize {
        let padding = (alignment - self.pos % alignment) % alignment;
        let padding = padding.min(self.remaining());
        self.pos += padding;
        padding
    }
}
