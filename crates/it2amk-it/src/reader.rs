//! Positioned byte reader over an in-memory IT file.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::error::LoadError;

/// Little-endian reader over the full file image.
///
/// IT files are offset tables into the same buffer, so the reader keeps the
/// whole image and seeks freely. End-of-data maps to [`LoadError::Truncated`].
pub struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    /// Create a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Current byte offset.
    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    /// Jump to an absolute byte offset.
    pub fn seek_to(&mut self, offset: u64) {
        self.cursor.set_position(offset);
    }

    /// The full underlying image.
    pub fn data(&self) -> &'a [u8] {
        self.cursor.get_ref()
    }

    fn truncated(&self) -> LoadError {
        LoadError::Truncated {
            offset: self.cursor.position(),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, LoadError> {
        self.cursor.read_u8().map_err(|_| self.truncated())
    }

    pub fn read_i8(&mut self) -> Result<i8, LoadError> {
        self.cursor.read_i8().map_err(|_| self.truncated())
    }

    pub fn read_u16(&mut self) -> Result<u16, LoadError> {
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| self.truncated())
    }

    pub fn read_u32(&mut self) -> Result<u32, LoadError> {
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| self.truncated())
    }

    /// Read `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, LoadError> {
        let mut buf = vec![0u8; len];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| self.truncated())?;
        Ok(buf)
    }

    /// Read a fixed-size name field: NULs become spaces, the result is
    /// truncated to `keep` characters and right-trimmed.
    pub fn read_name(&mut self, len: usize, keep: usize) -> Result<String, LoadError> {
        let raw = self.read_bytes(len)?;
        let text = String::from_utf8_lossy(&raw).replace('\0', " ");
        let mut text: String = text.chars().take(keep).collect();
        while text.ends_with(' ') {
            text.pop();
        }
        Ok(text)
    }

    /// Read a 4-byte magic identifier, failing with [`LoadError::BadMagic`]
    /// when it does not match.
    pub fn expect_magic(&mut self, magic: &'static [u8; 4]) -> Result<(), LoadError> {
        let raw = self.read_bytes(4)?;
        if raw != magic[..] {
            return Err(LoadError::BadMagic {
                // The three magics in the format are ASCII.
                expected: std::str::from_utf8(magic).unwrap_or("IMPM"),
            });
        }
        Ok(())
    }
}
