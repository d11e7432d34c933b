//! IT module loader - assembles all components from a file image.

use std::path::Path;

use crate::error::LoadError;
use crate::header::{ItHeader, ItHeaderTables};
use crate::instrument::ItInstrument;
use crate::pattern::ItPattern;
use crate::reader::ByteReader;
use crate::sample::ItSample;

/// A fully loaded IT module.
///
/// Built once by [`ItModule::from_bytes`] and treated as read-only by every
/// later stage.
#[derive(Debug, Clone)]
pub struct ItModule {
    /// Module header.
    pub header: ItHeader,
    /// Song message, with NULs blanked and CRs converted to newlines.
    pub message: String,
    /// Instruments, in file order.
    pub instruments: Vec<ItInstrument>,
    /// Samples, in file order.
    pub samples: Vec<ItSample>,
    /// Patterns, in file order.
    pub patterns: Vec<ItPattern>,
}

impl ItModule {
    /// Load a module from a complete file image.
    pub fn from_bytes(data: &[u8]) -> Result<Self, LoadError> {
        let mut r = ByteReader::new(data);
        let (header, tables) = ItHeader::read(&mut r)?;

        let message = Self::read_message(&mut r, &header, &tables)?;

        // Patterns: a zero offset is an empty 64-row pattern.
        let mut patterns = Vec::with_capacity(tables.pattern_offsets.len());
        for &offset in &tables.pattern_offsets {
            if offset == 0 {
                patterns.push(ItPattern::empty(64));
            } else {
                r.seek_to(offset as u64);
                patterns.push(ItPattern::read(&mut r)?);
            }
        }

        let mut instruments = Vec::with_capacity(tables.instrument_offsets.len());
        for &offset in &tables.instrument_offsets {
            r.seek_to(offset as u64);
            instruments.push(ItInstrument::read(&mut r)?);
        }

        let mut samples = Vec::with_capacity(tables.sample_offsets.len());
        for (i, &offset) in tables.sample_offsets.iter().enumerate() {
            r.seek_to(offset as u64);
            samples.push(ItSample::read(&mut r, i + 1)?);
        }

        Ok(Self {
            header,
            message,
            instruments,
            samples,
            patterns,
        })
    }

    /// Load a module from a file on disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    fn read_message(
        r: &mut ByteReader<'_>,
        header: &ItHeader,
        tables: &ItHeaderTables,
    ) -> Result<String, LoadError> {
        if !header.has_message() || tables.message_length == 0 {
            return Ok(String::new());
        }
        r.seek_to(tables.message_offset as u64);
        let raw = r.read_bytes(tables.message_length as usize)?;
        let mut text = String::from_utf8_lossy(&raw)
            .replace('\0', " ")
            .replace('\r', "\n");
        // Drop the trailing terminator.
        text.pop();
        Ok(text)
    }
}
