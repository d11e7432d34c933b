//! Error types for IT module loading.

use thiserror::Error;

/// Errors that can occur while loading an IT module.
#[derive(Debug, Error)]
pub enum LoadError {
    /// IO error while reading the file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A magic identifier did not match.
    #[error("bad magic: expected {expected}")]
    BadMagic {
        /// The identifier that was expected ("IMPM", "IMPI" or "IMPS").
        expected: &'static str,
    },

    /// The stream ended before a structure could be read.
    #[error("truncated stream at offset {offset}")]
    Truncated {
        /// Byte offset at which the read failed.
        offset: u64,
    },

    /// The module's compatibility version is older than IT 2.00.
    #[error("unsupported module version (cmwt {cmwt:#06x})")]
    UnsupportedVersion {
        /// The Cmwt field from the header.
        cmwt: u16,
    },

    /// A compressed sample payload could not be decoded.
    #[error("malformed compressed data in sample {sample}: {reason}")]
    BadCompressedSample {
        /// One-based sample index.
        sample: usize,
        /// What went wrong.
        reason: &'static str,
    },
}
