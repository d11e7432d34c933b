//! Error types for the conversion pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while converting a module to MML.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// IO error (sample converter invocation, output writing).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The module failed to load.
    #[error("load error: {0}")]
    Load(#[from] it2amk_it::LoadError),

    /// A conversion flag had a missing or malformed value.
    #[error("flag {flag}: {message}")]
    BadFlagSyntax {
        /// The flag as given (canonical name).
        flag: String,
        /// What was wrong with it.
        message: String,
    },

    /// A backtick tag in an instrument name had a malformed value.
    #[error("instrument {instrument}: invalid {kind} value {value:?}")]
    BadInstrumentTag {
        /// One-based instrument index.
        instrument: usize,
        /// Tag kind ("adsr", "release" or "fade").
        kind: &'static str,
        /// The offending text.
        value: String,
    },

    /// A backtick tag in a sample name had a malformed value.
    #[error("sample {sample}: invalid {kind} value {value:?}")]
    BadSampleTag {
        /// One-based sample index.
        sample: usize,
        /// Tag kind ("amplifier", "resampler" or "default sample override").
        kind: &'static str,
        /// The offending text.
        value: String,
    },

    /// The sample converter output file is missing or unreadable.
    #[error("sample converter output missing or malformed: {path}")]
    MissingSampConvOutput {
        /// Path the tunings were expected at.
        path: PathBuf,
    },
}
