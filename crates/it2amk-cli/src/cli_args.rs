//! CLI argument definitions.
//!
//! Conversion flags are pair-wise `flag value` tokens shared with the
//! module-message flag syntax, so they pass through clap untyped and are
//! interpreted by the config layer.

use clap::Parser;
use std::path::PathBuf;

/// it2amk - Impulse Tracker to AddmusicK MML converter
#[derive(Parser)]
#[command(name = "it2amk")]
#[command(version, about, long_about = None)]
#[command(disable_help_flag = true)]
pub(crate) struct Cli {
    /// Path to the input .it module
    pub module: PathBuf,

    /// Conversion flags as `flag value` pairs (e.g. `-t 1.5 -e 0123ABCD`)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub flags: Vec<String>,
}
