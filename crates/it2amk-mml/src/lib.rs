//! IT to AddmusicK conversion.
//!
//! Takes a loaded [`it2amk_it::ItModule`] through three stages:
//!
//! 1. [`unroll`]: virtual playback of the order list into per-channel,
//!    tick-indexed event streams with loop detection.
//! 2. [`adsr`] / [`sampconv`]: volume-envelope fitting onto the SPC700's
//!    hardware envelope model, and BRR tuning lookup through the external
//!    sample converter.
//! 3. [`emit`]: rendering the event table as an AddmusicK MML document.
//!
//! Conversion behavior is controlled by [`config::Options`], fed from
//! command-line pairs and from flags embedded in the module's song message.

pub mod adsr;
pub mod config;
pub mod emit;
pub mod error;
pub mod event;
pub mod sampconv;
pub mod tags;
pub mod unroll;

use std::path::Path;

use it2amk_it::ItModule;

// Re-export main types
pub use config::Options;
pub use emit::{fit_pan, inverse_volume, MmlEmitter};
pub use error::ConvertError;
pub use event::{Event, EventKind, EventTable};
pub use sampconv::{ExternalSampleConverter, SampleConverter};
pub use tags::ModuleTags;
pub use unroll::Unroller;

/// Run the full conversion pipeline and return the MML document.
///
/// `module_path` is the module's on-disk location, forwarded to the sample
/// converter and used for the `#path` stem.
pub fn convert_module(
    module: &ItModule,
    options: &Options,
    module_path: &Path,
    converter: &dyn SampleConverter,
) -> Result<String, ConvertError> {
    let tags = ModuleTags::parse(module)?;
    let mut table = Unroller::unroll(module, options, &tags);

    table.sample_dict = sampconv::resolve_samples(
        module,
        &tags,
        &table.used_samples,
        options,
        converter,
        module_path,
    )?;

    let stem = module_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(MmlEmitter::render(module, &table, &tags, options, &stem))
}
