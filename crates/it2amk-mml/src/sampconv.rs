//! External sample converter interface and tunings parsing.
//!
//! BRR conversion happens out of process: the converter is handed the module
//! path, a use mask and per-sample resample/amplify ratios, and leaves one
//! line per used sample in `temp/tunings.txt` (BRR filename plus a 6-digit
//! tuning value). The trait seam lets tests substitute a fixture.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use it2amk_it::ItModule;

use crate::config::Options;
use crate::error::ConvertError;
use crate::tags::ModuleTags;

/// Where the converter leaves its output.
pub const TUNINGS_PATH: &str = "temp/tunings.txt";

/// Converter binary name.
pub const SAMPCONV_PROGRAM: &str = "sampconv.exe";

/// Resolved output name and tuning for one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleEntry {
    /// BRR filename, possibly a `../default/` table entry.
    pub name: String,
    /// Tuning as MML text (`$xx $yy`).
    pub tuning: String,
}

/// The sample conversion seam.
pub trait SampleConverter {
    /// Convert the module's used samples, returning the raw tunings lines.
    ///
    /// `ratios` holds one (resample, amplify) pair per sample, as decimal
    /// strings.
    fn convert(
        &self,
        module_path: &Path,
        use_mask: &str,
        ratios: &[(String, String)],
    ) -> Result<Vec<String>, ConvertError>;
}

/// Invokes the real converter binary.
pub struct ExternalSampleConverter {
    /// Converter executable.
    pub program: PathBuf,
    /// Skip the conversion call and only read the existing tunings file.
    pub skip_conversion: bool,
}

impl ExternalSampleConverter {
    /// Converter with the default program name; `skip_conversion` carries
    /// the `nosmpl` flag.
    pub fn new(skip_conversion: bool) -> Self {
        Self {
            program: PathBuf::from(SAMPCONV_PROGRAM),
            skip_conversion,
        }
    }
}

impl SampleConverter for ExternalSampleConverter {
    fn convert(
        &self,
        module_path: &Path,
        use_mask: &str,
        ratios: &[(String, String)],
    ) -> Result<Vec<String>, ConvertError> {
        let output = Path::new(TUNINGS_PATH);
        if !self.skip_conversion {
            // Stale output must not satisfy the read below.
            let _ = std::fs::remove_file(output);

            let mut cmd = Command::new(&self.program);
            cmd.arg(module_path).arg(use_mask);
            for (resample, amplify) in ratios {
                cmd.arg(resample).arg(amplify);
            }
            cmd.status()?;
        }

        let text =
            std::fs::read_to_string(output).map_err(|_| ConvertError::MissingSampConvOutput {
                path: output.to_path_buf(),
            })?;
        Ok(text.lines().map(str::to_string).collect())
    }
}

/// Default BRR table entry for an `@N` sample override.
fn default_brr_name(n: i64) -> String {
    let entry = match n {
        0 => "00 SMW @0",
        1 | 11 | 18 => "01 SMW @1",
        2 => "02 SMW @2",
        3 => "03 SMW @3",
        4 => "04 SMW @4",
        5 => "07 SMW @5",
        6 => "08 SMW @6",
        7 => "09 SMW @7",
        8 => "05 SMW @8",
        9 => "0A SMW @9",
        10 | 26 | 27 | 28 => "0B SMW @10",
        12 => "10 SMW @12",
        13 | 16 => "0C SMW @13",
        14 => "0D SMW @14",
        15 => "12 SMW @15",
        17 => "11 SMW @17",
        21 => "0F SMW @21",
        22 | 23 => "06 SMW @22",
        24 | 25 | 29 => "0E SMW @29",
        _ => "13 SMW Thunder",
    };
    format!("../default/{}.brr", entry)
}

/// Unescape one tunings line: spaces inside double quotes become `\s`, the
/// line splits on plain spaces, and `\s` turns back into spaces.
fn split_tunings_line(line: &str) -> Vec<String> {
    let mut escaped = String::new();
    let mut quote = false;
    for c in line.chars() {
        match c {
            '"' => quote = !quote,
            ' ' if quote => escaped.push_str("\\s"),
            '\n' | '\r' => {}
            _ => escaped.push(c),
        }
    }
    escaped
        .split(' ')
        .map(|t| t.replace("\\s", " "))
        .collect()
}

/// Run the converter over the module's used samples and build the sample
/// dictionary keyed by one-based sample index.
pub fn resolve_samples(
    module: &ItModule,
    tags: &ModuleTags,
    used_samples: &BTreeSet<u8>,
    options: &Options,
    converter: &dyn SampleConverter,
    module_path: &Path,
) -> Result<BTreeMap<u8, SampleEntry>, ConvertError> {
    let mut use_mask = String::with_capacity(module.samples.len());
    for s in 0..module.samples.len() {
        use_mask.push(if used_samples.contains(&(s as u8 + 1)) {
            '1'
        } else {
            '0'
        });
    }

    let ratios: Vec<(String, String)> = (0..module.samples.len())
        .map(|s| {
            let sample_tags = tags.sample(s as u8 + 1);
            (
                format!("{}", sample_tags.resample.unwrap_or(options.resample)),
                format!("{}", sample_tags.amplify.unwrap_or(options.amplify)),
            )
        })
        .collect();

    let lines = converter.convert(module_path, &use_mask, &ratios)?;

    let mut dict = BTreeMap::new();
    for (&sample, line) in used_samples.iter().zip(lines.iter()) {
        let fields = split_tunings_line(line);
        let (Some(name), Some(tuning_raw)) = (fields.first(), fields.get(1)) else {
            return Err(ConvertError::MissingSampConvOutput {
                path: PathBuf::from(TUNINGS_PATH),
            });
        };
        if tuning_raw.len() < 4 {
            return Err(ConvertError::MissingSampConvOutput {
                path: PathBuf::from(TUNINGS_PATH),
            });
        }
        let tuning = format!("{} ${}", &tuning_raw[..3], &tuning_raw[3..]);

        let mut name = name.clone();
        if let Some(n) = tags.sample(sample).default_override {
            name = default_brr_name(n);
        }

        dict.insert(sample, SampleEntry { name, tuning });
    }

    if dict.len() < used_samples.len() {
        return Err(ConvertError::MissingSampConvOutput {
            path: PathBuf::from(TUNINGS_PATH),
        });
    }

    Ok(dict)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_tunings_line_quoted_spaces() {
        let fields = split_tunings_line("\"my kick.brr\" $0340");
        assert_eq!(fields, vec!["my kick.brr".to_string(), "$0340".to_string()]);
    }

    #[test]
    fn test_tuning_split() {
        // "$03" + "40" renders as "$03 $40".
        let raw = "$0340";
        let tuning = format!("{} ${}", &raw[..3], &raw[3..]);
        assert_eq!(tuning, "$03 $40");
    }

    #[test]
    fn test_default_brr_table() {
        assert_eq!(default_brr_name(0), "../default/00 SMW @0.brr");
        assert_eq!(default_brr_name(16), "../default/0C SMW @13.brr");
        assert_eq!(default_brr_name(99), "../default/13 SMW Thunder.brr");
    }
}
