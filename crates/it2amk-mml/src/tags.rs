//! Backtick-delimited override tags embedded in instrument and sample names.
//!
//! A name like ``Lead `e aF8E07F` `` enables echo and pins the ADSR for that
//! instrument. Tags are parsed once at conversion start into typed structs;
//! malformed values are fatal.

use it2amk_it::ItModule;

use crate::error::ConvertError;

/// Parsed instrument overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentTags {
    /// `e`: route this instrument through echo.
    pub echo: bool,
    /// `i`: invert the right channel.
    pub invert: bool,
    /// `n`: play as noise.
    pub noise: bool,
    /// `p`: enable pitch modulation.
    pub pitch_mod: bool,
    /// `aXXXXXX`: ADSR/GAIN override, 6 hex digits.
    pub adsr: Option<String>,
    /// `rXXXXXX`: release override, 6 hex digits.
    pub release: Option<String>,
    /// `fXX`: fade override, 2 hex digits.
    pub fade: Option<String>,
}

/// Parsed sample overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleTags {
    /// `@N`: replace with a default sample table entry.
    pub default_override: Option<i64>,
    /// `rR`: per-sample resample ratio.
    pub resample: Option<f64>,
    /// `aR`: per-sample amplify ratio.
    pub amplify: Option<f64>,
}

/// Tags for every instrument and sample of a module, parsed up front.
#[derive(Debug, Clone, Default)]
pub struct ModuleTags {
    /// Per-instrument tags, in file order.
    pub instruments: Vec<InstrumentTags>,
    /// Per-sample tags, in file order.
    pub samples: Vec<SampleTags>,
}

impl ModuleTags {
    /// Parse every name in the module.
    pub fn parse(module: &ItModule) -> Result<Self, ConvertError> {
        let mut instruments = Vec::with_capacity(module.instruments.len());
        for (i, ins) in module.instruments.iter().enumerate() {
            instruments.push(parse_instrument_tags(i + 1, &ins.tag_text())?);
        }
        let mut samples = Vec::with_capacity(module.samples.len());
        for (i, smp) in module.samples.iter().enumerate() {
            samples.push(parse_sample_tags(i + 1, &smp.tag_text())?);
        }
        Ok(Self {
            instruments,
            samples,
        })
    }

    /// Tags for a one-based instrument index; default when out of range.
    pub fn instrument(&self, index: u8) -> InstrumentTags {
        self.instruments
            .get(index.wrapping_sub(1) as usize)
            .cloned()
            .unwrap_or_default()
    }

    /// Tags for a one-based sample index; default when out of range.
    pub fn sample(&self, index: u8) -> SampleTags {
        self.samples
            .get(index.wrapping_sub(1) as usize)
            .cloned()
            .unwrap_or_default()
    }
}

/// Parse the backtick regions of one instrument name.
pub fn parse_instrument_tags(
    instrument: usize,
    text: &str,
) -> Result<InstrumentTags, ConvertError> {
    let mut tags = InstrumentTags::default();
    let mut interpret = false;
    let mut current: Option<char> = None;
    let mut value = String::new();

    for c in text.chars() {
        if c == '`' {
            interpret = !interpret;
            continue;
        }
        if !interpret {
            continue;
        }
        if let Some(kind) = current {
            value.push(c);
            let wanted = if kind == 'f' { 2 } else { 6 };
            if value.len() == wanted {
                if !value.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(ConvertError::BadInstrumentTag {
                        instrument,
                        kind: match kind {
                            'a' => "adsr",
                            'r' => "release",
                            _ => "fade",
                        },
                        value,
                    });
                }
                match kind {
                    'a' => tags.adsr = Some(value.clone()),
                    'r' => tags.release = Some(value.clone()),
                    _ => tags.fade = Some(value.clone()),
                }
                current = None;
                value.clear();
            }
        } else {
            match c {
                'e' => tags.echo = true,
                'i' => tags.invert = true,
                'n' => tags.noise = true,
                'p' => tags.pitch_mod = true,
                'a' | 'r' | 'f' => current = Some(c),
                _ => {}
            }
        }
    }

    Ok(tags)
}

/// Parse the backtick regions of one sample name.
pub fn parse_sample_tags(sample: usize, text: &str) -> Result<SampleTags, ConvertError> {
    let mut tags = SampleTags::default();
    let chars: Vec<char> = text.chars().collect();
    let mut interpret = false;
    let mut current: Option<char> = None;
    let mut value = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c == '`' {
            interpret = !interpret;
            continue;
        }
        if !interpret {
            continue;
        }
        if let Some(kind) = current {
            value.push(c);
            // The value runs until the next character can no longer extend
            // a number.
            let next = chars.get(i + 1);
            let extends = match kind {
                '@' => next.is_some_and(|&n| n.is_ascii_digit() || n == '-'),
                _ => next.is_some_and(|&n| n.is_ascii_digit() || n == '.' || n == '-'),
            };
            if !extends {
                match kind {
                    '@' => {
                        tags.default_override = Some(value.parse::<i64>().map_err(|_| {
                            ConvertError::BadSampleTag {
                                sample,
                                kind: "default sample override",
                                value: value.clone(),
                            }
                        })?);
                    }
                    'a' => {
                        tags.amplify = Some(value.parse::<f64>().map_err(|_| {
                            ConvertError::BadSampleTag {
                                sample,
                                kind: "amplifier",
                                value: value.clone(),
                            }
                        })?);
                    }
                    _ => {
                        tags.resample = Some(value.parse::<f64>().map_err(|_| {
                            ConvertError::BadSampleTag {
                                sample,
                                kind: "resampler",
                                value: value.clone(),
                            }
                        })?);
                    }
                }
                current = None;
                value.clear();
            }
        } else {
            match c {
                'a' | 'r' | '@' => current = Some(c),
                _ => {}
            }
        }
    }

    Ok(tags)
}
