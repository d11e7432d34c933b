//! Shared fixtures: in-memory module construction and a canned sample
//! converter.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;

use it2amk_it::header::ItHeader;
use it2amk_it::instrument::{ItEnvelope, ItInstrument};
use it2amk_it::pattern::{ItCell, ItPattern};
use it2amk_it::sample::{sample_flags, ItSample};
use it2amk_it::ItModule;
use it2amk_mml::error::ConvertError;
use it2amk_mml::sampconv::SampleEntry;
use it2amk_mml::SampleConverter;

pub fn header(orders: Vec<u8>) -> ItHeader {
    ItHeader {
        name: "fixture".to_string(),
        highlight_minor: 4,
        highlight_major: 16,
        cwt_v: 0x0214,
        cmwt: 0x0214,
        flags: 0x000D,
        special: 0,
        global_volume: 128,
        mix_volume: 48,
        initial_speed: 6,
        initial_tempo: 125,
        separation: 128,
        pitch_wheel_depth: 0,
        channel_pan: [32; 64],
        channel_vol: [64; 64],
        orders,
    }
}

pub fn instrument(name: &str) -> ItInstrument {
    ItInstrument {
        filename: String::new(),
        name: name.to_string(),
        nna: 0,
        dct: 0,
        dca: 0,
        fadeout: 256,
        pitch_pan_separation: 0,
        pitch_pan_center: 60,
        global_volume: 128,
        default_pan: 32,
        random_volume: 0,
        random_pan: 0,
        filter_cutoff: 0,
        filter_resonance: 0,
        midi_channel: 0,
        midi_program: 0,
        midi_bank: 0,
        sample_map: (0..120).map(|n| (n, 1)).collect(),
        volume_envelope: ItEnvelope::default(),
        panning_envelope: ItEnvelope::default(),
        pitch_envelope: ItEnvelope::default(),
    }
}

pub fn sample(name: &str) -> ItSample {
    ItSample {
        filename: String::new(),
        name: name.to_string(),
        global_volume: 64,
        flags: sample_flags::HAS_DATA,
        default_volume: 64,
        convert: 0x01,
        default_pan: 0,
        loop_begin: 0,
        loop_end: 0,
        c5_speed: 8363,
        sustain_loop_begin: 0,
        sustain_loop_end: 0,
        vibrato_speed: 0,
        vibrato_depth: 0,
        vibrato_type: 0,
        vibrato_rate: 0,
        data: vec![0; 16],
    }
}

/// A module with one instrument, one sample and the given patterns.
pub fn module(orders: Vec<u8>, patterns: Vec<ItPattern>) -> ItModule {
    ItModule {
        header: header(orders),
        message: String::new(),
        instruments: vec![instrument("lead")],
        samples: vec![sample("wave")],
        patterns,
    }
}

pub fn pattern(num_rows: u16) -> ItPattern {
    ItPattern::empty(num_rows)
}

pub fn note_cell(note: u8, instrument: u8) -> ItCell {
    ItCell {
        note: Some(note),
        instrument: Some(instrument),
        volume: None,
        effect: None,
    }
}

pub fn effect_cell(effect: u8, arg: u8) -> ItCell {
    ItCell {
        note: None,
        instrument: None,
        volume: None,
        effect: Some((effect, arg)),
    }
}

/// Sample converter that never touches the filesystem.
pub struct FixtureConverter {
    pub lines: Vec<String>,
}

impl FixtureConverter {
    pub fn single(name: &str, tuning: &str) -> Self {
        Self {
            lines: vec![format!("\"{}\" {}", name, tuning)],
        }
    }
}

impl SampleConverter for FixtureConverter {
    fn convert(
        &self,
        _module_path: &Path,
        _use_mask: &str,
        _ratios: &[(String, String)],
    ) -> Result<Vec<String>, ConvertError> {
        Ok(self.lines.clone())
    }
}

/// Sample dictionary for tests that bypass the converter.
pub fn sample_dict(entries: &[(u8, &str, &str)]) -> BTreeMap<u8, SampleEntry> {
    entries
        .iter()
        .map(|&(idx, name, tuning)| {
            (
                idx,
                SampleEntry {
                    name: name.to_string(),
                    tuning: tuning.to_string(),
                },
            )
        })
        .collect()
}
