//! IT instrument structures and parsing.

use crate::error::LoadError;
use crate::reader::ByteReader;

/// IT instrument magic identifier.
pub const IT_INSTRUMENT_MAGIC: &[u8; 4] = b"IMPI";

/// IT instrument block size.
pub const IT_INSTRUMENT_SIZE: usize = 554;

/// Number of entries in the note-to-sample map.
pub const SAMPLE_MAP_LEN: usize = 120;

/// Envelope flags.
pub mod env_flags {
    /// Envelope enabled.
    pub const ENABLED: u8 = 0x01;
    /// Loop enabled.
    pub const LOOP: u8 = 0x02;
    /// Sustain loop enabled.
    pub const SUSTAIN_LOOP: u8 = 0x04;
}

/// IT envelope node.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItEnvelopeNode {
    /// Tick position.
    pub tick: u16,
    /// Value (0-64 for volume/panning, -32 to 32 for pitch).
    pub y: i8,
}

/// IT envelope: flags, loop indices and up to 25 nodes.
#[derive(Debug, Clone, Default)]
pub struct ItEnvelope {
    /// Envelope enabled.
    pub enabled: bool,
    /// Loop enabled.
    pub loop_on: bool,
    /// Sustain loop enabled.
    pub sustain_loop_on: bool,
    /// Number of meaningful nodes.
    pub num_nodes: u8,
    /// Loop begin node index.
    pub loop_begin: u8,
    /// Loop end node index.
    pub loop_end: u8,
    /// Sustain loop begin node index.
    pub sustain_begin: u8,
    /// Sustain loop end node index.
    pub sustain_end: u8,
    /// All 25 stored nodes; only the first `num_nodes` are meaningful.
    pub nodes: Vec<ItEnvelopeNode>,
}

impl ItEnvelope {
    /// Read the 82-byte envelope record (6-byte header, 25 nodes, pad).
    pub fn read(r: &mut ByteReader<'_>) -> Result<Self, LoadError> {
        let flags = r.read_u8()?;
        let num_nodes = r.read_u8()?;
        let loop_begin = r.read_u8()?;
        let loop_end = r.read_u8()?;
        let sustain_begin = r.read_u8()?;
        let sustain_end = r.read_u8()?;

        let mut nodes = Vec::with_capacity(25);
        for _ in 0..25 {
            let y = r.read_i8()?;
            let tick = r.read_u16()?;
            nodes.push(ItEnvelopeNode { tick, y });
        }
        let _pad = r.read_u8()?;

        Ok(Self {
            enabled: flags & env_flags::ENABLED != 0,
            loop_on: flags & env_flags::LOOP != 0,
            sustain_loop_on: flags & env_flags::SUSTAIN_LOOP != 0,
            num_nodes,
            loop_begin,
            loop_end,
            sustain_begin,
            sustain_end,
            nodes,
        })
    }

    /// The meaningful nodes.
    pub fn active_nodes(&self) -> &[ItEnvelopeNode] {
        &self.nodes[..(self.num_nodes as usize).min(self.nodes.len())]
    }
}

/// IT instrument definition.
#[derive(Debug, Clone)]
pub struct ItInstrument {
    /// DOS filename (12 characters).
    pub filename: String,
    /// Instrument name (25 characters max).
    pub name: String,
    /// New Note Action.
    pub nna: u8,
    /// Duplicate Check Type.
    pub dct: u8,
    /// Duplicate Check Action.
    pub dca: u8,
    /// Fadeout value (1-1024).
    pub fadeout: u16,
    /// Pitch-pan separation.
    pub pitch_pan_separation: i8,
    /// Pitch-pan center note.
    pub pitch_pan_center: u8,
    /// Global volume (0-128).
    pub global_volume: u8,
    /// Default pan, raw byte (0-127 pan value; 128 means unset).
    pub default_pan: u8,
    /// Random volume variation.
    pub random_volume: u8,
    /// Random pan variation.
    pub random_pan: u8,
    /// Initial filter cutoff.
    pub filter_cutoff: u8,
    /// Initial filter resonance.
    pub filter_resonance: u8,
    /// MIDI channel.
    pub midi_channel: u8,
    /// MIDI program.
    pub midi_program: u8,
    /// MIDI bank.
    pub midi_bank: u16,
    /// Note-to-sample mapping table, 120 entries of (note, sample).
    pub sample_map: Vec<(u8, u8)>,
    /// Volume envelope.
    pub volume_envelope: ItEnvelope,
    /// Panning envelope.
    pub panning_envelope: ItEnvelope,
    /// Pitch/filter envelope.
    pub pitch_envelope: ItEnvelope,
}

impl ItInstrument {
    /// Read one instrument block. The reader must be positioned at its
    /// offset.
    pub fn read(r: &mut ByteReader<'_>) -> Result<Self, LoadError> {
        r.expect_magic(IT_INSTRUMENT_MAGIC)?;
        let filename = r.read_name(12, 12)?;

        let _zero = r.read_u8()?;
        let nna = r.read_u8()?;
        let dct = r.read_u8()?;
        let dca = r.read_u8()?;
        let fadeout = r.read_u16()?;
        let pitch_pan_separation = r.read_i8()?;
        let pitch_pan_center = r.read_u8()?;
        let global_volume = r.read_u8()?;
        let default_pan = r.read_u8()?;
        let random_volume = r.read_u8()?;
        let random_pan = r.read_u8()?;
        // Tracker version and sample count, meaningful in instrument files
        // only.
        let _ = r.read_u32()?;

        let name = r.read_name(26, 25)?;

        let filter_cutoff = r.read_u8()?;
        let filter_resonance = r.read_u8()?;
        let midi_channel = r.read_u8()?;
        let midi_program = r.read_u8()?;
        let midi_bank = r.read_u16()?;

        let mut sample_map = Vec::with_capacity(SAMPLE_MAP_LEN);
        for _ in 0..SAMPLE_MAP_LEN {
            let note = r.read_u8()?;
            let sample = r.read_u8()?;
            sample_map.push((note, sample));
        }

        let volume_envelope = ItEnvelope::read(r)?;
        let panning_envelope = ItEnvelope::read(r)?;
        let pitch_envelope = ItEnvelope::read(r)?;
        let _dummy = r.read_u32()?;

        Ok(Self {
            filename,
            name,
            nna,
            dct,
            dca,
            fadeout,
            pitch_pan_separation,
            pitch_pan_center,
            global_volume,
            default_pan,
            random_volume,
            random_pan,
            filter_cutoff,
            filter_resonance,
            midi_channel,
            midi_program,
            midi_bank,
            sample_map,
            volume_envelope,
            panning_envelope,
            pitch_envelope,
        })
    }

    /// Sample index mapped for a note (0 when unmapped).
    pub fn sample_for_note(&self, note: u8) -> u8 {
        self.sample_map
            .get(note as usize)
            .map(|&(_, sample)| sample)
            .unwrap_or(0)
    }

    /// Remapped note value for a note.
    pub fn note_for_note(&self, note: u8) -> u8 {
        self.sample_map
            .get(note as usize)
            .map(|&(mapped, _)| mapped)
            .unwrap_or(note)
    }

    /// Name and filename joined, the way override tags are scanned.
    pub fn tag_text(&self) -> String {
        format!("{}{}", self.name, self.filename)
    }
}
