//! IT pattern data structures and the packed-stream decoder.

use crate::error::LoadError;
use crate::header::IT_MAX_CHANNELS;
use crate::reader::ByteReader;

/// Note column markers.
pub mod note {
    /// First value that no longer names a pitch (note fade range starts).
    pub const FIRST_SPECIAL: u8 = 120;
    /// Note cut.
    pub const CUT: u8 = 254;
    /// Note off.
    pub const OFF: u8 = 255;
}

/// IT effect command numbers (A = 1 .. Z = 26).
pub mod effect {
    /// Axx set speed.
    pub const SET_SPEED: u8 = 1;
    /// Bxx position jump.
    pub const POSITION_JUMP: u8 = 2;
    /// Cxx pattern break to row.
    pub const PATTERN_BREAK: u8 = 3;
    /// Dxy volume slide.
    pub const VOLUME_SLIDE: u8 = 4;
    /// Hxy vibrato.
    pub const VIBRATO: u8 = 8;
    /// Kxy vibrato + volume slide.
    pub const VIBRATO_VOL_SLIDE: u8 = 11;
    /// Lxy tone portamento + volume slide.
    pub const TONE_PORTA_VOL_SLIDE: u8 = 12;
    /// Mxx set channel volume.
    pub const SET_CHANNEL_VOL: u8 = 13;
    /// Sxy extended commands.
    pub const EXTENDED: u8 = 19;
    /// Txx set tempo.
    pub const TEMPO: u8 = 20;
    /// Vxx set global volume.
    pub const SET_GLOBAL_VOL: u8 = 22;
    /// Xxx set panning.
    pub const SET_PANNING: u8 = 24;
    /// Zxx MIDI macro (repurposed as a gain override downstream).
    pub const MIDI_MACRO: u8 = 26;
}

/// A single pattern cell. Absent columns stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItCell {
    /// Note value (0-119 pitch, 254 cut, 255 off, 120-253 fade).
    pub note: Option<u8>,
    /// Instrument number (1-99).
    pub instrument: Option<u8>,
    /// Volume column (0-64 level, 65-104 slides, 128-192 pan).
    pub volume: Option<u8>,
    /// Effect command and parameter.
    pub effect: Option<(u8, u8)>,
}

impl ItCell {
    /// The effect parameter when the given command is present.
    pub fn effect_arg(&self, command: u8) -> Option<u8> {
        match self.effect {
            Some((cmd, arg)) if cmd == command => Some(arg),
            _ => None,
        }
    }
}

/// IT pattern: rows of 64-channel cells.
#[derive(Debug, Clone)]
pub struct ItPattern {
    /// Row data: `rows[row][channel]`.
    pub rows: Vec<Vec<ItCell>>,
}

impl ItPattern {
    /// Create an empty pattern with the given number of rows.
    ///
    /// An order entry pointing at a zero offset plays as 64 empty rows.
    pub fn empty(num_rows: u16) -> Self {
        Self {
            rows: (0..num_rows)
                .map(|_| vec![ItCell::default(); IT_MAX_CHANNELS])
                .collect(),
        }
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Read a pattern block: 8-byte header (packed length, row count,
    /// reserved), then the packed stream.
    pub fn read(r: &mut ByteReader<'_>) -> Result<Self, LoadError> {
        let packed_len = r.read_u16()?;
        let num_rows = r.read_u16()?;
        let _reserved = r.read_u32()?;
        let data = r.read_bytes(packed_len as usize)?;

        let mut pattern = Self::empty(num_rows);
        pattern.unpack(&data)?;
        Ok(pattern)
    }

    /// Decode the packed stream into `self.rows`.
    ///
    /// Stream grammar: a channel byte of 0 ends the row; otherwise the low 6
    /// bits (minus one) select the channel and bit 7 announces a fresh mask
    /// byte, else the channel's previous mask repeats. Mask bits 1/2/4/8 read
    /// note/instrument/volume/effect data and update the channel's last-seen
    /// cell; bits 16/32/64/128 repeat the corresponding last-seen column.
    fn unpack(&mut self, data: &[u8]) -> Result<(), LoadError> {
        let mut r = ByteReader::new(data);
        let mut masks = [0u8; IT_MAX_CHANNELS];
        let mut last = [ItCell::default(); IT_MAX_CHANNELS];
        let mut row = 0usize;

        while (r.position() as usize) < data.len() {
            let chan_data = r.read_u8()?;
            if chan_data == 0 {
                row += 1;
                if row >= self.rows.len() {
                    break;
                }
                continue;
            }

            let chan = ((chan_data - 1) & 63) as usize;
            if chan_data & 128 != 0 {
                masks[chan] = r.read_u8()?;
            }
            let mask = masks[chan];
            let cell = &mut self.rows[row][chan];

            if mask & 1 != 0 {
                let v = r.read_u8()?;
                cell.note = Some(v);
                last[chan].note = Some(v);
            }
            if mask & 2 != 0 {
                let v = r.read_u8()?;
                cell.instrument = Some(v);
                last[chan].instrument = Some(v);
            }
            if mask & 4 != 0 {
                let v = r.read_u8()?;
                cell.volume = Some(v);
                last[chan].volume = Some(v);
            }
            if mask & 8 != 0 {
                let cmd = r.read_u8()?;
                let arg = r.read_u8()?;
                cell.effect = Some((cmd, arg));
                last[chan].effect = Some((cmd, arg));
            }
            if mask & 16 != 0 {
                cell.note = last[chan].note;
            }
            if mask & 32 != 0 {
                cell.instrument = last[chan].instrument;
            }
            if mask & 64 != 0 {
                cell.volume = last[chan].volume;
            }
            if mask & 128 != 0 {
                cell.effect = last[chan].effect;
            }
        }

        Ok(())
    }
}
