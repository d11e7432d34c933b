//! IT sample structures, header parsing and payload loading.

use crate::compress::{decompress16, decompress8};
use crate::error::LoadError;
use crate::reader::ByteReader;

/// IT sample magic identifier.
pub const IT_SAMPLE_MAGIC: &[u8; 4] = b"IMPS";

/// IT sample header size.
pub const IT_SAMPLE_HEADER_SIZE: usize = 80;

/// Sample flags.
pub mod sample_flags {
    /// Sample has data.
    pub const HAS_DATA: u8 = 0x01;
    /// 16-bit sample.
    pub const BITS_16: u8 = 0x02;
    /// Stereo sample.
    pub const STEREO: u8 = 0x04;
    /// Compressed sample.
    pub const COMPRESSED: u8 = 0x08;
    /// Loop enabled.
    pub const LOOP: u8 = 0x10;
    /// Sustain loop enabled.
    pub const SUSTAIN_LOOP: u8 = 0x20;
    /// Ping-pong loop.
    pub const LOOP_PINGPONG: u8 = 0x40;
    /// Ping-pong sustain loop.
    pub const SUSTAIN_PINGPONG: u8 = 0x80;
}

/// Convert flags.
pub mod convert_flags {
    /// Signed samples.
    pub const SIGNED: u8 = 0x01;
    /// Big-endian (not typically used).
    pub const BIG_ENDIAN: u8 = 0x02;
    /// Delta encoded; on compressed samples selects IT 2.15 compression.
    pub const DELTA: u8 = 0x04;
}

/// IT sample definition.
#[derive(Debug, Clone)]
pub struct ItSample {
    /// DOS filename (12 characters).
    pub filename: String,
    /// Sample name (25 characters max).
    pub name: String,
    /// Global volume (0-64).
    pub global_volume: u8,
    /// Sample flags.
    pub flags: u8,
    /// Default volume (0-64).
    pub default_volume: u8,
    /// Convert flags.
    pub convert: u8,
    /// Default panning, raw byte (bit 7 set means the pan applies).
    pub default_pan: u8,
    /// Loop begin (in samples).
    pub loop_begin: u32,
    /// Loop end (in samples).
    pub loop_end: u32,
    /// C-5 speed (sample rate for C-5 playback).
    pub c5_speed: u32,
    /// Sustain loop begin.
    pub sustain_loop_begin: u32,
    /// Sustain loop end.
    pub sustain_loop_end: u32,
    /// Vibrato speed.
    pub vibrato_speed: u8,
    /// Vibrato depth.
    pub vibrato_depth: u8,
    /// Vibrato type.
    pub vibrato_type: u8,
    /// Vibrato rate.
    pub vibrato_rate: u8,
    /// Decoded PCM bytes.
    pub data: Vec<u8>,
}

impl ItSample {
    /// True when the sample holds data.
    pub fn is_sample(&self) -> bool {
        self.flags & sample_flags::HAS_DATA != 0
    }

    /// True for 16-bit data.
    pub fn is_16bit(&self) -> bool {
        self.flags & sample_flags::BITS_16 != 0
    }

    /// True for stereo data.
    pub fn is_stereo(&self) -> bool {
        self.flags & sample_flags::STEREO != 0
    }

    /// True when the payload was stored compressed.
    pub fn is_compressed(&self) -> bool {
        self.flags & sample_flags::COMPRESSED != 0
    }

    /// True when the loop is enabled.
    pub fn is_looped(&self) -> bool {
        self.flags & sample_flags::LOOP != 0
    }

    /// True when the sustain loop is enabled.
    pub fn is_sustain_looped(&self) -> bool {
        self.flags & sample_flags::SUSTAIN_LOOP != 0
    }

    /// Bytes per sample frame.
    pub fn frame_size(&self) -> usize {
        (if self.is_16bit() { 2 } else { 1 }) * (if self.is_stereo() { 2 } else { 1 })
    }

    /// Length of the decoded data in samples.
    pub fn len_samples(&self) -> usize {
        self.data.len() / self.frame_size()
    }

    /// Read one sample header and its payload. `index` is the one-based
    /// sample number, used for error reporting. The reader must be
    /// positioned at the sample's header offset.
    pub fn read(r: &mut ByteReader<'_>, index: usize) -> Result<Self, LoadError> {
        r.expect_magic(IT_SAMPLE_MAGIC)?;
        let filename = r.read_name(12, 12)?;

        let _zero = r.read_u8()?;
        let global_volume = r.read_u8()?;
        let flags = r.read_u8()?;
        let default_volume = r.read_u8()?;
        let name = r.read_name(26, 25)?;
        let convert = r.read_u8()?;
        let default_pan = r.read_u8()?;

        let length = r.read_u32()?;
        let loop_begin = r.read_u32()?;
        let loop_end = r.read_u32()?;
        let c5_speed = r.read_u32()?;
        let sustain_loop_begin = r.read_u32()?;
        let sustain_loop_end = r.read_u32()?;
        let data_offset = r.read_u32()?;
        let vibrato_speed = r.read_u8()?;
        let vibrato_depth = r.read_u8()?;
        let vibrato_type = r.read_u8()?;
        let vibrato_rate = r.read_u8()?;

        let mut sample = Self {
            filename,
            name,
            global_volume,
            flags,
            default_volume,
            convert,
            default_pan,
            loop_begin,
            loop_end,
            c5_speed,
            sustain_loop_begin,
            sustain_loop_end,
            vibrato_speed,
            vibrato_depth,
            vibrato_type,
            vibrato_rate,
            data: Vec::new(),
        };

        if sample.is_sample() && length > 0 {
            let offset = data_offset as usize;
            let image = r.data();
            if offset > image.len() {
                return Err(LoadError::Truncated {
                    offset: data_offset as u64,
                });
            }
            let payload = &image[offset..];

            if sample.is_compressed() {
                let it215 = sample.convert & convert_flags::DELTA != 0;
                let count = length as usize * if sample.is_stereo() { 2 } else { 1 };
                sample.data = if sample.is_16bit() {
                    decompress16(payload, count, it215, index)?
                } else {
                    decompress8(payload, count, it215, index)?
                };
                debug_assert_eq!(
                    sample.data.len(),
                    length as usize * sample.frame_size()
                );
            } else {
                let byte_len = length as usize * sample.frame_size();
                if payload.len() < byte_len {
                    return Err(LoadError::Truncated {
                        offset: image.len() as u64,
                    });
                }
                sample.data = payload[..byte_len].to_vec();
            }
        }

        Ok(sample)
    }

    /// Name and filename joined, the way override tags are scanned.
    pub fn tag_text(&self) -> String {
        format!("{}{}", self.name, self.filename)
    }
}
