//! IT file header structures and constants.

use crate::error::LoadError;
use crate::reader::ByteReader;

/// IT file magic identifier.
pub const IT_MAGIC: &[u8; 4] = b"IMPM";

/// Oldest compatible-with version the loader accepts (IT 2.00).
pub const IT_CMWT_MIN: u16 = 0x0200;

/// Fixed header length before the order list begins.
pub const IT_HEADER_SIZE: u64 = 192;

/// Maximum number of channels in IT format.
pub const IT_MAX_CHANNELS: usize = 64;

/// Highest order entry that names a real pattern.
pub const IT_MAX_PATTERN_ORDER: u8 = 199;

/// IT module flags.
pub mod flags {
    /// Stereo output.
    pub const STEREO: u16 = 0x01;
    /// Vol0MixOptimizations.
    pub const VOL0_MIX: u16 = 0x02;
    /// Use instruments (vs samples only).
    pub const USE_INSTRUMENTS: u16 = 0x04;
    /// Linear slides.
    pub const LINEAR_SLIDES: u16 = 0x08;
    /// Old effects (for compatibility).
    pub const OLD_EFFECTS: u16 = 0x10;
    /// Link effect G memory.
    pub const LINK_G_MEMORY: u16 = 0x20;
}

/// IT special flags.
pub mod special {
    /// Song message present.
    pub const MESSAGE: u16 = 0x01;
}

/// Order table markers.
pub mod order {
    /// End of order list.
    pub const END: u8 = 255;
    /// Skip this order.
    pub const SKIP: u8 = 254;
}

/// IT module header data.
#[derive(Debug, Clone)]
pub struct ItHeader {
    /// Song name (25 characters max).
    pub name: String,
    /// Pattern highlight minor (rows per beat).
    pub highlight_minor: u8,
    /// Pattern highlight major (rows per measure).
    pub highlight_major: u8,
    /// Created with tracker version.
    pub cwt_v: u16,
    /// Compatible with version.
    pub cmwt: u16,
    /// Module flags.
    pub flags: u16,
    /// Special flags.
    pub special: u16,
    /// Global volume (0-128).
    pub global_volume: u8,
    /// Mix volume (0-128).
    pub mix_volume: u8,
    /// Initial speed (ticks per row).
    pub initial_speed: u8,
    /// Initial tempo (BPM).
    pub initial_tempo: u8,
    /// Stereo separation (0-128).
    pub separation: u8,
    /// Pitch wheel depth.
    pub pitch_wheel_depth: u8,
    /// Channel panning defaults (64 channels).
    pub channel_pan: [u8; IT_MAX_CHANNELS],
    /// Channel volume defaults (64 channels).
    pub channel_vol: [u8; IT_MAX_CHANNELS],
    /// Order list.
    pub orders: Vec<u8>,
}

/// Counts and offsets pulled out of the fixed header, consumed by the loader
/// and discarded once the tables are read.
#[derive(Debug, Clone)]
pub struct ItHeaderTables {
    pub instrument_offsets: Vec<u32>,
    pub sample_offsets: Vec<u32>,
    pub pattern_offsets: Vec<u32>,
    pub message_length: u16,
    pub message_offset: u32,
}

impl ItHeader {
    /// Parse the fixed header, channel defaults, order list and the three
    /// offset tables. The reader must be positioned at offset 0.
    pub fn read(r: &mut ByteReader<'_>) -> Result<(Self, ItHeaderTables), LoadError> {
        r.expect_magic(IT_MAGIC)?;
        let raw_name = r.read_bytes(26)?;
        let name_end = raw_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(raw_name.len());
        let name = String::from_utf8_lossy(&raw_name[..name_end]).into_owned();

        let highlight_minor = r.read_u8()?;
        let highlight_major = r.read_u8()?;
        let order_count = r.read_u16()?;
        let instrument_count = r.read_u16()?;
        let sample_count = r.read_u16()?;
        let pattern_count = r.read_u16()?;
        let cwt_v = r.read_u16()?;
        let cmwt = r.read_u16()?;
        if cmwt < IT_CMWT_MIN {
            return Err(LoadError::UnsupportedVersion { cmwt });
        }
        let flags = r.read_u16()?;
        let special = r.read_u16()?;
        let global_volume = r.read_u8()?;
        let mix_volume = r.read_u8()?;
        let initial_speed = r.read_u8()?;
        let initial_tempo = r.read_u8()?;
        let separation = r.read_u8()?;
        let pitch_wheel_depth = r.read_u8()?;
        let message_length = r.read_u16()?;
        let message_offset = r.read_u32()?;
        let _reserved = r.read_u32()?;
        debug_assert_eq!(r.position(), 0x40);

        let mut channel_pan = [0u8; IT_MAX_CHANNELS];
        for pan in channel_pan.iter_mut() {
            *pan = r.read_u8()?;
        }
        let mut channel_vol = [0u8; IT_MAX_CHANNELS];
        for vol in channel_vol.iter_mut() {
            *vol = r.read_u8()?;
        }
        debug_assert_eq!(r.position(), IT_HEADER_SIZE);

        let orders = r.read_bytes(order_count as usize)?;

        let mut instrument_offsets = Vec::with_capacity(instrument_count as usize);
        for _ in 0..instrument_count {
            instrument_offsets.push(r.read_u32()?);
        }
        let mut sample_offsets = Vec::with_capacity(sample_count as usize);
        for _ in 0..sample_count {
            sample_offsets.push(r.read_u32()?);
        }
        let mut pattern_offsets = Vec::with_capacity(pattern_count as usize);
        for _ in 0..pattern_count {
            pattern_offsets.push(r.read_u32()?);
        }

        Ok((
            Self {
                name,
                highlight_minor,
                highlight_major,
                cwt_v,
                cmwt,
                flags,
                special,
                global_volume,
                mix_volume,
                initial_speed,
                initial_tempo,
                separation,
                pitch_wheel_depth,
                channel_pan,
                channel_vol,
                orders,
            },
            ItHeaderTables {
                instrument_offsets,
                sample_offsets,
                pattern_offsets,
                message_length,
                message_offset,
            },
        ))
    }

    /// Whether the header announces a song message.
    pub fn has_message(&self) -> bool {
        self.special & special::MESSAGE != 0
    }
}
