//! Timeline events produced by the unroller and consumed by the emitter.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::sampconv::SampleEntry;

/// Number of output channels on the target chip.
pub const NUM_CHANNELS: usize = 8;

/// First MML instrument id handed out by the instrument dictionary.
pub const FIRST_MML_INSTRUMENT: u32 = 30;

/// What happens at a point on a channel's timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// A pitched note (0-119).
    Note(u8),
    /// Note off (key release).
    NoteOff,
    /// Note cut (immediate silence).
    NoteCut,
    /// Note fade.
    NoteFade,
    /// Instrument change.
    SetInstrument(u8),
    /// Channel volume (0-64).
    SetVolume(u8),
    /// Channel mix volume (Mxx).
    SetMixVolume(u8),
    /// Instrument global volume (0-128).
    SetInsVolume(u8),
    /// Sample global volume (0-64).
    SetSampleVolume(u8),
    /// Panning (0-255).
    SetPan(u8),
    /// Panning envelope position.
    SetPanEnv(u8),
    /// Surround mode (0x90 off, 0x91 on).
    SetSurround(u8),
    /// Vibrato parameter byte (speed nibble, depth nibble); 0 disables.
    SetVibrato(u8),
    /// Gain override (Zxx).
    SetGain(u8),
    /// Tempo change.
    SetTempo(u8),
    /// Global volume change (0-128).
    SetGlobalVolume(u8),
    /// A channel's echo routing toggled (global list only).
    EchoFlag {
        /// Channel the flag belongs to.
        channel: u8,
        /// New state.
        enabled: bool,
    },
    /// A channel's pitch-modulation routing toggled (global list only).
    PitchModFlag {
        /// Channel the flag belongs to.
        channel: u8,
        /// New state.
        enabled: bool,
    },
    /// Start of a new pattern (formatting hint).
    PattBreak,
    /// Start of a new measure (formatting hint).
    BarBreak,
    /// Loop point: playback resumes here after the song ends.
    LoopMark,
    /// Literal MML text to splice in.
    InlineMml(String),
    /// End of the channel's timeline.
    End,
}

/// One timeline event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Absolute playback tick.
    pub tick: u32,
    /// The event payload.
    pub kind: EventKind,
    /// Whether the event renders as output (flag deltas are bookkeeping).
    pub visible: bool,
}

impl Event {
    /// A visible event.
    pub fn new(tick: u32, kind: EventKind) -> Self {
        Self {
            tick,
            kind,
            visible: true,
        }
    }

    /// A bookkeeping-only event.
    pub fn hidden(tick: u32, kind: EventKind) -> Self {
        Self {
            tick,
            kind,
            visible: false,
        }
    }
}

/// Per-channel playback state tracked while unrolling.
///
/// Every field is a "last value" memory; effect memories follow the IT
/// per-channel parameter model.
#[derive(Debug, Clone)]
pub struct ChannelState {
    /// Last note value placed on the channel (including cut/off markers).
    pub last_note: Option<u8>,
    /// Current instrument.
    pub instrument: Option<u8>,
    /// Channel volume (0-64).
    pub volume: Option<u8>,
    /// Channel mix volume.
    pub mix_volume: Option<u8>,
    /// Surround state (0x90 off, 0x91 on).
    pub surround: u8,
    /// Panning (0-255).
    pub pan: u8,
    /// Panning envelope position.
    pub pan_env: u8,
    /// Instrument global volume.
    pub ins_volume: Option<u8>,
    /// Sample global volume.
    pub sample_volume: Option<u8>,
    /// Echo routing from the instrument's tag.
    pub echo_flag: bool,
    /// Pitch-mod routing from the instrument's tag.
    pub pmod_flag: bool,
    /// Vibrato parameter memory (Hxx).
    pub vibrato: u8,
    /// Whether vibrato is currently sounding.
    pub vibrato_on: bool,
    /// Gain override memory (Zxx).
    pub gain: Option<u8>,
    /// Fine volume-slide-up memory (volume column 65-74).
    pub fine_up: u8,
    /// Fine volume-slide-down memory (volume column 75-84).
    pub fine_down: u8,
    /// Volume-slide-up memory (volume column 85-94).
    pub slide_up: u8,
    /// Volume-slide-down memory (volume column 95-104).
    pub slide_down: u8,
    /// Shared Dxy parameter memory.
    pub slide_memory: u8,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            last_note: None,
            instrument: None,
            volume: None,
            mix_volume: None,
            surround: 0x90,
            pan: 0x80,
            pan_env: 32,
            ins_volume: None,
            sample_volume: None,
            echo_flag: false,
            pmod_flag: false,
            vibrato: 0,
            vibrato_on: false,
            gain: None,
            fine_up: 0,
            fine_down: 0,
            slide_up: 0,
            slide_down: 0,
            slide_memory: 0,
        }
    }
}

/// Output of the playback unroller.
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    /// Per-channel event streams, tick-monotonic.
    pub events: [Vec<Event>; NUM_CHANNELS],
    /// Cross-channel flag transitions, sorted by tick.
    pub global_events: Vec<Event>,
    /// One-based indices of samples that sound at least once.
    pub used_samples: BTreeSet<u8>,
    /// BRR filename and tuning per used sample, from the sample converter.
    pub sample_dict: BTreeMap<u8, SampleEntry>,
    /// MML instrument id per `(instrument, sample)` pair; sample 0 denotes
    /// noise.
    pub ins_dict: HashMap<(u8, u8), u32>,
    /// Insertion order of `ins_dict` keys.
    pub ins_list: Vec<(u8, u8)>,
    /// Tick the song loops back to (0 when the song does not loop).
    pub loop_tick: u32,
}

impl EventTable {
    /// Register a `(instrument, sample)` pair, handing out the next MML id.
    pub fn register_instrument(&mut self, instrument: u8, sample: u8) {
        let key = (instrument, sample);
        if !self.ins_dict.contains_key(&key) {
            self.ins_dict
                .insert(key, FIRST_MML_INSTRUMENT + self.ins_dict.len() as u32);
            self.ins_list.push(key);
        }
    }
}
