//! MML emitter: renders the event table as an AddmusicK source document.
//!
//! Channel text is built by walking events pairwise; the gap to the next
//! event becomes the note or tie length. Each channel tracks the values it
//! last wrote (instrument, volume, pan, vibrato, gain) and elides commands
//! that would not change anything.

use std::collections::HashMap;

use it2amk_it::ItModule;

use crate::adsr::AdsrFitter;
use crate::config::{Options, PanningMode, VolumeCurve};
use crate::event::{Event, EventKind, EventTable, NUM_CHANNELS};
use crate::tags::{InstrumentTags, ModuleTags};

/// The SPC700 panning law, indexed 0..=20 from one side.
pub const SMW_PAN_TABLE: [u8; 21] = [
    0x00, 0x01, 0x03, 0x07, 0x0D, 0x15, 0x1E, 0x29, 0x34, 0x42, 0x51, 0x5E, 0x67, 0x6E, 0x73,
    0x77, 0x7A, 0x7C, 0x7D, 0x7E, 0x7F,
];

const NOTE_NAMES: [&str; 12] = [
    "c", "c+", "d", "d+", "e", "f", "f+", "g", "g+", "a", "a+", "b",
];

/// Inverse of the engine's volume curve: the smallest v whose curve output
/// is closest to `level` (linear and square-law modes map directly).
pub fn inverse_volume(level: i64, curve: VolumeCurve) -> u8 {
    match curve {
        VolumeCurve::Linear => level.clamp(0, 255) as u8,
        VolumeCurve::Squared => {
            (255.0 * (level as f64 / 255.0).sqrt()).round().clamp(0.0, 255.0) as u8
        }
        VolumeCurve::Accurate => {
            if level == 0 {
                return 0;
            }
            let mut min_diff = f64::from(u16::MAX);
            let mut min_val = 0u8;
            for v in 0..=255i64 {
                let vv = (v * 0xFF) >> 8;
                let vv = (vv * vv) >> 8;
                let vv = (vv * 0x51) >> 8;
                let vv = (vv * 0xFC) >> 8;
                let l = vv as f64 * 255.0 / f64::from(0x4D);
                let diff = (l - level as f64).abs();
                if diff < min_diff {
                    min_diff = diff;
                    min_val = v as u8;
                }
            }
            min_val
        }
    }
}

/// Fit an IT pan position (post-envelope, 0-255) against the SPC pan law.
///
/// Returns the pan index and the retained normalization `254/(left+right)`
/// of the chosen normalized pair.
pub fn fit_pan(it_pan: i32) -> (u8, f64) {
    let lvol = f64::from(it_pan.max(1) - 1);
    let rvol = f64::from(255 - it_pan.max(1));

    let mut base_pan = 10u8;
    let mut best_diff = f64::MAX;
    let mut norm = 1.0;
    for p in 0..SMW_PAN_TABLE.len() {
        let left = f64::from(SMW_PAN_TABLE[p]);
        let right = f64::from(SMW_PAN_TABLE[20 - p]);
        let scale = 254.0 / (left + right);
        let left = left * scale;
        let right = right * scale;

        let diff = (left - lvol).abs() + (right - rvol).abs();
        if diff < best_diff {
            base_pan = p as u8;
            best_diff = diff;
            norm = 254.0 / (left + right);
        }
    }
    (base_pan, norm)
}

/// Effect-state mirror rebuilt from the event stream while emitting.
#[derive(Debug, Clone)]
struct HState {
    instrument: Option<u8>,
    volume: Option<u8>,
    mix_volume: Option<u8>,
    ins_volume: Option<u8>,
    sample_volume: Option<u8>,
    pan: Option<u8>,
    pan_env: Option<u8>,
    surround: Option<u8>,
    vibrato: u8,
    gain: Option<u8>,
}

impl Default for HState {
    fn default() -> Self {
        Self {
            instrument: None,
            volume: None,
            mix_volume: None,
            ins_volume: None,
            sample_volume: None,
            pan: Some(0x80),
            pan_env: None,
            surround: Some(0x90),
            vibrato: 0,
            gain: None,
        }
    }
}

/// Last values written to the channel's text.
#[derive(Debug, Clone)]
struct MmlChannelState {
    octave: Option<i32>,
    note: Option<&'static str>,
    instrument: Option<u32>,
    volume: Option<u8>,
    pan: Option<(u8, u8, u8)>,
    vibrato: Option<(u8, u8, u8)>,
    noise: Option<u8>,
    amp: Option<u8>,
    gain: Option<u8>,
    echo_enabled: bool,
    hstate: HState,
}

impl Default for MmlChannelState {
    fn default() -> Self {
        Self {
            octave: None,
            note: None,
            instrument: None,
            volume: None,
            pan: None,
            vibrato: Some((0, 0, 0)),
            noise: None,
            amp: Some(0),
            gain: None,
            echo_enabled: false,
            hstate: HState::default(),
        }
    }
}

/// Renders one module + event table as MML text.
pub struct MmlEmitter<'a> {
    module: &'a ItModule,
    table: &'a EventTable,
    tags: &'a ModuleTags,
    options: &'a Options,
    stem: &'a str,
    txt: String,
    states: Vec<MmlChannelState>,
    echo_volume: (u8, u8),
    echo_set: bool,
    release_overrides: HashMap<u8, String>,
}

impl<'a> MmlEmitter<'a> {
    /// Render the whole document.
    pub fn render(
        module: &'a ItModule,
        table: &'a EventTable,
        tags: &'a ModuleTags,
        options: &'a Options,
        stem: &'a str,
    ) -> String {
        let mut emitter = Self {
            module,
            table,
            tags,
            options,
            stem,
            txt: String::new(),
            states: vec![MmlChannelState::default(); NUM_CHANNELS],
            echo_volume: (0, 0),
            echo_set: false,
            release_overrides: HashMap::new(),
        };
        emitter.add_amk_header();
        emitter.add_spc_info();
        emitter.add_sample_info();
        emitter.add_ins_info();
        emitter.add_init_info();
        emitter.convert();
        emitter.txt
    }

    fn append(&mut self, s: &str) {
        self.txt.push_str(s);
    }

    /// Append surrounded by single spaces, collapsing doubles.
    fn append_spaced(&mut self, s: &str) {
        if !self.txt.ends_with(' ') {
            self.txt.push(' ');
        }
        self.txt.push_str(s);
        self.txt.push(' ');
    }

    fn instrument_tags(&self, instrument: Option<u8>) -> InstrumentTags {
        instrument
            .map(|i| self.tags.instrument(i))
            .unwrap_or_default()
    }

    // ----- document header blocks -----

    fn add_amk_header(&mut self) {
        self.append("#amk 2\n\n");
    }

    fn sanitize(text: &str) -> String {
        text.replace('\r', "").replace('\n', " ").replace('"', "'")
    }

    fn add_spc_info(&mut self) {
        let mut spc = String::from("#SPC\n{\n");
        let mut any = false;

        if !self.module.header.name.is_empty() {
            any = true;
            spc.push_str(&format!(
                "    #title   \"{}\"\n",
                Self::sanitize(&self.module.header.name)
            ));
        }
        if !self.options.game.is_empty() {
            any = true;
            spc.push_str(&format!("    #game    \"{}\"\n", Self::sanitize(&self.options.game)));
        }
        if !self.options.author.is_empty() {
            any = true;
            spc.push_str(&format!(
                "    #author  \"{}\"\n",
                Self::sanitize(&self.options.author)
            ));
        }
        if !self.options.length.is_empty() {
            any = true;
            spc.push_str(&format!(
                "    #length  \"{}\"\n",
                Self::sanitize(&self.options.length)
            ));
        }
        if !self.module.message.is_empty() {
            any = true;
            // Flag regions between backticks are configuration, not comment.
            let msg = Self::sanitize(&self.module.message);
            let mut visible = String::new();
            let mut interpret = false;
            for ch in msg.chars() {
                if ch == '`' {
                    interpret = !interpret;
                } else if !interpret {
                    visible.push(ch);
                }
            }
            spc.push_str(&format!("    #comment \"{}\"\n", visible.trim()));
        }
        spc.push_str("}\n\n");

        if any {
            self.append(&spc);
        }
    }

    fn add_sample_info(&mut self) {
        if self.table.sample_dict.is_empty() {
            return;
        }
        let mut text = format!("#path \"{}\"\n\n#samples\n{{\n", self.stem);
        for entry in self.table.sample_dict.values() {
            text.push_str(&format!("    \"{}\"\n", entry.name));
        }
        text.push_str("}\n\n");
        self.append(&text);
    }

    fn add_ins_info(&mut self) {
        let module = self.module;
        let table = self.table;
        let module_tags = self.tags;
        let fitter = AdsrFitter::new(module.header.initial_tempo);
        let mut text = String::from("#instruments\n{\n");

        for &(ins, samp) in &table.ins_list {
            let (samp_name, samp_tuning) = if samp > 0 {
                table
                    .sample_dict
                    .get(&samp)
                    .map(|e| (e.name.clone(), e.tuning.clone()))
                    .unwrap_or_default()
            } else {
                // Noise instruments borrow the first real sample's slot.
                table
                    .sample_dict
                    .values()
                    .next()
                    .map(|e| (e.name.clone(), e.tuning.clone()))
                    .unwrap_or_default()
            };

            let tags = module_tags.instrument(ins);
            let adsr = match tags.adsr {
                Some(a) => a,
                None => {
                    let fit = module
                        .instruments
                        .get(ins as usize - 1)
                        .map(|i| fitter.fit(&i.volume_envelope))
                        .unwrap_or_else(|| fitter.fit(&Default::default()));
                    if let Some(release) = fit.release {
                        if tags.release.is_none() {
                            self.release_overrides.entry(ins).or_insert(release);
                        }
                    }
                    fit.adsr
                }
            };
            let adsr = adsr.to_ascii_uppercase();
            let adsr_gain = format!("${} ${} ${}", &adsr[0..2], &adsr[2..4], &adsr[4..6]);

            text.push_str(&format!(
                "    {:<32} {} {}{}\n",
                format!("\"{}\"", samp_name),
                adsr_gain,
                samp_tuning,
                if samp == 0 { " ; noise" } else { "" }
            ));
        }

        text.push_str("}\n\n");
        self.append(&text);
    }

    fn add_init_info(&mut self) {
        let mut init = String::new();
        let gv = f64::from(self.module.header.global_volume);
        init.push_str(&format!("w{} ", (255.0 * (gv / 128.0).sqrt()).round() as i64));
        init.push_str(&format!("t{}\n\n", self.tempo_value(self.module.header.initial_tempo)));

        let echo = &self.options.echo;
        if !echo.is_empty() {
            self.echo_volume = (
                u8::from_str_radix(&echo[4..6], 16).unwrap_or(0),
                u8::from_str_radix(&echo[6..8], 16).unwrap_or(0),
            );
            init.push_str(&format!(
                "$EF $00 ${} ${}\n",
                echo[4..6].to_ascii_uppercase(),
                echo[6..8].to_ascii_uppercase()
            ));
            init.push_str(&format!(
                "$F1 ${} ${} $01\n\n",
                echo[0..2].to_ascii_uppercase(),
                echo[2..4].to_ascii_uppercase()
            ));
        }
        let fir = &self.options.fir;
        if !fir.is_empty() {
            init.push_str("$F5");
            for i in 0..8 {
                init.push_str(&format!(" ${}", fir[2 * i..2 * i + 2].to_ascii_uppercase()));
            }
            init.push_str("\n\n");
        }
        let master = &self.options.master;
        if !master.is_empty() {
            init.push_str(&format!("$F6 $0C ${}\n", master[0..2].to_ascii_uppercase()));
            init.push_str(&format!("$F6 $1C ${}\n\n", master[2..4].to_ascii_uppercase()));
        }
        if self.options.legato {
            init.push_str("$F4 $02\n\n");
        }

        if self.table.loop_tick == 0 {
            self.append(&format!("{}/\n\n", init));
        } else {
            self.append(&init);
        }
    }

    // ----- cross-channel flag masks -----

    fn echo_mask(&self, tick: u32) -> u8 {
        let mut flags = [false; NUM_CHANNELS];
        for e in &self.table.global_events {
            if e.tick >= tick {
                break;
            }
            if let EventKind::EchoFlag { channel, enabled } = e.kind {
                flags[channel as usize % NUM_CHANNELS] = enabled;
            }
        }
        flags
            .iter()
            .enumerate()
            .fold(0u8, |m, (c, &on)| if on { m | (1 << c) } else { m })
    }

    fn pmod_mask(&self, tick: u32) -> u8 {
        let mut flags = [false; NUM_CHANNELS];
        for e in &self.table.global_events {
            if e.tick > tick {
                break;
            }
            if let EventKind::PitchModFlag { channel, enabled } = e.kind {
                flags[channel as usize % NUM_CHANNELS] = enabled;
            }
        }
        flags
            .iter()
            .enumerate()
            .fold(0u8, |m, (c, &on)| if on { m | (1 << c) } else { m })
    }

    /// Channel whose pitch-mod flag flips exactly at `tick`, if any.
    fn pmod_channel(&self, tick: u32) -> Option<usize> {
        let mut chan = None;
        for e in &self.table.global_events {
            if e.tick > tick {
                break;
            }
            if e.tick == tick {
                if let EventKind::PitchModFlag { channel, .. } = e.kind {
                    chan = Some(channel as usize % NUM_CHANNELS);
                }
            }
        }
        chan
    }

    fn initialize_echo(&mut self, tick: u32) {
        let mask = self.echo_mask(tick);
        let (l, r) = self.echo_volume;
        self.append_spaced(&format!("$EF ${:02X} ${:02X} ${:02X}", mask, l, r));
        self.echo_set = true;
    }

    fn initialize_pmod(&mut self, tick: u32) {
        let mask = self.pmod_mask(tick);
        self.append_spaced(&format!("$FA $00 ${:02X}", mask));
    }

    // ----- value translation -----

    fn tempo_value(&self, tempo: u8) -> i64 {
        (f64::from(tempo) * 0.4096 * self.options.tmult / 2.0).ceil() as i64
    }

    /// MML instrument id for a note on a channel.
    fn calc_ins(&self, c: usize, noteval: u8) -> Option<u32> {
        let ins = self.states[c].hstate.instrument?;
        if self.tags.instrument(ins).noise {
            self.table.ins_dict.get(&(ins, 0)).copied()
        } else {
            let samp = self
                .module
                .instruments
                .get(ins as usize - 1)
                .map(|i| i.sample_for_note(noteval))?;
            self.table.ins_dict.get(&(ins, samp)).copied()
        }
    }

    /// Vibrato triple from the channel's Hxx memory.
    fn calc_p(&self, c: usize) -> (u8, u8, u8) {
        let h = self.states[c].hstate.vibrato;
        let hf = h >> 4;
        let ha = h & 0x0F;
        let freq = if hf > 0 {
            (256.0 / ((64.0 / f64::from(hf)) * self.options.tmult))
                .round()
                .clamp(0.0, 255.0) as u8
        } else {
            0
        };
        (0, freq, ha * 15)
    }

    /// Pan triple and volume normalization for a note.
    fn calc_y(&self, c: usize, noteval: Option<u8>) -> (Option<(u8, u8, u8)>, f64) {
        let h = &self.states[c].hstate;

        let mut pps_offset: i32 = 0;
        if let Some(ins) = h.instrument {
            if let Some(instrument) = self.module.instruments.get(ins as usize - 1) {
                if let Some(nv) = noteval.filter(|&n| n < 120) {
                    pps_offset = i32::from(instrument.pitch_pan_separation)
                        * (i32::from(nv) - i32::from(instrument.pitch_pan_center));
                }
            }
        }

        let (Some(x), Some(ex)) = (h.pan, h.pan_env) else {
            return (None, 1.0);
        };
        let it_pan = 255 - (i32::from(x) + 4 * (i32::from(ex) - 32) + pps_offset).clamp(0, 255);

        let (base_pan, norm) = match self.options.panning {
            PanningMode::Linear => ((it_pan as f64 * 20.0 / 255.0).round() as u8, 1.0),
            PanningMode::Accurate => fit_pan(it_pan),
        };

        let tags = self.instrument_tags(h.instrument);
        if h.surround != Some(0x91) {
            let y = if tags.invert {
                (base_pan, 1, 1)
            } else {
                (base_pan, 0, 0)
            };
            (Some(y), norm)
        } else {
            let y = if tags.invert { (10, 0, 1) } else { (10, 1, 0) };
            (Some(y), 1.0)
        }
    }

    /// MML volume and overflow amp from the channel's volume state stack.
    fn calc_v(&self, c: usize, norm: f64) -> (Option<u8>, Option<u8>) {
        let h = &self.states[c].hstate;
        let (Some(v), Some(m), Some(iv), Some(sv)) =
            (h.volume, h.mix_volume, h.ins_volume, h.sample_volume)
        else {
            return (None, None);
        };

        let linear_v = (255.0
            * norm
            * self.options.vmult
            * (f64::from(v) / 64.0)
            * (f64::from(m) / 64.0)
            * (f64::from(iv) / 128.0)
            * (f64::from(sv) / 64.0))
            .round() as i64;

        let mml_v = self.find_v(linear_v.min(255));
        let amp = if linear_v > 255 {
            (((linear_v as f64 / 255.0) - 1.0) * 255.0).round() as i64
        } else {
            0
        };
        (Some(mml_v), Some(amp.min(255) as u8))
    }

    fn find_v(&self, level: i64) -> u8 {
        inverse_volume(level, self.options.vcurve)
    }

    // ----- stateful MML writers -----

    fn set_mml_ins(&mut self, c: usize, value: Option<u32>, tick: u32) {
        let Some(value) = value else {
            return;
        };
        if self.states[c].instrument == Some(value) {
            return;
        }
        self.states[c].instrument = Some(value);
        self.append_spaced(&format!("@{}", value));
        self.states[c].noise = None;

        let tags = self.instrument_tags(self.states[c].hstate.instrument);
        if self.states[c].echo_enabled != tags.echo {
            self.append_spaced("$F4 $03");
            self.states[c].echo_enabled = tags.echo;
        }

        if self.pmod_channel(tick) == Some(c) {
            let mask = self.pmod_mask(tick);
            self.append_spaced(&format!("$FA $00 ${:02X}", mask));
        }
    }

    fn set_mml_n(&mut self, c: usize, value: u8) {
        if self.states[c].noise == Some(value) {
            return;
        }
        self.states[c].noise = Some(value);
        self.append_spaced(&format!("n{:X}", value));
    }

    fn set_mml_v(&mut self, c: usize, value: Option<u8>) {
        let Some(value) = value else {
            return;
        };
        if self.states[c].volume == Some(value) {
            return;
        }
        self.states[c].volume = Some(value);
        self.append_spaced(&format!("v{}", value));
    }

    fn set_mml_amp(&mut self, c: usize, value: Option<u8>) {
        let Some(value) = value else {
            return;
        };
        if self.states[c].amp == Some(value) {
            return;
        }
        self.states[c].amp = Some(value);
        self.append_spaced(&format!("$FA $03 ${:02X}", value));
    }

    fn set_mml_y(&mut self, c: usize, value: Option<(u8, u8, u8)>) {
        let Some(value) = value else {
            return;
        };
        if self.states[c].pan == Some(value) {
            return;
        }
        self.states[c].pan = Some(value);
        self.append_spaced(&format!("y{},{},{}", value.0, value.1, value.2));
    }

    fn set_mml_p(&mut self, c: usize, value: (u8, u8, u8)) {
        if self.states[c].vibrato == Some(value) {
            return;
        }
        self.states[c].vibrato = Some(value);
        if value.1 == 0 || value.2 == 0 {
            self.append_spaced("$DF");
        } else {
            self.append_spaced(&format!("p{},{},{}", value.0, value.1, value.2));
        }
    }

    fn set_mml_gain(&mut self, c: usize, value: Option<u8>) {
        let Some(value) = value else {
            return;
        };
        if self.states[c].gain == Some(value) {
            return;
        }
        self.states[c].gain = Some(value);
        self.append_spaced(&format!("$FA $01 ${:02X}", value));
    }

    /// Everything a note needs in place before its letter: instrument,
    /// noise, volume, amp, pan, vibrato, gain.
    fn set_prenote(&mut self, c: usize, noteval: Option<u8>, tick: u32, use_ins: bool) {
        if use_ins {
            if let Some(nv) = noteval {
                let id = self.calc_ins(c, nv);
                self.set_mml_ins(c, id, tick);
            }
        }

        if let Some(nv) = noteval.filter(|&n| n < 120) {
            let ins = self.states[c].hstate.instrument;
            if ins.is_some() && self.instrument_tags(ins).noise {
                self.set_mml_n(c, nv % 32);
            }
        }

        let (y, norm) = self.calc_y(c, noteval);
        let (v, amp) = self.calc_v(c, norm);
        self.set_mml_v(c, v);
        self.set_mml_amp(c, amp);
        self.set_mml_y(c, y);
        let p = self.calc_p(c);
        self.set_mml_p(c, p);
        let gain = self.states[c].hstate.gain;
        self.set_mml_gain(c, gain);
    }

    /// Tick run as `=127^` chunks plus the remainder.
    fn tick_str(&self, ticklen: i64) -> String {
        let mut out = String::new();
        let mut remaining = ticklen;
        while remaining > 127 {
            remaining -= 127;
            out.push_str("=127^");
        }
        out.push_str(&format!("={}", remaining));
        out
    }

    fn set_note(&mut self, c: usize, value: u8, ticklen: i64) {
        let ins = self.states[c].hstate.instrument;
        let mut value = value;
        if value < 120 {
            if let Some(instrument) = ins.and_then(|i| self.module.instruments.get(i as usize - 1))
            {
                value = instrument.note_for_note(value);
            }
        }

        let noise = self.instrument_tags(ins).noise;
        let octave: i32 = if noise {
            4
        } else {
            i32::from(value) / 12 - 1
        };

        if (24..94).contains(&value) {
            let last_octave = self.states[c].octave;
            self.states[c].octave = Some(octave);
            match last_octave {
                None => self.append_spaced(&format!("o{}", octave)),
                Some(last) if octave > last => {
                    self.append_spaced(&">".repeat((octave - last) as usize))
                }
                Some(last) if octave < last => {
                    self.append_spaced(&"<".repeat((last - octave) as usize))
                }
                _ => {}
            }

            let name = NOTE_NAMES[(value % 12) as usize];
            if noise {
                self.append(&format!("c{}", self.tick_str(ticklen)));
            } else {
                self.append(&format!("{}{}", name, self.tick_str(ticklen)));
            }
            self.states[c].note = Some(name);
        } else {
            self.append(&format!("r{}", self.tick_str(ticklen)));
        }
    }

    fn emit_note_off(&mut self, c: usize, ticklen: i64) {
        self.set_prenote(c, None, 0, false);
        let ins = self.states[c].hstate.instrument;
        let tags = self.instrument_tags(ins);
        let release = tags
            .release
            .or_else(|| ins.and_then(|i| self.release_overrides.get(&i).cloned()));

        match release {
            None => {
                let s = format!("r{}", self.tick_str(ticklen));
                self.append(&s);
            }
            Some(release) => {
                // The next note must restate instrument and ADSR.
                self.states[c].instrument = None;
                self.states[c].noise = None;
                let da = u8::from_str_radix(&release[..2], 16).unwrap_or(0);
                if da < 0x80 {
                    self.append_spaced(&format!("$FA $01 ${}", &release[4..6]));
                } else {
                    self.append_spaced(&format!("$ED ${:02X} ${}", da - 0x80, &release[2..4]));
                }
                let s = format!("^{}", self.tick_str(ticklen));
                self.append(&s);
            }
        }
    }

    fn emit_note_fade(&mut self, c: usize, ticklen: i64, ticklen_max: i64) {
        self.set_prenote(c, None, 0, false);
        let ins = self.states[c].hstate.instrument;
        let tags = self.instrument_tags(ins);

        match tags.fade {
            None => {
                let fadeout = ins
                    .and_then(|i| self.module.instruments.get(i as usize - 1))
                    .map(|i| i.fadeout.max(1))
                    .unwrap_or(256);
                let mut ticks =
                    ((1024.0 / f64::from(fadeout)) * self.options.tmult).round() as i64;
                let fadelevel = if ticks > ticklen_max {
                    let v = f64::from(self.states[c].volume.unwrap_or(0));
                    let frac = ticklen_max as f64 / ticks as f64;
                    ticks = ticklen_max;
                    (v * (1.0 - frac) + f64::from(0x10) * frac).round() as i64
                } else {
                    0x10
                };
                self.states[c].volume = Some(fadelevel.clamp(0, 255) as u8);
                self.append_spaced(&format!("$E8 ${:02X} ${:02X}", ticks, fadelevel));
            }
            Some(fade) => {
                let level = 0x80 + (u8::from_str_radix(&fade[..2], 16).unwrap_or(0) & 0x1F);
                self.append_spaced(&format!("$FA $01 ${:02X}", level));
                self.states[c].instrument = None;
                self.states[c].noise = None;
            }
        }

        let s = format!("^{}", self.tick_str(ticklen));
        self.append(&s);
    }

    // ----- event walk -----

    fn convert(&mut self) {
        let table = self.table;
        for c in 0..NUM_CHANNELS {
            self.append(&format!("#{}  ", c));
            let events = &table.events[c];
            for e in 0..events.len().saturating_sub(1) {
                let event = &events[e];
                let next_tick = events[e + 1].tick;

                // For fades, measure up to the end of any patt/bar run so
                // the fade can span the formatting break.
                let mut far_tick = next_tick;
                let mut i = e + 1;
                while i < events.len()
                    && matches!(events[i].kind, EventKind::PattBreak | EventKind::BarBreak)
                {
                    far_tick = events[i].tick;
                    i += 1;
                }

                let tmult = self.options.tmult;
                let ticklen = (tmult * f64::from(next_tick)) as i64
                    - (tmult * f64::from(event.tick)) as i64;
                let ticklen_max = (tmult * f64::from(far_tick)) as i64
                    - (tmult * f64::from(event.tick)) as i64;

                self.emit_event(c, event, ticklen, ticklen_max);
            }
            self.append("\n\n");
        }
    }

    fn emit_event(&mut self, c: usize, event: &Event, ticklen: i64, ticklen_max: i64) {
        let tick = event.tick;
        let mut ret = String::new();

        match &event.kind {
            EventKind::PattBreak | EventKind::BarBreak => {
                ret.push_str("\n    ");
                if matches!(event.kind, EventKind::BarBreak) {
                    if let Some(o) = self.states[c].octave {
                        ret.push_str(&format!("o{} ", o));
                    }
                }
            }
            EventKind::LoopMark => {
                self.append_spaced("/");
                if c == 0 {
                    self.initialize_echo(tick);
                    self.initialize_pmod(tick);
                }
                self.states[c].instrument = None;
                self.states[c].volume = None;
                self.states[c].pan = None;
                self.set_prenote(c, Some(0), tick, true);
            }
            _ => {
                if self.table.loop_tick == 0 && !self.echo_set && c == 0 {
                    self.initialize_echo(tick);
                }
            }
        }

        match &event.kind {
            EventKind::Note(v) => {
                self.set_prenote(c, Some(*v), tick, true);
                self.set_note(c, *v, ticklen);
                return;
            }
            EventKind::NoteOff => {
                self.emit_note_off(c, ticklen);
                return;
            }
            EventKind::NoteCut => {
                self.set_prenote(c, None, tick, false);
                let s = format!("r{}", self.tick_str(ticklen));
                self.append(&s);
                self.states[c].note = Some("r");
                return;
            }
            EventKind::NoteFade => {
                self.emit_note_fade(c, ticklen, ticklen_max);
                return;
            }
            EventKind::SetInstrument(v) => self.states[c].hstate.instrument = Some(*v),
            EventKind::SetVolume(v) => self.states[c].hstate.volume = Some(*v),
            EventKind::SetMixVolume(v) => self.states[c].hstate.mix_volume = Some(*v),
            EventKind::SetInsVolume(v) => self.states[c].hstate.ins_volume = Some(*v),
            EventKind::SetSampleVolume(v) => self.states[c].hstate.sample_volume = Some(*v),
            EventKind::SetPan(v) => self.states[c].hstate.pan = Some(*v),
            EventKind::SetPanEnv(v) => self.states[c].hstate.pan_env = Some(*v),
            EventKind::SetSurround(v) => self.states[c].hstate.surround = Some(*v),
            EventKind::SetVibrato(v) => self.states[c].hstate.vibrato = *v,
            EventKind::SetGain(v) => self.states[c].hstate.gain = Some(*v),
            EventKind::SetTempo(v) => {
                let t = self.tempo_value(*v);
                self.append_spaced(&format!("t{}", t));
            }
            EventKind::SetGlobalVolume(v) => {
                let w = (255.0 * (f64::from(*v) / 128.0).sqrt()).round() as i64;
                self.append_spaced(&format!("w{}", w));
            }
            EventKind::InlineMml(text) => {
                let text = text.split(';').next().unwrap_or("").to_string();
                self.append_spaced(&text);
            }
            EventKind::PattBreak
            | EventKind::BarBreak
            | EventKind::LoopMark
            | EventKind::EchoFlag { .. }
            | EventKind::PitchModFlag { .. }
            | EventKind::End => {}
        }

        // Bridge the gap to the next event with a tie (or a rest when no
        // note is sounding).
        if ticklen > 0 {
            self.set_prenote(c, None, tick, false);
            if self.states[c].note.is_none() {
                let s = format!("{}r{}", ret, self.tick_str(ticklen));
                self.append(&s);
                self.states[c].note = Some("r");
            } else {
                let s = format!("{}^{}", ret, self.tick_str(ticklen));
                self.append(&s);
            }
        } else {
            self.append(&ret);
        }
    }
}
