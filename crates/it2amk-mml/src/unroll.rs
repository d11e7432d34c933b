//! Playback unroller: walks the order list as a virtual player and builds
//! per-channel event streams.
//!
//! The walk honors speed/tempo/global-volume changes, pattern delays, row
//! delays, note cuts, volume slides, vibrato, pattern loops and position
//! jumps. It terminates when it revisits a `(position, row)` pair with no
//! pattern loop still counting down; that pair becomes the loop anchor.

use std::collections::HashSet;

use it2amk_it::pattern::{effect, ItCell};
use it2amk_it::{ItModule, ItPattern, ItSample};

use crate::config::Options;
use crate::event::{ChannelState, Event, EventKind, EventTable, NUM_CHANNELS};
use crate::tags::ModuleTags;

/// Order entries above this are skip/end markers.
const LAST_PATTERN_ORDER: u8 = 199;

/// Pattern-loop bookkeeping for one channel.
#[derive(Debug, Clone, Copy, Default)]
struct LoopEntry {
    start_row: usize,
    counter: i32,
}

/// The virtual player.
pub struct Unroller<'a> {
    module: &'a ItModule,
    options: &'a Options,
    tags: &'a ModuleTags,
    states: [ChannelState; NUM_CHANNELS],
    table: EventTable,
    tempo_state: Option<u8>,
    gvol_state: Option<u8>,
}

impl<'a> Unroller<'a> {
    /// Unroll the module into an event table.
    pub fn unroll(module: &'a ItModule, options: &'a Options, tags: &'a ModuleTags) -> EventTable {
        let mut unroller = Self {
            module,
            options,
            tags,
            states: Default::default(),
            table: EventTable::default(),
            tempo_state: None,
            gvol_state: None,
        };
        unroller.run();
        unroller.table
    }

    fn push(&mut self, c: usize, tick: u32, kind: EventKind) {
        self.table.events[c].push(Event::new(tick, kind));
    }

    /// Channel defaults from the header, before any row plays.
    fn add_init_events(&mut self) {
        for c in 0..NUM_CHANNELS {
            let vol = self.module.header.channel_vol[c];
            self.push(c, 0, EventKind::SetMixVolume(vol));
            let pan = self.module.header.channel_pan[c];
            if pan % 128 == 100 {
                self.push(c, 0, EventKind::SetPan(0x80));
                self.push(c, 0, EventKind::SetSurround(0x91));
            } else {
                self.push(c, 0, EventKind::SetPan(pan.saturating_mul(4)));
            }
        }
    }

    fn sample_for(&self, instrument: u8, note: u8) -> Option<&'a ItSample> {
        let module = self.module;
        let ins = module.instruments.get(instrument as usize - 1)?;
        let sample = ins.sample_for_note(note);
        if sample == 0 {
            return None;
        }
        module.samples.get(sample as usize - 1)
    }

    /// Effective speed for a row: the last nonzero Axx wins.
    fn row_speed(row: &[ItCell], speed: u8) -> u8 {
        let mut s = speed;
        for cell in row {
            if let Some(arg) = cell.effect_arg(effect::SET_SPEED) {
                if arg != 0 {
                    s = arg;
                }
            }
        }
        s
    }

    /// Tempo change in a row (Txx with arg >= 0x20), last one wins.
    fn row_tempo(row: &[ItCell], tempo: u8) -> (Option<usize>, u8) {
        let mut chan = None;
        let mut t = tempo;
        for (c, cell) in row.iter().enumerate() {
            if let Some(arg) = cell.effect_arg(effect::TEMPO) {
                if arg >= 0x20 {
                    t = arg;
                    chan = Some(c);
                }
            }
        }
        (chan, t)
    }

    /// Global volume change in a row (Vxx with arg <= 0x80), last one wins.
    fn row_global_volume(row: &[ItCell], gvol: u8) -> (Option<usize>, u8) {
        let mut chan = None;
        let mut g = gvol;
        for (c, cell) in row.iter().enumerate() {
            if let Some(arg) = cell.effect_arg(effect::SET_GLOBAL_VOL) {
                if arg <= 0x80 {
                    g = arg;
                    chan = Some(c);
                }
            }
        }
        (chan, g)
    }

    /// Bxx / Cxx in a row. A Bxx without a Cxx targets row 0.
    fn find_position_jump(row: &[ItCell]) -> (Option<usize>, Option<usize>) {
        let mut pos = None;
        let mut target_row = None;
        for cell in row {
            if let Some(arg) = cell.effect_arg(effect::POSITION_JUMP) {
                pos = Some(arg as usize);
            }
        }
        for cell in row {
            if let Some(arg) = cell.effect_arg(effect::PATTERN_BREAK) {
                target_row = Some(arg as usize);
            }
        }
        if pos.is_some() && target_row.is_none() {
            target_row = Some(0);
        }
        (pos, target_row)
    }

    /// SBx loop control. Channels are scanned in order and each may produce
    /// a return target; the last one scanned wins.
    fn handle_loops(
        rr: usize,
        row: &[ItCell],
        loop_table: &mut [LoopEntry; 64],
    ) -> Option<usize> {
        let mut row_dest = None;
        for (c, cell) in row.iter().enumerate() {
            let Some(arg) = cell.effect_arg(effect::EXTENDED) else {
                continue;
            };
            if arg >> 4 != 0xB {
                continue;
            }
            let entry = &mut loop_table[c];
            let n = (arg & 0xF) as i32;
            if n == 0 {
                entry.start_row = rr;
            } else if entry.counter == 0 {
                entry.counter = n;
                row_dest = Some(entry.start_row);
            } else if entry.counter < 0 {
                entry.counter = 1;
                row_dest = Some(entry.start_row);
            } else if entry.counter == 1 {
                entry.counter = 0;
                entry.start_row = rr + 1;
            } else {
                entry.counter -= 1;
                row_dest = Some(entry.start_row);
            }
        }
        row_dest
    }

    /// SEx pattern delay, first one in the row.
    fn pattern_delay(row: &[ItCell]) -> u8 {
        for cell in row {
            if let Some(arg) = cell.effect_arg(effect::EXTENDED) {
                if arg >> 4 == 0xE {
                    return arg & 0xF;
                }
            }
        }
        0
    }

    fn add_note(&mut self, c: usize, tick: u32, value: u8) {
        self.states[c].last_note = Some(value);
        let kind = match value {
            0..=119 => {
                self.register_note(c, value);
                EventKind::Note(value)
            }
            254 => EventKind::NoteCut,
            255 => EventKind::NoteOff,
            _ => EventKind::NoteFade,
        };
        self.push(c, tick, kind);
    }

    /// Record the `(instrument, sample)` pair a real note sounds with.
    fn register_note(&mut self, c: usize, note: u8) {
        let module = self.module;
        let Some(ins) = self.states[c].instrument else {
            return;
        };
        if self.tags.instrument(ins).noise {
            // Sample index 0 is the noise sentinel.
            self.table.register_instrument(ins, 0);
        } else if let Some(instrument) = module.instruments.get(ins as usize - 1) {
            let samp = instrument.sample_for_note(note);
            self.table.used_samples.insert(samp);
            self.table.register_instrument(ins, samp);
        }
    }

    fn add_instrument(&mut self, cell: &ItCell, c: usize, tick: u32, value: u8) {
        let module = self.module;
        self.states[c].instrument = Some(value);
        self.push(c, tick, EventKind::SetInstrument(value));

        let Some(instrument) = module.instruments.get(value as usize - 1) else {
            return;
        };
        let ins_vol = instrument.global_volume;
        self.states[c].ins_volume = Some(ins_vol);
        self.push(c, tick, EventKind::SetInsVolume(ins_vol));

        // Tag-driven echo/pmod routing changes are global bookkeeping.
        let tags = self.tags.instrument(value);
        if tags.echo != self.states[c].echo_flag {
            self.table.global_events.push(Event::hidden(
                tick,
                EventKind::EchoFlag {
                    channel: c as u8,
                    enabled: tags.echo,
                },
            ));
        }
        if tags.pitch_mod != self.states[c].pmod_flag {
            self.table.global_events.push(Event::hidden(
                tick,
                EventKind::PitchModFlag {
                    channel: c as u8,
                    enabled: tags.pitch_mod,
                },
            ));
        }
        self.states[c].echo_flag = tags.echo;
        self.states[c].pmod_flag = tags.pitch_mod;

        // Sample defaults for the note in this cell, falling back to the
        // channel's last note.
        let lookup_note = match cell.note {
            Some(n) if n < 120 => n,
            _ => self.states[c].last_note.filter(|&n| n < 120).unwrap_or(0),
        };
        let sample = self.sample_for(value, lookup_note);
        let vol = sample.map(|s| s.default_volume).unwrap_or(64);
        self.push(c, tick, EventKind::SetVolume(vol));
        self.states[c].volume = Some(vol);

        let smp_vol = sample.map(|s| s.global_volume).unwrap_or(64);
        self.states[c].sample_volume = Some(smp_vol);
        self.push(c, tick, EventKind::SetSampleVolume(smp_vol));

        // Instrument default pan applies below 128; a sample default pan
        // with its high bit set overrides it.
        let dfp = instrument.default_pan;
        if dfp < 128 {
            self.states[c].pan = dfp.saturating_mul(4);
        }
        let sample_dfp = sample.map(|s| s.default_pan).unwrap_or(0);
        if sample_dfp >= 128 {
            self.states[c].pan = (sample_dfp & 0x7F).saturating_mul(4);
        }
        self.push(c, tick, EventKind::SetPan(self.states[c].pan));
        // Pan envelopes are not tracked; the position is pinned.
        self.states[c].pan_env = 32;
        self.push(c, tick, EventKind::SetPanEnv(32));

        // An instrument change without a note retriggers the last note.
        let last = self.states[c].last_note;
        if cell.note.is_none() {
            if let Some(n) = last.filter(|&n| n < 120) {
                self.add_note(c, tick, n);
            }
        }
    }

    fn add_volume(&mut self, c: usize, tick: u32, value: u8) {
        self.states[c].volume = Some(value);
        self.push(c, tick, EventKind::SetVolume(value));
    }

    fn add_mix_volume(&mut self, c: usize, tick: u32, value: u8) {
        self.states[c].mix_volume = Some(value);
        self.push(c, tick, EventKind::SetMixVolume(value));
    }

    fn add_panning(&mut self, c: usize, tick: u32, value: u8) {
        self.states[c].pan = value;
        self.push(c, tick, EventKind::SetPan(value));
    }

    fn add_surround(&mut self, c: usize, tick: u32, value: u8) {
        self.states[c].surround = value;
        self.push(c, tick, EventKind::SetSurround(value));
    }

    fn add_gain(&mut self, c: usize, tick: u32, value: u8) {
        self.states[c].gain = Some(value);
        self.push(c, tick, EventKind::SetGain(value));
    }

    fn inline_mml_at(&self, pattern: u8, c: usize, rr: usize, tick_in_row: u32) -> Vec<String> {
        self.options
            .addmml
            .iter()
            .filter(|m| {
                m.pattern == pattern as u32
                    && m.channel as usize == c + 1
                    && m.row == rr as u32
                    && m.tick == tick_in_row
            })
            .map(|m| m.text.clone())
            .collect()
    }

    /// Generate the events of one row repetition for every channel.
    #[allow(clippy::too_many_arguments)]
    fn add_row_events(
        &mut self,
        rr: usize,
        row: &[ItCell],
        basetick: u32,
        speed: u8,
        pattern: u8,
        rep: u8,
    ) {
        let highlight = self.module.header.highlight_major as usize;
        for c in 0..NUM_CHANNELS {
            let cell = row[c];

            if basetick != 0 && rep == 0 {
                if rr == 0 {
                    self.push(c, basetick, EventKind::PattBreak);
                }
                if highlight > 0 && rr % highlight == 0 {
                    self.push(c, basetick, EventKind::BarBreak);
                }
            }

            if rep == 0 {
                for text in self.inline_mml_at(pattern, c, rr, 0) {
                    self.push(c, basetick, EventKind::InlineMml(text));
                }
            }

            let mut subtick: u8 = 0;
            let mut cut_tick: Option<u8> = None;
            let mut fine_vol: i16 = 0;
            let mut slide_vol: i16 = 0;
            let mut fine_eff: i16 = 0;
            let mut slide_eff: i16 = 0;

            match cell.effect {
                Some((effect::VIBRATO_VOL_SLIDE, _)) => {
                    if !self.states[c].vibrato_on {
                        let h = self.states[c].vibrato;
                        self.push(c, basetick, EventKind::SetVibrato(h));
                    }
                    self.states[c].vibrato_on = true;
                }
                Some((effect::EXTENDED, arg)) => match arg >> 4 {
                    0xD => subtick = arg & 0xF,
                    0xC => {
                        if (arg & 0xF) < speed {
                            cut_tick = Some((arg & 0xF).max(1));
                        }
                    }
                    0x9 if arg == 0x90 || arg == 0x91 => {
                        if rep == 0 {
                            self.add_surround(c, basetick, arg);
                        }
                    }
                    _ => {}
                },
                Some((effect::SET_CHANNEL_VOL, arg)) => {
                    if rep == 0 {
                        self.add_mix_volume(c, basetick, arg);
                    }
                }
                Some((effect::VIBRATO, arg)) => {
                    if rep == 0 {
                        let mut hval = self.states[c].vibrato;
                        if arg & 0x0F != 0 {
                            hval = (hval & 0xF0) | (arg & 0x0F);
                        }
                        if arg & 0xF0 != 0 {
                            hval = (hval & 0x0F) | (arg & 0xF0);
                        }
                        if !self.states[c].vibrato_on || hval != self.states[c].vibrato {
                            self.push(c, basetick, EventKind::SetVibrato(hval));
                        }
                        self.states[c].vibrato_on = true;
                        self.states[c].vibrato = hval;
                    }
                }
                Some((effect::MIDI_MACRO, arg)) => {
                    if rep == 0 {
                        self.add_gain(c, basetick, arg);
                    }
                }
                _ => {}
            }

            // Any row without a vibrato effect stops vibrato.
            let keeps_vibrato = matches!(
                cell.effect,
                Some((effect::VIBRATO, _)) | Some((effect::VIBRATO_VOL_SLIDE, _))
            );
            if !keeps_vibrato {
                if self.states[c].vibrato_on {
                    self.push(c, basetick, EventKind::SetVibrato(0));
                }
                self.states[c].vibrato_on = false;
            }

            if rep == 0 {
                for tick in 1..u32::from(subtick + 1).min(u32::from(speed)) {
                    for text in self.inline_mml_at(pattern, c, rr, tick) {
                        self.push(c, basetick + tick, EventKind::InlineMml(text));
                    }
                }
            }

            if subtick >= speed {
                continue;
            }
            let event_tick = basetick + u32::from(subtick);

            if let Some(ins) = cell.instrument {
                if rep == 0 {
                    self.add_instrument(&cell, c, event_tick, ins);
                }
            }

            if let Some(vol) = cell.volume {
                match vol {
                    0..=64 => {
                        if rep == 0 {
                            self.add_volume(c, event_tick, vol);
                        }
                    }
                    65..=74 => {
                        let param = vol - 65;
                        if param > 0 {
                            self.states[c].fine_up = param;
                            fine_vol = i16::from(param);
                        } else {
                            fine_vol = i16::from(self.states[c].fine_up);
                        }
                    }
                    75..=84 => {
                        let param = vol - 75;
                        if param > 0 {
                            self.states[c].fine_down = param;
                            fine_vol = -i16::from(param);
                        } else {
                            fine_vol = -i16::from(self.states[c].fine_down);
                        }
                    }
                    85..=94 => {
                        let param = vol - 85;
                        if param > 0 {
                            self.states[c].slide_up = param;
                            self.states[c].slide_memory = param << 4;
                            slide_vol = i16::from(param);
                        } else {
                            slide_vol = i16::from(self.states[c].slide_up);
                            self.states[c].slide_memory = self.states[c].slide_up << 4;
                        }
                    }
                    95..=104 => {
                        let param = vol - 95;
                        if param > 0 {
                            self.states[c].slide_down = param;
                            self.states[c].slide_memory = param;
                            slide_vol = -i16::from(param);
                        } else {
                            slide_vol = -i16::from(self.states[c].slide_down);
                            self.states[c].slide_memory = self.states[c].slide_down;
                        }
                    }
                    128..=192 => {
                        if rep == 0 {
                            let pan = u16::from(vol - 128) * 4;
                            self.add_panning(c, event_tick, pan.min(255) as u8);
                        }
                    }
                    _ => {}
                }
            }

            // Xxx applies after the instrument's default pan.
            if let Some(arg) = cell.effect_arg(effect::SET_PANNING) {
                if rep == 0 {
                    self.add_panning(c, event_tick, arg);
                    self.add_surround(c, event_tick, 0x90);
                }
            }

            if matches!(
                cell.effect,
                Some((effect::VOLUME_SLIDE, _))
                    | Some((effect::VIBRATO_VOL_SLIDE, _))
                    | Some((effect::TONE_PORTA_VOL_SLIDE, _))
            ) {
                let mut d = cell.effect.map(|(_, arg)| arg).unwrap_or(0);
                if d == 0 {
                    d = self.states[c].slide_memory;
                }
                self.states[c].slide_memory = d;

                if d >> 4 == 0x0 {
                    slide_eff = -i16::from(d & 0xF);
                } else if d & 0xF == 0x0 {
                    slide_eff = i16::from(d >> 4);
                }
                if d & 0xF == 0xF {
                    fine_eff = i16::from(d >> 4);
                } else if d >> 4 == 0xF {
                    fine_eff = -i16::from(d & 0xF);
                }
            }

            // Fine slides land once, on the row's subtick.
            if fine_vol != 0 || fine_eff != 0 {
                let old = i16::from(self.states[c].volume.unwrap_or(0));
                let new = (old + fine_vol).clamp(0, 64);
                let new = (new + fine_eff).clamp(0, 64) as u8;
                self.states[c].volume = Some(new);
                self.push(c, event_tick, EventKind::SetVolume(new));
            }

            // The note always lands after the other columns on its tick.
            if let Some(n) = cell.note {
                if rep == 0 || subtick > 0 {
                    self.add_note(c, event_tick, n);
                }
            }

            for tick in u32::from(subtick) + 1..u32::from(speed) {
                for text in self.inline_mml_at(pattern, c, rr, tick) {
                    self.push(c, basetick + tick, EventKind::InlineMml(text));
                }
            }

            // Normal slides land on every later tick of the row; a pending
            // note cut lands on its scheduled tick.
            for tick in subtick..speed {
                if tick > subtick && (slide_vol != 0 || slide_eff != 0) {
                    let old = i16::from(self.states[c].volume.unwrap_or(0));
                    let new = (old + slide_vol).clamp(0, 64);
                    let new = (new + slide_eff).clamp(0, 64) as u8;
                    self.states[c].volume = Some(new);
                    self.push(c, basetick + u32::from(tick), EventKind::SetVolume(new));
                }
                if cut_tick == Some(tick) {
                    self.add_note(c, basetick + u32::from(tick), 254);
                }
            }
        }
    }

    fn run(&mut self) {
        let mut visited: HashSet<(usize, usize)> = HashSet::new();

        self.add_init_events();
        let mut speed = self.module.header.initial_speed;
        let mut tempo = self.module.header.initial_tempo;
        let mut gvol = self.module.header.global_volume;

        let mut tick: u32 = 0;
        let mut pos: usize = 0;
        let mut start_row: usize = 0;
        let (mut loop_pos, mut loop_row) = (0usize, 0usize);
        let mut finished = false;
        let mut loop_table = [LoopEntry::default(); 64];

        let module = self.module;
        let orders = &module.header.orders;
        while pos < orders.len() {
            let o = orders[pos];
            if o > LAST_PATTERN_ORDER {
                break;
            }
            let Some(p) = module.patterns.get(o as usize) else {
                break;
            };

            let mut new_pos: Option<usize> = None;
            let mut new_row: Option<usize> = None;
            let mut rr = start_row;
            while rr < p.num_rows() {
                if visited.contains(&(pos, rr)) {
                    let looping = loop_table.iter().any(|e| e.counter > 0);
                    if !looping {
                        loop_pos = pos;
                        loop_row = rr;
                        finished = true;
                        break;
                    }
                }
                visited.insert((pos, rr));

                let row = &p.rows[rr];
                let patt_delay = Self::pattern_delay(row);
                speed = Self::row_speed(row, speed);

                let (chan, new_tempo) = Self::row_tempo(row, tempo);
                tempo = new_tempo;
                if self.tempo_state != Some(tempo) {
                    let c = chan.unwrap_or(0) % NUM_CHANNELS;
                    self.push(c, tick, EventKind::SetTempo(tempo));
                    self.tempo_state = Some(tempo);
                }

                let (chan, new_gvol) = Self::row_global_volume(row, gvol);
                gvol = new_gvol;
                if self.gvol_state != Some(gvol) {
                    let c = chan.unwrap_or(0) % NUM_CHANNELS;
                    self.push(c, tick, EventKind::SetGlobalVolume(gvol));
                    self.gvol_state = Some(gvol);
                }

                for rep in 0..=patt_delay {
                    self.add_row_events(rr, row, tick, speed, o, rep);
                    tick += u32::from(speed);
                }

                let (jump_pos, jump_row) = Self::find_position_jump(row);
                new_pos = jump_pos;
                new_row = jump_row;

                let mut same_pattern_loop = false;
                if let Some(dest) = Self::handle_loops(rr, row, &mut loop_table) {
                    if dest >= p.num_rows() {
                        new_row = Some(0);
                        new_pos = Some(pos + 1);
                    } else {
                        same_pattern_loop = true;
                        new_row = Some(dest);
                        new_pos = Some(pos);
                    }
                }

                if !same_pattern_loop
                    && new_pos.is_some()
                    && new_row.is_some_and(|r| r != 0)
                {
                    let target = new_row.unwrap_or(0);
                    for c in 0..NUM_CHANNELS {
                        self.push(c, tick, EventKind::PattBreak);
                        if highlight_off_measure(module, target) {
                            self.push(c, tick, EventKind::BarBreak);
                        }
                    }
                }

                if new_pos.is_some() || new_row.is_some() {
                    break;
                }
                rr += 1;
            }

            if finished {
                break;
            }

            pos = new_pos.unwrap_or(pos + 1);
            if pos >= orders.len() || orders[pos] > LAST_PATTERN_ORDER {
                // Falling off the order list restarts playback at the top.
                pos = 0;
            }

            start_row = match new_row {
                Some(nr) => {
                    let rows = orders
                        .get(pos)
                        .and_then(|&o| module.patterns.get(o as usize))
                        .map(ItPattern::num_rows)
                        .unwrap_or(0);
                    if nr >= rows {
                        0
                    } else {
                        nr
                    }
                }
                None => 0,
            };
        }

        for c in 0..NUM_CHANNELS {
            self.push(c, tick, EventKind::End);
        }
        self.table.global_events.sort_by_key(|e| e.tick);

        self.table.loop_tick = compute_loop_tick(self.module, loop_pos, loop_row);
        if self.table.loop_tick != 0 {
            let loop_tick = self.table.loop_tick;
            for c in 0..NUM_CHANNELS {
                if let Some(i) = self.table.events[c].iter().position(|e| e.tick >= loop_tick) {
                    self.table.events[c].insert(i, Event::new(loop_tick, EventKind::LoopMark));
                }
            }
        }
    }
}

fn highlight_off_measure(module: &ItModule, row: usize) -> bool {
    let highlight = module.header.highlight_major as usize;
    highlight == 0 || row % highlight != 0
}

/// Tick of the loop anchor: re-walk the orders tracking only row speed.
///
/// Running this twice always yields the same value; it reads no mutable
/// state.
pub fn compute_loop_tick(module: &ItModule, loop_pos: usize, loop_row: usize) -> u32 {
    let mut tick: u32 = 0;
    let mut speed = module.header.initial_speed;

    for (pos, &o) in module.header.orders.iter().enumerate() {
        if o > LAST_PATTERN_ORDER {
            continue;
        }
        let Some(p) = module.patterns.get(o as usize) else {
            continue;
        };
        for rr in 0..p.num_rows() {
            if loop_pos == pos && loop_row == rr {
                return tick;
            }
            speed = Unroller::row_speed(&p.rows[rr], speed);
            tick += u32::from(speed);
        }
    }
    // Anchor never reached: the song does not loop.
    0
}
