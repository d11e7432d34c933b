//! ADSR fitting: approximates IT volume envelopes with the SPC700's fixed
//! hardware envelope model.
//!
//! The chip exposes 32 update rates. Decay and release shrink the level by
//! `((level - 1) >> 8) + 1` per update until a sustain threshold (decay) or
//! zero (release) is reached. Fitting simulates every candidate and keeps
//! the one with the least squared error against the interpolated IT
//! envelope.

use std::collections::HashMap;

use it2amk_it::ItEnvelope;

/// Hardware rate table: update interval in 32 kHz samples per rate index.
/// Index 0 never updates.
pub const ADSR_RATES: [u32; 32] = [
    0, 2048, 1536, 1280, 1024, 768, 640, 512, 384, 320, 256, 192, 160, 128, 96, 80, 64, 48, 40,
    32, 24, 20, 16, 12, 10, 8, 6, 5, 4, 3, 2, 1,
];

/// The eight sustain levels.
pub const SUS_LEVELS: [i32; 8] = [0x100, 0x200, 0x300, 0x400, 0x500, 0x600, 0x700, 0x800];

/// ADSR parameters the default instrument gets (no envelope: full gain).
pub const DEFAULT_ADSR: &str = "00007F";

/// Result of fitting one instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdsrFit {
    /// Six hex digits: DA, SR, GAIN bytes.
    pub adsr: String,
    /// Release override to apply on note-off, when the envelope's sustain
    /// loop ends before its last node.
    pub release: Option<String>,
}

/// Envelope fitter with precomputed candidate-length caches for one tempo.
pub struct AdsrFitter {
    tempo: f64,
    dsr_len: HashMap<(u8, u8, u8), usize>,
}

impl AdsrFitter {
    /// Build the fitter and its caches for the module's initial tempo.
    pub fn new(tempo: u8) -> Self {
        let tempo = f64::from(tempo);
        let mut ds_len = HashMap::new();
        for d in 0..8u8 {
            for s in 0..8u8 {
                ds_len.insert((d, s), decay_table(d, s, tempo).len());
            }
        }
        let mut sr_len = HashMap::new();
        for s in 0..8u8 {
            for r in 0..32u8 {
                sr_len.insert((s, r), release_table(s, r, tempo).len());
            }
        }
        let mut dsr_len = HashMap::new();
        for d in 0..8u8 {
            for s in 0..8u8 {
                for r in 0..32u8 {
                    dsr_len.insert((d, s, r), ds_len[&(d, s)] + sr_len[&(s, r)] - 1);
                }
            }
        }
        Self { tempo, dsr_len }
    }

    /// Fit a volume envelope, producing the packed hex parameters.
    pub fn fit(&self, env: &ItEnvelope) -> AdsrFit {
        if !env.enabled {
            return AdsrFit {
                adsr: DEFAULT_ADSR.to_string(),
                release: None,
            };
        }

        let (table, loop_end) = env_table(env);
        let (attack, d_start) = fit_attack(&table, self.tempo);
        let (d, s, r, post_loop_r) = self.fit_dsr(&table, loop_end, d_start);

        let adsr = if attack.is_none() && d == 0x7 && s == 0x7 && r == 0x0 {
            DEFAULT_ADSR.to_string()
        } else {
            let a = attack.unwrap_or(0xF);
            format!("{:X}{:X}{:02X}7F", d + 0x8, a, s * 0x20 + r)
        };
        let release = post_loop_r.map(|rr| format!("{}{:02X}7F", &adsr[..2], s * 0x20 + rr));
        AdsrFit { adsr, release }
    }

    /// Decay/sustain/release search. Returns `(d, s, r, post_loop_r)`;
    /// `post_loop_r` is set when a sustain loop ends mid-envelope and the
    /// tail needs its own release rate.
    fn fit_dsr(
        &self,
        table: &[f64],
        loop_end: Option<usize>,
        d_start: usize,
    ) -> (u8, u8, u8, Option<u8>) {
        let last = table.len() - 1;
        let level = match loop_end {
            None => table[last],
            Some(le) => table[le.min(last)],
        };

        if level > 0.0 {
            // The envelope never dies out: release is infinite.
            let the_end = loop_end.unwrap_or(last);
            let mut best_diff = 1_000_000.0;
            let (mut d, mut s) = (0u8, 0u8);

            if level <= 32.0 {
                for dd in 0..8u8 {
                    let diff = env_diff(table, &decay_table(dd, 0, self.tempo), d_start, the_end);
                    if diff < best_diff {
                        best_diff = diff;
                        d = dd;
                    }
                }
            } else {
                let bucket = (level / 32.0) as i64;
                let lo = bucket.min(7) as u8;
                let hi = (bucket + 1).min(8) as u8;
                for dd in 0..8u8 {
                    for ss in lo..hi {
                        let diff =
                            env_diff(table, &decay_table(dd, ss, self.tempo), d_start, the_end);
                        if diff < best_diff {
                            best_diff = diff;
                            d = dd;
                            s = ss;
                        }
                    }
                }
            }

            let mut post_loop_r = None;
            if the_end != last {
                let mut best = 1_000_000.0;
                for rr in 0..32u8 {
                    let diff = env_diff(
                        table,
                        &release_table(s, rr, self.tempo),
                        loop_end.unwrap_or(last),
                        last,
                    );
                    if diff < best {
                        best = diff;
                        post_loop_r = Some(rr);
                    }
                }
            }
            (d, s, 0x0, post_loop_r)
        } else {
            // The envelope reaches zero: find a finite release whose total
            // length lands near the envelope's.
            let the_end = loop_end.unwrap_or(last);
            let length = (the_end + 1) as f64 - d_start as f64;
            let tolerance = 0.9;
            let min_length = length * tolerance;
            let max_length = length / tolerance;

            let mut candidates = Vec::new();
            let mut smallest = 1_000_000usize;
            let mut largest = 0usize;
            let mut smallest_dsr = (0u8, 0u8, 0u8);
            let mut largest_dsr = (0u8, 0u8, 0u8);

            for dd in 0..8u8 {
                for ss in 0..8u8 {
                    for rr in 0..32u8 {
                        let len = self.dsr_len[&(dd, ss, rr)];
                        if len as f64 >= min_length && len as f64 <= max_length {
                            candidates.push((dd, ss, rr));
                        } else if len < smallest {
                            smallest = len;
                            smallest_dsr = (dd, ss, rr);
                        } else if len > largest {
                            largest = len;
                            largest_dsr = (dd, ss, rr);
                        }
                    }
                }
            }

            if candidates.is_empty() {
                if max_length > largest as f64 {
                    return (largest_dsr.0, largest_dsr.1, largest_dsr.2, None);
                } else if min_length < smallest as f64 {
                    return (smallest_dsr.0, smallest_dsr.1, smallest_dsr.2, None);
                }
            }

            let mut best_diff = 1_000_000.0;
            let (mut d, mut s, mut r) = (0u8, 0u8, 0u8);
            for &(dd, ss, rr) in &candidates {
                let mut curve = decay_table(dd, ss, self.tempo);
                curve.pop();
                curve.extend(release_table(ss, rr, self.tempo));
                let diff = env_diff(table, &curve, d_start, the_end);
                if diff < best_diff {
                    best_diff = diff;
                    d = dd;
                    s = ss;
                    r = rr;
                }
            }
            (d, s, r, None)
        }
    }
}

/// Interpolate an envelope's node polyline at integer ticks, scaled by 4.
///
/// Returns the table and, when a sustain loop is on, the tick of its end
/// node.
pub fn env_table(env: &ItEnvelope) -> (Vec<f64>, Option<usize>) {
    let nodes = env.active_nodes();
    let mut table = Vec::new();
    let mut loop_end = None;

    let end_tick = nodes.last().map(|n| n.tick as usize).unwrap_or(0);
    let last_index = nodes.len().saturating_sub(1);
    let mut current: isize = -1;

    for tick in 0..end_tick {
        let next = &nodes[(current + 1) as usize];
        if tick == next.tick as usize {
            current += 1;
            if env.sustain_loop_on && env.sustain_end as isize == current {
                loop_end = Some(nodes[current as usize].tick as usize);
            }
            table.push(f64::from(nodes[current as usize].y) * 4.0);
        } else if current >= 0 {
            let cur = &nodes[current as usize];
            let dist = f64::from(next.tick) - f64::from(cur.tick);
            if dist > 0.0 {
                let p = (tick as f64 - f64::from(cur.tick)) / dist;
                let value = p * f64::from(next.y) + (1.0 - p) * f64::from(cur.y);
                table.push((value * 4.0).round());
            }
        }
    }

    let last_y = nodes.last().map(|n| f64::from(n.y)).unwrap_or(0.0);
    table.push(last_y * 4.0);
    if env.sustain_loop_on && !nodes.is_empty() && env.sustain_end as usize == last_index {
        loop_end = Some(end_tick);
    }
    (table, loop_end)
}

/// Attack fit: `(attack nibble, peak index)`. No nibble when the envelope
/// opens at its peak.
pub fn fit_attack(table: &[f64], tempo: f64) -> (Option<u8>, usize) {
    let mut peak = -1.0f64;
    let mut peak_index = 0usize;
    for (i, &v) in table.iter().enumerate() {
        if v > peak {
            peak = v;
            peak_index = i;
        }
    }

    let tick_length = peak_index as f64 * (1.0 - table[0] / 256.0);
    let ticks_per_second = tempo * 24.0 / 60.0;
    let attack_length = 32000.0 / ticks_per_second * tick_length;
    let interval = attack_length / 64.0;

    let mut rate = 1u32;
    let mut diff = 4096.0f64;
    for (i, &r) in ADSR_RATES.iter().enumerate().skip(1) {
        let d = (interval - f64::from(r)).abs();
        if d < diff {
            diff = d;
            rate = i as u32;
        }
    }

    let attack = ((rate - 1) / 2) as u8;
    ((peak_index > 0).then_some(attack), peak_index)
}

/// Simulated decay curve from full level down to a sustain level, one entry
/// per playback tick.
pub fn decay_table(d: u8, s: u8, tempo: f64) -> Vec<f64> {
    let ticks_per_second = tempo * 24.0 / 60.0;
    let mut level: i32 = 0x800;
    let interval = u64::from(ADSR_RATES[(2 * d + 16) as usize]);
    let mut counter: u64 = 0;
    let mut last_tick_counter: i64 = 0;

    let mut table = vec![f64::from(level) / 8.0];
    while level > SUS_LEVELS[s as usize] {
        counter += interval;
        let tick_counter = (counter as f64 * ticks_per_second / 32000.0) as i64;
        if tick_counter > last_tick_counter {
            last_tick_counter = tick_counter;
            table.push(f64::from(level) / 8.0);
        }
        level -= ((level - 1) >> 8) + 1;
    }
    table.push(f64::from(SUS_LEVELS[s as usize]) / 8.0);
    table
}

/// Simulated release curve from a sustain level down to zero. Rate 0 never
/// releases; the curve holds the raw sustain level.
pub fn release_table(s: u8, r: u8, tempo: f64) -> Vec<f64> {
    if r == 0 {
        return vec![f64::from(SUS_LEVELS[s as usize]); 65536];
    }

    let ticks_per_second = tempo * 24.0 / 60.0;
    let mut level: i32 = SUS_LEVELS[s as usize];
    let interval = u64::from(ADSR_RATES[r as usize]);
    let mut counter: u64 = 0;
    let mut last_tick_counter: i64 = 0;

    let mut table = vec![f64::from(level) / 8.0];
    while level > 0 {
        counter += interval;
        let tick_counter = (counter as f64 * ticks_per_second / 32000.0) as i64;
        if tick_counter > last_tick_counter {
            last_tick_counter = tick_counter;
            table.push(f64::from(level) / 8.0);
        }
        level -= ((level - 1) >> 8) + 1;
    }
    table.push(0.0);
    table
}

/// Squared error between the IT envelope and a simulated curve over
/// `[start, end]`, both normalized to 0..1.
pub fn env_diff(env: &[f64], curve: &[f64], start: usize, end: usize) -> f64 {
    let mut total = 0.0;
    let mut s = 0usize;
    let mut i = start;
    while i <= end {
        let a = curve[s.min(curve.len() - 1)];
        let e = env[i.min(env.len() - 1)];
        total += (a / 256.0 - e / 256.0).powi(2);
        s += 1;
        i += 1;
    }
    total
}
