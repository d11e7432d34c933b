//! Tests for the playback unroller: row timing, loops, jumps, slides and
//! loop-point detection.

mod common;

use pretty_assertions::assert_eq;

use it2amk_it::pattern::effect;
use it2amk_mml::event::EventKind;
use it2amk_mml::unroll::compute_loop_tick;
use it2amk_mml::{ModuleTags, Options, Unroller};

use common::{effect_cell, module, note_cell, pattern};

fn unroll(module: &it2amk_it::ItModule) -> it2amk_mml::EventTable {
    let options = Options::default();
    let tags = ModuleTags::parse(module).unwrap();
    Unroller::unroll(module, &options, &tags)
}

fn note_ticks(table: &it2amk_mml::EventTable, channel: usize) -> Vec<u32> {
    table.events[channel]
        .iter()
        .filter(|e| matches!(e.kind, EventKind::Note(_)))
        .map(|e| e.tick)
        .collect()
}

fn volume_events(table: &it2amk_mml::EventTable, channel: usize) -> Vec<(u32, u8)> {
    table.events[channel]
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::SetVolume(v) => Some((e.tick, v)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_single_note_at_tick_zero() {
    let mut p = pattern(4);
    p.rows[0][0] = note_cell(60, 1);
    let table = unroll(&module(vec![0], vec![p]));

    assert_eq!(note_ticks(&table, 0), vec![0]);
    assert_eq!(table.ins_list, vec![(1, 1)]);
    assert_eq!(table.ins_dict[&(1, 1)], 30);
    assert!(table.used_samples.contains(&1));
}

#[test]
fn test_row_delay_shifts_note() {
    // SD2 delays the row's note by two ticks.
    let mut p = pattern(4);
    p.rows[0][0] = note_cell(60, 1);
    p.rows[0][0].effect = Some((effect::EXTENDED, 0xD2));
    let table = unroll(&module(vec![0], vec![p]));

    assert_eq!(note_ticks(&table, 0), vec![2]);
}

#[test]
fn test_row_delay_beyond_speed_suppresses_row() {
    // A subtick at or past the row speed plays nothing.
    let mut p = pattern(4);
    p.rows[0][0] = note_cell(60, 1);
    p.rows[0][0].effect = Some((effect::EXTENDED, 0xD6));
    let table = unroll(&module(vec![0], vec![p]));

    assert_eq!(note_ticks(&table, 0), Vec::<u32>::new());
}

#[test]
fn test_note_cut_schedules_cut() {
    // SC3 at speed 6 cuts on tick 3 of the row.
    let mut p = pattern(2);
    p.rows[0][0] = note_cell(60, 1);
    p.rows[0][1] = effect_cell(effect::EXTENDED, 0xC3);
    let table = unroll(&module(vec![0], vec![p]));

    let cuts: Vec<u32> = table.events[1]
        .iter()
        .filter(|e| matches!(e.kind, EventKind::NoteCut))
        .map(|e| e.tick)
        .collect();
    assert_eq!(cuts, vec![3]);
}

#[test]
fn test_pattern_loop_plays_rows_three_times() {
    // SB0 on row 0, SB2 on row 3: rows 0-3 play three times in total, then
    // row 4 follows.
    let mut p = pattern(6);
    p.rows[0][0] = effect_cell(effect::EXTENDED, 0xB0);
    p.rows[0][1] = note_cell(60, 1);
    p.rows[3][0] = effect_cell(effect::EXTENDED, 0xB2);
    p.rows[4][1] = note_cell(62, 1);
    let table = unroll(&module(vec![0], vec![p]));

    assert_eq!(note_ticks(&table, 1), vec![0, 24, 48, 72]);
}

#[test]
fn test_position_jump_without_row_jump() {
    // Bxx=02 on order 0 row 5 continues at order 2 row 0.
    let mut p0 = pattern(8);
    p0.rows[5][0] = effect_cell(effect::POSITION_JUMP, 0x02);
    let p1 = pattern(8);
    let mut p2 = pattern(8);
    p2.rows[0][1] = note_cell(60, 1);
    let table = unroll(&module(vec![0, 1, 2], vec![p0, p1, p2]));

    // Rows 0-5 of order 0 take 36 ticks.
    assert_eq!(note_ticks(&table, 1), vec![36]);
}

#[test]
fn test_row_jump_targets_next_position() {
    // Cxx without Bxx jumps to the given row of the next position.
    let mut p0 = pattern(8);
    p0.rows[0][0] = effect_cell(effect::PATTERN_BREAK, 2);
    let mut p1 = pattern(8);
    p1.rows[2][1] = note_cell(60, 1);
    let table = unroll(&module(vec![0, 1], vec![p0, p1]));

    assert_eq!(note_ticks(&table, 1), vec![6]);
}

#[test]
fn test_volume_slide_trajectory() {
    // D03 at speed 4 on a channel sitting at volume 40: unchanged on the
    // row's first tick, then minus three per tick.
    let mut p = pattern(3);
    p.rows[0][0] = note_cell(60, 1);
    p.rows[0][0].volume = Some(40);
    p.rows[1][0] = effect_cell(effect::VOLUME_SLIDE, 0x03);
    let mut m = module(vec![0], vec![p]);
    m.header.initial_speed = 4;
    let table = unroll(&m);

    assert_eq!(
        volume_events(&table, 0),
        vec![(0, 64), (0, 40), (5, 37), (6, 34), (7, 31)]
    );
}

#[test]
fn test_volume_slide_memory() {
    // D00 recalls the previous slide parameter.
    let mut p = pattern(3);
    p.rows[0][0] = note_cell(60, 1);
    p.rows[0][0].volume = Some(40);
    p.rows[1][0] = effect_cell(effect::VOLUME_SLIDE, 0x03);
    p.rows[2][0] = effect_cell(effect::VOLUME_SLIDE, 0x00);
    let mut m = module(vec![0], vec![p]);
    m.header.initial_speed = 4;
    let table = unroll(&m);

    let volumes: Vec<u8> = volume_events(&table, 0).iter().map(|&(_, v)| v).collect();
    assert_eq!(volumes, vec![64, 40, 37, 34, 31, 28, 25, 22]);
}

#[test]
fn test_fine_volume_slide_applies_once() {
    // Volume column 66 = fine slide up 1, applied on the first tick only.
    let mut p = pattern(2);
    p.rows[0][0] = note_cell(60, 1);
    p.rows[0][0].volume = Some(40);
    p.rows[1][0].volume = Some(66);
    let table = unroll(&module(vec![0], vec![p]));

    assert_eq!(
        volume_events(&table, 0),
        vec![(0, 64), (0, 40), (6, 41)]
    );
}

#[test]
fn test_vibrato_memory_and_clear() {
    let mut p = pattern(3);
    p.rows[0][0] = note_cell(60, 1);
    p.rows[1][0] = effect_cell(effect::VIBRATO, 0x84);
    let table = unroll(&module(vec![0], vec![p]));

    let vibs: Vec<(u32, u8)> = table.events[0]
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::SetVibrato(v) => Some((e.tick, v)),
            _ => None,
        })
        .collect();
    // Set on row 1, cleared on row 2.
    assert_eq!(vibs, vec![(6, 0x84), (12, 0x00)]);
}

#[test]
fn test_instrument_without_note_retriggers() {
    let mut p = pattern(3);
    p.rows[0][0] = note_cell(60, 1);
    p.rows[2][0].instrument = Some(1);
    let table = unroll(&module(vec![0], vec![p]));

    assert_eq!(note_ticks(&table, 0), vec![0, 12]);
}

#[test]
fn test_tempo_and_global_volume_events() {
    let mut p = pattern(2);
    p.rows[1][2] = effect_cell(effect::TEMPO, 0x80);
    p.rows[1][3] = effect_cell(effect::SET_GLOBAL_VOL, 0x40);
    let table = unroll(&module(vec![0], vec![p]));

    // Initial values land on channel 0 at tick 0; changes land on the
    // issuing channel.
    assert!(table.events[0]
        .iter()
        .any(|e| e.tick == 0 && e.kind == EventKind::SetTempo(125)));
    assert!(table.events[0]
        .iter()
        .any(|e| e.tick == 0 && e.kind == EventKind::SetGlobalVolume(128)));
    assert!(table.events[2]
        .iter()
        .any(|e| e.tick == 6 && e.kind == EventKind::SetTempo(0x80)));
    assert!(table.events[3]
        .iter()
        .any(|e| e.tick == 6 && e.kind == EventKind::SetGlobalVolume(0x40)));
}

#[test]
fn test_pattern_delay_repeats_row() {
    // SE1 plays the row twice; the note sounds once but time advances two
    // rows' worth.
    let mut p = pattern(2);
    p.rows[0][0] = note_cell(60, 1);
    p.rows[0][1] = effect_cell(effect::EXTENDED, 0xE1);
    p.rows[1][0] = note_cell(62, 1);
    let table = unroll(&module(vec![0], vec![p]));

    assert_eq!(note_ticks(&table, 0), vec![0, 12]);
}

#[test]
fn test_tick_monotonicity() {
    let mut p = pattern(8);
    p.rows[0][0] = effect_cell(effect::EXTENDED, 0xB0);
    p.rows[0][1] = note_cell(60, 1);
    p.rows[1][1] = note_cell(62, 1);
    p.rows[1][1].volume = Some(95 + 2);
    p.rows[2][0] = effect_cell(effect::EXTENDED, 0xB1);
    p.rows[3][2] = effect_cell(effect::TEMPO, 0x90);
    p.rows[4][1] = effect_cell(effect::EXTENDED, 0xE2);
    p.rows[5][0] = effect_cell(effect::EXTENDED, 0xC2);
    let table = unroll(&module(vec![0], vec![p]));

    for c in 0..8 {
        let ticks: Vec<u32> = table.events[c].iter().map(|e| e.tick).collect();
        assert!(
            ticks.windows(2).all(|w| w[0] <= w[1]),
            "channel {} is not tick-monotonic: {:?}",
            c,
            ticks
        );
    }
    let global_ticks: Vec<u32> = table.global_events.iter().map(|e| e.tick).collect();
    assert!(global_ticks.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_loop_anchor_and_marker() {
    // Order 1 jumps back to itself: the loop anchor sits after pattern 0.
    let p0 = pattern(4);
    let mut p1 = pattern(4);
    p1.rows[0][0] = note_cell(60, 1);
    p1.rows[3][1] = effect_cell(effect::POSITION_JUMP, 0x01);
    let m = module(vec![0, 1], vec![p0, p1]);
    let table = unroll(&m);

    assert_eq!(table.loop_tick, 24);
    for c in 0..8 {
        let markers = table.events[c]
            .iter()
            .filter(|e| e.kind == EventKind::LoopMark)
            .count();
        assert_eq!(markers, 1, "channel {} loop markers", c);
        let pos = table.events[c]
            .iter()
            .position(|e| e.kind == EventKind::LoopMark)
            .unwrap();
        assert!(table.events[c][pos..].iter().all(|e| e.tick >= 24));
    }
}

#[test]
fn test_loop_tick_recomputation_is_idempotent() {
    let p0 = pattern(4);
    let mut p1 = pattern(4);
    p1.rows[3][1] = effect_cell(effect::POSITION_JUMP, 0x01);
    let m = module(vec![0, 1], vec![p0, p1]);

    let first = compute_loop_tick(&m, 1, 0);
    let second = compute_loop_tick(&m, 1, 0);
    assert_eq!(first, 24);
    assert_eq!(first, second);
}

#[test]
fn test_instrument_dictionary_closure() {
    let mut p = pattern(4);
    p.rows[0][0] = note_cell(60, 1);
    p.rows[2][1] = note_cell(65, 1);
    let table = unroll(&module(vec![0], vec![p]));

    assert_eq!(table.ins_dict.len(), table.ins_list.len());
    for (i, key) in table.ins_list.iter().enumerate() {
        assert_eq!(table.ins_dict[key], 30 + i as u32);
        if key.1 > 0 {
            assert!(table.used_samples.contains(&key.1));
        }
    }
}

#[test]
fn test_noise_instrument_uses_sentinel_sample() {
    let mut p = pattern(2);
    p.rows[0][0] = note_cell(60, 1);
    let mut m = module(vec![0], vec![p]);
    m.instruments[0].name = "hat `n`".to_string();
    let table = unroll(&m);

    assert_eq!(table.ins_list, vec![(1, 0)]);
    assert!(table.used_samples.is_empty());
}
