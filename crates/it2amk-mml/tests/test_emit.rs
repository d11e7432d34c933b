//! Tests for the MML emitter: document structure, channel text, pan and
//! volume translation.

mod common;

use it2amk_it::pattern::effect;
use it2amk_mml::config::VolumeCurve;
use it2amk_mml::{fit_pan, inverse_volume, ModuleTags, MmlEmitter, Options, Unroller};

use common::{effect_cell, module, note_cell, pattern, sample_dict};

fn render(module: &it2amk_it::ItModule, options: &Options) -> String {
    let tags = ModuleTags::parse(module).unwrap();
    let mut table = Unroller::unroll(module, options, &tags);
    table.sample_dict = sample_dict(&[(1, "wave.brr", "$03 $40")]);
    MmlEmitter::render(module, &table, &tags, options, "song")
}

fn single_note_module(note: u8) -> it2amk_it::ItModule {
    let mut p = pattern(4);
    p.rows[0][0] = note_cell(note, 1);
    module(vec![0], vec![p])
}

#[test]
fn test_document_structure() {
    let mml = render(&single_note_module(72), &Options::default());

    assert!(mml.starts_with("#amk 2\n\n"));
    assert!(mml.contains("#SPC\n{\n    #title   \"fixture\"\n}"));
    assert!(mml.contains("#path \"song\"\n\n#samples\n{\n    \"wave.brr\"\n}"));
    assert!(mml.contains("#instruments\n{\n"));
    assert!(mml.contains("$00 $00 $7F $03 $40"));
    // Global init: master volume, tempo, legato, and the loop slash for a
    // non-looping song.
    assert!(mml.contains("w255 t52\n\n$F4 $02\n\n/\n\n"));
    for c in 0..8 {
        assert!(mml.contains(&format!("#{}  ", c)));
    }
}

#[test]
fn test_single_note_channel_text() {
    let mml = render(&single_note_module(72), &Options::default());

    // Instrument id 30, full volume through the curve, dead-center pan,
    // octave anchor, note covering four rows at speed 6 and tmult 2.
    assert!(mml.contains("@30 v255 y10,0,0 o5 c=48"));
    // The non-looping init echo write lands at the top of channel 0.
    assert!(mml.contains("#0  $EF $00 $00 $00"));
}

#[test]
fn test_note_octave_anchoring() {
    let mut p = pattern(4);
    p.rows[0][0] = note_cell(72, 1);
    p.rows[1][0] = note_cell(84, 1);
    p.rows[2][0] = note_cell(60, 1);
    let mml = render(&module(vec![0], vec![p]), &Options::default());

    // Octave 5, up one, down two; the last note runs to the pattern end.
    assert!(mml.contains("o5 c=12"));
    assert!(mml.contains("> c=12"));
    assert!(mml.contains("<< c=24"));
}

#[test]
fn test_out_of_range_note_is_rest() {
    let mml = render(&single_note_module(12), &Options::default());
    assert!(mml.contains("r=48"));
    assert!(!mml.contains("o0"));
}

#[test]
fn test_long_note_chunking() {
    // 64 rows at speed 6 and tmult 2 is 768 ticks: six =127 chunks and a
    // remainder of 6.
    let mut p = pattern(64);
    p.rows[0][0] = note_cell(72, 1);
    let mml = render(&module(vec![0], vec![p]), &Options::default());

    assert!(mml.contains("c=127^=127^=127^=127^=127^=127^=6"));
}

#[test]
fn test_vibrato_command_and_clear() {
    let mut p = pattern(4);
    p.rows[0][0] = note_cell(72, 1);
    p.rows[1][0] = note_cell(72, 1);
    p.rows[1][0].effect = Some((effect::VIBRATO, 0x84));
    p.rows[2][0] = note_cell(72, 1);
    let mml = render(&module(vec![0], vec![p]), &Options::default());

    // Speed nibble 8 at tmult 2 gives frequency 16; depth nibble 4 gives
    // amplitude 60.
    assert!(mml.contains("p0,16,60"));
    assert!(mml.contains("$DF"));
}

#[test]
fn test_note_fade_uses_fadeout() {
    let mut p = pattern(4);
    p.rows[0][0] = note_cell(72, 1);
    p.rows[1][0].note = Some(121);
    let mml = render(&module(vec![0], vec![p]), &Options::default());

    // Fadeout 256: 1024/256 * tmult 2 = 8 ticks down to the fade floor.
    assert!(mml.contains("$E8 $08 $10"));
}

#[test]
fn test_note_off_release_override_tag() {
    let mut p = pattern(4);
    p.rows[0][0] = note_cell(72, 1);
    p.rows[1][0].note = Some(255);
    let mut m = module(vec![0], vec![p]);
    m.instruments[0].name = "lead `r80057F`".to_string();
    let mml = render(&m, &Options::default());

    assert!(mml.contains("$ED $00 $05"));
}

#[test]
fn test_note_off_without_release_rests() {
    let mut p = pattern(4);
    p.rows[0][0] = note_cell(72, 1);
    p.rows[1][0].note = Some(255);
    let mml = render(&module(vec![0], vec![p]), &Options::default());

    // The off itself rests through the remaining rows.
    assert!(mml.contains("c=12r=36"));
}

#[test]
fn test_adsr_override_tag_in_instruments_block() {
    let mut m = single_note_module(72);
    m.instruments[0].name = "lead `af8e07f`".to_string();
    let mml = render(&m, &Options::default());

    assert!(mml.contains("$F8 $E0 $7F $03 $40"));
}

#[test]
fn test_noise_instrument_line() {
    let mut m = single_note_module(72);
    m.instruments[0].name = "hat `n`".to_string();
    let mml = render(&m, &Options::default());

    assert!(mml.contains("; noise"));
    // Noise pitch from note modulo 32.
    assert!(mml.contains("n8"));
    assert!(mml.contains("o4"));
}

#[test]
fn test_echo_and_fir_init_blocks() {
    let mut options = Options::default();
    options.set_flag("-e", "7F40C020").unwrap();
    options.set_flag("-f", "7F00000000000000").unwrap();
    options.set_flag("-ml", "60A0").unwrap();
    let mml = render(&single_note_module(72), &options);

    assert!(mml.contains("$EF $00 $C0 $20\n$F1 $7F $40 $01\n\n"));
    assert!(mml.contains("$F5 $7F $00 $00 $00 $00 $00 $00 $00\n\n"));
    assert!(mml.contains("$F6 $0C $60\n$F6 $1C $A0\n\n"));
    // The channel-0 echo write now carries the configured volumes.
    assert!(mml.contains("#0  $EF $00 $C0 $20"));
}

#[test]
fn test_loop_marker_renders_slash() {
    let p0 = pattern(4);
    let mut p1 = pattern(4);
    p1.rows[0][0] = note_cell(72, 1);
    p1.rows[3][1] = effect_cell(effect::POSITION_JUMP, 0x01);
    let mml = render(&module(vec![0, 1], vec![p0, p1]), &Options::default());

    // A looping song gets no slash in the init block; every channel carries
    // one at the loop point instead.
    assert!(!mml.contains("$F4 $02\n\n/"));
    for c in 0..8 {
        let channel = mml.split(&format!("#{}  ", c)).nth(1).unwrap();
        let body = channel.split("\n\n").next().unwrap();
        assert!(body.contains('/'), "channel {} misses the loop slash", c);
    }
}

#[test]
fn test_inline_mml_insertion() {
    let mut options = Options::default();
    options.set_flag("-mm", "0:1:1:0:$F4 $01 ; raw").unwrap();
    let mut p = pattern(4);
    p.rows[0][0] = note_cell(72, 1);
    let mml = render(&module(vec![0], vec![p]), &options);

    // The comment part after the semicolon is dropped.
    assert!(mml.contains("$F4 $01"));
    assert!(!mml.contains("; raw"));
}

#[test]
fn test_volume_curve_inverse_property() {
    // The accurate inverse is the argmin over the engine curve with ties
    // broken toward the smaller input.
    let curve = |v: i64| -> f64 {
        let vv = (v * 0xFF) >> 8;
        let vv = (vv * vv) >> 8;
        let vv = (vv * 0x51) >> 8;
        let vv = (vv * 0xFC) >> 8;
        vv as f64 * 255.0 / f64::from(0x4D)
    };

    for level in 1..=255i64 {
        let got = inverse_volume(level, VolumeCurve::Accurate);
        let mut best = 0i64;
        let mut best_diff = f64::MAX;
        for v in 0..=255i64 {
            let diff = (curve(v) - level as f64).abs();
            if diff < best_diff {
                best_diff = diff;
                best = v;
            }
        }
        assert_eq!(i64::from(got), best, "level {}", level);
    }
    assert_eq!(inverse_volume(0, VolumeCurve::Accurate), 0);
}

#[test]
fn test_pan_symmetry_at_dead_center() {
    let (pan, norm) = fit_pan(127);
    assert_eq!(pan, 10);
    assert!((norm - 1.0).abs() < 1e-9);
}

#[test]
fn test_pan_extremes() {
    let (hard_left, _) = fit_pan(255);
    let (hard_right, _) = fit_pan(0);
    assert_eq!(hard_left, 20);
    assert_eq!(hard_right, 0);
}

#[test]
fn test_surround_pins_pan() {
    let mut p = pattern(4);
    p.rows[0][0] = note_cell(72, 1);
    p.rows[0][0].effect = Some((effect::EXTENDED, 0x91));
    let mml = render(&module(vec![0], vec![p]), &Options::default());

    assert!(mml.contains("y10,1,0"));
}
