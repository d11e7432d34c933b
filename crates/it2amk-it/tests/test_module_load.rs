//! End-to-end loader test over a hand-assembled IT file image containing
//! a pattern, an instrument and a sample.

use it2amk_it::pattern::effect;
use it2amk_it::{ItModule, LoadError};

const HEADER_SIZE: usize = 192;
const INSTRUMENT_SIZE: usize = 554;
const SAMPLE_HEADER_SIZE: usize = 80;

fn push_name(data: &mut Vec<u8>, name: &str, len: usize) {
    let mut buf = name.as_bytes().to_vec();
    buf.resize(len, 0);
    data.extend_from_slice(&buf);
}

fn instrument_block(name: &str) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"IMPI");
    push_name(&mut data, "lead.iti", 12);
    data.extend_from_slice(&[0, 0, 0, 0]); // reserved, NNA, DCT, DCA
    data.extend_from_slice(&512u16.to_le_bytes()); // fadeout
    data.push(0); // PPS
    data.push(60); // PPC
    data.push(128); // GbV
    data.push(32); // DfP
    data.extend_from_slice(&[0, 0]); // RV, RP
    data.extend_from_slice(&[0; 4]);
    push_name(&mut data, name, 26);
    data.extend_from_slice(&[0, 0, 0, 0]); // IFC, IFR, MCh, MPr
    data.extend_from_slice(&0u16.to_le_bytes()); // MIDIBank
    for note in 0u8..120 {
        data.push(note);
        data.push(1);
    }
    for _ in 0..3 {
        data.extend_from_slice(&[0; 82]); // disabled envelope
    }
    data.extend_from_slice(&[0; 4]);
    assert_eq!(data.len(), INSTRUMENT_SIZE);
    data
}

fn sample_block(name: &str, data_offset: u32, pcm: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"IMPS");
    push_name(&mut data, "lead.wav", 12);
    data.push(0); // reserved
    data.push(64); // GvL
    data.push(0x01); // flags: has data
    data.push(48); // Vol
    push_name(&mut data, name, 26);
    data.push(0x01); // Cvt: signed
    data.push(0); // DfP
    data.extend_from_slice(&(pcm.len() as u32).to_le_bytes());
    data.extend_from_slice(&[0; 8]); // loop begin/end
    data.extend_from_slice(&8363u32.to_le_bytes());
    data.extend_from_slice(&[0; 8]); // sustain loop
    data.extend_from_slice(&data_offset.to_le_bytes());
    data.extend_from_slice(&[0; 4]); // vibrato
    assert_eq!(data.len(), SAMPLE_HEADER_SIZE);
    data
}

fn build_file() -> Vec<u8> {
    // One order + end marker, one instrument, one sample, one pattern.
    let packed: &[u8] = &[
        0x81, 0x0F, 60, 1, 64, effect::SET_SPEED, 3, // row 0 channel 0
        0, 0, 0, 0, // row ends
    ];
    let instrument_offset = (HEADER_SIZE + 2 + 4 + 4 + 4) as u32;
    let sample_offset = instrument_offset + INSTRUMENT_SIZE as u32;
    let pattern_offset = sample_offset + SAMPLE_HEADER_SIZE as u32;
    let data_offset = pattern_offset + 8 + packed.len() as u32;
    let pcm = [1u8, 2, 3, 4];

    let mut data = Vec::new();
    data.extend_from_slice(b"IMPM");
    push_name(&mut data, "integration", 26);
    data.push(4); // highlight minor
    data.push(16); // highlight major
    data.extend_from_slice(&2u16.to_le_bytes()); // orders
    data.extend_from_slice(&1u16.to_le_bytes()); // instruments
    data.extend_from_slice(&1u16.to_le_bytes()); // samples
    data.extend_from_slice(&1u16.to_le_bytes()); // patterns
    data.extend_from_slice(&0x0214u16.to_le_bytes());
    data.extend_from_slice(&0x0214u16.to_le_bytes());
    data.extend_from_slice(&0x000Du16.to_le_bytes()); // flags
    data.extend_from_slice(&0u16.to_le_bytes()); // special
    data.push(128); // GV
    data.push(48); // MV
    data.push(6); // IS
    data.push(125); // IT
    data.push(128); // Sep
    data.push(0); // PWD
    data.extend_from_slice(&0u16.to_le_bytes()); // message length
    data.extend_from_slice(&0u32.to_le_bytes()); // message offset
    data.extend_from_slice(&0u32.to_le_bytes()); // reserved
    data.extend_from_slice(&[32u8; 64]);
    data.extend_from_slice(&[64u8; 64]);
    assert_eq!(data.len(), HEADER_SIZE);

    data.extend_from_slice(&[0, 255]); // orders
    data.extend_from_slice(&instrument_offset.to_le_bytes());
    data.extend_from_slice(&sample_offset.to_le_bytes());
    data.extend_from_slice(&pattern_offset.to_le_bytes());

    data.extend_from_slice(&instrument_block("Lead"));
    data.extend_from_slice(&sample_block("Wave", data_offset, &pcm));

    data.extend_from_slice(&(packed.len() as u16).to_le_bytes());
    data.extend_from_slice(&4u16.to_le_bytes()); // rows
    data.extend_from_slice(&[0; 4]);
    data.extend_from_slice(packed);

    data.extend_from_slice(&pcm);
    data
}

#[test]
fn test_full_module_roundtrip() {
    let module = ItModule::from_bytes(&build_file()).unwrap();

    assert_eq!(module.header.name, "integration");
    assert_eq!(module.header.orders, vec![0, 255]);
    assert_eq!(module.header.initial_speed, 6);

    assert_eq!(module.instruments.len(), 1);
    let ins = &module.instruments[0];
    assert_eq!(ins.name, "Lead");
    assert_eq!(ins.fadeout, 512);
    assert_eq!(ins.sample_for_note(60), 1);
    assert!(!ins.volume_envelope.enabled);

    assert_eq!(module.samples.len(), 1);
    let smp = &module.samples[0];
    assert_eq!(smp.name, "Wave");
    assert_eq!(smp.default_volume, 48);
    assert_eq!(smp.data, vec![1, 2, 3, 4]);

    assert_eq!(module.patterns.len(), 1);
    let cell = module.patterns[0].rows[0][0];
    assert_eq!(cell.note, Some(60));
    assert_eq!(cell.instrument, Some(1));
    assert_eq!(cell.volume, Some(64));
    assert_eq!(cell.effect, Some((effect::SET_SPEED, 3)));
}

#[test]
fn test_truncated_pattern_fails() {
    let data = build_file();
    // Cut the file inside the pattern block.
    let cut = data.len() - 10;
    assert!(matches!(
        ItModule::from_bytes(&data[..cut]),
        Err(LoadError::Truncated { .. })
    ));
}
