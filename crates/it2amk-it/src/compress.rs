//! IT compressed sample decoder.
//!
//! Samples are stored as a sequence of blocks (0x8000 samples for 8-bit data,
//! 0x4000 for 16-bit), each holding a bit stream of delta values with an
//! adaptive bit width. Three escape encodings change the width mid-stream.
//! Decoded deltas are integrated once, or twice for the IT 2.15 variant.

use crate::error::LoadError;

/// Bit stream reader. Bits come from the low end of each byte first and are
/// accumulated at bit 31, so after `n` bits the value is right-aligned with
/// the first-read bit lowest.
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    bitbuf: u32,
    bitnum: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            bitbuf: 0,
            bitnum: 0,
        }
    }

    /// Bytes consumed so far, counting the partially-read one.
    fn consumed(&self) -> usize {
        self.pos
    }

    fn read(&mut self, n: u32) -> Option<u32> {
        debug_assert!(n >= 1 && n <= 32);
        let mut value: u32 = 0;
        for _ in 0..n {
            if self.bitnum == 0 {
                self.bitbuf = u32::from(*self.data.get(self.pos)?);
                self.pos += 1;
                self.bitnum = 8;
            }
            value >>= 1;
            value |= self.bitbuf << 31;
            self.bitbuf >>= 1;
            self.bitnum -= 1;
        }
        Some(value >> (32 - n))
    }
}

fn bad(sample: usize, reason: &'static str) -> LoadError {
    LoadError::BadCompressedSample { sample, reason }
}

/// Decompress an 8-bit sample payload.
///
/// `src` starts at the sample's data offset; `len` is the sample count.
/// `it215` selects the double-integrator variant. Returns the decoded PCM
/// bytes (one per sample).
pub fn decompress8(
    src: &[u8],
    len: usize,
    it215: bool,
    sample: usize,
) -> Result<Vec<u8>, LoadError> {
    let mut out = Vec::with_capacity(len);
    let mut remaining = len;
    let mut offset = 0usize;

    while remaining > 0 {
        // Each block opens with its compressed byte length, which is not
        // needed when decoding sequentially.
        if offset + 2 > src.len() {
            return Err(bad(sample, "missing block header"));
        }
        offset += 2;

        let mut bits = BitReader::new(&src[offset..]);
        let blklen = remaining.min(0x8000);
        let mut blkpos = 0usize;
        let mut width: u32 = 9;
        let mut d1: u8 = 0;
        let mut d2: u8 = 0;

        while blkpos < blklen {
            if width == 0 || width > 9 {
                return Err(bad(sample, "illegal bit width"));
            }
            let value = bits
                .read(width)
                .ok_or_else(|| bad(sample, "bit stream exhausted"))?;

            if width < 7 {
                // Method 1: the top-bit-only pattern escapes to a new width.
                if value == 1 << (width - 1) {
                    let v = bits
                        .read(3)
                        .ok_or_else(|| bad(sample, "bit stream exhausted"))?
                        + 1;
                    width = if v < width { v } else { v + 1 };
                    continue;
                }
            } else if width < 9 {
                // Method 2: values just above the border re-encode the width.
                let border = (0xFFu32 >> (9 - width)) - 4;
                if value > border && value <= border + 8 {
                    let v = value - border;
                    width = if v < width { v } else { v + 1 };
                    continue;
                }
            } else {
                // Method 3: widths arrive verbatim under the top bit.
                if value & 0x100 != 0 {
                    width = (value + 1) & 0xFF;
                    continue;
                }
            }

            let v = if width < 8 {
                let shift = 8 - width;
                (((value << shift) as u8 as i8) >> shift) as u8
            } else {
                value as u8
            };

            d1 = d1.wrapping_add(v);
            d2 = d2.wrapping_add(d1);
            out.push(if it215 { d2 } else { d1 });
            blkpos += 1;
        }

        offset += bits.consumed();
        remaining -= blklen;
    }

    Ok(out)
}

/// Decompress a 16-bit sample payload into little-endian PCM bytes.
pub fn decompress16(
    src: &[u8],
    len: usize,
    it215: bool,
    sample: usize,
) -> Result<Vec<u8>, LoadError> {
    let mut out = Vec::with_capacity(len * 2);
    let mut remaining = len;
    let mut offset = 0usize;

    while remaining > 0 {
        if offset + 2 > src.len() {
            return Err(bad(sample, "missing block header"));
        }
        offset += 2;

        let mut bits = BitReader::new(&src[offset..]);
        let blklen = remaining.min(0x4000);
        let mut blkpos = 0usize;
        let mut width: u32 = 17;
        let mut d1: u16 = 0;
        let mut d2: u16 = 0;

        while blkpos < blklen {
            if width == 0 || width > 17 {
                return Err(bad(sample, "illegal bit width"));
            }
            let value = bits
                .read(width)
                .ok_or_else(|| bad(sample, "bit stream exhausted"))?;

            if width < 7 {
                if value == 1 << (width - 1) {
                    let v = bits
                        .read(4)
                        .ok_or_else(|| bad(sample, "bit stream exhausted"))?
                        + 1;
                    width = if v < width { v } else { v + 1 };
                    continue;
                }
            } else if width < 17 {
                let border = (0xFFFFu32 >> (17 - width)) - 8;
                if value > border && value <= border + 16 {
                    let v = value - border;
                    width = if v < width { v } else { v + 1 };
                    continue;
                }
            } else {
                if value & 0x10000 != 0 {
                    width = (value + 1) & 0xFF;
                    continue;
                }
            }

            let v = if width < 16 {
                let shift = 16 - width;
                (((value << shift) as u16 as i16) >> shift) as u16
            } else {
                value as u16
            };

            d1 = d1.wrapping_add(v);
            d2 = d2.wrapping_add(d1);
            let sample_out = if it215 { d2 } else { d1 };
            out.extend_from_slice(&sample_out.to_le_bytes());
            blkpos += 1;
        }

        offset += bits.consumed();
        remaining -= blklen;
    }

    Ok(out)
}
