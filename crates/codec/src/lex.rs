//! Building blocks for the order-preserving (lexicographic) encodings.
//!
//! Signed integers flip their sign bit so two's-complement values sort
//! correctly under `memcmp`. Floats remap to a monotone bit pattern
//! (`total_cmp` order). Variable-length payloads are framed base-32768:
//! each 15-bit group becomes two bytes in the ranges `[32, 202]` and
//! `[32, 223]`, and a final byte below 32 records how many bits of the last
//! group are significant. The terminator makes every encoding a non-prefix
//! of any longer one, so `prefix(a) < a < longer(a)` holds under `memcmp`.

use crate::error::CodecError;

/// Remaps float bits so unsigned comparison matches `total_cmp`.
#[inline]
pub fn f32_to_lex_bits(v: f32) -> u32 {
    let b = v.to_bits();
    if b & (1 << 31) != 0 {
        !b
    } else {
        b ^ (1 << 31)
    }
}

#[inline]
pub fn f32_from_lex_bits(b: u32) -> f32 {
    if b & (1 << 31) != 0 {
        f32::from_bits(b ^ (1 << 31))
    } else {
        f32::from_bits(!b)
    }
}

#[inline]
pub fn f64_to_lex_bits(v: f64) -> u64 {
    let b = v.to_bits();
    if b & (1 << 63) != 0 {
        !b
    } else {
        b ^ (1 << 63)
    }
}

#[inline]
pub fn f64_from_lex_bits(b: u64) -> f64 {
    if b & (1 << 63) != 0 {
        f64::from_bits(b ^ (1 << 63))
    } else {
        f64::from_bits(!b)
    }
}

// Base-32768 framing. Digit bytes: `b0 in [32, 202]`, `b1 in [32, 223]`;
// terminator below 32 (or, descending, above 223 after complement).

const DIGIT_BASE: u16 = 192;
const DIGIT_MIN: u8 = 32;
const B0_MAX: u8 = 202;
const B1_MAX: u8 = 223;

#[inline]
fn flip(b: u8, descending: bool) -> u8 {
    if descending {
        !b
    } else {
        b
    }
}

/// Appends the base-32768 framing of `payload` to `dst`.
pub fn encode_b32768(payload: &[u8], descending: bool, dst: &mut Vec<u8>) {
    let mut emit_digit = |d: u16| {
        debug_assert!(d < 1 << 15);
        dst.push(flip(DIGIT_MIN + (d / DIGIT_BASE) as u8, descending));
        dst.push(flip(DIGIT_MIN + (d % DIGIT_BASE) as u8, descending));
    };

    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    for &byte in payload {
        acc = (acc << 8) | byte as u32;
        bits += 8;
        while bits >= 15 {
            emit_digit(((acc >> (bits - 15)) & 0x7fff) as u16);
            bits -= 15;
            acc &= (1 << bits) - 1;
        }
    }
    let terminator = if bits > 0 {
        emit_digit(((acc << (15 - bits)) & 0x7fff) as u16);
        bits as u8
    } else if payload.is_empty() {
        0
    } else {
        15
    };
    dst.push(flip(terminator, descending));
}

/// Exact encoded size of the base-32768 framing of `len` payload bytes.
pub fn size_b32768(len: usize) -> usize {
    // Two bytes per started 15-bit group, plus the terminator.
    (len * 8).div_ceil(15) * 2 + 1
}

/// Decodes a base-32768 framed payload at `*offset`, advancing past the
/// terminator.
pub fn decode_b32768(
    src: &[u8],
    offset: &mut usize,
    descending: bool,
) -> Result<Vec<u8>, CodecError> {
    let mut digits: Vec<u16> = Vec::new();
    let terminator = loop {
        let b0 = flip(
            *src.get(*offset).ok_or(CodecError::Truncated(*offset))?,
            descending,
        );
        *offset += 1;
        if b0 < DIGIT_MIN {
            break b0;
        }
        let b1 = flip(
            *src.get(*offset).ok_or(CodecError::Truncated(*offset))?,
            descending,
        );
        *offset += 1;
        if b0 > B0_MAX || !(DIGIT_MIN..=B1_MAX).contains(&b1) {
            return Err(CodecError::Invalid {
                offset: *offset - 1,
                reason: "byte out of base-32768 digit range",
            });
        }
        let digit = (b0 - DIGIT_MIN) as u16 * DIGIT_BASE + (b1 - DIGIT_MIN) as u16;
        if digit >= 1 << 15 {
            return Err(CodecError::Invalid {
                offset: *offset - 2,
                reason: "base-32768 digit overflow",
            });
        }
        digits.push(digit);
    };

    let total_bits = match (digits.len(), terminator) {
        (0, 0) => 0,
        (0, _) | (_, 0) => {
            return Err(CodecError::Invalid {
                offset: *offset - 1,
                reason: "inconsistent base-32768 terminator",
            })
        }
        (n, t) if t <= 15 => (n - 1) * 15 + t as usize,
        _ => {
            return Err(CodecError::Invalid {
                offset: *offset - 1,
                reason: "base-32768 terminator out of range",
            })
        }
    };
    if total_bits % 8 != 0 {
        return Err(CodecError::Invalid {
            offset: *offset - 1,
            reason: "base-32768 bit count not byte-aligned",
        });
    }

    let mut out = Vec::with_capacity(total_bits / 8);
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let last = digits.len().wrapping_sub(1);
    for (i, &digit) in digits.iter().enumerate() {
        let take = if i == last { terminator as u32 } else { 15 };
        acc = (acc << take) | (digit >> (15 - take)) as u32;
        bits += take;
        while bits >= 8 {
            out.push((acc >> (bits - 8)) as u8);
            bits -= 8;
            acc &= (1 << bits) - 1;
        }
    }
    debug_assert_eq!(bits, 0);
    Ok(out)
}

/// Advances `*offset` past a base-32768 framed payload without decoding.
pub fn skip_b32768(src: &[u8], offset: &mut usize, descending: bool) -> Result<(), CodecError> {
    loop {
        let b = flip(
            *src.get(*offset).ok_or(CodecError::Truncated(*offset))?,
            descending,
        );
        *offset += 1;
        if b < DIGIT_MIN {
            return Ok(());
        }
        // Consume the second byte of the digit.
        if *offset >= src.len() {
            return Err(CodecError::Truncated(*offset));
        }
        *offset += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_payload_is_one_terminator_byte() {
        let mut buf = Vec::new();
        encode_b32768(&[], false, &mut buf);
        assert_eq!(buf, vec![0]);
        let mut offset = 0;
        assert_eq!(decode_b32768(&buf, &mut offset, false).unwrap(), Vec::<u8>::new());
        assert_eq!(offset, 1);
    }

    proptest! {
        #[test]
        fn b32768_roundtrip(payload in proptest::collection::vec(any::<u8>(), 0..200),
                            descending in any::<bool>()) {
            let mut buf = Vec::new();
            encode_b32768(&payload, descending, &mut buf);
            prop_assert_eq!(buf.len(), size_b32768(payload.len()));
            let mut offset = 0;
            prop_assert_eq!(decode_b32768(&buf, &mut offset, descending).unwrap(), payload);
            prop_assert_eq!(offset, buf.len());

            let mut skip_offset = 0;
            skip_b32768(&buf, &mut skip_offset, descending).unwrap();
            prop_assert_eq!(skip_offset, buf.len());
        }

        #[test]
        fn b32768_preserves_order(a in proptest::collection::vec(any::<u8>(), 0..60),
                                  b in proptest::collection::vec(any::<u8>(), 0..60)) {
            let mut ea = Vec::new();
            let mut eb = Vec::new();
            encode_b32768(&a, false, &mut ea);
            encode_b32768(&b, false, &mut eb);
            prop_assert_eq!(ea.cmp(&eb), a.cmp(&b));

            // Descending complements reverse the order.
            let mut da = Vec::new();
            let mut db = Vec::new();
            encode_b32768(&a, true, &mut da);
            encode_b32768(&b, true, &mut db);
            prop_assert_eq!(da.cmp(&db), b.cmp(&a));
        }

        #[test]
        fn float_remap_matches_total_cmp(a in any::<f64>(), b in any::<f64>()) {
            prop_assert_eq!(
                f64_to_lex_bits(a).cmp(&f64_to_lex_bits(b)),
                a.total_cmp(&b)
            );
            prop_assert_eq!(f64_from_lex_bits(f64_to_lex_bits(a)).to_bits(), a.to_bits());
        }
    }
}
