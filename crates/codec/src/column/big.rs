//! Arbitrary-precision integer and decimal column codecs.
//!
//! The lexicographic forms are built so numeric order matches `memcmp`:
//!
//! - integers carry a sign/length marker byte (`0x80` = zero, `0x81 +`
//!   ascending lengths for positives, mirrored complements below `0x80` for
//!   negatives) followed by magnitude bytes, complemented for negatives;
//! - decimals normalize away trailing zeros, then store a sign byte, the
//!   adjusted exponent in the integer form above, and base-10 digit bytes
//!   with a terminator, the whole digit section mirrored for negatives.

use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::num_traits::Zero;
use bigdecimal::BigDecimal;

use crate::error::CodecError;
use crate::pf::{decode_prefix_pf, encode_prefix_pf, length_prefix_pf};
use crate::value::Value;

use super::{null_header, QuickCol, QuickMode, Regime, NOT_NULL_LOW, NULL_LOW};

const ZERO_MARKER: u8 = 0x80;
const POS_HUGE_MARKER: u8 = 0xff;
const NEG_HUGE_MARKER: u8 = 0x00;
const SMALL_LEN_MAX: usize = 0x7e;

const DEC_NEG: u8 = 0x40;
const DEC_ZERO: u8 = 0x80;
const DEC_POS: u8 = 0xc0;

#[inline]
fn flip(b: u8, flipped: bool) -> u8 {
    if flipped {
        !b
    } else {
        b
    }
}

fn read_byte(src: &[u8], offset: &mut usize, flipped: bool) -> Result<u8, CodecError> {
    let b = *src.get(*offset).ok_or(CodecError::Truncated(*offset))?;
    *offset += 1;
    Ok(flip(b, flipped))
}

fn read_magnitude(
    src: &[u8],
    offset: &mut usize,
    len: usize,
    flipped: bool,
) -> Result<Vec<u8>, CodecError> {
    let end = offset
        .checked_add(len)
        .filter(|&end| end <= src.len())
        .ok_or(CodecError::Truncated(src.len()))?;
    let mag = src[*offset..end].iter().map(|&b| flip(b, flipped)).collect();
    *offset = end;
    Ok(mag)
}

/// Appends the order-preserving integer form, complementing every output
/// byte when `flipped` (used for descending columns and the mirrored digit
/// section of negative decimals).
fn encode_lex_bigint(n: &BigInt, flipped: bool, dst: &mut Vec<u8>) -> Result<(), CodecError> {
    if n.is_zero() {
        dst.push(flip(ZERO_MARKER, flipped));
        return Ok(());
    }
    let mag = n.magnitude().to_bytes_be();
    let len = mag.len();
    match n.sign() {
        Sign::Plus => {
            if len <= SMALL_LEN_MAX {
                dst.push(flip(ZERO_MARKER + len as u8, flipped));
            } else {
                let len = u32::try_from(len).map_err(|_| CodecError::TooLarge(len))?;
                dst.push(flip(POS_HUGE_MARKER, flipped));
                dst.extend(len.to_be_bytes().iter().map(|&b| flip(b, flipped)));
            }
            dst.extend(mag.iter().map(|&b| flip(b, flipped)));
        }
        Sign::Minus => {
            if len <= SMALL_LEN_MAX {
                dst.push(flip(0x7f - len as u8, flipped));
            } else {
                let len = u32::try_from(len).map_err(|_| CodecError::TooLarge(len))?;
                dst.push(flip(NEG_HUGE_MARKER, flipped));
                dst.extend(len.to_be_bytes().iter().map(|&b| flip(!b, flipped)));
            }
            dst.extend(mag.iter().map(|&b| flip(!b, flipped)));
        }
        Sign::NoSign => unreachable!("zero handled above"),
    }
    Ok(())
}

fn lex_bigint_size(n: &BigInt) -> usize {
    if n.is_zero() {
        return 1;
    }
    let len = (n.bits() as usize).div_ceil(8);
    if len <= SMALL_LEN_MAX {
        1 + len
    } else {
        5 + len
    }
}

fn decode_lex_bigint(src: &[u8], offset: &mut usize, flipped: bool) -> Result<BigInt, CodecError> {
    let marker = read_byte(src, offset, flipped)?;
    if marker == ZERO_MARKER {
        return Ok(BigInt::zero());
    }
    let (negative, len) = if marker > ZERO_MARKER {
        if marker == POS_HUGE_MARKER {
            let mut len_bytes = [0u8; 4];
            for b in &mut len_bytes {
                *b = read_byte(src, offset, flipped)?;
            }
            (false, u32::from_be_bytes(len_bytes) as usize)
        } else {
            (false, (marker - ZERO_MARKER) as usize)
        }
    } else if marker == NEG_HUGE_MARKER {
        let mut len_bytes = [0u8; 4];
        for b in &mut len_bytes {
            *b = !read_byte(src, offset, flipped)?;
        }
        (true, u32::from_be_bytes(len_bytes) as usize)
    } else {
        (true, (0x7f - marker) as usize)
    };
    let mag = read_magnitude(src, offset, len, flipped != negative)?;
    let n = BigInt::from_bytes_be(Sign::Plus, &mag);
    Ok(if negative { -n } else { n })
}

fn skip_lex_bigint(src: &[u8], offset: &mut usize, flipped: bool) -> Result<(), CodecError> {
    let marker = read_byte(src, offset, flipped)?;
    if marker == ZERO_MARKER {
        return Ok(());
    }
    let len = if marker == POS_HUGE_MARKER || marker == NEG_HUGE_MARKER {
        let negate = marker == NEG_HUGE_MARKER;
        let mut len_bytes = [0u8; 4];
        for b in &mut len_bytes {
            let byte = read_byte(src, offset, flipped)?;
            *b = if negate { !byte } else { byte };
        }
        u32::from_be_bytes(len_bytes) as usize
    } else if marker > ZERO_MARKER {
        (marker - ZERO_MARKER) as usize
    } else {
        (0x7f - marker) as usize
    };
    let end = offset
        .checked_add(len)
        .filter(|&end| end <= src.len())
        .ok_or(CodecError::Truncated(src.len()))?;
    *offset = end;
    Ok(())
}

macro_rules! varlen_codec_common {
    ($name:ident) => {
        impl $name {
            pub(crate) fn new(
                nullable: bool,
                descending: bool,
                null_low: bool,
                regime: Regime,
            ) -> $name {
                $name {
                    nullable,
                    descending,
                    null_low,
                    regime,
                }
            }

            pub fn nullable(&self) -> bool {
                self.nullable
            }

            pub fn descending(&self) -> bool {
                self.descending
            }

            pub fn null_low(&self) -> bool {
                self.null_low
            }

            pub fn key_descending(&self) -> bool {
                self.descending
            }

            pub fn regime(&self) -> Regime {
                self.regime
            }

            pub fn is_key(&self) -> bool {
                self.regime.is_key()
            }

            pub fn quick_mode(&self) -> QuickMode {
                if self.regime.is_key() {
                    QuickMode::Memcmp {
                        reversed: self.descending,
                    }
                } else {
                    QuickMode::Decode
                }
            }

            pub fn min_size(&self) -> usize {
                match self.regime {
                    Regime::Key => self.nullable as usize,
                    Regime::ValueInterior => 1,
                    Regime::ValueLast => self.nullable as usize,
                }
            }

            /// Reads the key-regime null header; `Ok(true)` means the value
            /// is null and fully consumed.
            fn read_key_header(&self, src: &[u8], offset: &mut usize) -> Result<bool, CodecError> {
                if !self.nullable {
                    return Ok(false);
                }
                let (null_b, not_null_b) = null_header(self.descending, self.null_low);
                let header = *src.get(*offset).ok_or(CodecError::Truncated(*offset))?;
                *offset += 1;
                if header == null_b {
                    Ok(true)
                } else if header == not_null_b {
                    Ok(false)
                } else {
                    Err(CodecError::Invalid {
                        offset: *offset - 1,
                        reason: "invalid null header byte",
                    })
                }
            }

            fn write_key_header(&self, is_null: bool, dst: &mut Vec<u8>) -> Result<(), CodecError> {
                if is_null && !self.nullable {
                    return Err(CodecError::UnexpectedNull);
                }
                if self.nullable {
                    let (null_b, not_null_b) = null_header(self.descending, self.null_low);
                    dst.push(if is_null { null_b } else { not_null_b });
                }
                Ok(())
            }
        }
    };
}

/// Arbitrary-precision integer codec.
#[derive(Clone, Debug, PartialEq)]
pub struct BigIntCodec {
    nullable: bool,
    descending: bool,
    null_low: bool,
    regime: Regime,
}

varlen_codec_common!(BigIntCodec);

impl BigIntCodec {
    fn expect_big<'v>(&self, v: &'v Value) -> Result<&'v BigInt, CodecError> {
        match v {
            Value::BigInt(n) => Ok(n),
            _ => Err(CodecError::ValueType {
                expected: rowstore_primitives::PlainType::BigInt,
                found: v.kind_name(),
            }),
        }
    }

    pub fn encode_size(&self, v: &Value) -> Result<usize, CodecError> {
        if v.is_null() {
            return Ok(0);
        }
        let n = self.expect_big(v)?;
        Ok(match self.regime {
            Regime::Key => lex_bigint_size(n),
            Regime::ValueInterior => {
                let len = n.to_signed_bytes_be().len();
                let framed = len + self.nullable as usize;
                length_prefix_pf(framed) + len - 1
            }
            Regime::ValueLast => n.to_signed_bytes_be().len(),
        })
    }

    pub fn encode(&self, v: &Value, dst: &mut Vec<u8>) -> Result<(), CodecError> {
        match self.regime {
            Regime::Key => {
                self.write_key_header(v.is_null(), dst)?;
                if v.is_null() {
                    return Ok(());
                }
                encode_lex_bigint(self.expect_big(v)?, self.descending, dst)
            }
            Regime::ValueInterior => {
                if v.is_null() {
                    if !self.nullable {
                        return Err(CodecError::UnexpectedNull);
                    }
                    encode_prefix_pf(0, dst)?;
                    return Ok(());
                }
                let bytes = self.expect_big(v)?.to_signed_bytes_be();
                encode_prefix_pf(bytes.len() + self.nullable as usize, dst)?;
                dst.extend_from_slice(&bytes);
                Ok(())
            }
            Regime::ValueLast => {
                if v.is_null() {
                    if !self.nullable {
                        return Err(CodecError::UnexpectedNull);
                    }
                    dst.push(NULL_LOW);
                    return Ok(());
                }
                if self.nullable {
                    dst.push(NOT_NULL_LOW);
                }
                dst.extend_from_slice(&self.expect_big(v)?.to_signed_bytes_be());
                Ok(())
            }
        }
    }

    pub fn decode(&self, src: &[u8], offset: &mut usize) -> Result<Value, CodecError> {
        match self.regime {
            Regime::Key => {
                if self.read_key_header(src, offset)? {
                    return Ok(Value::Null);
                }
                decode_lex_bigint(src, offset, self.descending).map(Value::BigInt)
            }
            Regime::ValueInterior => {
                let framed = decode_prefix_pf(src, offset)?;
                let len = if self.nullable {
                    if framed == 0 {
                        return Ok(Value::Null);
                    }
                    framed - 1
                } else {
                    framed
                };
                let bytes = read_magnitude(src, offset, len, false)?;
                Ok(Value::BigInt(BigInt::from_signed_bytes_be(&bytes)))
            }
            Regime::ValueLast => {
                if self.nullable {
                    let header = *src.get(*offset).ok_or(CodecError::Truncated(*offset))?;
                    *offset += 1;
                    if header == NULL_LOW {
                        return Ok(Value::Null);
                    }
                }
                let n = BigInt::from_signed_bytes_be(&src[*offset..]);
                *offset = src.len();
                Ok(Value::BigInt(n))
            }
        }
    }

    pub fn skip(&self, src: &[u8], offset: &mut usize) -> Result<(), CodecError> {
        match self.regime {
            Regime::Key => {
                if self.read_key_header(src, offset)? {
                    return Ok(());
                }
                skip_lex_bigint(src, offset, self.descending)
            }
            Regime::ValueInterior => {
                if self.nullable {
                    crate::pf::skip_nullable_bytes_pf(src, offset)
                } else {
                    crate::pf::skip_bytes_pf(src, offset)
                }
            }
            Regime::ValueLast => {
                *offset = src.len();
                Ok(())
            }
        }
    }

    pub fn quick_decode<'a>(
        &self,
        src: &'a [u8],
        offset: &mut usize,
    ) -> Result<QuickCol<'a>, CodecError> {
        match self.regime {
            Regime::Key => {
                if self.read_key_header(src, offset)? {
                    return Ok(QuickCol::Null);
                }
                let start = *offset;
                skip_lex_bigint(src, offset, self.descending)?;
                Ok(QuickCol::Bytes(&src[start..*offset]))
            }
            _ => self.decode(src, offset).map(|v| match v {
                Value::Null => QuickCol::Null,
                v => QuickCol::Value(v),
            }),
        }
    }

    /// Encodes a non-null argument as the bare lex form quick comparison
    /// memcmps against.
    pub fn encode_payload(&self, v: &Value, dst: &mut Vec<u8>) -> Result<(), CodecError> {
        encode_lex_bigint(self.expect_big(v)?, self.descending, dst)
    }
}

/// Arbitrary-precision decimal codec.
#[derive(Clone, Debug, PartialEq)]
pub struct BigDecimalCodec {
    nullable: bool,
    descending: bool,
    null_low: bool,
    regime: Regime,
}

varlen_codec_common!(BigDecimalCodec);

impl BigDecimalCodec {
    fn expect_dec<'v>(&self, v: &'v Value) -> Result<&'v BigDecimal, CodecError> {
        match v {
            Value::BigDecimal(d) => Ok(d),
            _ => Err(CodecError::ValueType {
                expected: rowstore_primitives::PlainType::BigDecimal,
                found: v.kind_name(),
            }),
        }
    }

    /// The key-regime payload: sign byte, adjusted exponent, digit bytes
    /// with terminator. The exponent and digit section is mirrored (byte
    /// complement) for negative values so more-negative sorts lower.
    fn encode_lex_decimal(&self, d: &BigDecimal, dst: &mut Vec<u8>) -> Result<(), CodecError> {
        let desc = self.descending;
        if d.is_zero() {
            dst.push(flip(DEC_ZERO, desc));
            return Ok(());
        }
        let (digits, exp) = d.normalized().into_bigint_and_exponent();
        let negative = digits.sign() == Sign::Minus;
        dst.push(flip(if negative { DEC_NEG } else { DEC_POS }, desc));

        let mirror = desc != negative;
        let s = digits.magnitude().to_str_radix(10);
        let adjusted = s.len() as i64 - exp;
        encode_lex_bigint(&BigInt::from(adjusted), mirror, dst)?;
        for ch in s.bytes() {
            dst.push(flip(1 + (ch - b'0'), mirror));
        }
        dst.push(flip(0, mirror));
        Ok(())
    }

    fn decode_lex_decimal(&self, src: &[u8], offset: &mut usize) -> Result<BigDecimal, CodecError> {
        let desc = self.descending;
        let sign_byte = read_byte(src, offset, desc)?;
        if sign_byte == DEC_ZERO {
            return Ok(BigDecimal::zero());
        }
        let negative = match sign_byte {
            DEC_NEG => true,
            DEC_POS => false,
            _ => {
                return Err(CodecError::Invalid {
                    offset: *offset - 1,
                    reason: "invalid decimal sign byte",
                })
            }
        };
        let mirror = desc != negative;
        let adjusted = decode_lex_bigint(src, offset, mirror)?;
        let adjusted = i64::try_from(adjusted).map_err(|_| CodecError::Invalid {
            offset: *offset,
            reason: "decimal exponent out of range",
        })?;

        let mut s = String::new();
        loop {
            let b = read_byte(src, offset, mirror)?;
            if b == 0 {
                break;
            }
            if !(1..=10).contains(&b) {
                return Err(CodecError::Invalid {
                    offset: *offset - 1,
                    reason: "invalid decimal digit byte",
                });
            }
            s.push((b'0' + (b - 1)) as char);
        }
        let digits = BigInt::parse_bytes(s.as_bytes(), 10).ok_or(CodecError::Invalid {
            offset: *offset,
            reason: "empty decimal digit run",
        })?;
        let exp = s.len() as i64 - adjusted;
        let digits = if negative { -digits } else { digits };
        Ok(BigDecimal::new(digits, exp))
    }

    fn skip_lex_decimal(&self, src: &[u8], offset: &mut usize) -> Result<(), CodecError> {
        let desc = self.descending;
        let sign_byte = read_byte(src, offset, desc)?;
        if sign_byte == DEC_ZERO {
            return Ok(());
        }
        let mirror = desc != (sign_byte == DEC_NEG);
        skip_lex_bigint(src, offset, mirror)?;
        loop {
            if read_byte(src, offset, mirror)? == 0 {
                return Ok(());
            }
        }
    }

    /// The value-regime payload: PF-framed zig-zag scale, then signed
    /// big-endian digits.
    fn encode_plain_decimal(&self, d: &BigDecimal, dst: &mut Vec<u8>) -> Result<(), CodecError> {
        let (digits, scale) = d.as_bigint_and_exponent();
        let zigzag = ((scale << 1) ^ (scale >> 63)) as u64;
        let zigzag = usize::try_from(zigzag).map_err(|_| CodecError::TooLarge(zigzag as usize))?;
        encode_prefix_pf(zigzag, dst)?;
        dst.extend_from_slice(&digits.to_signed_bytes_be());
        Ok(())
    }

    fn decode_plain_decimal(&self, src: &[u8]) -> Result<BigDecimal, CodecError> {
        let mut offset = 0;
        let zigzag = decode_prefix_pf(src, &mut offset)? as u64;
        let scale = (zigzag >> 1) as i64 ^ -((zigzag & 1) as i64);
        let digits = BigInt::from_signed_bytes_be(&src[offset..]);
        Ok(BigDecimal::new(digits, scale))
    }

    fn plain_payload(&self, d: &BigDecimal) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        self.encode_plain_decimal(d, &mut buf)?;
        Ok(buf)
    }

    pub fn encode_size(&self, v: &Value) -> Result<usize, CodecError> {
        if v.is_null() {
            return Ok(0);
        }
        let d = self.expect_dec(v)?;
        Ok(match self.regime {
            Regime::Key => {
                let mut scratch = Vec::new();
                self.encode_lex_decimal(d, &mut scratch)?;
                scratch.len()
            }
            Regime::ValueInterior => {
                let len = self.plain_payload(d)?.len();
                let framed = len + self.nullable as usize;
                length_prefix_pf(framed) + len - 1
            }
            Regime::ValueLast => self.plain_payload(d)?.len(),
        })
    }

    pub fn encode(&self, v: &Value, dst: &mut Vec<u8>) -> Result<(), CodecError> {
        match self.regime {
            Regime::Key => {
                self.write_key_header(v.is_null(), dst)?;
                if v.is_null() {
                    return Ok(());
                }
                self.encode_lex_decimal(self.expect_dec(v)?, dst)
            }
            Regime::ValueInterior => {
                if v.is_null() {
                    if !self.nullable {
                        return Err(CodecError::UnexpectedNull);
                    }
                    encode_prefix_pf(0, dst)?;
                    return Ok(());
                }
                let payload = self.plain_payload(self.expect_dec(v)?)?;
                encode_prefix_pf(payload.len() + self.nullable as usize, dst)?;
                dst.extend_from_slice(&payload);
                Ok(())
            }
            Regime::ValueLast => {
                if v.is_null() {
                    if !self.nullable {
                        return Err(CodecError::UnexpectedNull);
                    }
                    dst.push(NULL_LOW);
                    return Ok(());
                }
                if self.nullable {
                    dst.push(NOT_NULL_LOW);
                }
                let payload = self.plain_payload(self.expect_dec(v)?)?;
                dst.extend_from_slice(&payload);
                Ok(())
            }
        }
    }

    pub fn decode(&self, src: &[u8], offset: &mut usize) -> Result<Value, CodecError> {
        match self.regime {
            Regime::Key => {
                if self.read_key_header(src, offset)? {
                    return Ok(Value::Null);
                }
                self.decode_lex_decimal(src, offset).map(Value::BigDecimal)
            }
            Regime::ValueInterior => {
                let framed = decode_prefix_pf(src, offset)?;
                let len = if self.nullable {
                    if framed == 0 {
                        return Ok(Value::Null);
                    }
                    framed - 1
                } else {
                    framed
                };
                let end = offset
                    .checked_add(len)
                    .filter(|&end| end <= src.len())
                    .ok_or(CodecError::Truncated(src.len()))?;
                let d = self.decode_plain_decimal(&src[*offset..end])?;
                *offset = end;
                Ok(Value::BigDecimal(d))
            }
            Regime::ValueLast => {
                if self.nullable {
                    let header = *src.get(*offset).ok_or(CodecError::Truncated(*offset))?;
                    *offset += 1;
                    if header == NULL_LOW {
                        return Ok(Value::Null);
                    }
                }
                let d = self.decode_plain_decimal(&src[*offset..])?;
                *offset = src.len();
                Ok(Value::BigDecimal(d))
            }
        }
    }

    pub fn skip(&self, src: &[u8], offset: &mut usize) -> Result<(), CodecError> {
        match self.regime {
            Regime::Key => {
                if self.read_key_header(src, offset)? {
                    return Ok(());
                }
                self.skip_lex_decimal(src, offset)
            }
            Regime::ValueInterior => {
                if self.nullable {
                    crate::pf::skip_nullable_bytes_pf(src, offset)
                } else {
                    crate::pf::skip_bytes_pf(src, offset)
                }
            }
            Regime::ValueLast => {
                *offset = src.len();
                Ok(())
            }
        }
    }

    pub fn quick_decode<'a>(
        &self,
        src: &'a [u8],
        offset: &mut usize,
    ) -> Result<QuickCol<'a>, CodecError> {
        match self.regime {
            Regime::Key => {
                if self.read_key_header(src, offset)? {
                    return Ok(QuickCol::Null);
                }
                let start = *offset;
                self.skip_lex_decimal(src, offset)?;
                Ok(QuickCol::Bytes(&src[start..*offset]))
            }
            _ => self.decode(src, offset).map(|v| match v {
                Value::Null => QuickCol::Null,
                v => QuickCol::Value(v),
            }),
        }
    }

    pub fn encode_payload(&self, v: &Value, dst: &mut Vec<u8>) -> Result<(), CodecError> {
        self.encode_lex_decimal(self.expect_dec(v)?, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bigint_codec(regime: Regime, nullable: bool, descending: bool) -> BigIntCodec {
        BigIntCodec::new(nullable, descending && regime.is_key(), false, regime)
    }

    fn decimal_codec(regime: Regime, nullable: bool, descending: bool) -> BigDecimalCodec {
        BigDecimalCodec::new(nullable, descending && regime.is_key(), false, regime)
    }

    fn roundtrip_int(c: &BigIntCodec, n: BigInt) {
        let v = Value::BigInt(n);
        let mut buf = Vec::new();
        c.encode(&v, &mut buf).unwrap();
        assert_eq!(buf.len(), c.min_size() + c.encode_size(&v).unwrap());
        let mut offset = 0;
        assert_eq!(c.decode(&buf, &mut offset).unwrap(), v);
        assert_eq!(offset, buf.len());
        let mut skip_offset = 0;
        c.skip(&buf, &mut skip_offset).unwrap();
        assert_eq!(skip_offset, buf.len());
    }

    proptest! {
        #[test]
        fn bigint_roundtrip_all_regimes(n in any::<i128>(), shift in 0u8..100) {
            let n = BigInt::from(n) << shift;
            for regime in [Regime::Key, Regime::ValueInterior, Regime::ValueLast] {
                roundtrip_int(&bigint_codec(regime, false, false), n.clone());
                roundtrip_int(&bigint_codec(regime, true, false), n.clone());
            }
            roundtrip_int(&bigint_codec(Regime::Key, false, true), n.clone());
        }

        #[test]
        fn bigint_key_order_matches_memcmp(a in any::<i128>(), b in any::<i128>(),
                                           sa in 0u8..50, sb in 0u8..50) {
            let (a, b) = (BigInt::from(a) << sa, BigInt::from(b) << sb);
            let c = bigint_codec(Regime::Key, false, false);
            let (mut ea, mut eb) = (Vec::new(), Vec::new());
            c.encode(&Value::BigInt(a.clone()), &mut ea).unwrap();
            c.encode(&Value::BigInt(b.clone()), &mut eb).unwrap();
            prop_assert_eq!(ea.cmp(&eb), a.cmp(&b));
        }

        #[test]
        fn decimal_roundtrip(digits in any::<i64>(), scale in -20i64..20) {
            let d = BigDecimal::new(BigInt::from(digits), scale);
            for regime in [Regime::Key, Regime::ValueInterior, Regime::ValueLast] {
                let c = decimal_codec(regime, false, false);
                let v = Value::BigDecimal(d.clone());
                let mut buf = Vec::new();
                c.encode(&v, &mut buf).unwrap();
                assert_eq!(buf.len(), c.min_size() + c.encode_size(&v).unwrap());
                let mut offset = 0;
                assert_eq!(c.decode(&buf, &mut offset).unwrap(), v);
                assert_eq!(offset, buf.len());
                let mut skip_offset = 0;
                c.skip(&buf, &mut skip_offset).unwrap();
                assert_eq!(skip_offset, buf.len());
            }
        }

        #[test]
        fn decimal_key_order_matches_memcmp(da in any::<i64>(), sa in -15i64..15,
                                            db in any::<i64>(), sb in -15i64..15,
                                            desc in any::<bool>()) {
            let a = BigDecimal::new(BigInt::from(da), sa);
            let b = BigDecimal::new(BigInt::from(db), sb);
            let c = decimal_codec(Regime::Key, false, desc);
            let (mut ea, mut eb) = (Vec::new(), Vec::new());
            c.encode(&Value::BigDecimal(a.clone()), &mut ea).unwrap();
            c.encode(&Value::BigDecimal(b.clone()), &mut eb).unwrap();
            let expected = if desc { b.cmp(&a) } else { a.cmp(&b) };
            prop_assert_eq!(ea.cmp(&eb), expected);
        }
    }

    #[test]
    fn zero_decimal_is_one_byte() {
        let c = decimal_codec(Regime::Key, false, false);
        let mut buf = Vec::new();
        c.encode(&Value::BigDecimal(BigDecimal::zero()), &mut buf).unwrap();
        assert_eq!(buf, vec![DEC_ZERO]);
    }
}
