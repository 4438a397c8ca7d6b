//! Fixed-width primitive column codec.
//!
//! Value regime: little-endian raw bytes, booleans 0/1, with a one-byte
//! null header when nullable. Key regime: big-endian with the sign bit
//! flipped for signed integers and the IEEE order-preserving remap for
//! floats; descending complements the encoded span after the null header.

use rowstore_primitives::PlainType;

use crate::error::CodecError;
use crate::lex::{f32_from_lex_bits, f32_to_lex_bits, f64_from_lex_bits, f64_to_lex_bits};
use crate::value::Value;

use super::{null_header, Regime, NOT_NULL_LOW, NULL_LOW};

#[derive(Clone, Debug, PartialEq)]
pub struct PrimitiveCodec {
    plain: PlainType,
    width: usize,
    nullable: bool,
    descending: bool,
    null_low: bool,
    regime: Regime,
}

impl PrimitiveCodec {
    pub(crate) fn new(
        plain: PlainType,
        nullable: bool,
        descending: bool,
        null_low: bool,
        regime: Regime,
    ) -> PrimitiveCodec {
        let width = plain
            .fixed_width()
            .expect("primitive codec requires a fixed-width type");
        PrimitiveCodec {
            plain,
            width,
            nullable,
            descending,
            null_low,
            regime,
        }
    }

    pub fn plain(&self) -> PlainType {
        self.plain
    }

    pub fn nullable(&self) -> bool {
        self.nullable
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

    pub fn min_size(&self) -> usize {
        self.nullable as usize
    }

    pub fn encode_size(&self, v: &Value) -> Result<usize, CodecError> {
        Ok(if v.is_null() { 0 } else { self.width })
    }

    fn headers(&self) -> (u8, u8) {
        if self.regime.is_key() {
            null_header(self.descending, self.null_low)
        } else {
            (NULL_LOW, NOT_NULL_LOW)
        }
    }

    pub fn encode(&self, v: &Value, dst: &mut Vec<u8>) -> Result<(), CodecError> {
        if v.is_null() {
            if !self.nullable {
                return Err(CodecError::UnexpectedNull);
            }
            dst.push(self.headers().0);
            return Ok(());
        }
        if self.nullable {
            dst.push(self.headers().1);
        }
        let start = dst.len();
        if self.regime.is_key() {
            self.encode_key_payload(v, dst)?;
            if self.descending {
                for b in &mut dst[start..] {
                    *b = !*b;
                }
            }
        } else {
            self.encode_value_payload(v, dst)?;
        }
        debug_assert_eq!(dst.len() - start, self.width);
        Ok(())
    }

    pub fn decode(&self, src: &[u8], offset: &mut usize) -> Result<Value, CodecError> {
        if self.nullable {
            let (null_b, not_null_b) = self.headers();
            let header = *src.get(*offset).ok_or(CodecError::Truncated(*offset))?;
            *offset += 1;
            if header == null_b {
                return Ok(Value::Null);
            }
            if header != not_null_b {
                return Err(CodecError::Invalid {
                    offset: *offset - 1,
                    reason: "invalid null header byte",
                });
            }
        }
        let end = *offset + self.width;
        if end > src.len() {
            return Err(CodecError::Truncated(src.len()));
        }
        let mut payload = [0u8; 16];
        let payload = &mut payload[..self.width];
        payload.copy_from_slice(&src[*offset..end]);
        *offset = end;
        if self.regime.is_key() {
            if self.descending {
                for b in payload.iter_mut() {
                    *b = !*b;
                }
            }
            self.decode_key_payload(payload)
        } else {
            self.decode_value_payload(payload)
        }
    }

    pub fn skip(&self, src: &[u8], offset: &mut usize) -> Result<(), CodecError> {
        if self.nullable {
            let (null_b, _) = self.headers();
            let header = *src.get(*offset).ok_or(CodecError::Truncated(*offset))?;
            *offset += 1;
            if header == null_b {
                return Ok(());
            }
        }
        let end = *offset + self.width;
        if end > src.len() {
            return Err(CodecError::Truncated(src.len()));
        }
        *offset = end;
        Ok(())
    }

    fn type_err(&self, v: &Value) -> CodecError {
        CodecError::ValueType {
            expected: self.plain,
            found: v.kind_name(),
        }
    }

    fn encode_key_payload(&self, v: &Value, dst: &mut Vec<u8>) -> Result<(), CodecError> {
        use PlainType::*;
        match (self.plain, v) {
            (Bool, Value::Bool(b)) => dst.push(*b as u8),
            (U8, Value::U8(n)) => dst.push(*n),
            (U16, Value::U16(n)) => dst.extend_from_slice(&n.to_be_bytes()),
            (U32, Value::U32(n)) => dst.extend_from_slice(&n.to_be_bytes()),
            (U64, Value::U64(n)) => dst.extend_from_slice(&n.to_be_bytes()),
            (U128, Value::U128(n)) => dst.extend_from_slice(&n.to_be_bytes()),
            (I8, Value::I8(n)) => dst.push((*n as u8) ^ 0x80),
            (I16, Value::I16(n)) => dst.extend_from_slice(&((*n as u16) ^ (1 << 15)).to_be_bytes()),
            (I32, Value::I32(n)) => dst.extend_from_slice(&((*n as u32) ^ (1 << 31)).to_be_bytes()),
            (I64, Value::I64(n)) => dst.extend_from_slice(&((*n as u64) ^ (1 << 63)).to_be_bytes()),
            (I128, Value::I128(n)) => {
                dst.extend_from_slice(&((*n as u128) ^ (1 << 127)).to_be_bytes())
            }
            (F32, Value::F32(f)) => dst.extend_from_slice(&f32_to_lex_bits(*f).to_be_bytes()),
            (F64, Value::F64(f)) => dst.extend_from_slice(&f64_to_lex_bits(*f).to_be_bytes()),
            _ => return Err(self.type_err(v)),
        }
        Ok(())
    }

    fn decode_key_payload(&self, payload: &[u8]) -> Result<Value, CodecError> {
        use PlainType::*;
        let be = |p: &[u8]| -> u128 {
            p.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128)
        };
        Ok(match self.plain {
            Bool => Value::Bool(payload[0] != 0),
            U8 => Value::U8(payload[0]),
            U16 => Value::U16(be(payload) as u16),
            U32 => Value::U32(be(payload) as u32),
            U64 => Value::U64(be(payload) as u64),
            U128 => Value::U128(be(payload)),
            I8 => Value::I8((payload[0] ^ 0x80) as i8),
            I16 => Value::I16((be(payload) as u16 ^ (1 << 15)) as i16),
            I32 => Value::I32((be(payload) as u32 ^ (1 << 31)) as i32),
            I64 => Value::I64((be(payload) as u64 ^ (1 << 63)) as i64),
            I128 => Value::I128((be(payload) ^ (1 << 127)) as i128),
            F32 => Value::F32(f32_from_lex_bits(be(payload) as u32)),
            F64 => Value::F64(f64_from_lex_bits(be(payload) as u64)),
            Utf8 | BigInt | BigDecimal | Join => unreachable!("not a primitive type"),
        })
    }

    fn encode_value_payload(&self, v: &Value, dst: &mut Vec<u8>) -> Result<(), CodecError> {
        use PlainType::*;
        match (self.plain, v) {
            (Bool, Value::Bool(b)) => dst.push(*b as u8),
            (U8, Value::U8(n)) => dst.push(*n),
            (U16, Value::U16(n)) => dst.extend_from_slice(&n.to_le_bytes()),
            (U32, Value::U32(n)) => dst.extend_from_slice(&n.to_le_bytes()),
            (U64, Value::U64(n)) => dst.extend_from_slice(&n.to_le_bytes()),
            (U128, Value::U128(n)) => dst.extend_from_slice(&n.to_le_bytes()),
            (I8, Value::I8(n)) => dst.push(*n as u8),
            (I16, Value::I16(n)) => dst.extend_from_slice(&n.to_le_bytes()),
            (I32, Value::I32(n)) => dst.extend_from_slice(&n.to_le_bytes()),
            (I64, Value::I64(n)) => dst.extend_from_slice(&n.to_le_bytes()),
            (I128, Value::I128(n)) => dst.extend_from_slice(&n.to_le_bytes()),
            (F32, Value::F32(f)) => dst.extend_from_slice(&f.to_bits().to_le_bytes()),
            (F64, Value::F64(f)) => dst.extend_from_slice(&f.to_bits().to_le_bytes()),
            _ => return Err(self.type_err(v)),
        }
        Ok(())
    }

    fn decode_value_payload(&self, payload: &[u8]) -> Result<Value, CodecError> {
        use PlainType::*;
        let le = |p: &[u8]| -> u128 {
            p.iter().rev().fold(0u128, |acc, &b| (acc << 8) | b as u128)
        };
        Ok(match self.plain {
            Bool => Value::Bool(payload[0] != 0),
            U8 => Value::U8(payload[0]),
            U16 => Value::U16(le(payload) as u16),
            U32 => Value::U32(le(payload) as u32),
            U64 => Value::U64(le(payload) as u64),
            U128 => Value::U128(le(payload)),
            I8 => Value::I8(payload[0] as i8),
            I16 => Value::I16(le(payload) as u16 as i16),
            I32 => Value::I32(le(payload) as u32 as i32),
            I64 => Value::I64(le(payload) as u64 as i64),
            I128 => Value::I128(le(payload) as i128),
            F32 => Value::F32(f32::from_bits(le(payload) as u32)),
            F64 => Value::F64(f64::from_bits(le(payload) as u64)),
            Utf8 | BigInt | BigDecimal | Join => unreachable!("not a primitive type"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn codec(plain: PlainType, nullable: bool, descending: bool, regime: Regime) -> PrimitiveCodec {
        PrimitiveCodec::new(plain, nullable, descending && regime.is_key(), false, regime)
    }

    fn roundtrip(c: &PrimitiveCodec, v: Value) {
        let mut buf = Vec::new();
        c.encode(&v, &mut buf).unwrap();
        assert_eq!(
            buf.len(),
            c.min_size() + c.encode_size(&v).unwrap(),
            "size agreement for {v:?}"
        );
        let mut offset = 0;
        assert_eq!(c.decode(&buf, &mut offset).unwrap(), v);
        assert_eq!(offset, buf.len());
        let mut skip_offset = 0;
        c.skip(&buf, &mut skip_offset).unwrap();
        assert_eq!(skip_offset, buf.len());
    }

    #[test]
    fn null_roundtrip_in_both_regimes() {
        for regime in [Regime::Key, Regime::ValueInterior] {
            let c = codec(PlainType::I32, true, false, regime);
            roundtrip(&c, Value::Null);
            roundtrip(&c, Value::I32(-7));
        }
    }

    #[test]
    fn non_nullable_rejects_null() {
        let c = codec(PlainType::U16, false, false, Regime::Key);
        let mut buf = Vec::new();
        assert_eq!(c.encode(&Value::Null, &mut buf), Err(CodecError::UnexpectedNull));
    }

    proptest! {
        #[test]
        fn i64_key_order_matches_memcmp(a in any::<i64>(), b in any::<i64>()) {
            let c = codec(PlainType::I64, false, false, Regime::Key);
            let (mut ea, mut eb) = (Vec::new(), Vec::new());
            c.encode(&Value::I64(a), &mut ea).unwrap();
            c.encode(&Value::I64(b), &mut eb).unwrap();
            prop_assert_eq!(ea.cmp(&eb), a.cmp(&b));
        }

        #[test]
        fn descending_key_is_bitwise_complement(a in any::<u32>()) {
            let asc = codec(PlainType::U32, false, false, Regime::Key);
            let desc = codec(PlainType::U32, false, true, Regime::Key);
            let (mut ea, mut ed) = (Vec::new(), Vec::new());
            asc.encode(&Value::U32(a), &mut ea).unwrap();
            desc.encode(&Value::U32(a), &mut ed).unwrap();
            let complement: Vec<u8> = ea.iter().map(|b| !b).collect();
            prop_assert_eq!(ed, complement);
        }

        #[test]
        fn f64_key_order_matches_total_cmp(a in any::<f64>(), b in any::<f64>()) {
            let c = codec(PlainType::F64, false, false, Regime::Key);
            let (mut ea, mut eb) = (Vec::new(), Vec::new());
            c.encode(&Value::F64(a), &mut ea).unwrap();
            c.encode(&Value::F64(b), &mut eb).unwrap();
            prop_assert_eq!(ea.cmp(&eb), a.total_cmp(&b));
        }

        #[test]
        fn value_regime_roundtrip_i128(n in any::<i128>()) {
            let c = codec(PlainType::I128, false, false, Regime::ValueInterior);
            roundtrip(&c, Value::I128(n));
        }

        #[test]
        fn nullable_key_orders_null_high(n in any::<i32>()) {
            let c = codec(PlainType::I32, true, false, Regime::Key);
            let (mut ev, mut en) = (Vec::new(), Vec::new());
            c.encode(&Value::I32(n), &mut ev).unwrap();
            c.encode(&Value::Null, &mut en).unwrap();
            prop_assert!(ev < en, "non-null must order below null-high");
        }
    }
}
