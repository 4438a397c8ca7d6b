//! Filter-argument conversion.
//!
//! Arguments arrive as dynamic [`Value`]s and must be converted to the
//! column's type before comparison. Conversions are exact or rejected:
//! a narrowing that would change the value is a `Lossy` error, never a
//! silent truncation.

use bigdecimal::num_bigint::BigInt;
use bigdecimal::num_traits::{FromPrimitive, ToPrimitive, Zero};
use bigdecimal::BigDecimal;
use rowstore_primitives::PlainType;

use crate::error::ConvertError;
use crate::value::Value;

enum IntRepr {
    Signed(i128),
    Unsigned(u128),
}

fn int_repr(v: &Value) -> Option<IntRepr> {
    use Value::*;
    Some(match v {
        U8(n) => IntRepr::Unsigned(*n as u128),
        U16(n) => IntRepr::Unsigned(*n as u128),
        U32(n) => IntRepr::Unsigned(*n as u128),
        U64(n) => IntRepr::Unsigned(*n as u128),
        U128(n) => IntRepr::Unsigned(*n),
        I8(n) => IntRepr::Signed(*n as i128),
        I16(n) => IntRepr::Signed(*n as i128),
        I32(n) => IntRepr::Signed(*n as i128),
        I64(n) => IntRepr::Signed(*n as i128),
        I128(n) => IntRepr::Signed(*n),
        _ => return None,
    })
}

fn lossy(v: &Value, to: PlainType) -> ConvertError {
    ConvertError::Lossy {
        from: v.kind_name(),
        to,
    }
}

fn unsupported(v: &Value, to: PlainType) -> ConvertError {
    ConvertError::Unsupported {
        from: v.kind_name(),
        to,
    }
}

macro_rules! int_from_repr {
    ($v:expr, $repr:expr, $to:expr, $ty:ty, $variant:ident) => {{
        let out = match $repr {
            IntRepr::Signed(n) => <$ty>::try_from(n).map_err(|_| lossy($v, $to))?,
            IntRepr::Unsigned(n) => <$ty>::try_from(n).map_err(|_| lossy($v, $to))?,
        };
        Value::$variant(out)
    }};
}

/// Converts `v` to an instance of `to`, exactly or not at all.
///
/// Null passes through; nullability of the destination column is the
/// caller's concern.
pub fn convert_value(v: &Value, to: PlainType) -> Result<Value, ConvertError> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    if v.plain_type() == Some(to) && !matches!(v, Value::Array(_)) {
        return Ok(v.clone());
    }

    use PlainType::*;
    if let Some(repr) = int_repr(v) {
        return Ok(match to {
            U8 => int_from_repr!(v, repr, to, u8, U8),
            U16 => int_from_repr!(v, repr, to, u16, U16),
            U32 => int_from_repr!(v, repr, to, u32, U32),
            U64 => int_from_repr!(v, repr, to, u64, U64),
            U128 => int_from_repr!(v, repr, to, u128, U128),
            I8 => int_from_repr!(v, repr, to, i8, I8),
            I16 => int_from_repr!(v, repr, to, i16, I16),
            I32 => int_from_repr!(v, repr, to, i32, I32),
            I64 => int_from_repr!(v, repr, to, i64, I64),
            I128 => int_from_repr!(v, repr, to, i128, I128),
            F32 => {
                let f = match repr {
                    IntRepr::Signed(n) => n as f32,
                    IntRepr::Unsigned(n) => n as f32,
                };
                let exact = match repr {
                    IntRepr::Signed(n) => f as i128 == n && f.fract() == 0.0,
                    IntRepr::Unsigned(n) => f as u128 == n && f.fract() == 0.0,
                };
                if !exact {
                    return Err(lossy(v, to));
                }
                Value::F32(f)
            }
            F64 => {
                let f = match repr {
                    IntRepr::Signed(n) => n as f64,
                    IntRepr::Unsigned(n) => n as f64,
                };
                let exact = match repr {
                    IntRepr::Signed(n) => f as i128 == n && f.fract() == 0.0,
                    IntRepr::Unsigned(n) => f as u128 == n && f.fract() == 0.0,
                };
                if !exact {
                    return Err(lossy(v, to));
                }
                Value::F64(f)
            }
            BigInt => match repr {
                IntRepr::Signed(n) => Value::BigInt(n.into()),
                IntRepr::Unsigned(n) => Value::BigInt(n.into()),
            },
            BigDecimal => match repr {
                IntRepr::Signed(n) => Value::BigDecimal(n.into()),
                IntRepr::Unsigned(n) => {
                    Value::BigDecimal(bigdecimal::BigDecimal::from(
                        bigdecimal::num_bigint::BigInt::from(n),
                    ))
                }
            },
            _ => return Err(unsupported(v, to)),
        });
    }

    match (v, to) {
        (Value::F32(f), F64) => Ok(Value::F64(*f as f64)),
        (Value::F64(f), F32) => {
            let narrowed = *f as f32;
            if narrowed as f64 == *f || f.is_nan() {
                Ok(Value::F32(narrowed))
            } else {
                Err(lossy(v, to))
            }
        }
        (Value::F32(f), _) if to.is_signed_int() || to.is_unsigned_int() || to == BigInt => {
            float_to_int(v, *f as f64, to)
        }
        (Value::F64(f), _) if to.is_signed_int() || to.is_unsigned_int() || to == BigInt => {
            float_to_int(v, *f, to)
        }
        (Value::F64(f), BigDecimal) => bigdecimal::BigDecimal::from_f64(*f)
            .map(Value::BigDecimal)
            .ok_or_else(|| lossy(v, to)),
        (Value::F32(f), BigDecimal) => bigdecimal::BigDecimal::from_f32(*f)
            .map(Value::BigDecimal)
            .ok_or_else(|| lossy(v, to)),
        (Value::BigInt(n), _) if to.is_signed_int() || to.is_unsigned_int() => {
            big_to_int(v, n, to)
        }
        (Value::BigInt(n), BigDecimal) => Ok(Value::BigDecimal(n.clone().into())),
        (Value::BigDecimal(d), BigInt) => {
            let (digits, exp) = d.normalized().into_bigint_and_exponent();
            if exp > 0 {
                Err(lossy(v, to))
            } else {
                Ok(Value::BigInt(
                    digits * bigdecimal::num_bigint::BigInt::from(10u8).pow((-exp) as u32),
                ))
            }
        }
        (Value::BigDecimal(d), _) if to.is_signed_int() || to.is_unsigned_int() => {
            match convert_value(&convert_value(v, BigInt)?, to) {
                Ok(out) => Ok(out),
                Err(_) => Err(lossy(v, to)),
            }
        }
        _ => Err(unsupported(v, to)),
    }
}

fn float_to_int(v: &Value, f: f64, to: PlainType) -> Result<Value, ConvertError> {
    if f.fract() != 0.0 || !f.is_finite() {
        return Err(lossy(v, to));
    }
    let n = BigInt::from_f64(f).ok_or_else(|| lossy(v, to))?;
    if to == PlainType::BigInt {
        return Ok(Value::BigInt(n));
    }
    big_to_int(v, &n, to)
}

fn big_to_int(v: &Value, n: &BigInt, to: PlainType) -> Result<Value, ConvertError> {
    use PlainType::*;
    let out = match to {
        U8 => n.to_u8().map(Value::U8),
        U16 => n.to_u16().map(Value::U16),
        U32 => n.to_u32().map(Value::U32),
        U64 => n.to_u64().map(Value::U64),
        U128 => n.to_u128().map(Value::U128),
        I8 => n.to_i8().map(Value::I8),
        I16 => n.to_i16().map(Value::I16),
        I32 => n.to_i32().map(Value::I32),
        I64 => n.to_i64().map(Value::I64),
        I128 => n.to_i128().map(Value::I128),
        _ => return Err(unsupported(v, to)),
    };
    out.ok_or_else(|| lossy(v, to))
}

/// True when a zero-scale decimal is an integer; used by tests and the
/// decimal codec's normalization.
pub fn decimal_is_integer(d: &BigDecimal) -> bool {
    let (_, exp) = d.normalized().into_bigint_and_exponent();
    exp <= 0 || d.is_zero()
}
