//! Cross-codec ordering properties exercised through the public
//! [`ColumnCodec`] surface: `memcmp` on key encodings must agree with the
//! logical order under every combination of direction and null placement.

use bigdecimal::num_bigint::BigInt;
use bigdecimal::BigDecimal;
use itertools::Itertools;
use proptest::prelude::*;
use rowstore_codec::{ArrayValue, ColumnCodec, Regime, Value};
use rowstore_primitives::{PlainType, TypeCode, TypeFlags};

fn key_codec(plain: PlainType, flags: TypeFlags) -> ColumnCodec {
    ColumnCodec::new(TypeCode::new(plain, flags), Regime::Key).unwrap()
}

fn encode(codec: &ColumnCodec, v: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    codec.encode(v, &mut buf).unwrap();
    buf
}

/// Logical comparison under the declared column policy.
fn logical_cmp(a: &Value, b: &Value, descending: bool, null_low: bool) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    let base = match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => {
            if null_low {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, true) => {
            if null_low {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, false) => a.cmp(b),
    };
    if descending {
        base.reverse()
    } else {
        base
    }
}

fn check_policy_grid(plain: PlainType, values: &[Value]) {
    for (descending, null_low) in [(false, false), (false, true), (true, false), (true, true)] {
        let mut flags = TypeFlags::NULLABLE;
        flags.set(TypeFlags::DESCENDING, descending);
        flags.set(TypeFlags::NULL_LOW, null_low);
        let codec = key_codec(plain, flags);

        for (a, b) in values.iter().cartesian_product(values.iter()) {
            let (ea, eb) = (encode(&codec, a), encode(&codec, b));
            assert_eq!(
                ea.cmp(&eb),
                logical_cmp(a, b, descending, null_low),
                "{a} vs {b} (descending={descending}, null_low={null_low})"
            );
        }

        // Round-trip under the same policy.
        for v in values {
            let buf = encode(&codec, v);
            let mut offset = 0;
            assert_eq!(&codec.decode(&buf, &mut offset).unwrap(), v);
            assert_eq!(offset, buf.len());
        }
    }
}

#[test]
fn i64_policy_grid() {
    let values: Vec<Value> = [i64::MIN, -17, -1, 0, 1, 42, i64::MAX]
        .into_iter()
        .map(Value::I64)
        .chain([Value::Null])
        .collect();
    check_policy_grid(PlainType::I64, &values);
}

#[test]
fn utf8_policy_grid() {
    let values: Vec<Value> = ["", "a", "ab", "b", "ba", "ñ"]
        .into_iter()
        .map(Value::from)
        .chain([Value::Null])
        .collect();
    check_policy_grid(PlainType::Utf8, &values);
}

#[test]
fn bigint_policy_grid() {
    let values: Vec<Value> = [
        BigInt::from(-10).pow(40),
        BigInt::from(-255),
        BigInt::from(-1),
        BigInt::from(0),
        BigInt::from(1),
        BigInt::from(256),
        BigInt::from(10).pow(40),
    ]
    .into_iter()
    .map(Value::BigInt)
    .chain([Value::Null])
    .collect();
    check_policy_grid(PlainType::BigInt, &values);
}

#[test]
fn bigdecimal_policy_grid() {
    let values: Vec<Value> = ["-1000", "-1.5", "-0.05", "0", "0.049", "0.5", "0.51", "7", "700"]
        .into_iter()
        .map(|s| Value::BigDecimal(s.parse::<BigDecimal>().unwrap()))
        .chain([Value::Null])
        .collect();
    check_policy_grid(PlainType::BigDecimal, &values);
}

#[test]
fn codec_equality_masks_direction_in_value_regime() {
    let asc = TypeCode::scalar(PlainType::I32);
    let desc = TypeCode::new(PlainType::I32, TypeFlags::DESCENDING);
    let value_asc = ColumnCodec::new(asc, Regime::ValueInterior).unwrap();
    let value_desc = ColumnCodec::new(desc, Regime::ValueInterior).unwrap();
    assert!(value_asc.encoding_eq(&value_desc));

    let key_asc = ColumnCodec::new(asc, Regime::Key).unwrap();
    let key_desc = ColumnCodec::new(desc, Regime::Key).unwrap();
    assert!(!key_asc.encoding_eq(&key_desc));
    assert!(key_asc.encoding_eq(&key_asc.clone()));
}

#[test]
fn join_columns_have_no_codec() {
    let code = TypeCode::scalar(PlainType::Join);
    assert!(ColumnCodec::new(code, Regime::Key).is_err());
}

proptest! {
    #[test]
    fn composite_keys_order_like_tuples(
        a1 in any::<i32>(), a2 in ".{0,12}",
        b1 in any::<i32>(), b2 in ".{0,12}",
    ) {
        let int = key_codec(PlainType::I32, TypeFlags::empty());
        let string = key_codec(PlainType::Utf8, TypeFlags::empty());

        let enc = |n: i32, s: &str| {
            let mut buf = Vec::new();
            int.encode(&Value::I32(n), &mut buf).unwrap();
            string.encode(&Value::from(s), &mut buf).unwrap();
            buf
        };
        let ka = enc(a1, &a2);
        let kb = enc(b1, &b2);
        let expected = (a1, a2.as_bytes()).cmp(&(b1, b2.as_bytes()));
        prop_assert_eq!(ka.cmp(&kb), expected);
    }

    #[test]
    fn u64_array_key_roundtrip(v in proptest::collection::vec(any::<u64>(), 0..16)) {
        let code = TypeCode::new(PlainType::U64, TypeFlags::ARRAY);
        let codec = ColumnCodec::new(code, Regime::Key).unwrap();
        let val = Value::Array(ArrayValue::U64(v));
        let buf = encode(&codec, &val);
        let mut offset = 0;
        prop_assert_eq!(codec.decode(&buf, &mut offset).unwrap(), val);
        prop_assert_eq!(offset, buf.len());
    }
}
