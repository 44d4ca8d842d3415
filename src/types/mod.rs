//! Value model and conversions between Rust types and column values.
//!
//! `ToValue` feeds appends (batch rows, query parameters); `FromValue`
//! reads cells back out of a decoded block.

pub mod decimal;
pub mod temporal;
pub mod value;
pub mod wide;

pub use decimal::Decimal;
pub use value::Value;
pub use wide::{I256, U256};

pub(crate) use temporal::days_since_epoch;

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::net::{Ipv4Addr, Ipv6Addr};
use uuid::Uuid;

/// Error type for value conversion failures.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeError {
    /// Value of another kind than requested
    Mismatch { expected: &'static str, got: &'static str },
    /// Value of the right kind that does not fit the target
    OutOfRange { target: &'static str, value: String },
    /// Null value where non-null expected
    UnexpectedNull,
}

impl std::fmt::Display for TypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeError::Mismatch { expected, got } => write!(f, "expected {}, got {}", expected, got),
            TypeError::OutOfRange { target, value } => {
                write!(f, "value {} does not fit {}", value, target)
            }
            TypeError::UnexpectedNull => write!(f, "unexpected NULL value"),
        }
    }
}

impl std::error::Error for TypeError {}

impl TypeError {
    pub(crate) fn expected(&self) -> String {
        match self {
            TypeError::Mismatch { expected, .. } => expected.to_string(),
            TypeError::OutOfRange { target, .. } => target.to_string(),
            TypeError::UnexpectedNull => "non-null value".to_string(),
        }
    }

    pub(crate) fn got(&self) -> String {
        match self {
            TypeError::Mismatch { got, .. } => got.to_string(),
            TypeError::OutOfRange { value, .. } => value.clone(),
            TypeError::UnexpectedNull => "NULL".to_string(),
        }
    }
}

/// Convert a column value into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, TypeError>;
}

/// Convert a Rust value into a column value.
pub trait ToValue {
    fn to_value(&self) -> Value;
}

fn mismatch<T>(expected: &'static str, value: &Value) -> Result<T, TypeError> {
    if value.is_null() {
        return Err(TypeError::UnexpectedNull);
    }
    Err(TypeError::Mismatch {
        expected,
        got: value.kind_name(),
    })
}

// ==================== Identity ====================

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        Ok(value)
    }
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

// ==================== Integer Types ====================

/// Integer view of any integer value, for range-checked narrowing.
fn as_i128(value: &Value) -> Option<i128> {
    Some(match value {
        Value::UInt8(v) => *v as i128,
        Value::UInt16(v) => *v as i128,
        Value::UInt32(v) => *v as i128,
        Value::UInt64(v) => *v as i128,
        Value::UInt128(v) => i128::try_from(*v).ok()?,
        Value::UInt256(v) => i128::try_from(v.to_u128()?).ok()?,
        Value::Int8(v) => *v as i128,
        Value::Int16(v) => *v as i128,
        Value::Int32(v) => *v as i128,
        Value::Int64(v) => *v as i128,
        Value::Int128(v) => *v,
        Value::Int256(v) => v.to_i128()?,
        Value::Bool(b) => *b as i128,
        _ => return None,
    })
}

fn is_integer(value: &Value) -> bool {
    matches!(
        value,
        Value::UInt8(_)
            | Value::UInt16(_)
            | Value::UInt32(_)
            | Value::UInt64(_)
            | Value::UInt128(_)
            | Value::UInt256(_)
            | Value::Int8(_)
            | Value::Int16(_)
            | Value::Int32(_)
            | Value::Int64(_)
            | Value::Int128(_)
            | Value::Int256(_)
            | Value::Bool(_)
    )
}

macro_rules! impl_int {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromValue for $t {
                fn from_value(value: Value) -> Result<Self, TypeError> {
                    if !is_integer(&value) {
                        return mismatch(stringify!($t), &value);
                    }
                    as_i128(&value)
                        .and_then(|v| <$t>::try_from(v).ok())
                        .ok_or_else(|| TypeError::OutOfRange {
                            target: stringify!($t),
                            value: value.to_text(),
                        })
                }
            }

            impl ToValue for $t {
                fn to_value(&self) -> Value {
                    Value::$variant(*self)
                }
            }
        )*
    };
}

impl_int!(
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    i128 => Int128,
);

impl FromValue for u128 {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::UInt128(v) => Ok(v),
            Value::UInt256(v) => v.to_u128().ok_or_else(|| TypeError::OutOfRange {
                target: "u128",
                value: v.to_string(),
            }),
            other if is_integer(&other) => as_i128(&other)
                .and_then(|v| u128::try_from(v).ok())
                .ok_or_else(|| TypeError::OutOfRange {
                    target: "u128",
                    value: other.to_text(),
                }),
            other => mismatch("u128", &other),
        }
    }
}

impl ToValue for u128 {
    fn to_value(&self) -> Value {
        Value::UInt128(*self)
    }
}

impl FromValue for I256 {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Int256(v) => Ok(v),
            Value::UInt256(v) if !I256(v.0).is_negative() => Ok(I256(v.0)),
            Value::UInt128(v) => Ok(I256(U256::from(v).0)),
            other => match as_i128(&other) {
                Some(v) if is_integer(&other) => Ok(I256::from(v)),
                _ => mismatch("Int256", &other),
            },
        }
    }
}

impl ToValue for I256 {
    fn to_value(&self) -> Value {
        Value::Int256(*self)
    }
}

impl FromValue for U256 {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::UInt256(v) => Ok(v),
            Value::UInt128(v) => Ok(U256::from(v)),
            other => match as_i128(&other) {
                Some(v) if v >= 0 => Ok(U256::from(v as u128)),
                Some(v) => Err(TypeError::OutOfRange {
                    target: "UInt256",
                    value: v.to_string(),
                }),
                None => mismatch("UInt256", &other),
            },
        }
    }
}

impl ToValue for U256 {
    fn to_value(&self) -> Value {
        Value::UInt256(*self)
    }
}

// ==================== Bool / Float Types ====================

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::UInt8(v) => Ok(v != 0),
            other => mismatch("bool", &other),
        }
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Float32(v) => Ok(v),
            other => mismatch("f32", &other),
        }
    }
}

impl ToValue for f32 {
    fn to_value(&self) -> Value {
        Value::Float32(*self)
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Float64(v) => Ok(v),
            Value::Float32(v) => Ok(v as f64),
            Value::Decimal(d) => Ok(d.to_f64()),
            other => mismatch("f64", &other),
        }
    }
}

impl ToValue for f64 {
    fn to_value(&self) -> Value {
        Value::Float64(*self)
    }
}

impl FromValue for Decimal {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Decimal(d) => Ok(d),
            other => match as_i128(&other) {
                Some(v) if is_integer(&other) => Ok(Decimal::new(v, 0)),
                _ => mismatch("Decimal", &other),
            },
        }
    }
}

impl ToValue for Decimal {
    fn to_value(&self) -> Value {
        Value::Decimal(*self)
    }
}

// ==================== String Types ====================

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::String(s) => Ok(s),
            Value::Bytes(b) => String::from_utf8(b).map_err(|_| TypeError::Mismatch {
                expected: "UTF-8 String",
                got: "Bytes",
            }),
            other => mismatch("String", &other),
        }
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

// ==================== Identifier / Network Types ====================

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Uuid(u) => Ok(u),
            other => mismatch("UUID", &other),
        }
    }
}

impl ToValue for Uuid {
    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }
}

impl FromValue for Ipv4Addr {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::IPv4(ip) => Ok(ip),
            other => mismatch("IPv4", &other),
        }
    }
}

impl ToValue for Ipv4Addr {
    fn to_value(&self) -> Value {
        Value::IPv4(*self)
    }
}

impl FromValue for Ipv6Addr {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::IPv6(ip) => Ok(ip),
            Value::IPv4(ip) => Ok(ip.to_ipv6_mapped()),
            other => mismatch("IPv6", &other),
        }
    }
}

impl ToValue for Ipv6Addr {
    fn to_value(&self) -> Value {
        Value::IPv6(*self)
    }
}

// ==================== Temporal Types ====================

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Date(d) => Ok(d),
            other => mismatch("Date", &other),
        }
    }
}

impl ToValue for NaiveDate {
    fn to_value(&self) -> Value {
        Value::Date(*self)
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::DateTime(dt) => Ok(dt),
            other => mismatch("DateTime", &other),
        }
    }
}

impl ToValue for DateTime<Utc> {
    fn to_value(&self) -> Value {
        Value::DateTime(*self)
    }
}

// ==================== Containers ====================

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Array(items) => items.into_iter().map(T::from_value).collect(),
            other => mismatch("Array", &other),
        }
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::Array(self.iter().map(ToValue::to_value).collect())
    }
}

impl<T: ToValue> ToValue for [T] {
    fn to_value(&self) -> Value {
        Value::Array(self.iter().map(ToValue::to_value).collect())
    }
}

impl<K: FromValue + Eq + Hash, V: FromValue> FromValue for HashMap<K, V> {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Map(pairs) => pairs
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            other => mismatch("Map", &other),
        }
    }
}

impl<K: FromValue + Ord, V: FromValue> FromValue for BTreeMap<K, V> {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Map(pairs) => pairs
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            other => mismatch("Map", &other),
        }
    }
}

impl<K: ToValue, V: ToValue> ToValue for BTreeMap<K, V> {
    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.to_value(), v.to_value()))
                .collect(),
        )
    }
}

impl<K: ToValue, V: ToValue> ToValue for HashMap<K, V> {
    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.to_value(), v.to_value()))
                .collect(),
        )
    }
}

impl<T: ToValue + ?Sized> ToValue for &T {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

// ==================== Rows ====================

/// A row of values to append, in column order.
pub trait ToRow {
    fn to_row(&self) -> Vec<Value>;
}

/// A row read back by column position.
pub trait FromRow: Sized {
    /// Number of columns consumed.
    const WIDTH: usize;

    fn from_row(values: Vec<Value>) -> Result<Self, (usize, TypeError)>;
}

impl ToRow for Vec<Value> {
    fn to_row(&self) -> Vec<Value> {
        self.clone()
    }
}

impl ToRow for [Value] {
    fn to_row(&self) -> Vec<Value> {
        self.to_vec()
    }
}

impl<const N: usize> ToRow for [Value; N] {
    fn to_row(&self) -> Vec<Value> {
        self.to_vec()
    }
}

macro_rules! impl_row_tuple {
    ($width:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name: ToValue),+> ToRow for ($($name,)+) {
            fn to_row(&self) -> Vec<Value> {
                vec![$(self.$idx.to_value()),+]
            }
        }

        impl<$($name: FromValue),+> FromRow for ($($name,)+) {
            const WIDTH: usize = $width;

            fn from_row(values: Vec<Value>) -> Result<Self, (usize, TypeError)> {
                let mut iter = values.into_iter();
                Ok(($(
                    $name::from_value(iter.next().unwrap_or(Value::Null))
                        .map_err(|e| ($idx, e))?,
                )+))
            }
        }
    };
}

impl_row_tuple!(1; A: 0);
impl_row_tuple!(2; A: 0, B: 1);
impl_row_tuple!(3; A: 0, B: 1, C: 2);
impl_row_tuple!(4; A: 0, B: 1, C: 2, D: 3);
impl_row_tuple!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
impl_row_tuple!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_row_tuple!(7; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_row_tuple!(8; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
impl_row_tuple!(9; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8);
impl_row_tuple!(10; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9);
impl_row_tuple!(11; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9, K: 10);
impl_row_tuple!(12; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9, K: 10, L: 11);

/// Struct mapping by column name.
///
/// Implemented by hand (or by a derive in user code); the driver only calls
/// these two methods.
pub trait ChRow: Sized {
    /// Column names in insert order.
    fn columns() -> &'static [&'static str];

    /// Values in the same order as `columns()`.
    fn to_values(&self) -> Vec<Value>;

    /// Build from a row, looking columns up by name.
    fn from_row(row: &crate::driver::Row) -> crate::ChResult<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_narrowing() {
        assert_eq!(u8::from_value(Value::UInt64(200)).unwrap(), 200);
        assert!(matches!(
            u8::from_value(Value::UInt64(300)),
            Err(TypeError::OutOfRange { .. })
        ));
        assert_eq!(i64::from_value(Value::UInt32(7)).unwrap(), 7);
        assert!(matches!(
            i64::from_value(Value::String("7".into())),
            Err(TypeError::Mismatch { .. })
        ));
        assert_eq!(
            i32::from_value(Value::Null),
            Err(TypeError::UnexpectedNull)
        );
    }

    #[test]
    fn test_option_and_containers() {
        assert_eq!(Option::<i32>::from_value(Value::Null).unwrap(), None);
        assert_eq!(
            Vec::<u8>::from_value(Value::Array(vec![Value::UInt8(1), Value::UInt8(2)])).unwrap(),
            vec![1, 2]
        );
        let map = BTreeMap::<String, u64>::from_value(Value::Map(vec![(
            Value::String("k".into()),
            Value::UInt64(9),
        )]))
        .unwrap();
        assert_eq!(map.get("k"), Some(&9));
    }

    #[test]
    fn test_tuple_rows() {
        let row = (1u64, "a", Some(2.5f64)).to_row();
        assert_eq!(
            row,
            vec![
                Value::UInt64(1),
                Value::String("a".into()),
                Value::Float64(2.5)
            ]
        );

        let (id, name): (u64, String) =
            FromRow::from_row(vec![Value::UInt64(1), Value::String("a".into())]).unwrap();
        assert_eq!((id, name.as_str()), (1, "a"));

        let err = <(u64, u64)>::from_row(vec![Value::UInt64(1), Value::String("x".into())])
            .unwrap_err();
        assert_eq!(err.0, 1);
    }
}
