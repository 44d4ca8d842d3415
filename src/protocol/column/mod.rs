//! Column codecs.
//!
//! A `Column` pairs its declared `ColumnType` with a closed enum of storage
//! kinds. Composite kinds own their auxiliary structure (null map, offsets,
//! dictionary, discriminators) and delegate payload to child columns.
//!
//! Every codec has four wire operations: the state prefix, written once
//! before any data of the whole column tree, and the data itself.

pub mod array;
pub mod decimal;
pub mod dynamic;
pub mod enums;
pub mod low_cardinality;
pub mod nullable;
pub mod numeric;
pub mod string;
pub mod tuple;
pub mod variant;

pub use array::{ArrayColumn, MapColumn};
pub use decimal::DecimalColumn;
pub use dynamic::DynamicColumn;
pub use enums::EnumColumn;
pub use low_cardinality::LowCardinalityColumn;
pub use nullable::NullableColumn;
pub use string::{FixedStringColumn, StringColumn};
pub use tuple::TupleColumn;
pub use variant::VariantColumn;

use self::numeric::{
    bf16_to_f32, decode_fixed, encode_fixed, f32_of, f32_to_bf16, f64_of, fixed_key, i256_of,
    signed_of, u256_of, unsigned_of,
};
use self::string::string_bytes;
use crate::error::{ChError, ChResult};
use crate::protocol::types::ColumnType;
use crate::protocol::wire::{WireRead, take_rows};
use crate::types::temporal::{
    date_from_days, datetime_from_seconds, datetime_from_ticks, days_since_epoch,
    seconds_since_epoch, ticks_since_epoch,
};
use crate::types::{I256, U256, Value};
use bytes::{BufMut, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr};
use uuid::Uuid;

const SECONDS_PER_DAY: i64 = 86_400;

/// Storage of a column, one variant per codec kind.
#[derive(Debug, Clone)]
pub enum ColumnData {
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    UInt128(Vec<u128>),
    UInt256(Vec<U256>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Int128(Vec<i128>),
    Int256(Vec<I256>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    /// Raw upper halves of `f32` values.
    BFloat16(Vec<u16>),
    Bool(Vec<bool>),
    Uuid(Vec<Uuid>),
    IPv4(Vec<Ipv4Addr>),
    IPv6(Vec<Ipv6Addr>),
    /// Days since the epoch.
    Date(Vec<u16>),
    Date32(Vec<i32>),
    /// Seconds since the epoch.
    DateTime(Vec<u32>),
    /// Ticks of `10^-precision` seconds, with the precision.
    DateTime64(Vec<i64>, u8),
    /// Row count only; one placeholder byte per row on the wire.
    Nothing(usize),
    Decimal(DecimalColumn),
    Enum8(EnumColumn<i8>),
    Enum16(EnumColumn<i16>),
    String(StringColumn),
    FixedString(FixedStringColumn),
    Nullable(NullableColumn),
    Array(ArrayColumn),
    Map(MapColumn),
    Tuple(TupleColumn),
    LowCardinality(LowCardinalityColumn),
    Variant(VariantColumn),
    Dynamic(DynamicColumn),
}

/// Expands `$body` once per fixed-width storage kind, with `$v` bound to the
/// values vector; everything else goes to `$rest`.
macro_rules! with_fixed {
    ($data:expr, $v:ident => $body:expr, $rest:ident => $fallback:expr) => {
        match $data {
            ColumnData::UInt8($v) => $body,
            ColumnData::UInt16($v) => $body,
            ColumnData::UInt32($v) => $body,
            ColumnData::UInt64($v) => $body,
            ColumnData::UInt128($v) => $body,
            ColumnData::UInt256($v) => $body,
            ColumnData::Int8($v) => $body,
            ColumnData::Int16($v) => $body,
            ColumnData::Int32($v) => $body,
            ColumnData::Int64($v) => $body,
            ColumnData::Int128($v) => $body,
            ColumnData::Int256($v) => $body,
            ColumnData::Float32($v) => $body,
            ColumnData::Float64($v) => $body,
            ColumnData::BFloat16($v) => $body,
            ColumnData::Bool($v) => $body,
            ColumnData::Uuid($v) => $body,
            ColumnData::IPv4($v) => $body,
            ColumnData::IPv6($v) => $body,
            ColumnData::Date($v) => $body,
            ColumnData::Date32($v) => $body,
            ColumnData::DateTime($v) => $body,
            ColumnData::DateTime64($v, _) => $body,
            $rest => $fallback,
        }
    };
}

impl ColumnData {
    fn for_type(ty: &ColumnType) -> ColumnData {
        match ty.storage() {
            ColumnType::UInt8 => ColumnData::UInt8(Vec::new()),
            ColumnType::UInt16 => ColumnData::UInt16(Vec::new()),
            ColumnType::UInt32 => ColumnData::UInt32(Vec::new()),
            ColumnType::UInt64 => ColumnData::UInt64(Vec::new()),
            ColumnType::UInt128 => ColumnData::UInt128(Vec::new()),
            ColumnType::UInt256 => ColumnData::UInt256(Vec::new()),
            ColumnType::Int8 => ColumnData::Int8(Vec::new()),
            ColumnType::Int16 => ColumnData::Int16(Vec::new()),
            ColumnType::Int32 => ColumnData::Int32(Vec::new()),
            ColumnType::Int64 => ColumnData::Int64(Vec::new()),
            ColumnType::Int128 => ColumnData::Int128(Vec::new()),
            ColumnType::Int256 => ColumnData::Int256(Vec::new()),
            ColumnType::Float32 => ColumnData::Float32(Vec::new()),
            ColumnType::Float64 => ColumnData::Float64(Vec::new()),
            ColumnType::BFloat16 => ColumnData::BFloat16(Vec::new()),
            ColumnType::Bool => ColumnData::Bool(Vec::new()),
            ColumnType::String => ColumnData::String(StringColumn::default()),
            ColumnType::FixedString(n) => ColumnData::FixedString(FixedStringColumn::new(n)),
            ColumnType::Uuid => ColumnData::Uuid(Vec::new()),
            ColumnType::IPv4 => ColumnData::IPv4(Vec::new()),
            ColumnType::IPv6 => ColumnData::IPv6(Vec::new()),
            ColumnType::Date => ColumnData::Date(Vec::new()),
            ColumnType::Date32 => ColumnData::Date32(Vec::new()),
            ColumnType::DateTime(_) => ColumnData::DateTime(Vec::new()),
            ColumnType::DateTime64(p, _) => ColumnData::DateTime64(Vec::new(), p),
            ColumnType::Decimal { precision, scale } => {
                ColumnData::Decimal(DecimalColumn::new(precision, scale))
            }
            ColumnType::Enum8(items) => ColumnData::Enum8(EnumColumn::new(items)),
            ColumnType::Enum16(items) => ColumnData::Enum16(EnumColumn::new(items)),
            ColumnType::Nothing => ColumnData::Nothing(0),
            ColumnType::Nullable(inner) => {
                ColumnData::Nullable(NullableColumn::new(Column::new(*inner)))
            }
            ColumnType::Array(inner) => ColumnData::Array(ArrayColumn::new(Column::new(*inner))),
            ColumnType::Map(k, v) => {
                ColumnData::Map(MapColumn::new(Column::new(*k), Column::new(*v)))
            }
            ColumnType::Tuple(fields) => ColumnData::Tuple(TupleColumn::new(
                fields
                    .into_iter()
                    .map(|f| (f.name, Column::new(f.ty)))
                    .collect(),
            )),
            ColumnType::LowCardinality(inner) => {
                ColumnData::LowCardinality(LowCardinalityColumn::new(&inner))
            }
            ColumnType::Variant(types) => ColumnData::Variant(VariantColumn::new(&types)),
            ColumnType::Dynamic { max_types } => ColumnData::Dynamic(DynamicColumn::new(max_types)),
            // `storage()` already resolved the aliases.
            ColumnType::Nested(_)
            | ColumnType::Interval(_)
            | ColumnType::Geo(_)
            | ColumnType::SimpleAggregateFunction(..) => ColumnData::Nothing(0),
        }
    }
}

/// A typed, append-only column.
#[derive(Debug, Clone)]
pub struct Column {
    ty: ColumnType,
    data: ColumnData,
}

impl Column {
    pub fn new(ty: ColumnType) -> Column {
        let data = ColumnData::for_type(&ty);
        Column { ty, data }
    }

    /// Parse a type name and build an empty column for it.
    pub fn from_type_name(name: &str) -> ChResult<Column> {
        Ok(Column::new(ColumnType::parse(name)?))
    }

    /// Empty column of the same type.
    pub fn clone_empty(&self) -> Column {
        Column::new(self.ty.clone())
    }

    pub fn column_type(&self) -> &ColumnType {
        &self.ty
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn len(&self) -> usize {
        with_fixed!(&self.data, v => v.len(), other => match other {
            ColumnData::Nothing(n) => *n,
            ColumnData::Decimal(c) => c.len(),
            ColumnData::Enum8(c) => c.len(),
            ColumnData::Enum16(c) => c.len(),
            ColumnData::String(c) => c.len(),
            ColumnData::FixedString(c) => c.len(),
            ColumnData::Nullable(c) => c.len(),
            ColumnData::Array(c) => c.len(),
            ColumnData::Map(c) => c.len(),
            ColumnData::Tuple(c) => c.len(),
            ColumnData::LowCardinality(c) => c.len(),
            ColumnData::Variant(c) => c.len(),
            ColumnData::Dynamic(c) => c.len(),
            _ => 0,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reject(&self, value: &Value) -> ChError {
        let got = match value {
            Value::Null => "NULL".to_string(),
            Value::Array(_) | Value::Tuple(_) | Value::Map(_) => value.kind_name().to_string(),
            other => {
                let mut text = other.to_text();
                if text.len() > 64 {
                    let mut cut = 61;
                    while !text.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    text.truncate(cut);
                    text.push_str("...");
                }
                format!("{} {}", other.kind_name(), text)
            }
        };
        ChError::mismatch("", self.ty.to_string(), got)
    }

    /// Type-check and append one value. On error the column is unchanged.
    pub fn append(&mut self, value: &Value) -> ChResult<()> {
        if let Value::Typed { value: inner, .. } = value {
            if !matches!(self.data, ColumnData::Variant(_) | ColumnData::Dynamic(_)) {
                return self.append(inner);
            }
        }

        fn push<T>(values: &mut Vec<T>, v: Option<T>) -> bool {
            match v {
                Some(v) => {
                    values.push(v);
                    true
                }
                None => false,
            }
        }

        let accepted = match &mut self.data {
            ColumnData::UInt8(v) => push(v, unsigned_of(value, 8).map(|x| x as u8)),
            ColumnData::UInt16(v) => push(v, unsigned_of(value, 16).map(|x| x as u16)),
            ColumnData::UInt32(v) => push(v, unsigned_of(value, 32).map(|x| x as u32)),
            ColumnData::UInt64(v) => push(v, unsigned_of(value, 64).map(|x| x as u64)),
            ColumnData::UInt128(v) => push(v, unsigned_of(value, 128)),
            ColumnData::UInt256(v) => push(v, u256_of(value)),
            ColumnData::Int8(v) => push(v, signed_of(value, 8).map(|x| x as i8)),
            ColumnData::Int16(v) => push(v, signed_of(value, 16).map(|x| x as i16)),
            ColumnData::Int32(v) => push(v, signed_of(value, 32).map(|x| x as i32)),
            ColumnData::Int64(v) => push(v, signed_of(value, 64).map(|x| x as i64)),
            ColumnData::Int128(v) => push(v, signed_of(value, 128)),
            ColumnData::Int256(v) => push(v, i256_of(value)),
            ColumnData::Float32(v) => push(v, f32_of(value)),
            ColumnData::Float64(v) => push(v, f64_of(value)),
            ColumnData::BFloat16(v) => push(v, f32_of(value).map(f32_to_bf16)),
            ColumnData::Bool(v) => push(
                v,
                match value {
                    Value::Bool(b) => Some(*b),
                    _ => None,
                },
            ),
            ColumnData::Uuid(v) => push(
                v,
                match value {
                    Value::Uuid(u) => Some(*u),
                    Value::String(s) => Uuid::parse_str(s).ok(),
                    _ => None,
                },
            ),
            ColumnData::IPv4(v) => push(
                v,
                match value {
                    Value::IPv4(ip) => Some(*ip),
                    Value::String(s) => s.parse().ok(),
                    _ => None,
                },
            ),
            ColumnData::IPv6(v) => push(
                v,
                match value {
                    Value::IPv6(ip) => Some(*ip),
                    Value::IPv4(ip) => Some(ip.to_ipv6_mapped()),
                    Value::String(s) => s.parse().ok(),
                    _ => None,
                },
            ),
            ColumnData::Date(v) => push(
                v,
                day_number(value).and_then(|d| u16::try_from(d).ok()),
            ),
            ColumnData::Date32(v) => push(
                v,
                day_number(value).and_then(|d| i32::try_from(d).ok()),
            ),
            ColumnData::DateTime(v) => push(
                v,
                match value {
                    Value::DateTime(dt) => u32::try_from(seconds_since_epoch(dt)).ok(),
                    Value::Date(d) => days_since_epoch(*d)
                        .checked_mul(SECONDS_PER_DAY)
                        .and_then(|s| u32::try_from(s).ok()),
                    _ => None,
                },
            ),
            ColumnData::DateTime64(v, precision) => {
                let precision = *precision;
                push(
                    v,
                    match value {
                        Value::DateTime(dt) => ticks_since_epoch(dt, precision),
                        Value::Date(d) => datetime_from_seconds(
                            days_since_epoch(*d).saturating_mul(SECONDS_PER_DAY),
                        )
                        .and_then(|dt| ticks_since_epoch(&dt, precision)),
                        _ => None,
                    },
                )
            }
            ColumnData::Nothing(n) => {
                if value.is_null() {
                    *n += 1;
                    true
                } else {
                    false
                }
            }
            ColumnData::String(c) => match string_bytes(value) {
                Some(bytes) => {
                    c.push(bytes);
                    true
                }
                None => false,
            },
            ColumnData::FixedString(c) => match string_bytes(value) {
                Some(bytes) => {
                    c.push(bytes)?;
                    true
                }
                None => false,
            },
            ColumnData::Decimal(c) => {
                c.append(value)?;
                true
            }
            ColumnData::Enum8(c) => {
                c.append(value)?;
                true
            }
            ColumnData::Enum16(c) => {
                c.append(value)?;
                true
            }
            ColumnData::Nullable(c) => {
                c.append(value)?;
                true
            }
            ColumnData::Array(c) => {
                c.append(value)?;
                true
            }
            ColumnData::Map(c) => {
                c.append(value)?;
                true
            }
            ColumnData::Tuple(c) => {
                c.append(value)?;
                true
            }
            ColumnData::LowCardinality(c) => {
                c.append(value)?;
                true
            }
            ColumnData::Variant(c) => {
                c.append(value)?;
                true
            }
            ColumnData::Dynamic(c) => {
                c.append(value)?;
                true
            }
        };

        if accepted {
            Ok(())
        } else {
            Err(self.reject(value))
        }
    }

    /// Append the type's default value (zero, empty, or NULL where the type
    /// has one). Used for NULL slots of `Nullable` and padding.
    pub(crate) fn append_default(&mut self) {
        with_fixed!(&mut self.data, v => v.push(numeric::zero()), other => match other {
            ColumnData::Nothing(n) => *n += 1,
            ColumnData::Decimal(c) => c.push_default(),
            ColumnData::Enum8(c) => c.push_default(),
            ColumnData::Enum16(c) => c.push_default(),
            ColumnData::String(c) => c.push(&[]),
            ColumnData::FixedString(c) => {
                let zeros = vec![0u8; c.width()];
                let _ = c.push(&zeros);
            }
            ColumnData::Nullable(c) => c.push_null(),
            ColumnData::Array(c) => c.push_default(),
            ColumnData::Map(c) => c.push_default(),
            ColumnData::Tuple(c) => c.push_default(),
            ColumnData::LowCardinality(c) => c.push_default(),
            ColumnData::Variant(c) => c.push_default(),
            ColumnData::Dynamic(c) => c.push_default(),
            _ => {}
        })
    }

    /// Value at `row`. Panics if `row >= len()`.
    pub fn value(&self, row: usize) -> ChResult<Value> {
        let bad_temporal = || ChError::Decode(format!("{} value out of range", self.ty));
        Ok(match &self.data {
            ColumnData::UInt8(v) => Value::UInt8(v[row]),
            ColumnData::UInt16(v) => Value::UInt16(v[row]),
            ColumnData::UInt32(v) => Value::UInt32(v[row]),
            ColumnData::UInt64(v) => Value::UInt64(v[row]),
            ColumnData::UInt128(v) => Value::UInt128(v[row]),
            ColumnData::UInt256(v) => Value::UInt256(v[row]),
            ColumnData::Int8(v) => Value::Int8(v[row]),
            ColumnData::Int16(v) => Value::Int16(v[row]),
            ColumnData::Int32(v) => Value::Int32(v[row]),
            ColumnData::Int64(v) => Value::Int64(v[row]),
            ColumnData::Int128(v) => Value::Int128(v[row]),
            ColumnData::Int256(v) => Value::Int256(v[row]),
            ColumnData::Float32(v) => Value::Float32(v[row]),
            ColumnData::Float64(v) => Value::Float64(v[row]),
            ColumnData::BFloat16(v) => Value::Float32(bf16_to_f32(v[row])),
            ColumnData::Bool(v) => Value::Bool(v[row]),
            ColumnData::Uuid(v) => Value::Uuid(v[row]),
            ColumnData::IPv4(v) => Value::IPv4(v[row]),
            ColumnData::IPv6(v) => Value::IPv6(v[row]),
            ColumnData::Date(v) => {
                Value::Date(date_from_days(i64::from(v[row])).ok_or_else(bad_temporal)?)
            }
            ColumnData::Date32(v) => {
                Value::Date(date_from_days(i64::from(v[row])).ok_or_else(bad_temporal)?)
            }
            ColumnData::DateTime(v) => Value::DateTime(
                datetime_from_seconds(i64::from(v[row])).ok_or_else(bad_temporal)?,
            ),
            ColumnData::DateTime64(v, precision) => Value::DateTime(
                datetime_from_ticks(v[row], *precision).ok_or_else(bad_temporal)?,
            ),
            ColumnData::Nothing(_) => Value::Null,
            ColumnData::Decimal(c) => c.value(row),
            ColumnData::Enum8(c) => c.value(row)?,
            ColumnData::Enum16(c) => c.value(row)?,
            ColumnData::String(c) => c.value(row),
            ColumnData::FixedString(c) => c.value(row),
            ColumnData::Nullable(c) => c.value(row)?,
            ColumnData::Array(c) => c.value(row)?,
            ColumnData::Map(c) => c.value(row)?,
            ColumnData::Tuple(c) => c.value(row)?,
            ColumnData::LowCardinality(c) => c.value(row)?,
            ColumnData::Variant(c) => c.value(row)?,
            ColumnData::Dynamic(c) => c.value(row)?,
        })
    }

    pub fn clear(&mut self) {
        with_fixed!(&mut self.data, v => v.clear(), other => match other {
            ColumnData::Nothing(n) => *n = 0,
            ColumnData::Decimal(c) => c.clear(),
            ColumnData::Enum8(c) => c.clear(),
            ColumnData::Enum16(c) => c.clear(),
            ColumnData::String(c) => c.clear(),
            ColumnData::FixedString(c) => c.clear(),
            ColumnData::Nullable(c) => c.clear(),
            ColumnData::Array(c) => c.clear(),
            ColumnData::Map(c) => c.clear(),
            ColumnData::Tuple(c) => c.clear(),
            ColumnData::LowCardinality(c) => c.clear(),
            ColumnData::Variant(c) => c.clear(),
            ColumnData::Dynamic(c) => c.clear(),
            _ => {}
        })
    }

    /// Keep the first `rows` rows.
    pub fn truncate(&mut self, rows: usize) {
        with_fixed!(&mut self.data, v => v.truncate(rows), other => match other {
            ColumnData::Nothing(n) => *n = (*n).min(rows),
            ColumnData::Decimal(c) => c.truncate(rows),
            ColumnData::Enum8(c) => c.truncate(rows),
            ColumnData::Enum16(c) => c.truncate(rows),
            ColumnData::String(c) => c.truncate(rows),
            ColumnData::FixedString(c) => c.truncate(rows),
            ColumnData::Nullable(c) => c.truncate(rows),
            ColumnData::Array(c) => c.truncate(rows),
            ColumnData::Map(c) => c.truncate(rows),
            ColumnData::Tuple(c) => c.truncate(rows),
            ColumnData::LowCardinality(c) => c.truncate(rows),
            ColumnData::Variant(c) => c.truncate(rows),
            ColumnData::Dynamic(c) => c.truncate(rows),
            _ => {}
        })
    }

    /// Append every row of `other`, which must have the same type.
    pub fn extend_from(&mut self, other: &Column) -> ChResult<()> {
        if self.ty.storage() != other.ty.storage() {
            return Err(ChError::mismatch(
                "",
                self.ty.to_string(),
                other.ty.to_string(),
            ));
        }

        macro_rules! extend_fixed {
            ($($variant:ident),*) => {
                match (&mut self.data, &other.data) {
                    $(
                        (ColumnData::$variant(a), ColumnData::$variant(b)) => {
                            a.extend_from_slice(b);
                            return Ok(());
                        }
                    )*
                    _ => {}
                }
            };
        }
        extend_fixed!(
            UInt8, UInt16, UInt32, UInt64, UInt128, UInt256, Int8, Int16, Int32, Int64, Int128,
            Int256, Float32, Float64, BFloat16, Bool, Uuid, IPv4, IPv6, Date, Date32, DateTime
        );

        match (&mut self.data, &other.data) {
            (ColumnData::DateTime64(a, _), ColumnData::DateTime64(b, _)) => a.extend_from_slice(b),
            (ColumnData::Nothing(a), ColumnData::Nothing(b)) => *a += b,
            (ColumnData::Decimal(a), ColumnData::Decimal(b)) => a.extend(b),
            (ColumnData::Enum8(a), ColumnData::Enum8(b)) => a.extend(b),
            (ColumnData::Enum16(a), ColumnData::Enum16(b)) => a.extend(b),
            (ColumnData::String(a), ColumnData::String(b)) => a.extend(b),
            (ColumnData::FixedString(a), ColumnData::FixedString(b)) => a.extend(b),
            (ColumnData::Nullable(a), ColumnData::Nullable(b)) => a.extend(b)?,
            (ColumnData::Array(a), ColumnData::Array(b)) => a.extend(b)?,
            (ColumnData::Map(a), ColumnData::Map(b)) => a.extend(b)?,
            (ColumnData::Tuple(a), ColumnData::Tuple(b)) => a.extend(b)?,
            (ColumnData::LowCardinality(a), ColumnData::LowCardinality(b)) => a.extend(b)?,
            (ColumnData::Variant(a), ColumnData::Variant(b)) => a.extend(b)?,
            (ColumnData::Dynamic(a), ColumnData::Dynamic(b)) => a.extend(b)?,
            _ => {
                return Err(ChError::mismatch(
                    "",
                    self.ty.to_string(),
                    other.ty.to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Bytes identifying the value at `row`, equal for equal values.
    pub(crate) fn row_key(&self, row: usize) -> Vec<u8> {
        with_fixed!(&self.data, v => fixed_key(v[row]), other => match other {
            ColumnData::Nothing(_) => Vec::new(),
            ColumnData::Decimal(c) => c.key(row),
            ColumnData::Enum8(c) => fixed_key(c.codes()[row]),
            ColumnData::Enum16(c) => fixed_key(c.codes()[row]),
            ColumnData::String(c) => c.get(row).to_vec(),
            ColumnData::FixedString(c) => c.get(row).to_vec(),
            ColumnData::Nullable(c) => c.key(row),
            ColumnData::Array(c) => c.key(row),
            ColumnData::Tuple(c) => c.key(row),
            ColumnData::LowCardinality(c) => c.key(row),
            ColumnData::Variant(c) => c.key(row),
            ColumnData::Dynamic(c) => c.key(row),
            ColumnData::Map(c) => match c.value(row) {
                Ok(v) => v.to_text().into_bytes(),
                Err(_) => Vec::new(),
            },
            _ => Vec::new(),
        })
    }

    pub(crate) fn encode_prefix(&self, buf: &mut BytesMut) {
        match &self.data {
            ColumnData::Nullable(c) => c.encode_prefix(buf),
            ColumnData::Array(c) => c.encode_prefix(buf),
            ColumnData::Map(c) => c.encode_prefix(buf),
            ColumnData::Tuple(c) => c.encode_prefix(buf),
            ColumnData::LowCardinality(c) => c.encode_prefix(buf),
            ColumnData::Variant(c) => c.encode_prefix(buf),
            ColumnData::Dynamic(c) => c.encode_prefix(buf),
            _ => {}
        }
    }

    pub(crate) fn encode_data(&self, buf: &mut BytesMut) {
        with_fixed!(&self.data, v => encode_fixed(v, buf), other => match other {
            ColumnData::Nothing(n) => buf.put_bytes(0, *n),
            ColumnData::Decimal(c) => c.encode(buf),
            ColumnData::Enum8(c) => c.encode(buf),
            ColumnData::Enum16(c) => c.encode(buf),
            ColumnData::String(c) => c.encode(buf),
            ColumnData::FixedString(c) => c.encode(buf),
            ColumnData::Nullable(c) => c.encode(buf),
            ColumnData::Array(c) => c.encode(buf),
            ColumnData::Map(c) => c.encode(buf),
            ColumnData::Tuple(c) => c.encode(buf),
            ColumnData::LowCardinality(c) => c.encode(buf),
            ColumnData::Variant(c) => c.encode(buf),
            ColumnData::Dynamic(c) => c.encode(buf),
            _ => {}
        })
    }

    pub(crate) fn decode_prefix(&mut self, r: &mut dyn WireRead) -> ChResult<()> {
        match &mut self.data {
            ColumnData::Nullable(c) => c.decode_prefix(r),
            ColumnData::Array(c) => c.decode_prefix(r),
            ColumnData::Map(c) => c.decode_prefix(r),
            ColumnData::Tuple(c) => c.decode_prefix(r),
            ColumnData::LowCardinality(c) => c.decode_prefix(r),
            ColumnData::Variant(c) => c.decode_prefix(r),
            ColumnData::Dynamic(c) => c.decode_prefix(r),
            _ => Ok(()),
        }
    }

    pub(crate) fn decode_data(&mut self, r: &mut dyn WireRead, rows: usize) -> ChResult<()> {
        with_fixed!(&mut self.data, v => decode_fixed(v, r, rows), other => match other {
            ColumnData::Nothing(n) => {
                take_rows(r, rows, 1)?;
                *n += rows;
                Ok(())
            }
            ColumnData::Decimal(c) => c.decode(r, rows),
            ColumnData::Enum8(c) => c.decode(r, rows),
            ColumnData::Enum16(c) => c.decode(r, rows),
            ColumnData::String(c) => c.decode(r, rows),
            ColumnData::FixedString(c) => c.decode(r, rows),
            ColumnData::Nullable(c) => c.decode(r, rows),
            ColumnData::Array(c) => c.decode(r, rows),
            ColumnData::Map(c) => c.decode(r, rows),
            ColumnData::Tuple(c) => c.decode(r, rows),
            ColumnData::LowCardinality(c) => c.decode(r, rows),
            ColumnData::Variant(c) => c.decode(r, rows),
            ColumnData::Dynamic(c) => c.decode(r, rows),
            _ => Ok(()),
        })
    }
}

/// Days since the epoch for `Date`/`Date32` appends. `DateTime` values are
/// floored to their day.
fn day_number(value: &Value) -> Option<i64> {
    match value {
        Value::Date(d) => Some(days_since_epoch(*d)),
        Value::DateTime(dt) => Some(seconds_since_epoch(dt).div_euclid(SECONDS_PER_DAY)),
        _ => None,
    }
}
