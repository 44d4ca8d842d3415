//! Dynamically typed cell value.

use super::decimal::Decimal;
use super::wide::{I256, U256};
use crate::protocol::types::{ColumnType, TupleField};
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use uuid::Uuid;

/// Value of a single cell, as appended to or read from a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    UInt128(u128),
    UInt256(U256),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Int128(i128),
    Int256(I256),
    Float32(f32),
    Float64(f64),
    Decimal(Decimal),
    String(String),
    /// Binary string that is not valid UTF-8.
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    IPv4(Ipv4Addr),
    IPv6(Ipv6Addr),
    Array(Vec<Value>),
    Tuple(Vec<Value>),
    Map(Vec<(Value, Value)>),
    /// Value tagged with an explicit type, used to pick a `Variant`
    /// alternative or a `Dynamic` type instead of inferring one.
    Typed { ty: ColumnType, value: Box<Value> },
}

impl Value {
    pub fn typed(ty: ColumnType, value: Value) -> Value {
        Value::Typed {
            ty,
            value: Box::new(value),
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Typed { value, .. } => value.is_null(),
            _ => false,
        }
    }

    /// Short name of the value's kind, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "Bool",
            Value::UInt8(_) => "UInt8",
            Value::UInt16(_) => "UInt16",
            Value::UInt32(_) => "UInt32",
            Value::UInt64(_) => "UInt64",
            Value::UInt128(_) => "UInt128",
            Value::UInt256(_) => "UInt256",
            Value::Int8(_) => "Int8",
            Value::Int16(_) => "Int16",
            Value::Int32(_) => "Int32",
            Value::Int64(_) => "Int64",
            Value::Int128(_) => "Int128",
            Value::Int256(_) => "Int256",
            Value::Float32(_) => "Float32",
            Value::Float64(_) => "Float64",
            Value::Decimal(_) => "Decimal",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::Uuid(_) => "UUID",
            Value::Date(_) => "Date",
            Value::DateTime(_) => "DateTime",
            Value::IPv4(_) => "IPv4",
            Value::IPv6(_) => "IPv6",
            Value::Array(_) => "Array",
            Value::Tuple(_) => "Tuple",
            Value::Map(_) => "Map",
            Value::Typed { .. } => "Typed",
        }
    }

    /// Column type a `Dynamic` column stores this value under.
    pub fn infer_type(&self) -> Option<ColumnType> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(_) => ColumnType::Bool,
            Value::UInt8(_) => ColumnType::UInt8,
            Value::UInt16(_) => ColumnType::UInt16,
            Value::UInt32(_) => ColumnType::UInt32,
            Value::UInt64(_) => ColumnType::UInt64,
            Value::UInt128(_) => ColumnType::UInt128,
            Value::UInt256(_) => ColumnType::UInt256,
            Value::Int8(_) => ColumnType::Int8,
            Value::Int16(_) => ColumnType::Int16,
            Value::Int32(_) => ColumnType::Int32,
            Value::Int64(_) => ColumnType::Int64,
            Value::Int128(_) => ColumnType::Int128,
            Value::Int256(_) => ColumnType::Int256,
            Value::Float32(_) => ColumnType::Float32,
            Value::Float64(_) => ColumnType::Float64,
            Value::Decimal(d) => ColumnType::Decimal {
                precision: 38,
                scale: d.scale().min(38) as u8,
            },
            Value::String(_) | Value::Bytes(_) => ColumnType::String,
            Value::Uuid(_) => ColumnType::Uuid,
            Value::Date(d) => {
                let days = super::days_since_epoch(*d);
                if (0..=u16::MAX as i64).contains(&days) {
                    ColumnType::Date
                } else {
                    ColumnType::Date32
                }
            }
            Value::DateTime(dt) => {
                let secs = dt.timestamp();
                if dt.nanosecond() == 0 && (0..=u32::MAX as i64).contains(&secs) {
                    ColumnType::DateTime(None)
                } else {
                    ColumnType::DateTime64(9, None)
                }
            }
            Value::IPv4(_) => ColumnType::IPv4,
            Value::IPv6(_) => ColumnType::IPv6,
            Value::Array(items) => ColumnType::array(infer_element(items.iter())?),
            Value::Tuple(items) => ColumnType::Tuple(
                items
                    .iter()
                    .map(|v| infer_element(std::iter::once(v)).map(TupleField::unnamed))
                    .collect::<Option<Vec<_>>>()?,
            ),
            Value::Map(pairs) => ColumnType::map(
                infer_element(pairs.iter().map(|(k, _)| k))?,
                infer_element(pairs.iter().map(|(_, v)| v))?,
            ),
            Value::Typed { ty, .. } => ty.clone(),
        })
    }

    /// Text rendering in ClickHouse's literal style.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        self.write_text(&mut out, false);
        out
    }

    fn write_text(&self, out: &mut String, quote_strings: bool) {
        let mut ints = itoa::Buffer::new();
        match self {
            Value::Null => out.push_str("NULL"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::UInt8(v) => out.push_str(ints.format(*v)),
            Value::UInt16(v) => out.push_str(ints.format(*v)),
            Value::UInt32(v) => out.push_str(ints.format(*v)),
            Value::UInt64(v) => out.push_str(ints.format(*v)),
            Value::UInt128(v) => out.push_str(ints.format(*v)),
            Value::Int8(v) => out.push_str(ints.format(*v)),
            Value::Int16(v) => out.push_str(ints.format(*v)),
            Value::Int32(v) => out.push_str(ints.format(*v)),
            Value::Int64(v) => out.push_str(ints.format(*v)),
            Value::Int128(v) => out.push_str(ints.format(*v)),
            Value::UInt256(v) => out.push_str(&v.to_string()),
            Value::Int256(v) => out.push_str(&v.to_string()),
            Value::Float32(v) => write_float(out, *v as f64, Some(*v)),
            Value::Float64(v) => write_float(out, *v, None),
            Value::Decimal(d) => out.push_str(&d.to_string()),
            Value::String(s) => write_str(out, s, quote_strings),
            Value::Bytes(b) => write_str(out, &String::from_utf8_lossy(b), quote_strings),
            Value::Uuid(u) => write_str(out, &u.hyphenated().to_string(), quote_strings),
            Value::Date(d) => write_str(out, &d.format("%Y-%m-%d").to_string(), quote_strings),
            Value::DateTime(dt) => {
                let text = if dt.nanosecond() == 0 {
                    dt.format("%Y-%m-%d %H:%M:%S").to_string()
                } else {
                    dt.format("%Y-%m-%d %H:%M:%S%.9f").to_string()
                };
                write_str(out, &text, quote_strings)
            }
            Value::IPv4(ip) => write_str(out, &ip.to_string(), quote_strings),
            Value::IPv6(ip) => write_str(out, &ip.to_string(), quote_strings),
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_text(out, true);
                }
                out.push(']');
            }
            Value::Tuple(items) => {
                out.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_text(out, true);
                }
                out.push(')');
            }
            Value::Map(pairs) => {
                out.push('{');
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    k.write_text(out, true);
                    out.push(':');
                    v.write_text(out, true);
                }
                out.push('}');
            }
            Value::Typed { value, .. } => value.write_text(out, quote_strings),
        }
    }
}

fn infer_element<'a>(items: impl Iterator<Item = &'a Value>) -> Option<ColumnType> {
    let mut has_null = false;
    let mut found = None;
    for item in items {
        if item.is_null() {
            has_null = true;
        } else if found.is_none() {
            found = Some(item.infer_type()?);
        }
    }
    Some(match found {
        None if has_null => ColumnType::nullable(ColumnType::Nothing),
        None => ColumnType::Nothing,
        Some(ty @ (ColumnType::Array(_) | ColumnType::Map(..) | ColumnType::Tuple(_))) => ty,
        Some(ty) if has_null => ColumnType::nullable(ty),
        Some(ty) => ty,
    })
}

fn write_float(out: &mut String, v: f64, narrow: Option<f32>) {
    if v.is_nan() {
        out.push_str("nan");
    } else if v.is_infinite() {
        out.push_str(if v > 0.0 { "inf" } else { "-inf" });
    } else {
        let mut buf = ryu::Buffer::new();
        match narrow {
            Some(f) => out.push_str(buf.format_finite(f)),
            None => out.push_str(buf.format_finite(v)),
        }
    }
}

fn write_str(out: &mut String, s: &str, quote: bool) {
    if !quote {
        out.push_str(s);
        return;
    }
    out.push('\'');
    for c in s.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_infer_scalars() {
        assert_eq!(Value::Int64(1).infer_type(), Some(ColumnType::Int64));
        assert_eq!(Value::Null.infer_type(), None);
        assert_eq!(
            Value::Decimal(Decimal::new(15, 1)).infer_type(),
            Some(ColumnType::Decimal {
                precision: 38,
                scale: 1
            })
        );

        let whole = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            Value::DateTime(whole).infer_type(),
            Some(ColumnType::DateTime(None))
        );
        let fractional = whole + chrono::Duration::milliseconds(5);
        assert_eq!(
            Value::DateTime(fractional).infer_type(),
            Some(ColumnType::DateTime64(9, None))
        );
    }

    #[test]
    fn test_infer_composites() {
        let arr = Value::Array(vec![Value::Null, Value::String("a".into())]);
        assert_eq!(
            arr.infer_type().unwrap().to_string(),
            "Array(Nullable(String))"
        );
        let map = Value::Map(vec![(Value::String("k".into()), Value::UInt8(1))]);
        assert_eq!(map.infer_type().unwrap().to_string(), "Map(String, UInt8)");
        assert_eq!(
            Value::Array(vec![]).infer_type().unwrap().to_string(),
            "Array(Nothing)"
        );
    }

    #[test]
    fn test_text_rendering() {
        assert_eq!(Value::Float64(2.5).to_text(), "2.5");
        assert_eq!(Value::Float32(f32::NAN).to_text(), "nan");
        assert_eq!(Value::Int64(-7).to_text(), "-7");
        assert_eq!(Value::String("it's".into()).to_text(), "it's");
        let arr = Value::Array(vec![Value::String("it's".into()), Value::Null]);
        assert_eq!(arr.to_text(), "['it\\'s',NULL]");
        let tuple = Value::Tuple(vec![Value::UInt8(1), Value::Bool(true)]);
        assert_eq!(tuple.to_text(), "(1,true)");
    }
}
