//! `Enum8` / `Enum16` storage: codes on the wire, names at the API.

use super::numeric::{Fixed, decode_fixed, encode_fixed, zero};
use crate::error::{ChError, ChResult};
use crate::protocol::wire::WireRead;
use crate::types::Value;
use bytes::BytesMut;

#[derive(Debug, Clone)]
pub struct EnumColumn<T> {
    items: Vec<(String, T)>,
    codes: Vec<T>,
}

impl<T> EnumColumn<T>
where
    T: Fixed + PartialEq + TryFrom<i64> + Into<i64>,
{
    pub fn new(items: Vec<(String, T)>) -> Self {
        Self {
            items,
            codes: Vec::new(),
        }
    }

    fn type_name(&self) -> String {
        let width = if T::SIZE == 1 { 8 } else { 16 };
        format!("Enum{}", width)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn codes(&self) -> &[T] {
        &self.codes
    }

    fn known(&self, code: T) -> bool {
        self.items.iter().any(|(_, c)| *c == code)
    }

    /// Accepts an element name or a numeric code that the enum defines.
    pub fn append(&mut self, value: &Value) -> ChResult<()> {
        let code = match value {
            Value::String(name) => self
                .items
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, c)| *c)
                .ok_or_else(|| ChError::mismatch("", self.type_name(), format!("'{}'", name)))?,
            other => {
                let raw = match other {
                    Value::Int8(v) => *v as i64,
                    Value::Int16(v) => *v as i64,
                    Value::Int32(v) => *v as i64,
                    Value::Int64(v) => *v,
                    Value::UInt8(v) => *v as i64,
                    Value::UInt16(v) => *v as i64,
                    Value::UInt32(v) => *v as i64,
                    _ => {
                        return Err(ChError::mismatch("", self.type_name(), other.kind_name()));
                    }
                };
                T::try_from(raw)
                    .ok()
                    .filter(|c| self.known(*c))
                    .ok_or_else(|| ChError::mismatch("", self.type_name(), raw.to_string()))?
            }
        };
        self.codes.push(code);
        Ok(())
    }

    /// Default slot: the first declared element.
    pub fn push_default(&mut self) {
        let code = self.items.first().map(|(_, c)| *c).unwrap_or_else(zero);
        self.codes.push(code);
    }

    pub fn value(&self, row: usize) -> ChResult<Value> {
        let code = self.codes[row];
        self.items
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(name, _)| Value::String(name.clone()))
            .ok_or_else(|| ChError::Decode(format!("unknown enum code {}", Into::<i64>::into(code))))
    }

    pub fn clear(&mut self) {
        self.codes.clear();
    }

    pub fn truncate(&mut self, rows: usize) {
        self.codes.truncate(rows);
    }

    pub fn extend(&mut self, other: &EnumColumn<T>) {
        self.codes.extend_from_slice(&other.codes);
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        encode_fixed(&self.codes, buf);
    }

    pub fn decode(&mut self, r: &mut dyn WireRead, rows: usize) -> ChResult<()> {
        decode_fixed(&mut self.codes, r, rows)
    }
}
