//! `Decimal(P, S)` storage.
//!
//! Mantissas are kept as `i128` whatever the declared width; the wire width
//! (4, 8, 16 or 32 bytes) follows from the precision.

use crate::error::{ChError, ChResult};
use crate::protocol::wire::{WireRead, take_rows};
use crate::types::decimal::pow10;
use crate::types::{Decimal, Value};
use bytes::{BufMut, BytesMut};

#[derive(Debug, Clone)]
pub struct DecimalColumn {
    precision: u8,
    scale: u8,
    values: Vec<i128>,
}

impl DecimalColumn {
    pub fn new(precision: u8, scale: u8) -> Self {
        Self {
            precision,
            scale,
            values: Vec::new(),
        }
    }

    fn type_name(&self) -> String {
        format!("Decimal({}, {})", self.precision, self.scale)
    }

    /// Bytes per value on the wire.
    pub fn width(&self) -> usize {
        match self.precision {
            0..=9 => 4,
            10..=18 => 8,
            19..=38 => 16,
            _ => 32,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[i128] {
        &self.values
    }

    pub fn push_default(&mut self) {
        self.values.push(0);
    }

    pub fn append(&mut self, value: &Value) -> ChResult<()> {
        let decimal = match value {
            Value::Decimal(d) => *d,
            Value::String(s) => s
                .parse::<Decimal>()
                .map_err(|e| ChError::mismatch("", self.type_name(), e.to_string()))?,
            Value::Int8(v) => Decimal::new(*v as i128, 0),
            Value::Int16(v) => Decimal::new(*v as i128, 0),
            Value::Int32(v) => Decimal::new(*v as i128, 0),
            Value::Int64(v) => Decimal::new(*v as i128, 0),
            Value::UInt8(v) => Decimal::new(*v as i128, 0),
            Value::UInt16(v) => Decimal::new(*v as i128, 0),
            Value::UInt32(v) => Decimal::new(*v as i128, 0),
            Value::UInt64(v) => Decimal::new(*v as i128, 0),
            other => {
                return Err(ChError::mismatch("", self.type_name(), other.kind_name()));
            }
        };

        let overflow = || ChError::mismatch("", self.type_name(), format!("{} (overflow)", decimal));
        let mantissa = decimal
            .rescale(u32::from(self.scale))
            .ok_or_else(overflow)?
            .mantissa();
        let limit = pow10(u32::from(self.precision)).map_or(u128::MAX, i128::unsigned_abs);
        if mantissa.unsigned_abs() >= limit {
            return Err(overflow());
        }
        self.values.push(mantissa);
        Ok(())
    }

    pub fn value(&self, row: usize) -> Value {
        Value::Decimal(Decimal::new(self.values[row], u32::from(self.scale)))
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn truncate(&mut self, rows: usize) {
        self.values.truncate(rows);
    }

    pub fn extend(&mut self, other: &DecimalColumn) {
        self.values.extend_from_slice(&other.values);
    }

    pub fn key(&self, row: usize) -> Vec<u8> {
        self.values[row].to_le_bytes().to_vec()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let width = self.width();
        buf.reserve(self.values.len() * width);
        for v in &self.values {
            match width {
                4 => buf.put_i32_le(*v as i32),
                8 => buf.put_i64_le(*v as i64),
                16 => buf.put_i128_le(*v),
                _ => {
                    buf.put_i128_le(*v);
                    let fill = if *v < 0 { 0xff } else { 0x00 };
                    buf.put_bytes(fill, 16);
                }
            }
        }
    }

    pub fn decode(&mut self, r: &mut dyn WireRead, rows: usize) -> ChResult<()> {
        let width = self.width();
        let bytes = take_rows(r, rows, width)?;
        self.values.reserve(rows);
        for chunk in bytes.chunks_exact(width) {
            let v = match width {
                4 => i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as i128,
                8 => {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(chunk);
                    i64::from_le_bytes(raw) as i128
                }
                _ => {
                    let mut raw = [0u8; 16];
                    raw.copy_from_slice(&chunk[..16]);
                    let low = i128::from_le_bytes(raw);
                    if width == 32 {
                        let fill = if low < 0 { 0xff } else { 0x00 };
                        if chunk[16..].iter().any(|b| *b != fill) {
                            return Err(ChError::Decode(
                                "Decimal256 value exceeds the 128-bit range".to_string(),
                            ));
                        }
                    }
                    low
                }
            };
            self.values.push(v);
        }
        Ok(())
    }
}
