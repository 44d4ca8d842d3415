//! `Variant(T1, ..., Tn)`: a `UInt8` discriminator per row (255 = NULL) and
//! one child column per alternative holding only the rows of that type.

use super::Column;
use crate::error::{ChError, ChResult};
use crate::protocol::types::ColumnType;
use crate::protocol::wire::{WireRead, take_rows};
use crate::types::Value;
use bytes::{BufMut, BytesMut};

pub const NULL_DISCRIMINATOR: u8 = 255;

const BASIC_MODE: u64 = 0;

#[derive(Debug, Clone)]
pub struct VariantColumn {
    variants: Vec<Column>,
    discriminators: Vec<u8>,
    /// Row position inside the selected variant column.
    positions: Vec<usize>,
}

impl VariantColumn {
    pub fn new(types: &[ColumnType]) -> Self {
        Self {
            variants: types.iter().cloned().map(Column::new).collect(),
            discriminators: Vec::new(),
            positions: Vec::new(),
        }
    }

    pub fn variants(&self) -> &[Column] {
        &self.variants
    }

    pub fn discriminators(&self) -> &[u8] {
        &self.discriminators
    }

    pub fn len(&self) -> usize {
        self.discriminators.len()
    }

    fn type_name(&self) -> String {
        let inner: Vec<String> = self
            .variants
            .iter()
            .map(|v| v.column_type().to_string())
            .collect();
        format!("Variant({})", inner.join(", "))
    }

    fn push_null(&mut self) {
        self.discriminators.push(NULL_DISCRIMINATOR);
        self.positions.push(0);
    }

    fn push_into(&mut self, slot: usize, value: &Value) -> ChResult<()> {
        let position = self.variants[slot].len();
        self.variants[slot].append(value)?;
        self.discriminators.push(slot as u8);
        self.positions.push(position);
        Ok(())
    }

    /// Explicitly typed values go to their alternative. Otherwise the value's
    /// natural type picks the alternative, then the first one that accepts it.
    pub fn append(&mut self, value: &Value) -> ChResult<()> {
        if value.is_null() {
            self.push_null();
            return Ok(());
        }

        if let Value::Typed { ty, value: inner } = value {
            let slot = self
                .variants
                .iter()
                .position(|v| v.column_type() == ty)
                .ok_or_else(|| ChError::mismatch("", self.type_name(), ty.to_string()))?;
            return self.push_into(slot, inner);
        }

        let exact = value
            .infer_type()
            .and_then(|ty| self.variants.iter().position(|v| *v.column_type() == ty));
        if let Some(slot) = exact {
            return self.push_into(slot, value);
        }

        for slot in 0..self.variants.len() {
            if self.push_into(slot, value).is_ok() {
                return Ok(());
            }
        }
        Err(ChError::mismatch("", self.type_name(), value.kind_name()))
    }

    pub fn push_default(&mut self) {
        self.push_null();
    }

    pub fn value(&self, row: usize) -> ChResult<Value> {
        match self.discriminators[row] {
            NULL_DISCRIMINATOR => Ok(Value::Null),
            d => self.variants[d as usize].value(self.positions[row]),
        }
    }

    pub fn clear(&mut self) {
        self.discriminators.clear();
        self.positions.clear();
        for v in &mut self.variants {
            v.clear();
        }
    }

    pub fn truncate(&mut self, rows: usize) {
        self.discriminators.truncate(rows);
        self.positions.truncate(rows);
        let mut counts = vec![0usize; self.variants.len()];
        for d in &self.discriminators {
            if *d != NULL_DISCRIMINATOR {
                counts[*d as usize] += 1;
            }
        }
        for (v, count) in self.variants.iter_mut().zip(counts) {
            v.truncate(count);
        }
    }

    pub fn extend(&mut self, other: &VariantColumn) -> ChResult<()> {
        if other.variants.len() != self.variants.len() {
            return Err(ChError::mismatch("", self.type_name(), other.type_name()));
        }
        let bases: Vec<usize> = self.variants.iter().map(|v| v.len()).collect();
        for (v, src) in self.variants.iter_mut().zip(&other.variants) {
            v.extend_from(src)?;
        }
        for (d, p) in other.discriminators.iter().zip(&other.positions) {
            self.discriminators.push(*d);
            self.positions.push(match *d {
                NULL_DISCRIMINATOR => 0,
                d => bases[d as usize] + p,
            });
        }
        Ok(())
    }

    pub fn key(&self, row: usize) -> Vec<u8> {
        let d = self.discriminators[row];
        let mut key = vec![d];
        if d != NULL_DISCRIMINATOR {
            key.extend(self.variants[d as usize].row_key(self.positions[row]));
        }
        key
    }

    pub fn encode_prefix(&self, buf: &mut BytesMut) {
        buf.put_u64_le(BASIC_MODE);
        for v in &self.variants {
            v.encode_prefix(buf);
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.discriminators);
        for v in &self.variants {
            v.encode_data(buf);
        }
    }

    pub fn decode_prefix(&mut self, r: &mut dyn WireRead) -> ChResult<()> {
        let mode = r.read_u64_le()?;
        if mode != BASIC_MODE {
            return Err(ChError::Decode(format!(
                "unsupported Variant discriminators mode {}",
                mode
            )));
        }
        for v in &mut self.variants {
            v.decode_prefix(r)?;
        }
        Ok(())
    }

    pub fn decode(&mut self, r: &mut dyn WireRead, rows: usize) -> ChResult<()> {
        let raw = take_rows(r, rows, 1)?.to_vec();
        let mut counts: Vec<usize> = self.variants.iter().map(|v| v.len()).collect();
        let mut added = vec![0usize; self.variants.len()];
        for d in &raw {
            match *d {
                NULL_DISCRIMINATOR => self.positions.push(0),
                d if (d as usize) < self.variants.len() => {
                    let slot = d as usize;
                    self.positions.push(counts[slot]);
                    counts[slot] += 1;
                    added[slot] += 1;
                }
                d => {
                    return Err(ChError::Decode(format!(
                        "discriminator {} outside {} variants",
                        d,
                        self.variants.len()
                    )));
                }
            }
        }
        self.discriminators.extend_from_slice(&raw);
        for (v, n) in self.variants.iter_mut().zip(added) {
            v.decode_data(r, n)?;
        }
        Ok(())
    }
}
