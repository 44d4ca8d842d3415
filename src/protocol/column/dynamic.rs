//! `Dynamic(max_types=N)` in the flattened serialization.
//!
//! ```text
//! prefix: UInt64 version = 3 | varuint type count | type names | per-type prefixes
//! data:   per-row type index (u8/u16/u32/u64, NULL = type count) | per-type columns
//! ```
//!
//! Rows remember the position of their type in `types`; the wire index is
//! only computed at encode time, so the index width can grow as types are
//! added.

use super::Column;
use crate::error::{ChError, ChResult};
use crate::protocol::types::ColumnType;
use crate::protocol::wire::{WireRead, WireWrite, take_rows};
use crate::types::Value;
use bytes::{BufMut, BytesMut};

const FLATTENED: u64 = 3;

const NULL_SLOT: u16 = u16::MAX;

/// Bytes per index for `types` observed types (plus one value for NULL).
pub(crate) fn index_width(types: usize) -> usize {
    let values = types.max(1) as u64 + 1;
    if values <= 1 << 8 {
        1
    } else if values <= 1 << 16 {
        2
    } else if values <= 1 << 32 {
        4
    } else {
        8
    }
}

#[derive(Debug, Clone)]
pub struct DynamicColumn {
    max_types: usize,
    types: Vec<ColumnType>,
    columns: Vec<Column>,
    slots: Vec<u16>,
    positions: Vec<usize>,
}

impl DynamicColumn {
    pub fn new(max_types: usize) -> Self {
        Self {
            max_types,
            types: Vec::new(),
            columns: Vec::new(),
            slots: Vec::new(),
            positions: Vec::new(),
        }
    }

    pub fn types(&self) -> &[ColumnType] {
        &self.types
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    fn push_null(&mut self) {
        self.slots.push(NULL_SLOT);
        self.positions.push(0);
    }

    fn slot_for(&mut self, ty: &ColumnType) -> usize {
        match self.types.iter().position(|t| t == ty) {
            Some(slot) => slot,
            None => {
                self.types.push(ty.clone());
                self.columns.push(Column::new(ty.clone()));
                self.types.len() - 1
            }
        }
    }

    fn push_into(&mut self, slot: usize, value: &Value) -> ChResult<()> {
        let position = self.columns[slot].len();
        self.columns[slot].append(value)?;
        self.slots.push(slot as u16);
        self.positions.push(position);
        Ok(())
    }

    /// Store under the value's explicit or inferred type. Once `max_types`
    /// distinct types exist, values of a new type are stored as `String`.
    pub fn append(&mut self, value: &Value) -> ChResult<()> {
        if value.is_null() {
            self.push_null();
            return Ok(());
        }
        let (ty, inner) = match value {
            Value::Typed { ty, value } => (ty.clone(), value.as_ref()),
            other => {
                let ty = other.infer_type().ok_or_else(|| {
                    ChError::mismatch("", "Dynamic", format!("{} (untyped)", other.kind_name()))
                })?;
                (ty, other)
            }
        };

        if self.types.contains(&ty) || self.types.len() < self.max_types {
            let known = self.types.len();
            let slot = self.slot_for(&ty);
            if let Err(e) = self.push_into(slot, inner) {
                if self.types.len() > known {
                    self.types.pop();
                    self.columns.pop();
                }
                return Err(e);
            }
            return Ok(());
        }

        let slot = self.slot_for(&ColumnType::String);
        self.push_into(slot, &Value::String(inner.to_text()))
    }

    pub fn push_default(&mut self) {
        self.push_null();
    }

    pub fn value(&self, row: usize) -> ChResult<Value> {
        match self.slots[row] {
            NULL_SLOT => Ok(Value::Null),
            slot => self.columns[slot as usize].value(self.positions[row]),
        }
    }

    /// Value wrapped with the type it is stored under.
    pub fn typed_value(&self, row: usize) -> ChResult<Value> {
        match self.slots[row] {
            NULL_SLOT => Ok(Value::Null),
            slot => Ok(Value::typed(
                self.types[slot as usize].clone(),
                self.columns[slot as usize].value(self.positions[row])?,
            )),
        }
    }

    pub fn clear(&mut self) {
        self.types.clear();
        self.columns.clear();
        self.slots.clear();
        self.positions.clear();
    }

    pub fn truncate(&mut self, rows: usize) {
        self.slots.truncate(rows);
        self.positions.truncate(rows);
        let mut counts = vec![0usize; self.columns.len()];
        for s in &self.slots {
            if *s != NULL_SLOT {
                counts[*s as usize] += 1;
            }
        }
        for (c, count) in self.columns.iter_mut().zip(&counts) {
            c.truncate(*count);
        }
        // Types introduced by the dropped rows give their slot back.
        let keep = counts.iter().rposition(|n| *n > 0).map_or(0, |last| last + 1);
        self.types.truncate(keep);
        self.columns.truncate(keep);
    }

    pub fn extend(&mut self, other: &DynamicColumn) -> ChResult<()> {
        for row in 0..other.len() {
            self.append(&other.typed_value(row)?)?;
        }
        Ok(())
    }

    pub fn key(&self, row: usize) -> Vec<u8> {
        match self.slots[row] {
            NULL_SLOT => vec![0],
            slot => {
                let mut key = vec![1];
                key.extend(self.types[slot as usize].to_string().into_bytes());
                key.push(0);
                key.extend(self.columns[slot as usize].row_key(self.positions[row]));
                key
            }
        }
    }

    pub fn encode_prefix(&self, buf: &mut BytesMut) {
        buf.put_u64_le(FLATTENED);
        buf.put_uvarint(self.types.len() as u64);
        for ty in &self.types {
            buf.put_str(&ty.to_string());
        }
        for c in &self.columns {
            c.encode_prefix(buf);
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let null = self.types.len() as u64;
        let width = index_width(self.types.len());
        for s in &self.slots {
            let index = if *s == NULL_SLOT { null } else { u64::from(*s) };
            match width {
                1 => buf.put_u8(index as u8),
                2 => buf.put_u16_le(index as u16),
                4 => buf.put_u32_le(index as u32),
                _ => buf.put_u64_le(index),
            }
        }
        for c in &self.columns {
            c.encode_data(buf);
        }
    }

    pub fn decode_prefix(&mut self, r: &mut dyn WireRead) -> ChResult<()> {
        let version = r.read_u64_le()?;
        if version != FLATTENED {
            return Err(ChError::Decode(format!(
                "unsupported Dynamic serialization version {} (only flattened is supported)",
                version
            )));
        }
        let count = r.read_uvarint()?;
        if count >= u64::from(NULL_SLOT) {
            return Err(ChError::Decode(format!("Dynamic announces {} types", count)));
        }
        self.clear();
        for _ in 0..count {
            let name = r.read_string()?;
            let ty = ColumnType::parse(&name)?;
            self.columns.push(Column::new(ty.clone()));
            self.types.push(ty);
        }
        for c in &mut self.columns {
            c.decode_prefix(r)?;
        }
        Ok(())
    }

    pub fn decode(&mut self, r: &mut dyn WireRead, rows: usize) -> ChResult<()> {
        let count = self.types.len();
        let width = index_width(count);
        let raw = take_rows(r, rows, width)?;
        let mut added = vec![0usize; count];
        let mut lens: Vec<usize> = self.columns.iter().map(|c| c.len()).collect();
        for chunk in raw.chunks_exact(width) {
            let mut bytes = [0u8; 8];
            bytes[..width].copy_from_slice(chunk);
            let index = u64::from_le_bytes(bytes);
            if index == count as u64 {
                self.slots.push(NULL_SLOT);
                self.positions.push(0);
            } else if index < count as u64 {
                let slot = index as usize;
                self.slots.push(slot as u16);
                self.positions.push(lens[slot]);
                lens[slot] += 1;
                added[slot] += 1;
            } else {
                return Err(ChError::Decode(format!(
                    "Dynamic index {} outside {} types",
                    index, count
                )));
            }
        }
        for (c, n) in self.columns.iter_mut().zip(added) {
            c.decode_data(r, n)?;
        }
        Ok(())
    }
}
