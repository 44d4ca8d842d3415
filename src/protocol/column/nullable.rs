//! `Nullable(T)`: a byte per row (1 = NULL) followed by the inner column.
//! NULL rows still occupy a default slot in the inner column.

use super::Column;
use crate::error::ChResult;
use crate::protocol::wire::{WireRead, take_rows};
use crate::types::Value;
use bytes::{BufMut, BytesMut};

#[derive(Debug, Clone)]
pub struct NullableColumn {
    nulls: Vec<u8>,
    inner: Box<Column>,
}

impl NullableColumn {
    pub fn new(inner: Column) -> Self {
        Self {
            nulls: Vec::new(),
            inner: Box::new(inner),
        }
    }

    pub fn inner(&self) -> &Column {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.nulls.len()
    }

    pub fn is_null(&self, row: usize) -> bool {
        self.nulls[row] != 0
    }

    pub fn append(&mut self, value: &Value) -> ChResult<()> {
        if value.is_null() {
            self.push_null();
        } else {
            self.inner.append(value)?;
            self.nulls.push(0);
        }
        Ok(())
    }

    pub fn push_null(&mut self) {
        self.inner.append_default();
        self.nulls.push(1);
    }

    pub fn value(&self, row: usize) -> ChResult<Value> {
        if self.is_null(row) {
            Ok(Value::Null)
        } else {
            self.inner.value(row)
        }
    }

    pub fn clear(&mut self) {
        self.nulls.clear();
        self.inner.clear();
    }

    pub fn truncate(&mut self, rows: usize) {
        self.nulls.truncate(rows);
        self.inner.truncate(rows);
    }

    pub fn extend(&mut self, other: &NullableColumn) -> ChResult<()> {
        self.inner.extend_from(&other.inner)?;
        self.nulls.extend_from_slice(&other.nulls);
        Ok(())
    }

    pub fn key(&self, row: usize) -> Vec<u8> {
        if self.is_null(row) {
            vec![1]
        } else {
            let mut key = vec![0];
            key.extend(self.inner.row_key(row));
            key
        }
    }

    pub fn encode_prefix(&self, buf: &mut BytesMut) {
        self.inner.encode_prefix(buf);
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.nulls);
        self.inner.encode_data(buf);
    }

    pub fn decode_prefix(&mut self, r: &mut dyn WireRead) -> ChResult<()> {
        self.inner.decode_prefix(r)
    }

    pub fn decode(&mut self, r: &mut dyn WireRead, rows: usize) -> ChResult<()> {
        let nulls = take_rows(r, rows, 1)?;
        self.nulls.extend_from_slice(nulls);
        self.inner.decode_data(r, rows)
    }
}
