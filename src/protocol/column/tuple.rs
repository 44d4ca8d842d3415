//! `Tuple(T1, ..., Tn)`: one child column per element, written in order.

use super::Column;
use crate::error::{ChError, ChResult};
use crate::protocol::wire::WireRead;
use crate::types::Value;
use bytes::BytesMut;

#[derive(Debug, Clone)]
pub struct TupleColumn {
    fields: Vec<Column>,
    names: Vec<Option<String>>,
    rows: usize,
}

impl TupleColumn {
    pub fn new(fields: Vec<(Option<String>, Column)>) -> Self {
        let (names, fields) = fields.into_iter().unzip();
        Self {
            fields,
            names,
            rows: 0,
        }
    }

    pub fn fields(&self) -> &[Column] {
        &self.fields
    }

    pub fn names(&self) -> &[Option<String>] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    fn type_name(&self) -> String {
        let inner: Vec<String> = self.fields.iter().map(|f| f.column_type().to_string()).collect();
        format!("Tuple({})", inner.join(", "))
    }

    pub fn append(&mut self, value: &Value) -> ChResult<()> {
        let items = match value {
            Value::Tuple(items) => items,
            other => return Err(ChError::mismatch("", self.type_name(), other.kind_name())),
        };
        if items.len() != self.fields.len() {
            return Err(ChError::mismatch(
                "",
                self.type_name(),
                format!("Tuple of {} elements", items.len()),
            ));
        }
        for (i, item) in items.iter().enumerate() {
            if let Err(e) = self.fields[i].append(item) {
                for field in &mut self.fields[..i] {
                    field.truncate(self.rows);
                }
                return Err(e);
            }
        }
        self.rows += 1;
        Ok(())
    }

    pub fn push_default(&mut self) {
        for field in &mut self.fields {
            field.append_default();
        }
        self.rows += 1;
    }

    pub fn value(&self, row: usize) -> ChResult<Value> {
        let items = self
            .fields
            .iter()
            .map(|f| f.value(row))
            .collect::<ChResult<Vec<_>>>()?;
        Ok(Value::Tuple(items))
    }

    pub fn clear(&mut self) {
        for field in &mut self.fields {
            field.clear();
        }
        self.rows = 0;
    }

    pub fn truncate(&mut self, rows: usize) {
        for field in &mut self.fields {
            field.truncate(rows);
        }
        self.rows = self.rows.min(rows);
    }

    pub fn extend(&mut self, other: &TupleColumn) -> ChResult<()> {
        if other.fields.len() != self.fields.len() {
            return Err(ChError::mismatch("", self.type_name(), other.type_name()));
        }
        for (field, src) in self.fields.iter_mut().zip(&other.fields) {
            field.extend_from(src)?;
        }
        self.rows += other.rows;
        Ok(())
    }

    pub fn key(&self, row: usize) -> Vec<u8> {
        let mut key = Vec::new();
        for field in &self.fields {
            let item = field.row_key(row);
            key.extend((item.len() as u64).to_le_bytes());
            key.extend(item);
        }
        key
    }

    pub fn encode_prefix(&self, buf: &mut BytesMut) {
        for field in &self.fields {
            field.encode_prefix(buf);
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        for field in &self.fields {
            field.encode_data(buf);
        }
    }

    pub fn decode_prefix(&mut self, r: &mut dyn WireRead) -> ChResult<()> {
        for field in &mut self.fields {
            field.decode_prefix(r)?;
        }
        Ok(())
    }

    pub fn decode(&mut self, r: &mut dyn WireRead, rows: usize) -> ChResult<()> {
        for field in &mut self.fields {
            field.decode_data(r, rows)?;
        }
        self.rows += rows;
        Ok(())
    }
}
