//! `Array(T)` and `Map(K, V)`: cumulative `UInt64` end offsets per row,
//! then the flattened elements.

use super::Column;
use super::numeric::decode_fixed;
use crate::error::{ChError, ChResult};
use crate::protocol::wire::WireRead;
use crate::types::Value;
use bytes::{BufMut, BytesMut};

fn encode_offsets(offsets: &[u64], buf: &mut BytesMut) {
    buf.reserve(offsets.len() * 8);
    for o in offsets {
        buf.put_u64_le(*o);
    }
}

/// Read `rows` offsets, check they never decrease, and return the element
/// count they announce.
fn decode_offsets(
    offsets: &mut Vec<u64>,
    r: &mut dyn WireRead,
    rows: usize,
) -> ChResult<usize> {
    let start = offsets.len();
    let mut previous = 0;
    decode_fixed(offsets, r, rows)?;
    for o in &offsets[start..] {
        if *o < previous {
            return Err(ChError::Decode(format!(
                "array offsets decrease ({} after {})",
                o, previous
            )));
        }
        previous = *o;
    }
    usize::try_from(previous)
        .map_err(|_| ChError::Decode(format!("array offset {} is too large", previous)))
}

/// Element range of a row.
fn bounds(offsets: &[u64], row: usize) -> (usize, usize) {
    let start = if row == 0 { 0 } else { offsets[row - 1] as usize };
    (start, offsets[row] as usize)
}

#[derive(Debug, Clone)]
pub struct ArrayColumn {
    /// End offset of each row, relative to this batch of rows.
    offsets: Vec<u64>,
    inner: Box<Column>,
}

impl ArrayColumn {
    pub fn new(inner: Column) -> Self {
        Self {
            offsets: Vec::new(),
            inner: Box::new(inner),
        }
    }

    pub fn inner(&self) -> &Column {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    fn end(&self) -> u64 {
        self.offsets.last().copied().unwrap_or(0)
    }

    pub fn append(&mut self, value: &Value) -> ChResult<()> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(ChError::mismatch(
                    "",
                    format!("Array({})", self.inner.column_type()),
                    other.kind_name(),
                ));
            }
        };
        let before = self.inner.len();
        for item in items {
            if let Err(e) = self.inner.append(item) {
                self.inner.truncate(before);
                return Err(e);
            }
        }
        self.offsets.push(self.inner.len() as u64);
        Ok(())
    }

    pub fn push_default(&mut self) {
        self.offsets.push(self.end());
    }

    pub fn value(&self, row: usize) -> ChResult<Value> {
        let (start, end) = bounds(&self.offsets, row);
        let items = (start..end)
            .map(|i| self.inner.value(i))
            .collect::<ChResult<Vec<_>>>()?;
        Ok(Value::Array(items))
    }

    pub fn clear(&mut self) {
        self.offsets.clear();
        self.inner.clear();
    }

    pub fn truncate(&mut self, rows: usize) {
        self.offsets.truncate(rows);
        self.inner.truncate(self.end() as usize);
    }

    pub fn extend(&mut self, other: &ArrayColumn) -> ChResult<()> {
        let base = self.inner.len() as u64;
        self.inner.extend_from(&other.inner)?;
        self.offsets.extend(other.offsets.iter().map(|o| o + base));
        Ok(())
    }

    pub fn key(&self, row: usize) -> Vec<u8> {
        let (start, end) = bounds(&self.offsets, row);
        let mut key = ((end - start) as u64).to_le_bytes().to_vec();
        for i in start..end {
            let item = self.inner.row_key(i);
            key.extend((item.len() as u64).to_le_bytes());
            key.extend(item);
        }
        key
    }

    pub fn encode_prefix(&self, buf: &mut BytesMut) {
        self.inner.encode_prefix(buf);
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        encode_offsets(&self.offsets, buf);
        self.inner.encode_data(buf);
    }

    pub fn decode_prefix(&mut self, r: &mut dyn WireRead) -> ChResult<()> {
        self.inner.decode_prefix(r)
    }

    pub fn decode(&mut self, r: &mut dyn WireRead, rows: usize) -> ChResult<()> {
        let base = self.inner.len() as u64;
        let mut offsets = Vec::with_capacity(rows.min(1 << 16));
        let elements = decode_offsets(&mut offsets, r, rows)?;
        self.inner.decode_data(r, elements)?;
        self.offsets.extend(offsets.into_iter().map(|o| o + base));
        Ok(())
    }
}

/// `Map(K, V)` stored as `Array(Tuple(K, V))`.
#[derive(Debug, Clone)]
pub struct MapColumn {
    offsets: Vec<u64>,
    keys: Box<Column>,
    values: Box<Column>,
}

impl MapColumn {
    pub fn new(keys: Column, values: Column) -> Self {
        Self {
            offsets: Vec::new(),
            keys: Box::new(keys),
            values: Box::new(values),
        }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    fn end(&self) -> u64 {
        self.offsets.last().copied().unwrap_or(0)
    }

    fn type_name(&self) -> String {
        format!(
            "Map({}, {})",
            self.keys.column_type(),
            self.values.column_type()
        )
    }

    pub fn append(&mut self, value: &Value) -> ChResult<()> {
        let pairs = match value {
            Value::Map(pairs) => pairs,
            other => return Err(ChError::mismatch("", self.type_name(), other.kind_name())),
        };
        let before = self.keys.len();
        for (k, v) in pairs {
            if let Err(e) = self.keys.append(k).and_then(|_| self.values.append(v)) {
                self.keys.truncate(before);
                self.values.truncate(before);
                return Err(e);
            }
        }
        self.offsets.push(self.keys.len() as u64);
        Ok(())
    }

    pub fn push_default(&mut self) {
        self.offsets.push(self.end());
    }

    pub fn value(&self, row: usize) -> ChResult<Value> {
        let (start, end) = bounds(&self.offsets, row);
        let pairs = (start..end)
            .map(|i| Ok((self.keys.value(i)?, self.values.value(i)?)))
            .collect::<ChResult<Vec<_>>>()?;
        Ok(Value::Map(pairs))
    }

    pub fn clear(&mut self) {
        self.offsets.clear();
        self.keys.clear();
        self.values.clear();
    }

    pub fn truncate(&mut self, rows: usize) {
        self.offsets.truncate(rows);
        let end = self.end() as usize;
        self.keys.truncate(end);
        self.values.truncate(end);
    }

    pub fn extend(&mut self, other: &MapColumn) -> ChResult<()> {
        let base = self.keys.len() as u64;
        self.keys.extend_from(&other.keys)?;
        self.values.extend_from(&other.values)?;
        self.offsets.extend(other.offsets.iter().map(|o| o + base));
        Ok(())
    }

    pub fn encode_prefix(&self, buf: &mut BytesMut) {
        self.keys.encode_prefix(buf);
        self.values.encode_prefix(buf);
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        encode_offsets(&self.offsets, buf);
        self.keys.encode_data(buf);
        self.values.encode_data(buf);
    }

    pub fn decode_prefix(&mut self, r: &mut dyn WireRead) -> ChResult<()> {
        self.keys.decode_prefix(r)?;
        self.values.decode_prefix(r)
    }

    pub fn decode(&mut self, r: &mut dyn WireRead, rows: usize) -> ChResult<()> {
        let base = self.keys.len() as u64;
        let mut offsets = Vec::with_capacity(rows.min(1 << 16));
        let elements = decode_offsets(&mut offsets, r, rows)?;
        self.keys.decode_data(r, elements)?;
        self.values.decode_data(r, elements)?;
        self.offsets.extend(offsets.into_iter().map(|o| o + base));
        Ok(())
    }
}
