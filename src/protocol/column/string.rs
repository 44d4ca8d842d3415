//! `String` and `FixedString(N)` storage.

use crate::error::{ChError, ChResult};
use crate::protocol::wire::{WireRead, WireWrite, take_rows};
use crate::types::Value;
use bytes::{BufMut, BytesMut};

const MAX_VALUE_LEN: u64 = 1 << 30;

/// Variable-length byte strings packed into one buffer.
#[derive(Debug, Clone, Default)]
pub struct StringColumn {
    data: Vec<u8>,
    /// End offset of each row in `data`.
    ends: Vec<usize>,
}

impl StringColumn {
    pub fn len(&self) -> usize {
        self.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        self.ends.push(self.data.len());
    }

    pub fn get(&self, row: usize) -> &[u8] {
        let start = if row == 0 { 0 } else { self.ends[row - 1] };
        &self.data[start..self.ends[row]]
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.ends.clear();
    }

    pub fn truncate(&mut self, rows: usize) {
        if rows >= self.len() {
            return;
        }
        let end = if rows == 0 { 0 } else { self.ends[rows - 1] };
        self.ends.truncate(rows);
        self.data.truncate(end);
    }

    pub fn extend(&mut self, other: &StringColumn) {
        let base = self.data.len();
        self.data.extend_from_slice(&other.data);
        self.ends.extend(other.ends.iter().map(|e| e + base));
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.data.len() + self.len());
        for row in 0..self.len() {
            buf.put_blob(self.get(row));
        }
    }

    pub fn decode(&mut self, r: &mut dyn WireRead, rows: usize) -> ChResult<()> {
        for _ in 0..rows {
            let len = r.read_uvarint()?;
            if len > MAX_VALUE_LEN {
                return Err(ChError::Protocol(format!("string length {} is too large", len)));
            }
            let bytes = r.take(len as usize)?;
            self.push(bytes);
        }
        Ok(())
    }

    pub fn value(&self, row: usize) -> Value {
        bytes_value(self.get(row))
    }
}

/// UTF-8 strings decode to `Value::String`, anything else to `Value::Bytes`.
pub(crate) fn bytes_value(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(s) => Value::String(s.to_string()),
        Err(_) => Value::Bytes(bytes.to_vec()),
    }
}

pub(crate) fn string_bytes(value: &Value) -> Option<&[u8]> {
    match value {
        Value::String(s) => Some(s.as_bytes()),
        Value::Bytes(b) => Some(b),
        _ => None,
    }
}

/// Strings of exactly `n` bytes, zero padded.
#[derive(Debug, Clone)]
pub struct FixedStringColumn {
    n: usize,
    data: Vec<u8>,
}

impl FixedStringColumn {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            data: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.n
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.n
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append, padding short input with zero bytes.
    pub fn push(&mut self, bytes: &[u8]) -> ChResult<()> {
        if bytes.len() > self.n {
            return Err(ChError::mismatch(
                "",
                format!("FixedString({})", self.n),
                format!("{} bytes", bytes.len()),
            ));
        }
        self.data.extend_from_slice(bytes);
        self.data.resize(self.data.len() + self.n - bytes.len(), 0);
        Ok(())
    }

    pub fn get(&self, row: usize) -> &[u8] {
        &self.data[row * self.n..(row + 1) * self.n]
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn truncate(&mut self, rows: usize) {
        self.data.truncate(rows * self.n);
    }

    pub fn extend(&mut self, other: &FixedStringColumn) {
        self.data.extend_from_slice(&other.data);
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.data);
    }

    pub fn decode(&mut self, r: &mut dyn WireRead, rows: usize) -> ChResult<()> {
        let bytes = take_rows(r, rows, self.n)?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn value(&self, row: usize) -> Value {
        bytes_value(self.get(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire::SliceReader;

    #[test]
    fn test_string_wire_format() {
        let mut col = StringColumn::default();
        col.push(b"ab");
        col.push(b"");
        col.push(&[0xff, 0xfe]);
        let mut buf = BytesMut::new();
        col.encode(&mut buf);
        assert_eq!(&buf[..], &[2, b'a', b'b', 0, 2, 0xff, 0xfe]);

        let mut back = StringColumn::default();
        back.decode(&mut SliceReader::new(&buf), 3).unwrap();
        assert_eq!(back.value(0), Value::String("ab".into()));
        assert_eq!(back.value(1), Value::String(String::new()));
        assert_eq!(back.value(2), Value::Bytes(vec![0xff, 0xfe]));
    }

    #[test]
    fn test_string_truncate() {
        let mut col = StringColumn::default();
        col.push(b"one");
        col.push(b"two");
        col.truncate(1);
        col.push(b"three");
        assert_eq!(col.get(1), b"three");
        assert_eq!(col.len(), 2);
    }

    #[test]
    fn test_fixed_string_padding() {
        let mut col = FixedStringColumn::new(4);
        col.push(b"ab").unwrap();
        assert_eq!(col.get(0), b"ab\0\0");
        assert!(col.push(b"abcde").is_err());
        assert_eq!(col.len(), 1);
    }
}
