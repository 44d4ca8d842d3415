//! Primitive wire values of the ClickHouse native protocol.
//!
//! All fixed-width integers are little-endian. Lengths and packet codes are
//! LEB128 varints. Strings are a varint length followed by raw bytes.
//!
//! Readers return `ChError::Incomplete` when they run out of input, which
//! lets the connection read more bytes from the socket and retry.

use crate::error::{ChError, ChResult};
use bytes::{BufMut, BytesMut};

/// Upper bound for a single length-prefixed string (1 GiB).
const MAX_STRING_LEN: u64 = 1 << 30;

/// A source of wire bytes.
pub trait WireRead {
    /// Take exactly `n` bytes or fail with `Incomplete`.
    fn take(&mut self, n: usize) -> ChResult<&[u8]>;

    fn read_u8(&mut self) -> ChResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_bool(&mut self) -> ChResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_u16_le(&mut self) -> ChResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32_le(&mut self) -> ChResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i32_le(&mut self) -> ChResult<i32> {
        Ok(self.read_u32_le()? as i32)
    }

    fn read_u64_le(&mut self) -> ChResult<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    fn read_i64_le(&mut self) -> ChResult<i64> {
        Ok(self.read_u64_le()? as i64)
    }

    fn read_uvarint(&mut self) -> ChResult<u64> {
        let mut value = 0u64;
        for i in 0..10 {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ChError::Protocol("varint is longer than 10 bytes".to_string()))
    }

    fn read_blob(&mut self) -> ChResult<Vec<u8>> {
        let len = self.read_uvarint()?;
        if len > MAX_STRING_LEN {
            return Err(ChError::Protocol(format!("string length {} is too large", len)));
        }
        Ok(self.take(len as usize)?.to_vec())
    }

    fn read_string(&mut self) -> ChResult<String> {
        let bytes = self.read_blob()?;
        String::from_utf8(bytes).map_err(|e| ChError::Protocol(format!("Invalid UTF-8: {}", e)))
    }
}

/// Reader over an in-memory buffer.
pub struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
    wanted: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            wanted: 0,
        }
    }

    /// Input length the last failed `take` needed. A retry over fewer bytes
    /// fails at the same place.
    pub fn wanted(&self) -> usize {
        self.wanted
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

impl WireRead for SliceReader<'_> {
    fn take(&mut self, n: usize) -> ChResult<&[u8]> {
        let Some(end) = self.pos.checked_add(n) else {
            self.wanted = usize::MAX;
            return Err(ChError::Incomplete);
        };
        if end > self.buf.len() {
            self.wanted = end;
            return Err(ChError::Incomplete);
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }
}

/// Writer helpers on top of `BufMut`.
pub trait WireWrite: BufMut {
    fn put_uvarint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.put_u8((value as u8) | 0x80);
            value >>= 7;
        }
        self.put_u8(value as u8);
    }

    fn put_blob(&mut self, bytes: &[u8]) {
        self.put_uvarint(bytes.len() as u64);
        self.put_slice(bytes);
    }

    fn put_str(&mut self, s: &str) {
        self.put_blob(s.as_bytes());
    }

    fn put_bool(&mut self, v: bool) {
        self.put_u8(u8::from(v));
    }
}

impl WireWrite for BytesMut {}
impl WireWrite for Vec<u8> {}

/// `take` for a byte count computed from untrusted row counts.
pub(crate) fn take_rows<'r>(
    r: &'r mut dyn WireRead,
    rows: usize,
    width: usize,
) -> ChResult<&'r [u8]> {
    let len = rows
        .checked_mul(width)
        .ok_or_else(|| ChError::Protocol(format!("row count {} overflows", rows)))?;
    r.take(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uvarint_boundaries() {
        for value in [0u64, 1, 127, 128, 300, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = BytesMut::new();
            buf.put_uvarint(value);
            let mut r = SliceReader::new(&buf);
            assert_eq!(r.read_uvarint().unwrap(), value);
            assert!(r.is_empty());
        }

        let mut buf = BytesMut::new();
        buf.put_uvarint(300);
        assert_eq!(&buf[..], &[0xac, 0x02]);
    }

    #[test]
    fn test_string_prefix() {
        let mut buf = BytesMut::new();
        buf.put_str("hello");
        assert_eq!(&buf[..], b"\x05hello");
        let mut r = SliceReader::new(&buf);
        assert_eq!(r.read_string().unwrap(), "hello");
    }

    #[test]
    fn test_incomplete() {
        let mut r = SliceReader::new(&[0x05, b'h', b'e']);
        assert!(matches!(r.read_string(), Err(ChError::Incomplete)));
        assert_eq!(r.wanted(), 6);

        let mut r = SliceReader::new(&[0x80]);
        assert!(matches!(r.read_uvarint(), Err(ChError::Incomplete)));
        assert_eq!(r.wanted(), 2);
    }

    #[test]
    fn test_fixed_width_little_endian() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(0x0102_0304);
        buf.put_i64_le(-2);
        assert_eq!(&buf[..4], &[4, 3, 2, 1]);
        let mut r = SliceReader::new(&buf);
        assert_eq!(r.read_u32_le().unwrap(), 0x0102_0304);
        assert_eq!(r.read_i64_le().unwrap(), -2);
    }
}
