//! Compressed block frames.
//!
//! Frame layout:
//! ```text
//! [16 bytes CityHash128 checksum of everything after it]
//! [1 byte method] [u32 compressed size incl. 9-byte header] [u32 decompressed size]
//! [payload]
//! ```

use super::wire::{SliceReader, WireRead};
use crate::error::{ChError, ChResult};
use bytes::{BufMut, BytesMut};

/// Frames never carry more than this many decompressed bytes.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

const CHECKSUM_SIZE: usize = 16;
const HEADER_SIZE: usize = 9;
/// Guard against absurd sizes announced by a corrupted frame header.
const MAX_DECOMPRESSED_SIZE: usize = 1 << 30;

const METHOD_NONE: u8 = 0x02;
const METHOD_LZ4: u8 = 0x82;
const METHOD_ZSTD: u8 = 0x90;

const ZSTD_LEVEL: i32 = 1;

/// Block compression negotiated per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Lz4,
    Zstd,
}

impl Compression {
    pub fn is_enabled(self) -> bool {
        self != Compression::None
    }

    fn method_byte(self) -> u8 {
        match self {
            Compression::None => METHOD_NONE,
            Compression::Lz4 => METHOD_LZ4,
            Compression::Zstd => METHOD_ZSTD,
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = ChError;

    fn from_str(s: &str) -> ChResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" | "false" | "0" => Ok(Compression::None),
            "lz4" | "true" | "1" => Ok(Compression::Lz4),
            "zstd" => Ok(Compression::Zstd),
            other => Err(ChError::Compression(format!(
                "unknown compression method '{}'",
                other
            ))),
        }
    }
}

fn checksum(data: &[u8]) -> [u8; CHECKSUM_SIZE] {
    cityhash_rs::cityhash_102_128(data)
        .rotate_right(64)
        .to_le_bytes()
}

/// Compress `data` into one or more frames appended to `out`.
pub fn compress(data: &[u8], method: Compression, out: &mut BytesMut) -> ChResult<()> {
    for chunk in data.chunks(MAX_FRAME_SIZE) {
        let payload = match method {
            Compression::None => chunk.to_vec(),
            Compression::Lz4 => lz4_flex::block::compress(chunk),
            Compression::Zstd => zstd::bulk::compress(chunk, ZSTD_LEVEL)
                .map_err(|e| ChError::Compression(format!("zstd: {}", e)))?,
        };

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.put_u8(method.method_byte());
        frame.put_u32_le((HEADER_SIZE + payload.len()) as u32);
        frame.put_u32_le(chunk.len() as u32);
        frame.extend_from_slice(&payload);

        out.put_slice(&checksum(&frame));
        out.put_slice(&frame);
    }
    Ok(())
}

/// Read and decompress a single frame from `r`.
pub fn read_frame(r: &mut dyn WireRead) -> ChResult<Vec<u8>> {
    let mut expected = [0u8; CHECKSUM_SIZE];
    expected.copy_from_slice(r.take(CHECKSUM_SIZE)?);

    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(r.take(HEADER_SIZE)?);
    let method = header[0];
    let compressed_size = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let decompressed_size =
        u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize;

    if compressed_size < HEADER_SIZE {
        return Err(ChError::Compression(format!(
            "frame size {} is smaller than its header",
            compressed_size
        )));
    }
    if decompressed_size > MAX_DECOMPRESSED_SIZE {
        return Err(ChError::Compression(format!(
            "frame announces {} decompressed bytes",
            decompressed_size
        )));
    }

    let payload = r.take(compressed_size - HEADER_SIZE)?;

    let mut hashed = Vec::with_capacity(compressed_size);
    hashed.extend_from_slice(&header);
    hashed.extend_from_slice(payload);
    if checksum(&hashed) != expected {
        return Err(ChError::ChecksumMismatch);
    }

    let data = match method {
        METHOD_NONE => payload.to_vec(),
        METHOD_LZ4 => lz4_flex::block::decompress(payload, decompressed_size)
            .map_err(|e| ChError::Compression(format!("lz4: {}", e)))?,
        METHOD_ZSTD => zstd::bulk::decompress(payload, decompressed_size)
            .map_err(|e| ChError::Compression(format!("zstd: {}", e)))?,
        other => {
            return Err(ChError::Compression(format!(
                "unknown method byte 0x{:02x}",
                other
            )));
        }
    };

    if data.len() != decompressed_size {
        return Err(ChError::Compression(format!(
            "frame decompressed to {} bytes, header says {}",
            data.len(),
            decompressed_size
        )));
    }
    Ok(data)
}

/// Reads a compressed stream frame by frame, exposing the decompressed bytes.
///
/// Values may straddle frame boundaries, so consumed bytes are dropped and the
/// next frame is appended whenever a `take` runs past the current buffer.
pub struct CompressedReader<'r, 'a> {
    raw: &'r mut SliceReader<'a>,
    buf: Vec<u8>,
    pos: usize,
}

impl<'r, 'a> CompressedReader<'r, 'a> {
    pub fn new(raw: &'r mut SliceReader<'a>) -> Self {
        Self {
            raw,
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Decompressed bytes that were read from the wire but not consumed.
    pub fn leftover(&self) -> usize {
        self.buf.len() - self.pos
    }
}

impl WireRead for CompressedReader<'_, '_> {
    fn take(&mut self, n: usize) -> ChResult<&[u8]> {
        while self.buf.len() - self.pos < n {
            let frame = read_frame(&mut *self.raw)?;
            if frame.is_empty() {
                return Err(ChError::Compression("empty frame".to_string()));
            }
            self.buf.drain(..self.pos);
            self.pos = 0;
            self.buf.extend_from_slice(&frame);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
}
