//! Incremental server packet decoding over a growing read buffer.
//!
//! `ServerPacket::decode` starts from scratch on every call. The connection
//! instead keeps a `ServerDecoder`, which
//! - does not retry until the buffer reaches the length the previous
//!   attempt stopped at, and
//! - for compressed blocks, decompresses each frame once as it arrives and
//!   keeps the decompressed bytes between calls.

use super::block::Block;
use super::compression::read_frame;
use super::packet::{ServerPacket, server_code};
use super::wire::{SliceReader, WireRead};
use crate::error::{ChError, ChResult};
use bytes::{Buf, BytesMut};

/// A compressed block whose frames are still arriving.
#[derive(Debug)]
struct PendingBlock {
    code: u64,
    plain: Vec<u8>,
    /// Decompressed length needed before the next decode attempt.
    want: usize,
}

#[derive(Debug, Default)]
pub struct ServerDecoder {
    compressed: bool,
    /// Buffered length needed before the next attempt.
    want: usize,
    pending: Option<PendingBlock>,
}

impl ServerDecoder {
    pub fn new(compressed: bool) -> Self {
        Self {
            compressed,
            want: 0,
            pending: None,
        }
    }

    /// Decode the next packet from the front of `buf`, consuming its bytes.
    /// `Ok(None)` means more input is needed.
    pub fn decode(&mut self, buf: &mut BytesMut, revision: u64) -> ChResult<Option<ServerPacket>> {
        if buf.is_empty() || buf.len() < self.want {
            return Ok(None);
        }
        self.want = 0;

        if self.pending.is_none() && self.compressed {
            let mut r = SliceReader::new(&buf[..]);
            let code = match r.read_uvarint() {
                Ok(code) => code,
                Err(ChError::Incomplete) => return self.incomplete(r.wanted()),
                Err(e) => return Err(e),
            };
            if matches!(
                code,
                server_code::DATA | server_code::TOTALS | server_code::EXTREMES
            ) {
                // Temporary table name, outside the frames.
                match r.read_string() {
                    Ok(_) => {}
                    Err(ChError::Incomplete) => return self.incomplete(r.wanted()),
                    Err(e) => return Err(e),
                }
                let header = r.position();
                buf.advance(header);
                self.pending = Some(PendingBlock {
                    code,
                    plain: Vec::new(),
                    want: 0,
                });
            }
        }

        if self.pending.is_some() {
            return self.decode_frames(buf, revision);
        }

        let mut r = SliceReader::new(&buf[..]);
        match ServerPacket::decode_from(&mut r, revision, self.compressed) {
            Ok(packet) => {
                let used = r.position();
                buf.advance(used);
                Ok(Some(packet))
            }
            Err(ChError::Incomplete) => self.incomplete(r.wanted()),
            Err(e) => Err(e),
        }
    }

    fn incomplete(&mut self, want: usize) -> ChResult<Option<ServerPacket>> {
        self.want = want;
        Ok(None)
    }

    /// Move complete frames from `buf` into the pending block and decode it
    /// once enough bytes are staged.
    fn decode_frames(
        &mut self,
        buf: &mut BytesMut,
        revision: u64,
    ) -> ChResult<Option<ServerPacket>> {
        let Some(mut pending) = self.pending.take() else {
            return Ok(None);
        };

        loop {
            if !pending.plain.is_empty() && pending.plain.len() >= pending.want {
                let mut r = SliceReader::new(&pending.plain);
                match Block::decode(&mut r, revision) {
                    Ok(block) => {
                        if !r.is_empty() {
                            return Err(ChError::Protocol(format!(
                                "{} bytes left in compressed frame after block",
                                r.remaining()
                            )));
                        }
                        return Ok(Some(match pending.code {
                            server_code::TOTALS => ServerPacket::Totals(block),
                            server_code::EXTREMES => ServerPacket::Extremes(block),
                            _ => ServerPacket::Data(block),
                        }));
                    }
                    Err(ChError::Incomplete) => pending.want = r.wanted(),
                    Err(e) => return Err(e),
                }
            }

            let mut raw = SliceReader::new(&buf[..]);
            match read_frame(&mut raw) {
                Ok(frame) => {
                    if frame.is_empty() {
                        return Err(ChError::Compression("empty frame".to_string()));
                    }
                    let used = raw.position();
                    buf.advance(used);
                    pending.plain.extend_from_slice(&frame);
                }
                Err(ChError::Incomplete) => {
                    self.want = raw.wanted();
                    self.pending = Some(pending);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether a packet is partially decoded.
    pub fn is_mid_packet(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::compression::{Compression, MAX_FRAME_SIZE};
    use crate::protocol::types::ColumnType;
    use crate::protocol::CLIENT_REVISION;
    use crate::types::Value;
    use bytes::BufMut;

    fn big_block(rows: u64) -> Block {
        let mut block = Block::with_schema([("n", ColumnType::UInt64)]);
        for i in 0..rows {
            block.append_row(&[Value::UInt64(i * 7919)]).unwrap();
        }
        block
    }

    fn encoded(packets: &[ServerPacket], compression: Compression) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for p in packets {
            p.encode(&mut buf, CLIENT_REVISION, compression).unwrap();
        }
        buf.to_vec()
    }

    /// Feed `wire` in `chunk`-sized reads, collecting every packet.
    fn feed(wire: &[u8], chunk: usize, compressed: bool, max_buffered: &mut usize) -> Vec<ServerPacket> {
        let mut decoder = ServerDecoder::new(compressed);
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        for part in wire.chunks(chunk) {
            buf.put_slice(part);
            *max_buffered = (*max_buffered).max(buf.len());
            while let Some(packet) = decoder.decode(&mut buf, CLIENT_REVISION).unwrap() {
                out.push(packet);
            }
        }
        assert!(buf.is_empty());
        assert!(!decoder.is_mid_packet());
        out
    }

    #[test]
    fn test_multi_frame_block_in_small_reads() {
        // 2.4 MB of plain data: three frames.
        let rows = 300_000;
        let wire = encoded(
            &[
                ServerPacket::Data(big_block(rows)),
                ServerPacket::Totals(big_block(1)),
                ServerPacket::EndOfStream,
            ],
            Compression::Lz4,
        );
        assert!(rows as usize * 8 > 2 * MAX_FRAME_SIZE);

        let mut max_buffered = 0;
        let packets = feed(&wire, 64 * 1024, true, &mut max_buffered);
        assert_eq!(packets.len(), 3);
        match &packets[0] {
            ServerPacket::Data(block) => {
                assert_eq!(block.rows(), rows as usize);
                assert_eq!(
                    block.value(rows as usize - 1, 0).unwrap().unwrap(),
                    Value::UInt64((rows - 1) * 7919)
                );
            }
            other => panic!("unexpected {}", other.name()),
        }
        assert!(matches!(packets[1], ServerPacket::Totals(_)));
        assert!(matches!(packets[2], ServerPacket::EndOfStream));
        // Frames leave the read buffer as soon as they are complete.
        assert!(max_buffered < wire.len());
    }

    #[test]
    fn test_byte_at_a_time() {
        let wire = encoded(
            &[
                ServerPacket::Data(big_block(50)),
                ServerPacket::Pong,
                ServerPacket::EndOfStream,
            ],
            Compression::None,
        );
        let mut max_buffered = 0;
        let packets = feed(&wire, 1, false, &mut max_buffered);
        assert_eq!(packets.len(), 3);

        let wire = encoded(&[ServerPacket::Data(big_block(50))], Compression::Zstd);
        let packets = feed(&wire, 3, true, &mut max_buffered);
        assert!(matches!(&packets[..], [ServerPacket::Data(b)] if b.rows() == 50));
    }

    #[test]
    fn test_waits_for_the_missing_bytes() {
        let wire = encoded(&[ServerPacket::Data(big_block(1000))], Compression::None);
        let mut decoder = ServerDecoder::new(false);
        let mut buf = BytesMut::from(&wire[..100]);
        assert!(decoder.decode(&mut buf, CLIENT_REVISION).unwrap().is_none());
        // The column needs all 8000 bytes at once.
        assert!(decoder.want > 100);
        assert_eq!(buf.len(), 100);

        buf.put_slice(&wire[100..]);
        assert!(matches!(
            decoder.decode(&mut buf, CLIENT_REVISION).unwrap(),
            Some(ServerPacket::Data(_))
        ));
    }

    #[test]
    fn test_corrupted_frame() {
        let mut wire = encoded(&[ServerPacket::Data(big_block(100))], Compression::Lz4);
        let last = wire.len() - 1;
        wire[last] ^= 0xff;
        let mut decoder = ServerDecoder::new(true);
        let mut buf = BytesMut::from(&wire[..]);
        assert!(matches!(
            decoder.decode(&mut buf, CLIENT_REVISION),
            Err(ChError::ChecksumMismatch)
        ));
    }
}
