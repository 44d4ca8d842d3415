//! Native protocol packets, both directions.
//!
//! Every packet starts with a varuint code. Data-carrying packets hold a
//! temporary table name followed by a block; when compression is enabled
//! for the query the block travels as a sequence of compressed frames.
//! `Log` and `ProfileEvents` blocks are never compressed.

use super::block::Block;
use super::compression::{Compression, CompressedReader, compress};
use super::wire::{SliceReader, WireRead, WireWrite};
use super::*;
use crate::error::{ChError, ChResult, ServerException};
use bytes::{BufMut, BytesMut};

/// Nested exceptions deeper than this are treated as a corrupted stream.
const MAX_EXCEPTION_DEPTH: usize = 32;

pub mod client_code {
    pub const HELLO: u64 = 0;
    pub const QUERY: u64 = 1;
    pub const DATA: u64 = 2;
    pub const CANCEL: u64 = 3;
    pub const PING: u64 = 4;
}

pub mod server_code {
    pub const HELLO: u64 = 0;
    pub const DATA: u64 = 1;
    pub const EXCEPTION: u64 = 2;
    pub const PROGRESS: u64 = 3;
    pub const PONG: u64 = 4;
    pub const END_OF_STREAM: u64 = 5;
    pub const PROFILE_INFO: u64 = 6;
    pub const TOTALS: u64 = 7;
    pub const EXTREMES: u64 = 8;
    pub const LOG: u64 = 10;
    pub const TABLE_COLUMNS: u64 = 11;
    pub const PROFILE_EVENTS: u64 = 14;
}

/// Setting flag marking a value the server must not silently ignore.
const SETTING_IMPORTANT: u64 = 0x01;
/// Setting flag for user-defined settings and query parameters.
const SETTING_CUSTOM: u64 = 0x02;

/// Processing stage requested from the server.
const STAGE_COMPLETE: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_name: String,
    pub version_major: u64,
    pub version_minor: u64,
    pub revision: u64,
    pub database: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerHello {
    pub name: String,
    pub version_major: u64,
    pub version_minor: u64,
    pub revision: u64,
    pub timezone: String,
    pub display_name: String,
    pub version_patch: u64,
}

impl ServerHello {
    /// `major.minor.patch`
    pub fn version(&self) -> String {
        format!(
            "{}.{}.{}",
            self.version_major, self.version_minor, self.version_patch
        )
    }
}

/// Client description attached to every query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub initial_user: String,
    pub initial_query_id: String,
    pub initial_address: String,
    pub os_user: String,
    pub client_hostname: String,
    pub client_name: String,
    pub version_major: u64,
    pub version_minor: u64,
    pub version_patch: u64,
    pub revision: u64,
    pub quota_key: String,
}

impl ClientInfo {
    const QUERY_KIND_INITIAL: u8 = 1;
    const INTERFACE_TCP: u8 = 1;

    fn encode(&self, buf: &mut BytesMut, revision: u64) {
        buf.put_u8(Self::QUERY_KIND_INITIAL);
        buf.put_str(&self.initial_user);
        buf.put_str(&self.initial_query_id);
        buf.put_str(&self.initial_address);
        if revision >= MIN_PROTOCOL_VERSION_WITH_INITIAL_QUERY_START_TIME {
            buf.put_i64_le(0);
        }
        buf.put_u8(Self::INTERFACE_TCP);
        buf.put_str(&self.os_user);
        buf.put_str(&self.client_hostname);
        buf.put_str(&self.client_name);
        buf.put_uvarint(self.version_major);
        buf.put_uvarint(self.version_minor);
        buf.put_uvarint(self.revision);
        if revision >= MIN_REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO {
            buf.put_str(&self.quota_key);
        }
        if revision >= MIN_PROTOCOL_VERSION_WITH_DISTRIBUTED_DEPTH {
            buf.put_uvarint(0);
        }
        if revision >= MIN_REVISION_WITH_VERSION_PATCH {
            buf.put_uvarint(self.version_patch);
        }
        if revision >= MIN_REVISION_WITH_OPENTELEMETRY {
            buf.put_u8(0);
        }
        if revision >= MIN_REVISION_WITH_PARALLEL_REPLICAS {
            buf.put_uvarint(0); // collaborate_with_initiator
            buf.put_uvarint(0); // count_participating_replicas
            buf.put_uvarint(0); // number_of_current_replica
        }
    }

    fn decode(r: &mut dyn WireRead, revision: u64) -> ChResult<Self> {
        let kind = r.read_u8()?;
        if kind != Self::QUERY_KIND_INITIAL {
            return Err(ChError::Protocol(format!("unexpected query kind {}", kind)));
        }
        let initial_user = r.read_string()?;
        let initial_query_id = r.read_string()?;
        let initial_address = r.read_string()?;
        if revision >= MIN_PROTOCOL_VERSION_WITH_INITIAL_QUERY_START_TIME {
            r.read_i64_le()?;
        }
        let interface = r.read_u8()?;
        if interface != Self::INTERFACE_TCP {
            return Err(ChError::Protocol(format!("unexpected interface {}", interface)));
        }
        let os_user = r.read_string()?;
        let client_hostname = r.read_string()?;
        let client_name = r.read_string()?;
        let version_major = r.read_uvarint()?;
        let version_minor = r.read_uvarint()?;
        let client_revision = r.read_uvarint()?;
        let quota_key = if revision >= MIN_REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO {
            r.read_string()?
        } else {
            String::new()
        };
        if revision >= MIN_PROTOCOL_VERSION_WITH_DISTRIBUTED_DEPTH {
            r.read_uvarint()?;
        }
        let version_patch = if revision >= MIN_REVISION_WITH_VERSION_PATCH {
            r.read_uvarint()?
        } else {
            0
        };
        if revision >= MIN_REVISION_WITH_OPENTELEMETRY && r.read_u8()? != 0 {
            return Err(ChError::Protocol(
                "OpenTelemetry trace context is not supported".to_string(),
            ));
        }
        if revision >= MIN_REVISION_WITH_PARALLEL_REPLICAS {
            for _ in 0..3 {
                r.read_uvarint()?;
            }
        }
        Ok(Self {
            initial_user,
            initial_query_id,
            initial_address,
            os_user,
            client_hostname,
            client_name,
            version_major,
            version_minor,
            version_patch,
            revision: client_revision,
            quota_key,
        })
    }
}

/// A statement as sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub id: String,
    pub info: ClientInfo,
    pub settings: Vec<(String, String)>,
    /// Settings sent without the important flag: a server that does not
    /// know one of them skips it instead of failing the query.
    pub hints: Vec<(String, String)>,
    pub compression: bool,
    pub body: String,
    pub parameters: Vec<(String, String)>,
}

/// Quote a parameter value as a ClickHouse string literal.
pub fn quote_parameter(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn unquote_parameter(value: &str) -> String {
    let inner = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn encode_settings<'a, I>(buf: &mut BytesMut, settings: I, flags: u64)
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    for (name, value) in settings {
        buf.put_str(name);
        buf.put_uvarint(flags);
        buf.put_str(&value);
    }
}

/// `(name, value, flags)` up to the empty-name terminator.
fn decode_settings(r: &mut dyn WireRead) -> ChResult<Vec<(String, String, u64)>> {
    let mut out = Vec::new();
    loop {
        let name = r.read_string()?;
        if name.is_empty() {
            return Ok(out);
        }
        let flags = r.read_uvarint()?;
        out.push((name, r.read_string()?, flags));
    }
}

impl Query {
    fn encode(&self, buf: &mut BytesMut, revision: u64) {
        buf.put_str(&self.id);
        if revision >= MIN_REVISION_WITH_CLIENT_INFO {
            self.info.encode(buf, revision);
        }
        encode_settings(
            buf,
            self.settings
                .iter()
                .map(|(k, v)| (k.as_str(), v.clone())),
            SETTING_IMPORTANT,
        );
        encode_settings(
            buf,
            self.hints.iter().map(|(k, v)| (k.as_str(), v.clone())),
            0,
        );
        buf.put_str("");
        if revision >= MIN_REVISION_WITH_INTERSERVER_SECRET {
            buf.put_str("");
        }
        buf.put_uvarint(STAGE_COMPLETE);
        buf.put_uvarint(u64::from(self.compression));
        buf.put_str(&self.body);
        if revision >= MIN_PROTOCOL_VERSION_WITH_PARAMETERS {
            encode_settings(
                buf,
                self.parameters
                    .iter()
                    .map(|(k, v)| (k.as_str(), quote_parameter(v))),
                SETTING_CUSTOM,
            );
            buf.put_str("");
        }
    }

    fn decode(r: &mut dyn WireRead, revision: u64) -> ChResult<Self> {
        let id = r.read_string()?;
        let info = ClientInfo::decode(r, revision)?;
        let (settings, hints): (Vec<_>, Vec<_>) = decode_settings(r)?
            .into_iter()
            .partition(|(_, _, flags)| flags & SETTING_IMPORTANT != 0);
        let pairs = |list: Vec<(String, String, u64)>| -> Vec<(String, String)> {
            list.into_iter().map(|(k, v, _)| (k, v)).collect()
        };
        if revision >= MIN_REVISION_WITH_INTERSERVER_SECRET {
            r.read_string()?;
        }
        let stage = r.read_uvarint()?;
        if stage != STAGE_COMPLETE {
            return Err(ChError::Protocol(format!("unexpected query stage {}", stage)));
        }
        let compression = r.read_uvarint()? != 0;
        let body = r.read_string()?;
        let parameters = if revision >= MIN_PROTOCOL_VERSION_WITH_PARAMETERS {
            decode_settings(r)?
                .into_iter()
                .map(|(k, v, _)| (k, unquote_parameter(&v)))
                .collect()
        } else {
            Vec::new()
        };
        Ok(Self {
            id,
            info,
            settings: pairs(settings),
            hints: pairs(hints),
            compression,
            body,
            parameters,
        })
    }
}

/// Query progress counters; the server sends deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub rows: u64,
    pub bytes: u64,
    pub total_rows: u64,
    pub written_rows: u64,
    pub written_bytes: u64,
    pub elapsed_ns: u64,
}

impl Progress {
    /// Accumulate a delta.
    pub fn merge(&mut self, delta: &Progress) {
        self.rows += delta.rows;
        self.bytes += delta.bytes;
        self.total_rows += delta.total_rows;
        self.written_rows += delta.written_rows;
        self.written_bytes += delta.written_bytes;
        self.elapsed_ns = self.elapsed_ns.max(delta.elapsed_ns);
    }

    fn encode(&self, buf: &mut BytesMut, revision: u64) {
        buf.put_uvarint(self.rows);
        buf.put_uvarint(self.bytes);
        buf.put_uvarint(self.total_rows);
        if revision >= MIN_REVISION_WITH_CLIENT_WRITE_INFO {
            buf.put_uvarint(self.written_rows);
            buf.put_uvarint(self.written_bytes);
        }
        if revision >= MIN_PROTOCOL_VERSION_WITH_SERVER_QUERY_TIME_IN_PROGRESS {
            buf.put_uvarint(self.elapsed_ns);
        }
    }

    fn decode(r: &mut dyn WireRead, revision: u64) -> ChResult<Self> {
        let mut p = Progress {
            rows: r.read_uvarint()?,
            bytes: r.read_uvarint()?,
            total_rows: r.read_uvarint()?,
            ..Progress::default()
        };
        if revision >= MIN_REVISION_WITH_CLIENT_WRITE_INFO {
            p.written_rows = r.read_uvarint()?;
            p.written_bytes = r.read_uvarint()?;
        }
        if revision >= MIN_PROTOCOL_VERSION_WITH_SERVER_QUERY_TIME_IN_PROGRESS {
            p.elapsed_ns = r.read_uvarint()?;
        }
        Ok(p)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileInfo {
    pub rows: u64,
    pub blocks: u64,
    pub bytes: u64,
    pub applied_limit: bool,
    pub rows_before_limit: u64,
    pub calculated_rows_before_limit: bool,
}

impl ProfileInfo {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_uvarint(self.rows);
        buf.put_uvarint(self.blocks);
        buf.put_uvarint(self.bytes);
        buf.put_bool(self.applied_limit);
        buf.put_uvarint(self.rows_before_limit);
        buf.put_bool(self.calculated_rows_before_limit);
    }

    fn decode(r: &mut dyn WireRead) -> ChResult<Self> {
        Ok(Self {
            rows: r.read_uvarint()?,
            blocks: r.read_uvarint()?,
            bytes: r.read_uvarint()?,
            applied_limit: r.read_bool()?,
            rows_before_limit: r.read_uvarint()?,
            calculated_rows_before_limit: r.read_bool()?,
        })
    }
}

fn encode_exception(buf: &mut BytesMut, e: &ServerException) {
    buf.put_i32_le(e.code);
    buf.put_str(&e.name);
    buf.put_str(&e.message);
    buf.put_str(&e.stack_trace);
    buf.put_bool(e.nested.is_some());
    if let Some(nested) = &e.nested {
        encode_exception(buf, nested);
    }
}

fn decode_exception(r: &mut dyn WireRead, depth: usize) -> ChResult<ServerException> {
    if depth > MAX_EXCEPTION_DEPTH {
        return Err(ChError::Protocol("exception nesting is too deep".to_string()));
    }
    let code = r.read_i32_le()?;
    let name = r.read_string()?;
    let message = r.read_string()?;
    let stack_trace = r.read_string()?;
    let nested = if r.read_bool()? {
        Some(Box::new(decode_exception(r, depth + 1)?))
    } else {
        None
    };
    Ok(ServerException {
        code,
        name,
        message,
        stack_trace,
        nested,
    })
}

/// Block payload, compressed into frames when `compression` is enabled.
fn encode_block(
    buf: &mut BytesMut,
    block: &Block,
    revision: u64,
    compression: Compression,
) -> ChResult<()> {
    buf.put_str("");
    if compression.is_enabled() {
        let mut raw = BytesMut::new();
        block.encode(&mut raw, revision)?;
        compress(&raw, compression, buf)
    } else {
        block.encode(buf, revision)
    }
}

fn decode_block(r: &mut SliceReader<'_>, revision: u64, compressed: bool) -> ChResult<Block> {
    r.read_string()?;
    if !compressed {
        return Block::decode(r, revision);
    }
    let mut frames = CompressedReader::new(r);
    let block = Block::decode(&mut frames, revision)?;
    if frames.leftover() != 0 {
        return Err(ChError::Protocol(format!(
            "{} bytes left in compressed frame after block",
            frames.leftover()
        )));
    }
    Ok(block)
}

/// Packets sent by the client.
#[derive(Debug, Clone)]
pub enum ClientPacket {
    Hello(ClientHello),
    Query(Box<Query>),
    Data(Block),
    Cancel,
    Ping,
}

impl ClientPacket {
    /// Append the packet to `buf`. `compression` applies to `Data` only.
    pub fn encode(
        &self,
        buf: &mut BytesMut,
        revision: u64,
        compression: Compression,
    ) -> ChResult<()> {
        match self {
            ClientPacket::Hello(hello) => {
                buf.put_uvarint(client_code::HELLO);
                buf.put_str(&hello.client_name);
                buf.put_uvarint(hello.version_major);
                buf.put_uvarint(hello.version_minor);
                buf.put_uvarint(hello.revision);
                buf.put_str(&hello.database);
                buf.put_str(&hello.user);
                buf.put_str(&hello.password);
            }
            ClientPacket::Query(query) => {
                buf.put_uvarint(client_code::QUERY);
                query.encode(buf, revision);
            }
            ClientPacket::Data(block) => encode_data(buf, block, revision, compression)?,
            ClientPacket::Cancel => buf.put_uvarint(client_code::CANCEL),
            ClientPacket::Ping => buf.put_uvarint(client_code::PING),
        }
        Ok(())
    }

    /// Decode one packet from the front of `buf`, returning it with the
    /// number of bytes consumed. `Incomplete` means more input is needed.
    pub fn decode(buf: &[u8], revision: u64, compressed: bool) -> ChResult<(Self, usize)> {
        let mut r = SliceReader::new(buf);
        let packet = match r.read_uvarint()? {
            client_code::HELLO => ClientPacket::Hello(ClientHello {
                client_name: r.read_string()?,
                version_major: r.read_uvarint()?,
                version_minor: r.read_uvarint()?,
                revision: r.read_uvarint()?,
                database: r.read_string()?,
                user: r.read_string()?,
                password: r.read_string()?,
            }),
            client_code::QUERY => ClientPacket::Query(Box::new(Query::decode(&mut r, revision)?)),
            client_code::DATA => ClientPacket::Data(decode_block(&mut r, revision, compressed)?),
            client_code::CANCEL => ClientPacket::Cancel,
            client_code::PING => ClientPacket::Ping,
            code => {
                return Err(ChError::Protocol(format!(
                    "unknown client packet code {}",
                    code
                )));
            }
        };
        Ok((packet, r.position()))
    }
}

/// Client `Data` packet for a borrowed block; same bytes as
/// `ClientPacket::Data`.
pub fn encode_data(
    buf: &mut BytesMut,
    block: &Block,
    revision: u64,
    compression: Compression,
) -> ChResult<()> {
    buf.put_uvarint(client_code::DATA);
    encode_block(buf, block, revision, compression)
}

/// Quota key sent right after the server hello on new revisions.
pub fn encode_hello_addendum(buf: &mut BytesMut, quota_key: &str) {
    buf.put_str(quota_key);
}

/// Packets sent by the server.
#[derive(Debug, Clone)]
pub enum ServerPacket {
    Hello(ServerHello),
    Data(Block),
    Exception(ServerException),
    Progress(Progress),
    Pong,
    EndOfStream,
    ProfileInfo(ProfileInfo),
    Totals(Block),
    Extremes(Block),
    Log(Block),
    TableColumns { table: String, description: String },
    ProfileEvents(Block),
}

impl ServerPacket {
    pub fn name(&self) -> &'static str {
        match self {
            ServerPacket::Hello(_) => "Hello",
            ServerPacket::Data(_) => "Data",
            ServerPacket::Exception(_) => "Exception",
            ServerPacket::Progress(_) => "Progress",
            ServerPacket::Pong => "Pong",
            ServerPacket::EndOfStream => "EndOfStream",
            ServerPacket::ProfileInfo(_) => "ProfileInfo",
            ServerPacket::Totals(_) => "Totals",
            ServerPacket::Extremes(_) => "Extremes",
            ServerPacket::Log(_) => "Log",
            ServerPacket::TableColumns { .. } => "TableColumns",
            ServerPacket::ProfileEvents(_) => "ProfileEvents",
        }
    }

    /// Append the packet to `buf`. `revision` is the client's revision;
    /// `compression` applies to `Data`, `Totals` and `Extremes`.
    pub fn encode(
        &self,
        buf: &mut BytesMut,
        revision: u64,
        compression: Compression,
    ) -> ChResult<()> {
        match self {
            ServerPacket::Hello(hello) => {
                buf.put_uvarint(server_code::HELLO);
                buf.put_str(&hello.name);
                buf.put_uvarint(hello.version_major);
                buf.put_uvarint(hello.version_minor);
                buf.put_uvarint(hello.revision);
                if revision >= MIN_REVISION_WITH_SERVER_TIMEZONE {
                    buf.put_str(&hello.timezone);
                }
                if revision >= MIN_REVISION_WITH_SERVER_DISPLAY_NAME {
                    buf.put_str(&hello.display_name);
                }
                if revision >= MIN_REVISION_WITH_VERSION_PATCH {
                    buf.put_uvarint(hello.version_patch);
                }
            }
            ServerPacket::Data(block) => {
                buf.put_uvarint(server_code::DATA);
                encode_block(buf, block, revision, compression)?;
            }
            ServerPacket::Exception(e) => {
                buf.put_uvarint(server_code::EXCEPTION);
                encode_exception(buf, e);
            }
            ServerPacket::Progress(p) => {
                buf.put_uvarint(server_code::PROGRESS);
                p.encode(buf, revision);
            }
            ServerPacket::Pong => buf.put_uvarint(server_code::PONG),
            ServerPacket::EndOfStream => buf.put_uvarint(server_code::END_OF_STREAM),
            ServerPacket::ProfileInfo(info) => {
                buf.put_uvarint(server_code::PROFILE_INFO);
                info.encode(buf);
            }
            ServerPacket::Totals(block) => {
                buf.put_uvarint(server_code::TOTALS);
                encode_block(buf, block, revision, compression)?;
            }
            ServerPacket::Extremes(block) => {
                buf.put_uvarint(server_code::EXTREMES);
                encode_block(buf, block, revision, compression)?;
            }
            ServerPacket::Log(block) => {
                buf.put_uvarint(server_code::LOG);
                encode_block(buf, block, revision, Compression::None)?;
            }
            ServerPacket::TableColumns { table, description } => {
                buf.put_uvarint(server_code::TABLE_COLUMNS);
                buf.put_str(table);
                buf.put_str(description);
            }
            ServerPacket::ProfileEvents(block) => {
                buf.put_uvarint(server_code::PROFILE_EVENTS);
                encode_block(buf, block, revision, Compression::None)?;
            }
        }
        Ok(())
    }

    /// Decode one packet from the front of `buf`, returning it with the
    /// number of bytes consumed. `Incomplete` means more input is needed.
    pub fn decode(buf: &[u8], revision: u64, compressed: bool) -> ChResult<(Self, usize)> {
        let mut r = SliceReader::new(buf);
        let packet = Self::decode_from(&mut r, revision, compressed)?;
        Ok((packet, r.position()))
    }

    pub(crate) fn decode_from(
        r: &mut SliceReader<'_>,
        revision: u64,
        compressed: bool,
    ) -> ChResult<Self> {
        let packet = match r.read_uvarint()? {
            server_code::HELLO => {
                let mut hello = ServerHello {
                    name: r.read_string()?,
                    version_major: r.read_uvarint()?,
                    version_minor: r.read_uvarint()?,
                    revision: r.read_uvarint()?,
                    ..ServerHello::default()
                };
                if revision >= MIN_REVISION_WITH_SERVER_TIMEZONE {
                    hello.timezone = r.read_string()?;
                }
                if revision >= MIN_REVISION_WITH_SERVER_DISPLAY_NAME {
                    hello.display_name = r.read_string()?;
                }
                if revision >= MIN_REVISION_WITH_VERSION_PATCH {
                    hello.version_patch = r.read_uvarint()?;
                }
                ServerPacket::Hello(hello)
            }
            server_code::DATA => ServerPacket::Data(decode_block(r, revision, compressed)?),
            server_code::EXCEPTION => ServerPacket::Exception(decode_exception(r, 0)?),
            server_code::PROGRESS => ServerPacket::Progress(Progress::decode(r, revision)?),
            server_code::PONG => ServerPacket::Pong,
            server_code::END_OF_STREAM => ServerPacket::EndOfStream,
            server_code::PROFILE_INFO => ServerPacket::ProfileInfo(ProfileInfo::decode(r)?),
            server_code::TOTALS => {
                ServerPacket::Totals(decode_block(r, revision, compressed)?)
            }
            server_code::EXTREMES => {
                ServerPacket::Extremes(decode_block(r, revision, compressed)?)
            }
            server_code::LOG => ServerPacket::Log(decode_block(r, revision, false)?),
            server_code::TABLE_COLUMNS => ServerPacket::TableColumns {
                table: r.read_string()?,
                description: r.read_string()?,
            },
            server_code::PROFILE_EVENTS => {
                ServerPacket::ProfileEvents(decode_block(r, revision, false)?)
            }
            code => {
                return Err(ChError::Protocol(format!(
                    "unknown server packet code {}",
                    code
                )));
            }
        };
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::ColumnType;
    use crate::types::Value;
    use pretty_assertions::assert_eq;

    fn sample_block() -> Block {
        let mut block = Block::with_schema([
            ("n", ColumnType::UInt32),
            ("s", ColumnType::nullable(ColumnType::String)),
        ]);
        block
            .append_row(&[Value::UInt32(1), Value::String("one".into())])
            .unwrap();
        block.append_row(&[Value::UInt32(2), Value::Null]).unwrap();
        block
    }

    fn client_info() -> ClientInfo {
        ClientInfo {
            initial_user: String::new(),
            initial_query_id: String::new(),
            initial_address: "0.0.0.0:0".to_string(),
            os_user: "app".to_string(),
            client_hostname: "host".to_string(),
            client_name: "qail-ch".to_string(),
            version_major: 0,
            version_minor: 14,
            version_patch: 20,
            revision: CLIENT_REVISION,
            quota_key: String::new(),
        }
    }

    fn server_round_trip(packet: &ServerPacket, compression: Compression) -> ServerPacket {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, CLIENT_REVISION, compression).unwrap();
        buf.put_u8(0xff); // trailing byte of the next packet
        let (back, used) =
            ServerPacket::decode(&buf, CLIENT_REVISION, compression.is_enabled()).unwrap();
        assert_eq!(used, buf.len() - 1, "{}", packet.name());
        back
    }

    fn client_round_trip(packet: &ClientPacket, compression: Compression) -> ClientPacket {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, CLIENT_REVISION, compression).unwrap();
        let (back, used) =
            ClientPacket::decode(&buf, CLIENT_REVISION, compression.is_enabled()).unwrap();
        assert_eq!(used, buf.len());
        back
    }

    fn block_values(block: &Block) -> Vec<Vec<Value>> {
        (0..block.rows())
            .map(|r| {
                (0..block.column_count())
                    .map(|c| block.value(r, c).unwrap().unwrap())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_client_packets() {
        let hello = ClientHello {
            client_name: "qail-ch".to_string(),
            version_major: 0,
            version_minor: 14,
            revision: CLIENT_REVISION,
            database: "default".to_string(),
            user: "default".to_string(),
            password: "secret".to_string(),
        };
        match client_round_trip(&ClientPacket::Hello(hello.clone()), Compression::None) {
            ClientPacket::Hello(back) => assert_eq!(back, hello),
            other => panic!("unexpected {:?}", other),
        }

        let query = Query {
            id: "q-1".to_string(),
            info: client_info(),
            settings: vec![("max_threads".to_string(), "4".to_string())],
            hints: vec![("some_newer_setting".to_string(), "1".to_string())],
            compression: true,
            body: "SELECT {name:String}".to_string(),
            parameters: vec![("name".to_string(), "it's".to_string())],
        };
        match client_round_trip(&ClientPacket::Query(Box::new(query.clone())), Compression::None)
        {
            ClientPacket::Query(back) => assert_eq!(*back, query),
            other => panic!("unexpected {:?}", other),
        }

        for compression in [Compression::None, Compression::Lz4, Compression::Zstd] {
            match client_round_trip(&ClientPacket::Data(sample_block()), compression) {
                ClientPacket::Data(back) => {
                    assert_eq!(block_values(&back), block_values(&sample_block()))
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        assert!(matches!(
            client_round_trip(&ClientPacket::Cancel, Compression::None),
            ClientPacket::Cancel
        ));
        assert!(matches!(
            client_round_trip(&ClientPacket::Ping, Compression::None),
            ClientPacket::Ping
        ));
    }

    #[test]
    fn test_server_packets() {
        let hello = ServerHello {
            name: "ClickHouse".to_string(),
            version_major: 24,
            version_minor: 8,
            revision: 54_472,
            timezone: "UTC".to_string(),
            display_name: "node-1".to_string(),
            version_patch: 3,
        };
        match server_round_trip(&ServerPacket::Hello(hello.clone()), Compression::None) {
            ServerPacket::Hello(back) => {
                assert_eq!(back.version(), "24.8.3");
                assert_eq!(back, hello);
            }
            other => panic!("unexpected {:?}", other),
        }

        let exception = ServerException {
            code: 395,
            name: "DB::Exception".to_string(),
            message: "Value passed to 'throwIf' function is non-zero".to_string(),
            stack_trace: "0. frame".to_string(),
            nested: Some(Box::new(ServerException {
                code: 1,
                name: "DB::Inner".to_string(),
                message: "inner".to_string(),
                stack_trace: String::new(),
                nested: None,
            })),
        };
        match server_round_trip(&ServerPacket::Exception(exception.clone()), Compression::None) {
            ServerPacket::Exception(back) => assert_eq!(back, exception),
            other => panic!("unexpected {:?}", other),
        }

        let progress = Progress {
            rows: 10,
            bytes: 80,
            total_rows: 100,
            written_rows: 0,
            written_bytes: 0,
            elapsed_ns: 1_000,
        };
        match server_round_trip(&ServerPacket::Progress(progress), Compression::None) {
            ServerPacket::Progress(back) => assert_eq!(back, progress),
            other => panic!("unexpected {:?}", other),
        }

        let info = ProfileInfo {
            rows: 3,
            blocks: 1,
            bytes: 24,
            applied_limit: true,
            rows_before_limit: 10,
            calculated_rows_before_limit: true,
        };
        match server_round_trip(&ServerPacket::ProfileInfo(info), Compression::None) {
            ServerPacket::ProfileInfo(back) => assert_eq!(back, info),
            other => panic!("unexpected {:?}", other),
        }

        for compression in [Compression::None, Compression::Lz4] {
            let packets = [
                ServerPacket::Data(sample_block()),
                ServerPacket::Totals(sample_block()),
                ServerPacket::Extremes(sample_block()),
                ServerPacket::Log(sample_block()),
                ServerPacket::ProfileEvents(sample_block()),
            ];
            for packet in &packets {
                let back = server_round_trip(packet, compression);
                assert_eq!(back.name(), packet.name());
                match back {
                    ServerPacket::Data(b)
                    | ServerPacket::Totals(b)
                    | ServerPacket::Extremes(b)
                    | ServerPacket::Log(b)
                    | ServerPacket::ProfileEvents(b) => {
                        assert_eq!(block_values(&b), block_values(&sample_block()))
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
        }

        match server_round_trip(
            &ServerPacket::TableColumns {
                table: String::new(),
                description: "columns format version: 1".to_string(),
            },
            Compression::None,
        ) {
            ServerPacket::TableColumns { description, .. } => {
                assert_eq!(description, "columns format version: 1")
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            server_round_trip(&ServerPacket::Pong, Compression::None),
            ServerPacket::Pong
        ));
        assert!(matches!(
            server_round_trip(&ServerPacket::EndOfStream, Compression::None),
            ServerPacket::EndOfStream
        ));
    }

    #[test]
    fn test_partial_packet_is_incomplete() {
        let mut buf = BytesMut::new();
        ServerPacket::Data(sample_block())
            .encode(&mut buf, CLIENT_REVISION, Compression::Lz4)
            .unwrap();
        for cut in [1, buf.len() / 2, buf.len() - 1] {
            assert!(matches!(
                ServerPacket::decode(&buf[..cut], CLIENT_REVISION, true),
                Err(ChError::Incomplete)
            ));
        }
    }

    #[test]
    fn test_unknown_packet_code() {
        assert!(matches!(
            ServerPacket::decode(&[42], CLIENT_REVISION, false),
            Err(ChError::Protocol(_))
        ));
    }

    #[test]
    fn test_parameter_quoting() {
        assert_eq!(quote_parameter("a'b\\c"), "'a\\'b\\\\c'");
        assert_eq!(unquote_parameter("'a\\'b\\\\c'"), "a'b\\c");
    }
}
