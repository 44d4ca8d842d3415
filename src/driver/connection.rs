//! A single native-protocol connection.
//!
//! Owns the socket plus read/write buffers and drives one statement at a
//! time: handshake, query, data blocks, cancel, ping. A connection is marked
//! poisoned as soon as an exchange starts and only becomes clean again when
//! the server closes that exchange (`EndOfStream`, `Exception` or `Pong`).
//! A connection dropped mid-exchange is therefore never reused.

use super::context::QueryContext;
use super::pool::ConnectionConfig;
use super::stream::ChStream;
use crate::error::{ChError, ChResult};
use crate::protocol::packet::{encode_data, encode_hello_addendum};
use crate::protocol::{
    Block, CLIENT_REVISION, ClientHello, ClientInfo, ClientPacket, Compression,
    MIN_PROTOCOL_VERSION_WITH_ADDENDUM, MIN_PROTOCOL_VERSION_WITH_PARAMETERS,
    MIN_SUPPORTED_REVISION, Query, ServerDecoder, ServerHello, ServerPacket,
};
use bytes::BytesMut;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Initial buffer capacity (64KB).
const BUFFER_CAPACITY: usize = 65536;

/// Asks for `Dynamic` columns in the flattened layout, the only one the
/// column codec reads. Servers predating it ignore the hint.
pub(crate) const FLATTENED_DYNAMIC_SETTING: &str =
    "output_format_native_use_flattened_dynamic_and_json_serialization";

fn version_part(part: &str) -> u64 {
    part.parse().unwrap_or(0)
}

/// A raw ClickHouse connection.
pub struct ChConnection {
    pub(crate) stream: ChStream,
    read_buf: BytesMut,
    decoder: ServerDecoder,
    write_buf: BytesMut,
    server: ServerHello,
    revision: u64,
    compression: Compression,
    settings: Vec<(String, String)>,
    info: ClientInfo,
    poisoned: bool,
    broken: bool,
    created_at: Instant,
    last_used: Instant,
}

impl std::fmt::Debug for ChConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChConnection")
            .field("server", &self.server.display_name)
            .field("revision", &self.revision)
            .field("compression", &self.compression)
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

impl ChConnection {
    /// Connect and complete the handshake, bounded by `connect_timeout`.
    pub async fn connect(config: &ConnectionConfig) -> ChResult<Self> {
        let handshake = async {
            let stream = ChStream::connect(&config.host, config.port, config.tls.as_ref()).await?;
            let mut conn = Self::from_stream(stream, config);
            conn.handshake(config).await?;
            Ok::<_, ChError>(conn)
        };

        let conn = tokio::time::timeout(config.connect_timeout, handshake)
            .await
            .map_err(|_| {
                ChError::Connection(format!(
                    "connect to {}:{} timed out after {:?}",
                    config.host, config.port, config.connect_timeout
                ))
            })??;

        tracing::debug!(
            host = %config.host,
            port = config.port,
            server = %conn.server.display_name,
            version = %conn.server.version(),
            revision = conn.revision,
            tls = conn.stream.is_tls(),
            "clickhouse connection established"
        );
        Ok(conn)
    }

    fn from_stream(stream: ChStream, config: &ConnectionConfig) -> Self {
        let info = ClientInfo {
            initial_user: String::new(),
            initial_query_id: String::new(),
            initial_address: "0.0.0.0:0".to_string(),
            os_user: std::env::var("USER").unwrap_or_default(),
            client_hostname: std::env::var("HOSTNAME").unwrap_or_default(),
            client_name: config.client_name.clone(),
            version_major: version_part(env!("CARGO_PKG_VERSION_MAJOR")),
            version_minor: version_part(env!("CARGO_PKG_VERSION_MINOR")),
            version_patch: version_part(env!("CARGO_PKG_VERSION_PATCH")),
            revision: CLIENT_REVISION,
            quota_key: config.quota_key.clone(),
        };
        let now = Instant::now();
        Self {
            stream,
            read_buf: BytesMut::with_capacity(BUFFER_CAPACITY),
            decoder: ServerDecoder::new(config.compression.is_enabled()),
            write_buf: BytesMut::with_capacity(BUFFER_CAPACITY),
            server: ServerHello::default(),
            revision: CLIENT_REVISION,
            compression: config.compression,
            settings: config
                .settings
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            info,
            poisoned: false,
            broken: false,
            created_at: now,
            last_used: now,
        }
    }

    async fn handshake(&mut self, config: &ConnectionConfig) -> ChResult<()> {
        let hello = ClientHello {
            client_name: config.client_name.clone(),
            version_major: self.info.version_major,
            version_minor: self.info.version_minor,
            revision: CLIENT_REVISION,
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone().unwrap_or_default(),
        };
        self.send_packet(&ClientPacket::Hello(hello)).await?;

        let server = match self.recv_packet().await? {
            ServerPacket::Hello(hello) => hello,
            ServerPacket::Exception(e) => return Err(ChError::Server(e)),
            other => {
                return Err(ChError::Protocol(format!(
                    "expected Hello during handshake, got {}",
                    other.name()
                )));
            }
        };

        if server.revision < MIN_SUPPORTED_REVISION {
            return Err(ChError::Connection(format!(
                "server revision {} is older than the minimum supported {}",
                server.revision, MIN_SUPPORTED_REVISION
            )));
        }
        self.revision = server.revision.min(CLIENT_REVISION);
        self.server = server;

        if self.revision >= MIN_PROTOCOL_VERSION_WITH_ADDENDUM {
            self.write_buf.clear();
            encode_hello_addendum(&mut self.write_buf, &config.quota_key);
            self.flush_write().await?;
        }
        Ok(())
    }

    // ==================== Packet I/O ====================

    /// Encode and write one packet.
    pub(crate) async fn send_packet(&mut self, packet: &ClientPacket) -> ChResult<()> {
        self.write_buf.clear();
        packet.encode(&mut self.write_buf, self.revision, self.compression)?;
        self.flush_write().await
    }

    async fn flush_write(&mut self) -> ChResult<()> {
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        self.last_used = Instant::now();
        Ok(())
    }

    /// Try to decode one packet from what is already buffered.
    fn decode_buffered(&mut self) -> ChResult<Option<ServerPacket>> {
        let packet = self.decoder.decode(&mut self.read_buf, self.revision)?;
        if matches!(
            packet,
            Some(ServerPacket::EndOfStream | ServerPacket::Exception(_) | ServerPacket::Pong)
        ) {
            self.poisoned = false;
        }
        Ok(packet)
    }

    async fn fill_buf(&mut self) -> ChResult<()> {
        if self.read_buf.capacity() - self.read_buf.len() < BUFFER_CAPACITY / 4 {
            self.read_buf.reserve(BUFFER_CAPACITY);
        }
        let n = self.stream.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Err(ChError::Connection(
                "Connection closed by server".to_string(),
            ));
        }
        self.last_used = Instant::now();
        Ok(())
    }

    /// Read the next server packet, waiting for more bytes as needed.
    pub(crate) async fn recv_packet(&mut self) -> ChResult<ServerPacket> {
        loop {
            if let Some(packet) = self.decode_buffered()? {
                return Ok(packet);
            }
            self.fill_buf().await?;
        }
    }

    /// Surface an exception the server already sent (e.g. a bad value in
    /// an earlier block) without waiting for more input. Informational
    /// packets are discarded.
    async fn check_pending_exception(&mut self) -> ChResult<()> {
        loop {
            match self.decode_buffered()? {
                Some(ServerPacket::Exception(e)) => return Err(ChError::Server(e)),
                Some(ServerPacket::EndOfStream) => {
                    return Err(ChError::Protocol(
                        "server ended the insert while data was still being sent".to_string(),
                    ));
                }
                Some(_) => continue,
                None => {}
            }
            match tokio::time::timeout(Duration::ZERO, self.fill_buf()).await {
                Ok(res) => res?,
                Err(_) => return Ok(()),
            }
        }
    }

    // ==================== Statements ====================

    fn build_query(&self, body: &str, ctx: &QueryContext) -> ChResult<Query> {
        if !ctx.parameters.is_empty() && self.revision < MIN_PROTOCOL_VERSION_WITH_PARAMETERS {
            return Err(ChError::Protocol(format!(
                "server revision {} does not support query parameters",
                self.revision
            )));
        }

        let mut settings: Vec<(String, String)> = self
            .settings
            .iter()
            .filter(|(name, _)| !ctx.settings.contains_key(name))
            .cloned()
            .collect();
        settings.extend(ctx.settings.iter().map(|(k, v)| (k.clone(), v.clone())));

        let hints = if settings.iter().any(|(name, _)| name == FLATTENED_DYNAMIC_SETTING) {
            Vec::new()
        } else {
            vec![(FLATTENED_DYNAMIC_SETTING.to_string(), "1".to_string())]
        };

        Ok(Query {
            id: ctx.query_id.clone().unwrap_or_default(),
            info: self.info.clone(),
            settings,
            hints,
            compression: self.compression.is_enabled(),
            body: body.to_string(),
            parameters: ctx
                .parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }

    /// Send a query followed by the empty block that ends external tables.
    pub(crate) async fn send_query(&mut self, body: &str, ctx: &QueryContext) -> ChResult<()> {
        let query = self.build_query(body, ctx)?;
        self.poisoned = true;
        self.write_buf.clear();
        ClientPacket::Query(Box::new(query)).encode(
            &mut self.write_buf,
            self.revision,
            self.compression,
        )?;
        ClientPacket::Data(Block::new()).encode(
            &mut self.write_buf,
            self.revision,
            self.compression,
        )?;
        self.flush_write().await
    }

    /// Start a SELECT-like statement and return the first data block (the
    /// header), or `None` when the statement produced no result set.
    pub(crate) async fn start_query(
        &mut self,
        body: &str,
        ctx: &QueryContext,
    ) -> ChResult<Option<Block>> {
        self.send_query(body, ctx).await?;
        loop {
            match self.recv_packet().await? {
                ServerPacket::Data(block) => return Ok(Some(block)),
                ServerPacket::Exception(e) => return Err(ChError::Server(e)),
                ServerPacket::EndOfStream => return Ok(None),
                _ => {}
            }
        }
    }

    /// Execute a statement that returns no rows.
    pub(crate) async fn exec(&mut self, body: &str, ctx: &QueryContext) -> ChResult<()> {
        self.send_query(body, ctx).await?;
        let mut data_sent = false;
        loop {
            match self.recv_packet().await? {
                ServerPacket::EndOfStream => return Ok(()),
                ServerPacket::Exception(e) => return Err(ChError::Server(e)),
                // INSERT with inline VALUES still expects the client's data
                // stream to be terminated.
                ServerPacket::Data(block) if !data_sent && is_insert(body) && block.rows() == 0 => {
                    self.send_packet(&ClientPacket::Data(Block::new())).await?;
                    data_sent = true;
                }
                _ => {}
            }
        }
    }

    /// Start an INSERT and return the (empty) block describing the target
    /// columns.
    pub(crate) async fn begin_insert(
        &mut self,
        query: &str,
        ctx: &QueryContext,
    ) -> ChResult<Block> {
        let statement = insert_statement(query);
        self.send_query(&statement, ctx).await?;
        loop {
            match self.recv_packet().await? {
                ServerPacket::Data(block) => return Ok(block),
                ServerPacket::Exception(e) => return Err(ChError::Server(e)),
                ServerPacket::EndOfStream => {
                    return Err(ChError::Protocol(
                        "server ended the insert before sending its schema".to_string(),
                    ));
                }
                _ => {}
            }
        }
    }

    /// Send one block of an open INSERT.
    pub(crate) async fn send_data(&mut self, block: &Block) -> ChResult<()> {
        self.check_pending_exception().await?;
        self.write_buf.clear();
        encode_data(&mut self.write_buf, block, self.revision, self.compression)?;
        self.flush_write().await
    }

    /// Terminate an open INSERT and wait for the server to commit it.
    pub(crate) async fn finish_insert(&mut self) -> ChResult<()> {
        self.send_packet(&ClientPacket::Data(Block::new())).await?;
        loop {
            match self.recv_packet().await? {
                ServerPacket::EndOfStream => return Ok(()),
                ServerPacket::Exception(e) => return Err(ChError::Server(e)),
                _ => {}
            }
        }
    }

    /// Round-trip a ping.
    pub async fn ping(&mut self) -> ChResult<()> {
        self.poisoned = true;
        self.send_packet(&ClientPacket::Ping).await?;
        loop {
            match self.recv_packet().await? {
                ServerPacket::Pong => return Ok(()),
                ServerPacket::Exception(e) => return Err(ChError::Server(e)),
                ServerPacket::Progress(_) | ServerPacket::ProfileEvents(_) => {}
                other => {
                    return Err(ChError::Protocol(format!(
                        "expected Pong, got {}",
                        other.name()
                    )));
                }
            }
        }
    }

    /// Ask the server to stop the running statement and read until it
    /// acknowledges. The connection stays poisoned if the server does not
    /// finish within `timeout`.
    pub(crate) async fn cancel_and_drain(&mut self, timeout: Duration) -> ChResult<()> {
        let drain = async {
            self.send_packet(&ClientPacket::Cancel).await?;
            loop {
                match self.recv_packet().await? {
                    ServerPacket::EndOfStream | ServerPacket::Exception(_) => return Ok(()),
                    _ => {}
                }
            }
        };
        tokio::time::timeout(timeout, drain).await.map_err(|_| {
            ChError::Connection(format!("server did not acknowledge cancel within {:?}", timeout))
        })?
    }

    // ==================== State ====================

    /// Mark the connection unusable so the pool discards it. Unlike an
    /// open exchange, this is never cleared.
    pub(crate) fn poison(&mut self) {
        self.broken = true;
    }

    /// True while an exchange is open or after `poison`.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned || self.broken
    }

    pub fn server_hello(&self) -> &ServerHello {
        &self.server
    }

    /// Negotiated protocol revision.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub(crate) fn created_at(&self) -> Instant {
        self.created_at
    }

    pub(crate) fn last_used(&self) -> Instant {
        self.last_used
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }
}

fn is_insert(query: &str) -> bool {
    query
        .trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("insert"))
}

/// Normalize an INSERT so it ends right after `VALUES`: any inline data is
/// dropped and a missing `VALUES` is appended.
pub(crate) fn insert_statement(query: &str) -> String {
    let trimmed = query.trim().trim_end_matches(';').trim_end();
    let upper = trimmed.to_ascii_uppercase();
    match upper.find("VALUES") {
        Some(pos) => trimmed[..pos + "VALUES".len()].to_string(),
        None => format!("{} VALUES", trimmed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_statement() {
        assert_eq!(
            insert_statement("INSERT INTO t (a, b)"),
            "INSERT INTO t (a, b) VALUES"
        );
        assert_eq!(insert_statement("insert into t values"), "insert into t values");
        assert_eq!(
            insert_statement("INSERT INTO t VALUES (1, 'x');"),
            "INSERT INTO t VALUES"
        );
    }

    #[test]
    fn test_is_insert() {
        assert!(is_insert("  INSERT INTO t VALUES (1)"));
        assert!(is_insert("insert into t"));
        assert!(!is_insert("SELECT 1"));
        assert!(!is_insert("ins"));
    }
}
