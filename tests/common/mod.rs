//! In-process ClickHouse server for integration tests.
//!
//! Speaks the native protocol through the crate's own packet codec and
//! understands just enough SQL for the tests:
//!
//! - `CREATE TABLE name (col Type, ...) ENGINE = Memory`, `DROP TABLE name`
//! - `INSERT INTO name [(cols)] VALUES` followed by data blocks
//! - `SELECT * FROM name [WITH TOTALS]` (totals row = last row of the table)
//! - `SELECT count() FROM name`
//! - `SELECT number FROM numbers(N)` (blocks of 10 000 rows, cancellable)
//! - `SELECT throwIf(...)` (one block of 3 rows, then an exception)
//! - `SELECT sleep(...)` (never answers until cancelled)
//! - `SELECT params` (one String column per query parameter)
//! - `SELECT 1`

#![allow(dead_code)]

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use qail_ch::protocol::{
    Block, CLIENT_REVISION, ClientPacket, ColumnType, Compression,
    MIN_PROTOCOL_VERSION_WITH_ADDENDUM, Progress, Query, ServerHello, ServerPacket, SliceReader,
    WireRead,
};
use qail_ch::{ChDriver, ChError, ChPool, ChResult, PoolConfig, ServerException, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const NUMBERS_BLOCK_ROWS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    /// Stop reading once an INSERT has received its schema.
    StallInsert,
    /// Close the socket when the first data block of an INSERT arrives.
    DropOnData,
    /// Refuse every handshake.
    RejectHello,
}

#[derive(Default)]
pub struct State {
    pub mode: Mode,
    pub tables: HashMap<String, Block>,
    /// Non-empty blocks received by INSERTs, as decoded from the wire.
    pub received: Vec<Block>,
    pub queries: Vec<Query>,
    pub connections: usize,
    pub cancels: usize,
    /// Rows per block when returning table contents.
    pub block_rows: usize,
    /// Tables whose inserts fail with a server exception.
    pub reject_inserts: Vec<String>,
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<State>>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State {
            block_rows: 2,
            ..State::default()
        }));

        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let session = Session::new(socket, shared.clone());
                tokio::spawn(async move {
                    let _ = session.run().await;
                });
            }
        });

        Self { addr, state }
    }

    pub fn config(&self) -> PoolConfig {
        PoolConfig::new("127.0.0.1", self.addr.port(), "default", "default")
            .min_connections(0)
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(5))
            .connect_timeout(Duration::from_secs(5))
            .cancel_timeout(Duration::from_secs(2))
    }

    /// Driver over a lazy pool: connections open on first use.
    pub fn driver(&self) -> ChDriver {
        self.driver_with(self.config())
    }

    pub fn driver_with(&self, config: PoolConfig) -> ChDriver {
        ChDriver::new(ChPool::new(config))
    }

    pub fn set_mode(&self, mode: Mode) {
        self.state.lock().mode = mode;
    }

    pub fn create_table(&self, name: &str, schema: &[(&str, &str)]) {
        let block = Block::with_schema(
            schema
                .iter()
                .map(|(col, ty)| (col.to_string(), ColumnType::parse(ty).unwrap())),
        );
        self.state.lock().tables.insert(name.to_string(), block);
    }

    pub fn insert_rows(&self, name: &str, rows: &[Vec<Value>]) {
        let mut state = self.state.lock();
        let table = state.tables.get_mut(name).unwrap();
        for row in rows {
            table.append_row(row).unwrap();
        }
    }

    pub fn reject_inserts(&self, name: &str) {
        self.state.lock().reject_inserts.push(name.to_string());
    }

    pub fn table(&self, name: &str) -> Option<Block> {
        self.state.lock().tables.get(name).cloned()
    }

    pub fn table_rows(&self, name: &str) -> usize {
        self.table(name).map_or(0, |b| b.rows())
    }

    pub fn received(&self) -> Vec<Block> {
        self.state.lock().received.clone()
    }

    pub fn last_query(&self) -> Option<Query> {
        self.state.lock().queries.last().cloned()
    }

    pub fn cancels(&self) -> usize {
        self.state.lock().cancels
    }

    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }
}

fn exception(code: i32, message: impl Into<String>) -> ServerPacket {
    ServerPacket::Exception(ServerException {
        code,
        name: "DB::Exception".to_string(),
        message: message.into(),
        stack_trace: String::new(),
        nested: None,
    })
}

/// Split `a Int32, b Map(String, UInt8)` at top-level commas.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = s[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

/// Name following `keyword`, stopping at whitespace or `(`.
fn name_after<'a>(body: &'a str, keyword: &str) -> Option<&'a str> {
    let pos = body.to_ascii_uppercase().find(keyword)?;
    let rest = body[pos + keyword.len()..].trim_start();
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

struct Session {
    socket: TcpStream,
    buf: BytesMut,
    state: Arc<Mutex<State>>,
    compression: Compression,
}

impl Session {
    fn new(socket: TcpStream, state: Arc<Mutex<State>>) -> Self {
        Self {
            socket,
            buf: BytesMut::with_capacity(64 * 1024),
            state,
            compression: Compression::None,
        }
    }

    fn mode(&self) -> Mode {
        self.state.lock().mode
    }

    async fn fill(&mut self) -> ChResult<bool> {
        Ok(self.socket.read_buf(&mut self.buf).await? > 0)
    }

    /// Next client packet, `None` once the client hung up.
    async fn read_packet(&mut self) -> ChResult<Option<ClientPacket>> {
        loop {
            if !self.buf.is_empty() {
                match ClientPacket::decode(&self.buf, CLIENT_REVISION, self.compression.is_enabled())
                {
                    Ok((packet, used)) => {
                        self.buf.advance(used);
                        return Ok(Some(packet));
                    }
                    Err(ChError::Incomplete) => {}
                    Err(e) => return Err(e),
                }
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    async fn read_addendum(&mut self) -> ChResult<()> {
        loop {
            let mut r = SliceReader::new(&self.buf);
            match r.read_string() {
                Ok(_) => {
                    let used = r.position();
                    self.buf.advance(used);
                    return Ok(());
                }
                Err(ChError::Incomplete) => {}
                Err(e) => return Err(e),
            }
            if !self.fill().await? {
                return Err(ChError::Connection("client left during handshake".into()));
            }
        }
    }

    async fn send(&mut self, packet: ServerPacket) -> ChResult<()> {
        let mut out = BytesMut::new();
        packet.encode(&mut out, CLIENT_REVISION, self.compression)?;
        self.socket.write_all(&out).await?;
        Ok(())
    }

    /// Non-blocking check for a `Cancel` (or a hang-up) from the client.
    fn poll_cancel(&mut self) -> ChResult<bool> {
        loop {
            match self.socket.try_read_buf(&mut self.buf) {
                Ok(0) => return Ok(true),
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        while !self.buf.is_empty() {
            match ClientPacket::decode(&self.buf, CLIENT_REVISION, self.compression.is_enabled()) {
                Ok((packet, used)) => {
                    self.buf.advance(used);
                    if matches!(packet, ClientPacket::Cancel) {
                        self.state.lock().cancels += 1;
                        return Ok(true);
                    }
                }
                Err(ChError::Incomplete) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    async fn run(mut self) -> ChResult<()> {
        self.state.lock().connections += 1;

        let Some(ClientPacket::Hello(hello)) = self.read_packet().await? else {
            return Ok(());
        };
        if self.mode() == Mode::RejectHello {
            return self
                .send(exception(
                    516,
                    "default: Authentication failed: password is incorrect",
                ))
                .await;
        }
        self.send(ServerPacket::Hello(ServerHello {
            name: "ClickHouse".to_string(),
            version_major: 24,
            version_minor: 8,
            revision: CLIENT_REVISION,
            timezone: "UTC".to_string(),
            display_name: "mock-clickhouse".to_string(),
            version_patch: 1,
        }))
        .await?;
        if hello.revision >= MIN_PROTOCOL_VERSION_WITH_ADDENDUM {
            self.read_addendum().await?;
        }

        while let Some(packet) = self.read_packet().await? {
            match packet {
                ClientPacket::Ping => self.send(ServerPacket::Pong).await?,
                ClientPacket::Query(query) => self.handle_query(*query).await?,
                // Leftovers of a query the server already failed.
                ClientPacket::Cancel | ClientPacket::Data(_) => {}
                ClientPacket::Hello(_) => {
                    return Err(ChError::Protocol("second hello".into()));
                }
            }
        }
        Ok(())
    }

    async fn handle_query(&mut self, query: Query) -> ChResult<()> {
        self.compression = if query.compression {
            Compression::Lz4
        } else {
            Compression::None
        };
        // Empty block closing the (absent) external tables.
        match self.read_packet().await? {
            Some(ClientPacket::Data(_)) => {}
            _ => return Err(ChError::Protocol("expected external tables block".into())),
        }
        self.state.lock().queries.push(query.clone());

        let body = query.body.trim().to_string();
        let upper = body.to_ascii_uppercase();
        if upper.starts_with("INSERT INTO") {
            self.handle_insert(&body).await
        } else if upper.starts_with("CREATE TABLE") {
            self.handle_create(&body).await
        } else if upper.starts_with("DROP TABLE") {
            let name = name_after(&body, "DROP TABLE").unwrap_or_default().to_string();
            self.state.lock().tables.remove(&name);
            self.send(ServerPacket::EndOfStream).await
        } else if upper.starts_with("SELECT") {
            self.handle_select(&body, &query).await
        } else {
            self.send(exception(62, format!("Syntax error: failed at position 1 ({})", body)))
                .await
        }
    }

    async fn handle_create(&mut self, body: &str) -> ChResult<()> {
        let name = name_after(body, "CREATE TABLE").unwrap_or_default().to_string();
        let (Some(open), Some(close)) = (body.find('('), body.rfind(')')) else {
            return self.send(exception(62, "Syntax error: missing columns")).await;
        };
        let mut block = Block::new();
        for def in split_top_level(&body[open + 1..close]) {
            let Some((col, ty)) = def.split_once(char::is_whitespace) else {
                return self.send(exception(62, format!("bad column '{}'", def))).await;
            };
            match ColumnType::parse(ty.trim()) {
                Ok(ty) => block.add_column(col, qail_ch::Column::new(ty)),
                Err(e) => return self.send(exception(50, e.to_string())).await,
            }
        }
        self.state.lock().tables.insert(name, block);
        self.send(ServerPacket::EndOfStream).await
    }

    async fn handle_insert(&mut self, body: &str) -> ChResult<()> {
        let name = name_after(body, "INSERT INTO").unwrap_or_default().to_string();
        let (schema, rejected) = {
            let state = self.state.lock();
            (
                state.tables.get(&name).map(Block::clone_empty),
                state.reject_inserts.contains(&name),
            )
        };
        let Some(schema) = schema else {
            return self
                .send(exception(60, format!("Table default.{} does not exist", name)))
                .await;
        };

        self.send(ServerPacket::TableColumns {
            table: String::new(),
            description: "columns format version: 1".to_string(),
        })
        .await?;
        self.send(ServerPacket::Data(schema.clone())).await?;

        if self.mode() == Mode::StallInsert {
            std::future::pending::<()>().await;
        }

        let mut written = 0u64;
        loop {
            match self.read_packet().await? {
                Some(ClientPacket::Data(block)) => {
                    if block.is_empty() {
                        break;
                    }
                    if self.mode() == Mode::DropOnData {
                        // Dropping the session closes the socket.
                        return Err(ChError::Connection("dropped by test".into()));
                    }
                    if rejected {
                        return self
                            .send(exception(
                                53,
                                format!("Cannot insert into {}: rejected by test server", name),
                            ))
                            .await;
                    }
                    if block.names() != schema.names()
                        || block.column_types() != schema.column_types()
                    {
                        return self
                            .send(exception(53, "Type mismatch in inserted block"))
                            .await;
                    }
                    written += block.rows() as u64;
                    let mut state = self.state.lock();
                    if let Some(table) = state.tables.get_mut(&name) {
                        table.append_block(&block)?;
                    }
                    state.received.push(block);
                }
                Some(ClientPacket::Cancel) | None => return Ok(()),
                Some(_) => return Err(ChError::Protocol("unexpected packet in insert".into())),
            }
        }

        self.send(ServerPacket::Progress(Progress {
            written_rows: written,
            ..Progress::default()
        }))
        .await?;
        self.send(ServerPacket::EndOfStream).await
    }

    async fn handle_select(&mut self, body: &str, query: &Query) -> ChResult<()> {
        let upper = body.to_ascii_uppercase();

        if upper.starts_with("SELECT 1") {
            let mut block = Block::with_schema([("1", ColumnType::UInt8)]);
            self.send(ServerPacket::Data(block.clone_empty())).await?;
            block.append_row(&[Value::UInt8(1)])?;
            self.send(ServerPacket::Data(block)).await?;
            return self.send(ServerPacket::EndOfStream).await;
        }

        if upper.starts_with("SELECT PARAMS") {
            let mut block = Block::with_schema(
                query
                    .parameters
                    .iter()
                    .map(|(name, _)| (name.clone(), ColumnType::String)),
            );
            let row: Vec<Value> = query
                .parameters
                .iter()
                .map(|(_, value)| Value::String(value.clone()))
                .collect();
            self.send(ServerPacket::Data(block.clone_empty())).await?;
            block.append_row(&row)?;
            self.send(ServerPacket::Data(block)).await?;
            return self.send(ServerPacket::EndOfStream).await;
        }

        if upper.contains("NUMBERS(") {
            let n: u64 = name_after(body, "NUMBERS(")
                .and_then(|s| s.trim_end_matches(')').parse().ok())
                .unwrap_or(0);
            let header = Block::with_schema([("number", ColumnType::UInt64)]);
            self.send(ServerPacket::Data(header.clone())).await?;
            let mut next = 0;
            while next < n {
                if self.poll_cancel()? {
                    return self.send(ServerPacket::EndOfStream).await;
                }
                let mut block = header.clone_empty();
                let end = (next + NUMBERS_BLOCK_ROWS).min(n);
                for i in next..end {
                    block.append_row(&[Value::UInt64(i)])?;
                }
                next = end;
                self.send(ServerPacket::Data(block)).await?;
            }
            return self.send(ServerPacket::EndOfStream).await;
        }

        if upper.contains("THROWIF") {
            let mut block = Block::with_schema([("x", ColumnType::UInt64)]);
            self.send(ServerPacket::Data(block.clone_empty())).await?;
            for i in 0..3 {
                block.append_row(&[Value::UInt64(i)])?;
            }
            self.send(ServerPacket::Data(block)).await?;
            return self
                .send(exception(
                    395,
                    "Value passed to 'throwIf' function is non-zero",
                ))
                .await;
        }

        if upper.contains("SLEEP(") {
            let header = Block::with_schema([("s", ColumnType::UInt8)]);
            self.send(ServerPacket::Data(header)).await?;
            loop {
                match self.read_packet().await? {
                    Some(ClientPacket::Cancel) => {
                        self.state.lock().cancels += 1;
                        return self.send(ServerPacket::EndOfStream).await;
                    }
                    Some(_) => {}
                    None => return Ok(()),
                }
            }
        }

        let Some(name) = name_after(body, "FROM").map(str::to_string) else {
            return self.send(exception(62, "Syntax error")).await;
        };
        let Some(table) = self.state.lock().tables.get(&name).cloned() else {
            return self
                .send(exception(60, format!("Table default.{} does not exist", name)))
                .await;
        };

        if upper.starts_with("SELECT COUNT()") {
            let mut block = Block::with_schema([("count()", ColumnType::UInt64)]);
            self.send(ServerPacket::Data(block.clone_empty())).await?;
            block.append_row(&[Value::UInt64(table.rows() as u64)])?;
            self.send(ServerPacket::Data(block)).await?;
            return self.send(ServerPacket::EndOfStream).await;
        }

        let has_dynamic = table
            .column_types()
            .iter()
            .any(|ty| matches!(ty, ColumnType::Dynamic { .. }));
        if has_dynamic && !wants_flattened_dynamic(query) {
            return self
                .send(exception(
                    48,
                    "this server only writes Dynamic in the flattened layout",
                ))
                .await;
        }

        self.send(ServerPacket::Data(table.clone_empty())).await?;
        let step = self.state.lock().block_rows.max(1);
        let mut start = 0;
        while start < table.rows() {
            let end = (start + step).min(table.rows());
            let mut part = table.clone_empty();
            for row in start..end {
                part.append_row(&row_values(&table, row)?)?;
            }
            self.send(ServerPacket::Data(part)).await?;
            start = end;
        }

        if upper.contains("WITH TOTALS") && table.rows() > 0 {
            let mut totals = table.clone_empty();
            totals.append_row(&row_values(&table, table.rows() - 1)?)?;
            self.send(ServerPacket::Totals(totals)).await?;
        }
        self.send(ServerPacket::EndOfStream).await
    }
}

fn wants_flattened_dynamic(query: &Query) -> bool {
    query
        .settings
        .iter()
        .chain(&query.hints)
        .any(|(k, v)| {
            k == "output_format_native_use_flattened_dynamic_and_json_serialization" && v == "1"
        })
}

fn row_values(block: &Block, row: usize) -> ChResult<Vec<Value>> {
    (0..block.column_count())
        .map(|col| block.value(row, col).unwrap_or(Err(ChError::NoRows)))
        .collect()
}
