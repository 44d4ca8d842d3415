//! ClickHouse Driver Module (Layer 3: Async I/O)
//!
//! - `stream.rs` - TCP/TLS stream
//! - `connection.rs` - handshake, packet I/O, statement exchanges
//! - `pool.rs` - connection pool and configuration
//! - `context.rs` - per-statement settings, parameters, deadline, cancellation
//! - `rows.rs` / `row.rs` - streaming result sets
//! - `batch.rs` - batch inserts

mod batch;
mod connection;
mod context;
mod pool;
mod row;
mod rows;
mod stream;

pub use batch::{Batch, BatchOptions, BatchState, ColumnAppender};
pub use connection::ChConnection;
pub use context::{CancellationToken, QueryContext};
pub use pool::{ChPool, ConnectionConfig, PoolConfig, PoolStats, PooledConnection};
pub use row::Row;
pub use rows::{CursorState, Rows};
pub use stream::{ChStream, TlsConfig};

use crate::error::{ChError, ChResult};
use crate::protocol::{Compression, ServerHello};
use crate::types::ChRow;

/// ClickHouse driver: a connection pool plus the statement API.
///
/// Cloning is cheap and shares the pool.
///
/// # Example
/// ```ignore
/// let driver = ChDriver::builder()
///     .host("localhost")
///     .compression(Compression::Lz4)
///     .connect()
///     .await?;
///
/// driver.exec("CREATE TABLE t (id UInt64, name String) ENGINE = Memory").await?;
///
/// let mut batch = driver.prepare_batch("INSERT INTO t").await?;
/// batch.append(&(1u64, "a"))?;
/// batch.send().await?;
///
/// let mut rows = driver.query("SELECT id, name FROM t").await?;
/// while rows.next().await {
///     let (id, name): (u64, String) = rows.scan()?;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ChDriver {
    pool: ChPool,
}

impl ChDriver {
    /// Wrap an existing pool.
    pub fn new(pool: ChPool) -> Self {
        Self { pool }
    }

    /// Create a pool from `config` and open its initial connections.
    pub async fn connect(config: PoolConfig) -> ChResult<Self> {
        Ok(Self::new(ChPool::connect(config).await?))
    }

    /// Connect using a `clickhouse://` DSN (see `PoolConfig::from_url`).
    pub async fn connect_url(dsn: &str) -> ChResult<Self> {
        Self::connect(PoolConfig::from_url(dsn)?).await
    }

    /// Create a builder for advanced configuration.
    pub fn builder() -> ChDriverBuilder {
        ChDriverBuilder::new()
    }

    pub fn pool(&self) -> &ChPool {
        &self.pool
    }

    // ==================== Reads ====================

    /// Run a query and stream its rows.
    pub async fn query(&self, sql: &str) -> ChResult<Rows> {
        self.query_with(&QueryContext::default(), sql).await
    }

    pub async fn query_with(&self, ctx: &QueryContext, sql: &str) -> ChResult<Rows> {
        let mut conn = self.pool.acquire_with(ctx).await?;
        let header = ctx.run(conn.start_query(sql, ctx)).await?;
        Ok(Rows::start(
            conn,
            ctx.clone(),
            header,
            self.pool.config().cancel_timeout,
        ))
    }

    /// First row of a query; `NoRows` if there is none. The rest of the
    /// result is cancelled.
    pub async fn query_row(&self, sql: &str) -> ChResult<Row> {
        self.query_row_with(&QueryContext::default(), sql).await
    }

    pub async fn query_row_with(&self, ctx: &QueryContext, sql: &str) -> ChResult<Row> {
        let mut rows = self.query_with(ctx, sql).await?;
        if !rows.next().await {
            return Err(rows.take_err().unwrap_or(ChError::NoRows));
        }
        let row = rows.current_row();
        rows.close().await;
        row
    }

    /// All rows of a query.
    pub async fn fetch_all(&self, sql: &str) -> ChResult<Vec<Row>> {
        self.fetch_all_with(&QueryContext::default(), sql).await
    }

    pub async fn fetch_all_with(&self, ctx: &QueryContext, sql: &str) -> ChResult<Vec<Row>> {
        let mut rows = self.query_with(ctx, sql).await?;
        let mut out = Vec::new();
        while rows.next().await {
            out.push(rows.current_row()?);
        }
        match rows.take_err() {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    /// All rows of a query mapped onto `T` by column name.
    pub async fn select<T: ChRow>(&self, sql: &str) -> ChResult<Vec<T>> {
        self.select_with(&QueryContext::default(), sql).await
    }

    pub async fn select_with<T: ChRow>(&self, ctx: &QueryContext, sql: &str) -> ChResult<Vec<T>> {
        let mut rows = self.query_with(ctx, sql).await?;
        let mut out = Vec::new();
        while rows.next().await {
            match rows.scan_struct::<T>() {
                Ok(value) => out.push(value),
                Err(e) => {
                    rows.close().await;
                    return Err(e);
                }
            }
        }
        match rows.take_err() {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    // ==================== Writes ====================

    /// Prepare a batch INSERT. `sql` is `INSERT INTO table [(columns)]`;
    /// anything after `VALUES` is ignored.
    pub async fn prepare_batch(&self, sql: &str) -> ChResult<Batch> {
        self.prepare_batch_with(&QueryContext::default(), sql, BatchOptions::default())
            .await
    }

    pub async fn prepare_batch_with_options(
        &self,
        sql: &str,
        options: BatchOptions,
    ) -> ChResult<Batch> {
        self.prepare_batch_with(&QueryContext::default(), sql, options)
            .await
    }

    /// The context governs every operation of the batch: acquisition,
    /// flushes and the final send.
    pub async fn prepare_batch_with(
        &self,
        ctx: &QueryContext,
        sql: &str,
        options: BatchOptions,
    ) -> ChResult<Batch> {
        Batch::prepare(self.pool.clone(), ctx.clone(), sql, options).await
    }

    /// Execute a statement that returns no rows (DDL, INSERT ... VALUES
    /// with inline data, ALTER, ...).
    pub async fn exec(&self, sql: &str) -> ChResult<()> {
        self.exec_with(&QueryContext::default(), sql).await
    }

    pub async fn exec_with(&self, ctx: &QueryContext, sql: &str) -> ChResult<()> {
        let mut conn = self.pool.acquire_with(ctx).await?;
        ctx.run(conn.exec(sql, ctx)).await
    }

    /// Server-side buffered insert (`async_insert = 1`). With `wait` the
    /// call returns once the buffer holding the rows has been flushed.
    pub async fn async_insert(&self, sql: &str, wait: bool) -> ChResult<()> {
        self.async_insert_with(&QueryContext::default(), sql, wait)
            .await
    }

    pub async fn async_insert_with(
        &self,
        ctx: &QueryContext,
        sql: &str,
        wait: bool,
    ) -> ChResult<()> {
        let ctx = ctx
            .clone()
            .setting("async_insert", "1")
            .setting("wait_for_async_insert", if wait { "1" } else { "0" });
        self.exec_with(&ctx, sql).await
    }

    // ==================== Connection ====================

    pub async fn ping(&self) -> ChResult<()> {
        self.ping_with(&QueryContext::default()).await
    }

    pub async fn ping_with(&self, ctx: &QueryContext) -> ChResult<()> {
        let mut conn = self.pool.acquire_with(ctx).await?;
        ctx.run(conn.ping()).await
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Close the pool; leases in use are closed when released.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Hello of the server behind the pool.
    pub async fn server_version(&self) -> ChResult<ServerHello> {
        let conn = self.pool.acquire().await?;
        Ok(conn.server_hello().clone())
    }
}

/// Builder for creating a `ChDriver` with a custom configuration.
///
/// # Example
/// ```ignore
/// let driver = ChDriver::builder()
///     .host("localhost")
///     .port(9000)
///     .user("default")
///     .database("analytics")
///     .password("secret")
///     .connect()
///     .await?;
/// ```
#[derive(Default)]
pub struct ChDriverBuilder {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    database: Option<String>,
    password: Option<String>,
    timeout: Option<std::time::Duration>,
    compression: Compression,
    max_connections: Option<usize>,
    tls: Option<TlsConfig>,
}

impl ChDriverBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host (default: "127.0.0.1").
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port (default: 9000).
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the username (default: "default").
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the database name (default: "default").
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set connection timeout (optional).
    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// The pool configuration this builder describes.
    pub fn config(self) -> PoolConfig {
        let mut config = PoolConfig::new(
            self.host.as_deref().unwrap_or("127.0.0.1"),
            self.port.unwrap_or(9000),
            self.user.as_deref().unwrap_or("default"),
            self.database.as_deref().unwrap_or("default"),
        )
        .compression(self.compression);
        if let Some(password) = &self.password {
            config = config.password(password);
        }
        if let Some(timeout) = self.timeout {
            config = config.connect_timeout(timeout);
        }
        if let Some(max) = self.max_connections {
            config = config.max_connections(max);
        }
        if let Some(tls) = self.tls {
            config = config.tls(tls);
        }
        config
    }

    /// Connect to ClickHouse using the configured parameters.
    pub async fn connect(self) -> ChResult<ChDriver> {
        ChDriver::connect(self.config()).await
    }
}
