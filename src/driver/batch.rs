//! Batch inserts.
//!
//! A `Batch` buffers rows in a block shaped like the target table and
//! streams it to the server on `flush`/`send`. By default it holds one
//! lease with an open INSERT for its whole life; with
//! `BatchOptions::release_connection` every flush runs a complete INSERT on
//! a freshly acquired lease instead.

use super::context::QueryContext;
use super::pool::{ChPool, PooledConnection};
use super::rows::Rows;
use crate::error::{ChError, ChResult};
use crate::protocol::{Block, Column, ColumnType};
use crate::types::{ChRow, ToRow, Value};

/// Options for `ChDriver::prepare_batch_with_options`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Do not hold a connection between operations.
    pub release_connection: bool,
    /// Discard the connection after any flush failure, including server
    /// exceptions that would otherwise leave it reusable.
    pub close_on_flush_error: bool,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release_connection(mut self, enabled: bool) -> Self {
        self.release_connection = enabled;
        self
    }

    pub fn close_on_flush_error(mut self, enabled: bool) -> Self {
        self.close_on_flush_error = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Active,
    Sent,
    Aborted,
    Closed,
}

/// Direct access to one column of a batch, for columnar loading.
///
/// Rows appended here are only complete once every column has received
/// its values; a flush of an uneven batch fails with `InconsistentBlock`.
pub struct ColumnAppender<'a> {
    name: &'a str,
    column: &'a mut Column,
}

impl ColumnAppender<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn column_type(&self) -> &ColumnType {
        self.column.column_type()
    }

    pub fn append(&mut self, value: &Value) -> ChResult<()> {
        self.column
            .append(value)
            .map_err(|e| e.with_column(self.name))
    }

    /// Append every value; on failure the column keeps the values before
    /// the failing one.
    pub fn append_all<'v, I>(&mut self, values: I) -> ChResult<()>
    where
        I: IntoIterator<Item = &'v Value>,
    {
        for value in values {
            self.append(value)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.column.len()
    }

    pub fn is_empty(&self) -> bool {
        self.column.is_empty()
    }
}

/// A prepared INSERT.
///
/// # Example
/// ```ignore
/// let mut batch = driver.prepare_batch("INSERT INTO events (id, name)").await?;
/// batch.append(&(1u64, "a"))?;
/// batch.append(&(2u64, "b"))?;
/// batch.send().await?;
/// ```
pub struct Batch {
    pool: ChPool,
    ctx: QueryContext,
    query: String,
    options: BatchOptions,
    block: Block,
    conn: Option<PooledConnection>,
    state: BatchState,
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("query", &self.query)
            .field("rows", &self.block.rows())
            .field("state", &self.state)
            .field("leased", &self.conn.is_some())
            .finish()
    }
}

impl Batch {
    /// Start the INSERT and learn the target schema.
    pub(crate) async fn prepare(
        pool: ChPool,
        ctx: QueryContext,
        query: &str,
        options: BatchOptions,
    ) -> ChResult<Self> {
        let query = super::connection::insert_statement(query);
        let mut conn = pool.acquire_with(&ctx).await?;
        let schema = ctx.run(conn.begin_insert(&query, &ctx)).await?;

        let conn = if options.release_connection {
            ctx.run(conn.finish_insert()).await?;
            None
        } else {
            Some(conn)
        };

        tracing::debug!(
            query = %query,
            columns = schema.column_count(),
            release_connection = options.release_connection,
            "batch prepared"
        );

        Ok(Self {
            pool,
            ctx,
            query,
            options,
            block: schema.clone_empty(),
            conn,
            state: BatchState::Active,
        })
    }

    fn check_active(&self) -> ChResult<()> {
        match self.state {
            BatchState::Active => Ok(()),
            _ => Err(ChError::BatchAlreadyFinalized),
        }
    }

    /// Append one row. On failure the batch is unchanged.
    pub fn append<R: ToRow + ?Sized>(&mut self, row: &R) -> ChResult<()> {
        self.check_active()?;
        self.block.append_row(&row.to_row())
    }

    /// Append a struct, matching its fields to columns by name.
    pub fn append_struct<T: ChRow>(&mut self, value: &T) -> ChResult<()> {
        self.check_active()?;
        let fields = T::columns();
        let mut values = value.to_values();
        if values.len() != fields.len() {
            return Err(ChError::ColumnCountMismatch {
                expected: fields.len(),
                got: values.len(),
            });
        }

        let mut row = Vec::with_capacity(self.block.column_count());
        for name in self.block.names() {
            let idx = fields
                .iter()
                .position(|f| f == name)
                .ok_or_else(|| ChError::mismatch(name.as_str(), "struct field", "missing field"))?;
            row.push(std::mem::replace(&mut values[idx], Value::Null));
        }
        self.block.append_row(&row)
    }

    /// Columnar access to column `index`.
    pub fn column(&mut self, index: usize) -> ChResult<ColumnAppender<'_>> {
        self.check_active()?;
        let count = self.block.column_count();
        let (name, column) =
            self.block
                .column_entry_mut(index)
                .ok_or(ChError::ColumnCountMismatch {
                    expected: count,
                    got: index + 1,
                })?;
        Ok(ColumnAppender { name, column })
    }

    /// Append every row of a block with the same schema.
    pub fn append_block(&mut self, block: &Block) -> ChResult<()> {
        self.check_active()?;
        self.block.append_block(block)
    }

    /// Drain a result set into the batch block by block. Returns the number
    /// of rows appended.
    pub async fn append_from(&mut self, rows: &mut Rows) -> ChResult<usize> {
        self.check_active()?;
        let mut appended = 0;
        while let Some(block) = rows.next_block().await? {
            self.block.append_block(&block)?;
            appended += block.rows();
        }
        Ok(appended)
    }

    /// Open a lease with a running INSERT whose schema matches the buffer.
    async fn open_insert(&self) -> ChResult<PooledConnection> {
        let mut conn = self.pool.acquire_with(&self.ctx).await?;
        let schema = self.ctx.run(conn.begin_insert(&self.query, &self.ctx)).await?;
        if schema.names() != self.block.names() || schema.column_types() != self.block.column_types()
        {
            return Err(ChError::Protocol(format!(
                "schema of '{}' changed since the batch was prepared",
                self.query
            )));
        }
        Ok(conn)
    }

    /// Put the buffered block on the wire. In `release_connection` mode
    /// this is a complete INSERT; otherwise it joins the open one.
    async fn transmit(&mut self) -> ChResult<()> {
        // Uneven columnar appends are the caller's to fix; keep the lease.
        self.block.check_consistent()?;
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => self.open_insert().await?,
        };

        let res = if self.options.release_connection {
            let finish = async {
                conn.send_data(&self.block).await?;
                conn.finish_insert().await
            };
            self.ctx.run(finish).await
        } else {
            self.ctx.run(conn.send_data(&self.block)).await
        };

        match res {
            Ok(()) => {
                if !self.options.release_connection {
                    self.conn = Some(conn);
                }
                Ok(())
            }
            Err(e) => Err(self.fail(conn, e)),
        }
    }

    /// Release a lease after a failed operation.
    fn fail(&self, mut conn: PooledConnection, e: ChError) -> ChError {
        if self.options.close_on_flush_error {
            conn.poison();
        }
        tracing::warn!(
            query = %self.query,
            rows = self.block.rows(),
            error = %e,
            "batch flush failed"
        );
        e
    }

    /// Send buffered rows now. A no-op when nothing is buffered.
    ///
    /// On failure the rows stay buffered and the lease is released; the next
    /// flush acquires a new connection and re-issues the INSERT.
    pub async fn flush(&mut self) -> ChResult<()> {
        self.check_active()?;
        if self.block.is_empty() {
            return Ok(());
        }
        self.transmit().await?;
        tracing::debug!(rows = self.block.rows(), "batch flushed");
        self.block.clear();
        Ok(())
    }

    /// Send the remaining rows, commit the INSERT and release the lease.
    ///
    /// A failed `send` keeps the unsent rows and leaves the batch active, so
    /// it can be retried. Once sent, the batch is finalized: every further
    /// operation except `close` returns `BatchAlreadyFinalized`.
    pub async fn send(&mut self) -> ChResult<()> {
        self.check_active()?;
        let rows = self.block.rows();

        if self.options.release_connection {
            if rows > 0 {
                self.transmit().await?;
            }
        } else if rows > 0 || self.conn.is_some() {
            if rows > 0 {
                self.transmit().await?;
            }
            if let Some(mut conn) = self.conn.take() {
                if let Err(e) = self.ctx.run(conn.finish_insert()).await {
                    return Err(self.fail(conn, e));
                }
            }
        }

        self.block.clear();
        self.state = BatchState::Sent;
        tracing::debug!(query = %self.query, rows, "batch sent");
        Ok(())
    }

    /// Discard buffered rows and release the lease without committing.
    pub fn abort(&mut self) -> ChResult<()> {
        self.check_active()?;
        self.discard();
        self.state = BatchState::Aborted;
        tracing::debug!(query = %self.query, "batch aborted");
        Ok(())
    }

    /// Release the lease if still held. Safe to call in any state and any
    /// number of times; an active batch is aborted.
    pub fn close(&mut self) {
        if self.state == BatchState::Active {
            self.discard();
        }
        self.state = BatchState::Closed;
    }

    fn discard(&mut self) {
        self.block.clear();
        if let Some(mut conn) = self.conn.take() {
            // An open INSERT cannot be rolled back on the wire.
            conn.poison();
        }
    }

    /// Rows buffered and not yet flushed.
    pub fn rows(&self) -> usize {
        self.block.rows()
    }

    pub fn columns(&self) -> &[String] {
        self.block.names()
    }

    pub fn column_types(&self) -> Vec<ColumnType> {
        self.block.column_types()
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Whether a connection lease is currently held.
    pub fn is_leased(&self) -> bool {
        self.conn.is_some()
    }
}
