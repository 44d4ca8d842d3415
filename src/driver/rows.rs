//! Streaming result set.
//!
//! A background task owns the connection lease, reads packets and pushes
//! data blocks into a bounded queue; failures go to a separate one-shot
//! slot. `Rows::next` is the only suspension point on the caller's side.
//! Closing or dropping the cursor closes the queue, after which the task
//! cancels the statement, drains the connection and releases it.

use super::context::QueryContext;
use super::pool::PooledConnection;
use super::row::Row;
use crate::error::{ChError, ChResult};
use crate::protocol::{Block, ColumnType, ServerPacket};
use crate::types::{ChRow, FromRow, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Blocks decoded ahead of the consumer.
const BLOCK_QUEUE_DEPTH: usize = 2;

/// Cursor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Created, `next` not called yet
    Idle,
    /// Positioned on a row or waiting for one
    Active,
    /// Clean end of stream
    Exhausted,
    /// Stream failed; see `Rows::err`
    Errored,
    /// Closed by the caller
    Closed,
}

enum Outcome {
    Done,
    Abandoned,
    Failed(ChError),
}

/// Pull-based iterator over the rows of one statement.
pub struct Rows {
    columns: Arc<[String]>,
    types: Vec<ColumnType>,
    current: Option<Block>,
    /// Rows of `current` already handed out; the current row is `offset - 1`.
    offset: usize,
    blocks: mpsc::Receiver<Block>,
    error: Option<oneshot::Receiver<ChError>>,
    err: Option<ChError>,
    totals: Arc<Mutex<Option<Block>>>,
    task: Option<JoinHandle<()>>,
    state: CursorState,
}

impl std::fmt::Debug for Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("columns", &self.columns)
            .field("state", &self.state)
            .finish()
    }
}

impl Rows {
    /// Take over a connection whose statement produced `header`.
    pub(crate) fn start(
        conn: PooledConnection,
        ctx: QueryContext,
        header: Option<Block>,
        cancel_timeout: Duration,
    ) -> Self {
        let (tx, blocks) = mpsc::channel(BLOCK_QUEUE_DEPTH);
        let (err_tx, err_rx) = oneshot::channel();
        let totals = Arc::new(Mutex::new(None));

        let Some(header) = header else {
            // Statement without a result set: the connection is already idle.
            drop(conn);
            return Self {
                columns: Arc::from(Vec::new()),
                types: Vec::new(),
                current: None,
                offset: 0,
                blocks,
                error: None,
                err: None,
                totals,
                task: None,
                state: CursorState::Exhausted,
            };
        };

        let columns: Arc<[String]> = Arc::from(header.names().to_vec());
        let types = header.column_types();
        let current = (!header.is_empty()).then_some(header);

        let task = tokio::spawn(pump(
            conn,
            ctx,
            tx,
            err_tx,
            totals.clone(),
            cancel_timeout,
        ));

        Self {
            columns,
            types,
            current,
            offset: 0,
            blocks,
            error: Some(err_rx),
            err: None,
            totals,
            task: Some(task),
            state: CursorState::Idle,
        }
    }

    /// Advance to the next row. Returns `false` at the end of the stream or
    /// on failure; `err()` tells the two apart.
    pub async fn next(&mut self) -> bool {
        match self.state {
            CursorState::Exhausted | CursorState::Errored | CursorState::Closed => return false,
            CursorState::Idle => self.state = CursorState::Active,
            CursorState::Active => {}
        }

        loop {
            if let Some(block) = &self.current {
                if self.offset < block.rows() {
                    self.offset += 1;
                    return true;
                }
            }

            match self.blocks.recv().await {
                Some(block) => {
                    self.current = Some(block);
                    self.offset = 0;
                }
                None => {
                    self.current = None;
                    self.finish();
                    return false;
                }
            }
        }
    }

    /// The queue closed: record the task's error, if any.
    fn finish(&mut self) {
        let failure = self.error.take().and_then(|mut rx| rx.try_recv().ok());
        match failure {
            Some(e) => {
                tracing::debug!(error = %e, "row stream failed");
                self.err = Some(e);
                self.state = CursorState::Errored;
            }
            None => self.state = CursorState::Exhausted,
        }
        self.task = None;
    }

    fn check_open(&self) -> ChResult<()> {
        match (&self.state, &self.err) {
            (CursorState::Closed, _) => Err(ChError::SessionClosed),
            (_, Some(e)) => Err(e.duplicate()),
            _ => Ok(()),
        }
    }

    fn current_values(&self) -> ChResult<Vec<Value>> {
        self.check_open()?;
        let block = match &self.current {
            Some(block) if self.offset > 0 => block,
            _ => return Err(ChError::NoRows),
        };
        let row = self.offset - 1;
        (0..block.column_count())
            .map(|col| {
                block
                    .value(row, col)
                    .unwrap_or(Err(ChError::NoRows))
                    .map_err(|e| e.with_column(&self.columns[col]))
            })
            .collect()
    }

    /// The row the cursor is positioned on.
    pub fn current_row(&self) -> ChResult<Row> {
        Ok(Row::new(self.columns.clone(), self.current_values()?))
    }

    /// Read the current row by position into a tuple.
    pub fn scan<T: FromRow>(&self) -> ChResult<T> {
        self.current_row()?.scan()
    }

    /// Read the current row into a struct by column name.
    pub fn scan_struct<T: ChRow>(&self) -> ChResult<T> {
        T::from_row(&self.current_row()?)
    }

    /// The `WITH TOTALS` row, available once the stream is exhausted.
    pub fn totals(&self) -> Option<Row> {
        let totals = self.totals.lock();
        let block = totals.as_ref().filter(|b| !b.is_empty())?;
        let values = (0..block.column_count())
            .map(|col| block.value(0, col).and_then(Result::ok))
            .collect::<Option<Vec<_>>>()?;
        Some(Row::new(self.columns.clone(), values))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_types(&self) -> &[ColumnType] {
        &self.types
    }

    /// Failure that ended the stream, if any.
    pub fn err(&self) -> Option<&ChError> {
        self.err.as_ref()
    }

    pub(crate) fn take_err(&mut self) -> Option<ChError> {
        self.err.take()
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Remaining rows as whole blocks, for bulk transfer into a batch.
    pub(crate) async fn next_block(&mut self) -> ChResult<Option<Block>> {
        self.check_open()?;
        if matches!(self.state, CursorState::Exhausted) {
            return Ok(None);
        }
        self.state = CursorState::Active;

        if let Some(block) = self.current.take() {
            if self.offset == 0 {
                self.offset = block.rows();
                return Ok(Some(block));
            }
            if self.offset < block.rows() {
                let mut rest = block.clone_empty();
                for row in self.offset..block.rows() {
                    let values = (0..block.column_count())
                        .map(|col| block.value(row, col).unwrap_or(Err(ChError::NoRows)))
                        .collect::<ChResult<Vec<_>>>()?;
                    rest.append_row(&values)?;
                }
                self.offset = block.rows();
                return Ok(Some(rest));
            }
        }

        match self.blocks.recv().await {
            Some(block) => {
                self.offset = block.rows();
                Ok(Some(block))
            }
            None => {
                self.finish();
                match &self.err {
                    Some(e) => Err(e.duplicate()),
                    None => Ok(None),
                }
            }
        }
    }

    /// Stop the stream and release the connection. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if self.state == CursorState::Closed {
            return;
        }
        self.state = CursorState::Closed;
        self.current = None;
        self.blocks.close();
        while self.blocks.try_recv().is_ok() {}
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "row stream task failed");
            }
        }
    }
}

/// Background half of the cursor.
async fn pump(
    mut conn: PooledConnection,
    ctx: QueryContext,
    tx: mpsc::Sender<Block>,
    err_tx: oneshot::Sender<ChError>,
    totals: Arc<Mutex<Option<Block>>>,
    cancel_timeout: Duration,
) {
    let outcome = loop {
        let packet = tokio::select! {
            biased;
            _ = tx.closed() => break Outcome::Abandoned,
            e = ctx.done() => break Outcome::Failed(e),
            packet = conn.recv_packet() => packet,
        };

        match packet {
            Ok(ServerPacket::Data(block)) => {
                if block.is_empty() {
                    continue;
                }
                tokio::select! {
                    biased;
                    e = ctx.done() => break Outcome::Failed(e),
                    sent = tx.send(block) => {
                        if sent.is_err() {
                            break Outcome::Abandoned;
                        }
                    }
                }
            }
            Ok(ServerPacket::Totals(block)) => *totals.lock() = Some(block),
            Ok(ServerPacket::Exception(e)) => break Outcome::Failed(ChError::Server(e)),
            Ok(ServerPacket::EndOfStream) => break Outcome::Done,
            Ok(_) => {}
            Err(e) => {
                conn.poison();
                break Outcome::Failed(e);
            }
        }
    };

    let needs_cancel = match &outcome {
        Outcome::Done => false,
        Outcome::Abandoned => true,
        Outcome::Failed(e) => e.is_cancellation(),
    };
    if needs_cancel && conn.is_poisoned() {
        tracing::debug!("cancelling unfinished query");
        if let Err(e) = conn.cancel_and_drain(cancel_timeout).await {
            tracing::warn!(error = %e, "cancel failed, discarding connection");
        }
    }

    if let Outcome::Failed(e) = outcome {
        let _ = err_tx.send(e);
    }
    // Release the lease before the consumer can observe the end of stream.
    drop(conn);
    drop(tx);
}
