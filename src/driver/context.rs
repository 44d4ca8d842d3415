//! Per-statement context: query id, settings, parameters, deadline and
//! cancellation.

use crate::error::{ChError, ChResult};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

pub use tokio_util::sync::CancellationToken;

/// Statement-scoped options.
///
/// Cloning shares the cancellation token, so cancelling a clone cancels
/// every statement started from it.
///
/// ```ignore
/// let ctx = QueryContext::new()
///     .setting("max_block_size", "10000")
///     .parameter("name", "alice")
///     .timeout(Duration::from_secs(5));
/// let rows = driver.query_with(&ctx, "SELECT {name:String}").await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub(crate) query_id: Option<String>,
    pub(crate) settings: BTreeMap<String, String>,
    pub(crate) parameters: BTreeMap<String, String>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) cancel: CancellationToken,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the query id reported to the server (and visible in system.query_log).
    pub fn query_id(mut self, id: impl Into<String>) -> Self {
        self.query_id = Some(id.into());
        self
    }

    /// Add a server setting for this statement. Overrides connection defaults.
    pub fn setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(name.into(), value.into());
        self
    }

    /// Bind a `{name:Type}` query parameter. Values travel as strings; the
    /// server parses them into the placeholder's declared type.
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Deadline relative to now.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }

    /// Absolute deadline. An earlier deadline already set wins.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Use an external cancellation token.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The token cancelling statements run with this context.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn get_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive `fut` until it completes, the token is cancelled or the deadline
    /// passes. Cancellation is checked first, so an already-cancelled context
    /// never polls the future.
    pub(crate) async fn run<T, F>(&self, fut: F) -> ChResult<T>
    where
        F: Future<Output = ChResult<T>>,
    {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ChError::Cancelled),
            _ = deadline => Err(ChError::DeadlineExceeded),
            res = fut => res,
        }
    }

    /// Resolves when the context is cancelled or its deadline passes, with
    /// the matching error.
    pub(crate) async fn done(&self) -> ChError {
        match self.run(std::future::pending::<ChResult<()>>()).await {
            Err(e) => e,
            Ok(()) => ChError::Cancelled,
        }
    }
}
