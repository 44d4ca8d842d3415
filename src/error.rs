//! Error types for qail-ch.
//!
//! Every failure is a typed variant so callers can branch on the category
//! (transport, lifecycle, pool, codec, server) instead of matching strings.

use std::time::Duration;
use thiserror::Error;

/// Exception raised by the server, possibly with nested causes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerException {
    pub code: i32,
    pub name: String,
    pub message: String,
    pub stack_trace: String,
    pub nested: Option<Box<ServerException>>,
}

impl std::fmt::Display for ServerException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code: {}, {}: {}", self.code, self.name, self.message)?;
        if let Some(nested) = &self.nested {
            write!(f, " (caused by {})", nested)?;
        }
        Ok(())
    }
}

/// ClickHouse driver error types.
#[derive(Debug, Error)]
pub enum ChError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Checksum mismatch in compressed frame")]
    ChecksumMismatch,

    /// The decoder ran out of bytes; more input must be read.
    #[error("Incomplete data")]
    Incomplete,

    #[error("Server exception: {0}")]
    Server(ServerException),

    #[error("Cannot parse type '{fragment}': {reason}")]
    TypeParse { fragment: String, reason: String },

    #[error("Column count mismatch: expected {expected}, got {got}")]
    ColumnCountMismatch { expected: usize, got: usize },

    #[error("Column '{column}': expected {expected}, got {got}")]
    ColumnType {
        column: String,
        expected: String,
        got: String,
    },

    #[error("Inconsistent block: column '{column}' has {rows} rows, expected {expected}")]
    InconsistentBlock {
        column: String,
        rows: usize,
        expected: usize,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Batch has already been sent or aborted")]
    BatchAlreadyFinalized,

    #[error("Timed out acquiring a connection after {0:?}")]
    AcquireTimeout(Duration),

    #[error("Pool is closed")]
    PoolClosed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Session is closed")]
    SessionClosed,

    #[error("No rows returned")]
    NoRows,
}

/// Result type for ClickHouse operations.
pub type ChResult<T> = Result<T, ChError>;

impl ChError {
    /// Build a `ColumnType` error for a value that does not fit a column.
    pub(crate) fn mismatch(
        column: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        ChError::ColumnType {
            column: column.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub(crate) fn type_parse(fragment: impl Into<String>, reason: impl Into<String>) -> Self {
        ChError::TypeParse {
            fragment: fragment.into(),
            reason: reason.into(),
        }
    }

    /// Attach a column name to a `ColumnType` error raised below the block
    /// level, where names are not known.
    pub(crate) fn with_column(self, name: &str) -> Self {
        match self {
            ChError::ColumnType {
                column,
                expected,
                got,
            } if column.is_empty() => ChError::ColumnType {
                column: name.to_string(),
                expected,
                got,
            },
            other => other,
        }
    }

    /// Copy of this error for callers that observe a recorded failure more
    /// than once. I/O errors keep their kind but lose their source.
    pub(crate) fn duplicate(&self) -> ChError {
        match self {
            ChError::Io(e) => ChError::Io(std::io::Error::new(e.kind(), e.to_string())),
            ChError::Connection(m) => ChError::Connection(m.clone()),
            ChError::Config(m) => ChError::Config(m.clone()),
            ChError::Protocol(m) => ChError::Protocol(m.clone()),
            ChError::Compression(m) => ChError::Compression(m.clone()),
            ChError::ChecksumMismatch => ChError::ChecksumMismatch,
            ChError::Incomplete => ChError::Incomplete,
            ChError::Server(e) => ChError::Server(e.clone()),
            ChError::TypeParse { fragment, reason } => ChError::TypeParse {
                fragment: fragment.clone(),
                reason: reason.clone(),
            },
            ChError::ColumnCountMismatch { expected, got } => ChError::ColumnCountMismatch {
                expected: *expected,
                got: *got,
            },
            ChError::ColumnType {
                column,
                expected,
                got,
            } => ChError::mismatch(column.clone(), expected.clone(), got.clone()),
            ChError::InconsistentBlock {
                column,
                rows,
                expected,
            } => ChError::InconsistentBlock {
                column: column.clone(),
                rows: *rows,
                expected: *expected,
            },
            ChError::Decode(m) => ChError::Decode(m.clone()),
            ChError::BatchAlreadyFinalized => ChError::BatchAlreadyFinalized,
            ChError::AcquireTimeout(d) => ChError::AcquireTimeout(*d),
            ChError::PoolClosed => ChError::PoolClosed,
            ChError::Cancelled => ChError::Cancelled,
            ChError::DeadlineExceeded => ChError::DeadlineExceeded,
            ChError::SessionClosed => ChError::SessionClosed,
            ChError::NoRows => ChError::NoRows,
        }
    }

    /// Transport failures: the connection that produced them is unusable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ChError::Io(_)
                | ChError::Connection(_)
                | ChError::Protocol(_)
                | ChError::Compression(_)
                | ChError::ChecksumMismatch
        )
    }

    /// Errors worth retrying on a fresh connection (reset, broken pipe,
    /// refused while the server restarts).
    pub fn is_retryable(&self) -> bool {
        match self {
            ChError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::NotConnected
            ),
            ChError::Connection(_) | ChError::AcquireTimeout(_) => true,
            _ => false,
        }
    }

    /// Cancellation or deadline expiry of the caller's context.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ChError::Cancelled | ChError::DeadlineExceeded)
    }

    /// Server error code, if the server raised this error.
    pub fn server_code(&self) -> Option<i32> {
        match self {
            ChError::Server(e) => Some(e.code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChError::ColumnCountMismatch {
            expected: 2,
            got: 3,
        };
        assert_eq!(err.to_string(), "Column count mismatch: expected 2, got 3");

        let err = ChError::type_parse("Array(", "unexpected end of input");
        assert_eq!(
            err.to_string(),
            "Cannot parse type 'Array(': unexpected end of input"
        );
    }

    #[test]
    fn test_classification() {
        let reset = ChError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(reset.is_transport());
        assert!(reset.is_retryable());
        assert!(!ChError::BatchAlreadyFinalized.is_retryable());
        assert!(ChError::Cancelled.is_cancellation());

        let server = ChError::Server(ServerException {
            code: 60,
            name: "DB::Exception".to_string(),
            message: "Table default.missing does not exist".to_string(),
            stack_trace: String::new(),
            nested: None,
        });
        assert_eq!(server.server_code(), Some(60));
        assert!(!server.is_transport());
    }
}
