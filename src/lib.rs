//! ClickHouse native-protocol driver.
//!
//! **Features:** columnar blocks with LZ4/ZSTD frames, batch inserts,
//! streaming row cursors, pooled connections with cancellation.
//!
//! ```ignore
//! let driver = ChDriver::connect_url("clickhouse://default@localhost:9000/default").await?;
//! let mut batch = driver.prepare_batch("INSERT INTO events (id, name)").await?;
//! batch.append(&(1u64, "signup"))?;
//! batch.send().await?;
//! ```

pub mod driver;
pub mod error;
pub mod protocol;
pub mod types;

pub use driver::{
    Batch, BatchOptions, CancellationToken, ChConnection, ChDriver, ChDriverBuilder, ChPool,
    PoolConfig, PoolStats, PooledConnection, QueryContext, Row, Rows, TlsConfig,
};
pub use error::{ChError, ChResult, ServerException};
pub use protocol::{Block, Column, ColumnType, Compression};
pub use types::{ChRow, FromRow, FromValue, ToRow, ToValue, TypeError, Value};
