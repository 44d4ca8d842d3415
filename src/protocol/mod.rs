//! ClickHouse native protocol (Layer 2: pure, sync).
//!
//! No async and no I/O: types, column codecs, blocks, compression frames
//! and packets, all computed over byte buffers.

pub mod block;
pub mod column;
pub mod compression;
pub mod decoder;
pub mod packet;
pub mod types;
pub mod wire;

pub use block::{Block, BlockInfo};
pub use column::{Column, ColumnData};
pub use compression::Compression;
pub use decoder::ServerDecoder;
pub use packet::{
    ClientHello, ClientInfo, ClientPacket, ProfileInfo, Progress, Query, ServerHello,
    ServerPacket,
};
pub use types::ColumnType;
pub use wire::{SliceReader, WireRead, WireWrite};

/// Protocol revision this client speaks. Features gated on later
/// revisions are never negotiated.
pub const CLIENT_REVISION: u64 = 54_460;

pub const MIN_REVISION_WITH_CLIENT_INFO: u64 = 54_032;
pub const MIN_REVISION_WITH_SERVER_TIMEZONE: u64 = 54_058;
pub const MIN_REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO: u64 = 54_060;
pub const MIN_REVISION_WITH_SERVER_DISPLAY_NAME: u64 = 54_372;
pub const MIN_REVISION_WITH_VERSION_PATCH: u64 = 54_401;
pub const MIN_REVISION_WITH_CLIENT_WRITE_INFO: u64 = 54_420;
pub const MIN_REVISION_WITH_SETTINGS_SERIALIZED_AS_STRINGS: u64 = 54_429;
pub const MIN_REVISION_WITH_INTERSERVER_SECRET: u64 = 54_441;
pub const MIN_REVISION_WITH_OPENTELEMETRY: u64 = 54_442;
pub const MIN_PROTOCOL_VERSION_WITH_DISTRIBUTED_DEPTH: u64 = 54_448;
pub const MIN_PROTOCOL_VERSION_WITH_INITIAL_QUERY_START_TIME: u64 = 54_449;
pub const MIN_REVISION_WITH_PARALLEL_REPLICAS: u64 = 54_453;
pub const MIN_REVISION_WITH_CUSTOM_SERIALIZATION: u64 = 54_454;
pub const MIN_PROTOCOL_VERSION_WITH_ADDENDUM: u64 = 54_458;
pub const MIN_PROTOCOL_VERSION_WITH_PARAMETERS: u64 = 54_459;
pub const MIN_PROTOCOL_VERSION_WITH_SERVER_QUERY_TIME_IN_PROGRESS: u64 = 54_460;

/// Oldest server revision the driver accepts: settings must travel as
/// strings, which is the only encoding the driver writes.
pub const MIN_SUPPORTED_REVISION: u64 = MIN_REVISION_WITH_SETTINGS_SERIALIZED_AS_STRINGS;
