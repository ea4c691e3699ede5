//! Live transaction stream engine: head-following ingestion and synthetic stage progression.
//!
//! - **Ingestion**: follows the chain head of a [BlockSource] (interval polling, or push via
//!   `newHeads` with transparent fallback to polling) and turns each new transaction into a
//!   Streamed [StreamPacket].
//! - **Progression**: walks packets through Streamed → Indexed → Consolidated → Finalized on a
//!   fixed cadence, independent of real chain finality, keeping the collection bounded.
//! - **Read model**: [StreamEngine::subscribe] yields [EngineSnapshot]s (packets, [StreamStats],
//!   [ConnectionInfo]) after every tick.

pub mod clock;
pub mod config;
pub mod cursor;
pub mod decode;
pub mod engine;
pub mod ingest;
pub mod merge;
pub mod packet;
pub mod progress;
pub mod rpc;
pub mod snapshot;
pub mod source;
pub mod stats;

pub use config::{
    ConfigError, EngineConfig, NativeCurrency, NetworkConfig, ReconnectionConfig, SourceConfig,
};
pub use cursor::Cursor;
pub use engine::StreamEngine;
pub use ingest::{classify, IngestOutcome, Ingestor, PacketFactory};
pub use merge::{dedupe, evict_overflow, merge_new};
pub use packet::{EventType, PacketStatus, StreamPacket};
pub use progress::{advance_stages, progress_tick, ProgressReport};
pub use rpc::HttpBlockSource;
pub use snapshot::{ConnectionInfo, ConnectionStatus, EngineSnapshot, NetworkLabel, TransportMethod};
pub use source::{Block, BlockSource, HeadStream, RawTransaction, SourceError};
pub use stats::{StatsAggregator, StreamStats};
