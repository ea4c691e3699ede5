//! The block-source capability consumed by the engine.
//!
//! A source answers "what is the chain head" and "give me block N". Sources that can push
//! new heads also implement [BlockSource::watch_heads]; the engine falls back to polling when
//! that is unsupported or fails.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Transaction as reported by the node. Every field is optional: malformed or partial data is
/// mapped to fallbacks during packet conversion rather than dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTransaction {
    pub hash: Option<String>,
    pub from: Option<String>,
    /// `None` for contract creation.
    pub to: Option<String>,
    /// Hex quantity in wei.
    pub value: Option<String>,
    /// Hex quantity.
    pub gas: Option<String>,
}

/// A block and (optionally) its transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    pub hash: Option<String>,
    pub number: u64,
    pub transactions: Vec<RawTransaction>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("block {0} not found")]
    NotFound(u64),
    #[error("head subscription not supported by this source")]
    Unsupported,
    #[error("source closed")]
    Closed,
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else if e.is_decode() {
            SourceError::Decode(e.to_string())
        } else {
            SourceError::Network(e.to_string())
        }
    }
}

/// Push feed of new chain heights. Dropping the stream cancels the producing task.
pub struct HeadStream {
    rx: mpsc::Receiver<Result<u64, SourceError>>,
    task: Option<JoinHandle<()>>,
}

impl HeadStream {
    pub fn new(rx: mpsc::Receiver<Result<u64, SourceError>>) -> Self {
        Self { rx, task: None }
    }

    /// Stream whose producer is `task`; the task is aborted when the stream is dropped.
    pub fn with_task(rx: mpsc::Receiver<Result<u64, SourceError>>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Next head notification; `None` once the producer has gone away.
    pub async fn next(&mut self) -> Option<Result<u64, SourceError>> {
        self.rx.recv().await
    }
}

impl Drop for HeadStream {
    fn drop(&mut self) {
        if let Some(t) = self.task.take() {
            t.abort();
        }
    }
}

impl std::fmt::Debug for HeadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadStream")
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

/// External provider of chain heads and blocks.
#[async_trait]
pub trait BlockSource: Send + Sync + 'static {
    /// Acquire connections. Called once before the engine starts its loops.
    async fn open(&self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Release connections and stop any push subscription. Must not fail.
    async fn close(&self) {}

    /// Latest block height.
    async fn chain_head(&self) -> Result<u64, SourceError>;

    /// Block at `height`, with full transaction objects when `include_transactions`.
    async fn block(&self, height: u64, include_transactions: bool) -> Result<Block, SourceError>;

    /// Subscribe to new heads. Sources without push support keep the default.
    async fn watch_heads(&self) -> Result<HeadStream, SourceError> {
        Err(SourceError::Unsupported)
    }

    /// Whether [BlockSource::watch_heads] is worth trying at all.
    fn supports_watch(&self) -> bool {
        false
    }
}
