//! Read model published to subscribers after every tick.

use crate::config::NetworkConfig;
use crate::packet::StreamPacket;
use crate::stats::StreamStats;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    /// Running on the polling fallback after the push subscription failed.
    Polling,
    Error,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMethod {
    WebSocket,
    Polling,
}

/// Health of the block source as seen by ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub status: ConnectionStatus,
    pub method: TransportMethod,
    /// Unix ms of the last successful fetch.
    pub last_block_time: Option<u64>,
    pub error: Option<String>,
}

impl ConnectionInfo {
    pub fn connecting(method: TransportMethod) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            method,
            last_block_time: None,
            error: None,
        }
    }

    /// A fetch succeeded. On the polling fallback the status stays `polling` so the degraded
    /// transport remains visible.
    pub fn mark_success(&mut self, now_ms: u64, on_fallback: bool) {
        self.status = if on_fallback {
            ConnectionStatus::Polling
        } else {
            ConnectionStatus::Connected
        };
        self.last_block_time = Some(now_ms);
        self.error = None;
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = ConnectionStatus::Error;
        self.error = Some(message.into());
    }
}

/// Labels for the network being watched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkLabel {
    pub chain_name: String,
    pub rpc_url: String,
    pub native_symbol: String,
}

impl From<&NetworkConfig> for NetworkLabel {
    fn from(n: &NetworkConfig) -> Self {
        Self {
            chain_name: n.chain_name.clone(),
            rpc_url: n.rpc_url.clone(),
            native_symbol: n.native_currency.symbol.clone(),
        }
    }
}

/// Immutable view of the engine: packets newest first, stats, connection health.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub packets: Vec<StreamPacket>,
    pub stats: StreamStats,
    pub connection: ConnectionInfo,
    pub network: NetworkLabel,
}
