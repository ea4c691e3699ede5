//! Engine, network and block-source configuration.

use std::time::Duration;
use thiserror::Error;

/// Engine tunables. Every field has a default; override at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum time a packet spends in a stage before it may advance.
    pub stage_duration_ms: u64,
    /// Capacity of the packet collection.
    pub max_streams: usize,
    /// Transactions considered per block; the rest are ignored.
    pub max_tx_per_block: usize,
    /// Polling interval for the chain head.
    pub block_fetch_interval_ms: u64,
    /// Progression loop cadence.
    pub progression_tick_ms: u64,
    /// Statistics clock cadence.
    pub stats_tick_ms: u64,
    /// Throughput counter reset window.
    pub stats_reset_window_secs: u64,
    /// Native-unit value above which a transaction is classified as a transfer.
    pub high_value_threshold: f64,
    /// Confirmations displayed for a finalized packet.
    pub finalized_confirmations: u32,
    /// Most recent blocks fetched in one tick when the head jumped ahead.
    pub max_catchup_blocks: u64,
    /// Backoff for re-establishing a push subscription after falling back to polling.
    pub reconnection: ReconnectionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stage_duration_ms: 300,
            max_streams: 100,
            max_tx_per_block: 50,
            block_fetch_interval_ms: 3000,
            progression_tick_ms: 400,
            stats_tick_ms: 1000,
            stats_reset_window_secs: 10,
            high_value_threshold: 0.01,
            finalized_confirmations: 3,
            max_catchup_blocks: 5,
            reconnection: ReconnectionConfig::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("high_value_threshold must be a finite non-negative number, got {0}")]
    Threshold(f64),
    #[error("reconnection max_backoff_secs ({max}) is below initial_backoff_secs ({initial})")]
    Backoff { initial: u64, max: u64 },
}

impl EngineConfig {
    /// Rejects values the loops cannot run with (zero periods panic in `tokio::time::interval`).
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("max_streams", self.max_streams as u64),
            ("max_tx_per_block", self.max_tx_per_block as u64),
            ("block_fetch_interval_ms", self.block_fetch_interval_ms),
            ("progression_tick_ms", self.progression_tick_ms),
            ("stats_tick_ms", self.stats_tick_ms),
            ("stats_reset_window_secs", self.stats_reset_window_secs),
            ("max_catchup_blocks", self.max_catchup_blocks),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if !self.high_value_threshold.is_finite() || self.high_value_threshold < 0.0 {
            return Err(ConfigError::Threshold(self.high_value_threshold));
        }
        let r = &self.reconnection;
        if r.max_backoff_secs < r.initial_backoff_secs {
            return Err(ConfigError::Backoff {
                initial: r.initial_backoff_secs,
                max: r.max_backoff_secs,
            });
        }
        Ok(())
    }

    pub fn block_fetch_interval(&self) -> Duration {
        Duration::from_millis(self.block_fetch_interval_ms)
    }

    pub fn progression_tick(&self) -> Duration {
        Duration::from_millis(self.progression_tick_ms)
    }

    pub fn stats_tick(&self) -> Duration {
        Duration::from_millis(self.stats_tick_ms)
    }
}

/// Reconnection backoff.
#[derive(Debug, Clone)]
pub struct ReconnectionConfig {
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl ReconnectionConfig {
    /// Backoff before attempt `attempt` (0-based): doubles from the initial value up to the max.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let secs = self
            .initial_backoff_secs
            .saturating_mul(factor)
            .min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
        }
    }
}

/// Native currency of a network; `decimals` scales raw wei values into display units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl Default for NativeCurrency {
    fn default() -> Self {
        Self {
            name: "Ether".into(),
            symbol: "ETH".into(),
            decimals: 18,
        }
    }
}

/// Network identity. Only read for labels and value scaling; never validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub chain_name: String,
    pub chain_id: u64,
    /// HTTP JSON-RPC URL.
    pub rpc_url: String,
    /// WebSocket JSON-RPC URL for `newHeads`; `None` means poll only.
    pub ws_url: Option<String>,
    pub native_currency: NativeCurrency,
}

impl NetworkConfig {
    /// Local development chain (Anvil/Hardhat defaults).
    pub fn local(rpc_url: impl Into<String>) -> Self {
        let rpc_url = rpc_url.into();
        let ws_url = Some(
            rpc_url
                .replace("http://", "ws://")
                .replace("https://", "wss://"),
        );
        Self {
            chain_name: "Anvil".into(),
            chain_id: 31337,
            rpc_url,
            ws_url,
            native_currency: NativeCurrency::default(),
        }
    }
}

/// Settings for the JSON-RPC block source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub http_url: String,
    pub ws_url: Option<String>,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    /// Time allowed for the WebSocket connect + subscribe handshake.
    pub subscribe_timeout_secs: u64,
}

impl SourceConfig {
    pub fn from_network(network: &NetworkConfig) -> Self {
        Self {
            http_url: network.rpc_url.clone(),
            ws_url: network.ws_url.clone(),
            request_timeout_secs: 10,
            subscribe_timeout_secs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnection_config_default() {
        let c = ReconnectionConfig::default();
        assert_eq!(c.initial_backoff_secs, 1);
        assert_eq!(c.max_backoff_secs, 60);
    }

    #[test]
    fn reconnection_backoff_doubles_and_caps() {
        let c = ReconnectionConfig::default();
        assert_eq!(c.backoff(0), Duration::from_secs(1));
        assert_eq!(c.backoff(1), Duration::from_secs(2));
        assert_eq!(c.backoff(3), Duration::from_secs(8));
        assert_eq!(c.backoff(6), Duration::from_secs(60));
        assert_eq!(c.backoff(200), Duration::from_secs(60));
    }

    #[test]
    fn engine_config_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.stage_duration_ms, 300);
        assert_eq!(c.max_streams, 100);
        assert_eq!(c.max_tx_per_block, 50);
        assert_eq!(c.block_fetch_interval_ms, 3000);
        assert_eq!(c.progression_tick_ms, 400);
        assert_eq!(c.stats_tick_ms, 1000);
        assert_eq!(c.stats_reset_window_secs, 10);
        assert_eq!(c.high_value_threshold, 0.01);
        assert_eq!(c.finalized_confirmations, 3);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_and_bad_threshold() {
        let c = EngineConfig {
            progression_tick_ms: 0,
            ..Default::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::Zero("progression_tick_ms")));

        let c = EngineConfig {
            high_value_threshold: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(ConfigError::Threshold(_))));

        let c = EngineConfig {
            reconnection: ReconnectionConfig {
                initial_backoff_secs: 10,
                max_backoff_secs: 5,
            },
            ..Default::default()
        };
        assert_eq!(
            c.validate(),
            Err(ConfigError::Backoff { initial: 10, max: 5 })
        );
    }

    #[test]
    fn local_network_derives_ws_url() {
        let n = NetworkConfig::local("http://127.0.0.1:8545");
        assert_eq!(n.ws_url.as_deref(), Some("ws://127.0.0.1:8545"));
        let s = SourceConfig::from_network(&n);
        assert_eq!(s.http_url, "http://127.0.0.1:8545");
        assert_eq!(s.request_timeout_secs, 10);
    }
}
