//! Block ingestion: turn new blocks from a [BlockSource] into Streamed packets.
//!
//! The [Ingestor] owns the cursor. It only fetches; applying the result to the shared
//! collection is the engine's job, so a fetch that outlives the engine can be discarded.

use crate::config::{EngineConfig, NativeCurrency, NetworkConfig};
use crate::cursor::Cursor;
use crate::decode::{normalize_tx_hash, to_native_units, wei_from_hex};
use crate::packet::{EventType, StreamPacket};
use crate::source::{BlockSource, RawTransaction, SourceError};
use std::sync::Arc;

/// Result of one successful ingestion tick.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// First head seen since start: cursor recorded, nothing streamed.
    Initialized { head: u64 },
    /// Head has not moved past the cursor.
    Unchanged { head: u64 },
    /// New blocks were read; `packets` are newest block first.
    Advanced { head: u64, packets: Vec<StreamPacket> },
}

/// Classify a transaction by recipient and value in native units.
pub fn classify(tx: &RawTransaction, value_native: f64, high_value_threshold: f64) -> EventType {
    if tx.to.is_none() {
        EventType::ContractDeploy
    } else if value_native > high_value_threshold {
        EventType::Transfer
    } else {
        EventType::Transaction
    }
}

/// Maps raw transactions to packets for one network.
#[derive(Debug, Clone)]
pub struct PacketFactory {
    chain_name: String,
    currency: NativeCurrency,
    high_value_threshold: f64,
}

impl PacketFactory {
    pub fn new(network: &NetworkConfig, high_value_threshold: f64) -> Self {
        Self {
            chain_name: network.chain_name.clone(),
            currency: network.native_currency.clone(),
            high_value_threshold,
        }
    }

    /// Build a Streamed packet. `index` feeds the synthetic id used when the hash is missing
    /// or malformed; it must be unique within one fetch.
    pub fn packet(
        &self,
        tx: &RawTransaction,
        index: usize,
        block_number: u64,
        fetch_ms: u64,
    ) -> StreamPacket {
        let normalized = tx.hash.as_deref().and_then(normalize_tx_hash);
        let id = match &normalized {
            Some(h) => h.clone(),
            None => format!("tx_{fetch_ms}_{index}"),
        };
        let wei = wei_from_hex(tx.value.as_deref());
        let value = to_native_units(wei, self.currency.decimals);
        let event_type = classify(tx, value, self.high_value_threshold);
        let gas = tx
            .gas
            .as_deref()
            .and_then(|g| crate::decode::parse_hex_u64(g).ok())
            .unwrap_or(0);
        StreamPacket::streamed(
            id,
            event_type,
            self.chain_name.as_str(),
            tx.hash.clone().unwrap_or_default(),
            block_number,
            fetch_ms,
        )
        .with_data("from", tx.from.clone().unwrap_or_default())
        .with_data("to", tx.to.clone().unwrap_or_default())
        .with_data("value", format!("{value:.6} {}", self.currency.symbol))
        .with_data("gas", gas.to_string())
    }
}

/// Pulls new blocks past the cursor.
pub struct Ingestor<S: BlockSource> {
    source: Arc<S>,
    cursor: Cursor,
    factory: PacketFactory,
    max_tx_per_block: usize,
    max_catchup_blocks: u64,
}

impl<S: BlockSource> Ingestor<S> {
    pub fn new(source: Arc<S>, network: &NetworkConfig, config: &EngineConfig) -> Self {
        Self {
            source,
            cursor: Cursor::default(),
            factory: PacketFactory::new(network, config.high_value_threshold),
            max_tx_per_block: config.max_tx_per_block,
            max_catchup_blocks: config.max_catchup_blocks.max(1),
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// One ingestion tick. On error the cursor is left untouched so the next tick retries the
    /// same range.
    pub async fn poll(&mut self, fetch_ms: u64) -> Result<IngestOutcome, SourceError> {
        let head = self.source.chain_head().await?;
        let Some(last) = self.cursor.last_seen_block() else {
            self.cursor.advance_to(head);
            tracing::info!(head, "cursor initialized at chain head");
            return Ok(IngestOutcome::Initialized { head });
        };
        if head <= last {
            return Ok(IngestOutcome::Unchanged { head });
        }

        let first = (last + 1).max(head.saturating_sub(self.max_catchup_blocks - 1));
        if first > last + 1 {
            tracing::warn!(
                skipped = first - last - 1,
                from = last + 1,
                to = first - 1,
                "head jumped ahead, skipping older blocks"
            );
        }

        let mut blocks = Vec::with_capacity((head - first + 1) as usize);
        for height in first..=head {
            blocks.push(self.source.block(height, true).await?);
        }

        let mut packets = Vec::new();
        let mut index = 0usize;
        for block in blocks.iter().rev() {
            let considered = block.transactions.len().min(self.max_tx_per_block);
            if considered < block.transactions.len() {
                tracing::debug!(
                    block = block.number,
                    total = block.transactions.len(),
                    considered,
                    "capping transactions per block"
                );
            }
            for tx in &block.transactions[..considered] {
                packets.push(self.factory.packet(tx, index, block.number, fetch_ms));
                index += 1;
            }
        }
        self.cursor.advance_to(head);
        tracing::debug!(head, blocks = blocks.len(), packets = packets.len(), "ingested new blocks");
        Ok(IngestOutcome::Advanced { head, packets })
    }
}
