//! Stream packets: one observed transaction moving through the visualization stages.

use serde::Serialize;
use std::collections::BTreeMap;

/// Pipeline stage of a packet. Variants are declared in progression order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PacketStatus {
    Streamed,
    Indexed,
    Consolidated,
    Finalized,
}

impl PacketStatus {
    pub const ALL: [PacketStatus; 4] = [
        PacketStatus::Streamed,
        PacketStatus::Indexed,
        PacketStatus::Consolidated,
        PacketStatus::Finalized,
    ];

    /// Position in the fixed stage order (Streamed = 0 .. Finalized = 3).
    pub fn order(self) -> u8 {
        match self {
            PacketStatus::Streamed => 0,
            PacketStatus::Indexed => 1,
            PacketStatus::Consolidated => 2,
            PacketStatus::Finalized => 3,
        }
    }

    /// Successor stage; Finalized maps to itself.
    pub fn next(self) -> Self {
        match self {
            PacketStatus::Streamed => PacketStatus::Indexed,
            PacketStatus::Indexed => PacketStatus::Consolidated,
            PacketStatus::Consolidated | PacketStatus::Finalized => PacketStatus::Finalized,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == PacketStatus::Finalized
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PacketStatus::Streamed => "Streamed",
            PacketStatus::Indexed => "Indexed",
            PacketStatus::Consolidated => "Consolidated",
            PacketStatus::Finalized => "Finalized",
        }
    }
}

impl std::fmt::Display for PacketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification shown next to each packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    #[serde(rename = "Transfer")]
    Transfer,
    #[serde(rename = "Transaction")]
    Transaction,
    #[serde(rename = "Contract Deploy")]
    ContractDeploy,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Transfer => "Transfer",
            EventType::Transaction => "Transaction",
            EventType::ContractDeploy => "Contract Deploy",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transaction as it moves through Streamed → Indexed → Consolidated → Finalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPacket {
    /// Lower-cased tx hash, or `tx_<fetch_ms>_<index>` when the hash is unusable.
    pub id: String,
    pub status: PacketStatus,
    /// Creation time, unix ms.
    pub timestamp: u64,
    /// Time of the last status change, unix ms.
    pub last_stage_time: u64,
    pub event_type: EventType,
    /// Chain name the packet was observed on.
    pub source: String,
    /// Original hash as reported by the node; empty when missing.
    pub hash: String,
    pub block_number: u64,
    pub confirmations: u32,
    pub data: BTreeMap<String, String>,
}

impl StreamPacket {
    /// A fresh packet in the Streamed stage.
    pub fn streamed(
        id: impl Into<String>,
        event_type: EventType,
        source: impl Into<String>,
        hash: impl Into<String>,
        block_number: u64,
        now_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            status: PacketStatus::Streamed,
            timestamp: now_ms,
            last_stage_time: now_ms,
            event_type,
            source: source.into(),
            hash: hash.into(),
            block_number,
            confirmations: 0,
            data: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_is_total_and_matches_ord() {
        for w in PacketStatus::ALL.windows(2) {
            assert!(w[0].order() < w[1].order());
            assert!(w[0] < w[1]);
        }
        assert_eq!(PacketStatus::Streamed.order(), 0);
        assert_eq!(PacketStatus::Finalized.order(), 3);
    }

    #[test]
    fn next_walks_the_pipeline() {
        assert_eq!(PacketStatus::Streamed.next(), PacketStatus::Indexed);
        assert_eq!(PacketStatus::Indexed.next(), PacketStatus::Consolidated);
        assert_eq!(PacketStatus::Consolidated.next(), PacketStatus::Finalized);
    }

    #[test]
    fn finalized_is_a_fixed_point() {
        let s = PacketStatus::Finalized;
        assert!(s.is_terminal());
        assert_eq!(s.next(), s);
        assert_eq!(s.next().next(), s);
    }

    #[test]
    fn packet_serializes_camel_case() {
        let p = StreamPacket::streamed("0xab", EventType::ContractDeploy, "Anvil", "0xAB", 7, 1000)
            .with_data("gas", "21000");
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["lastStageTime"], 1000);
        assert_eq!(v["eventType"], "Contract Deploy");
        assert_eq!(v["status"], "Streamed");
        assert_eq!(v["blockNumber"], 7);
        assert_eq!(v["data"]["gas"], "21000");
    }
}
