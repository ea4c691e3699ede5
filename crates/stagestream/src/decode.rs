//! Decoding of JSON-RPC block and transaction objects, and wei scaling.
//!
//! Shapes follow `eth_getBlockByNumber` results. Block-level fields that the engine cannot do
//! without (the number) are errors; transaction fields are all optional.

use crate::source::{Block, RawTransaction, SourceError};
use alloy::primitives::U256;
use serde_json::Value;

pub(crate) fn parse_hex_u64(s: &str) -> Result<u64, SourceError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| SourceError::Decode(format!("hex u64 {s:?}: {e}")))
}

fn opt_str(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|x| x.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Decode one entry of a block's `transactions` array.
///
/// Blocks fetched without full transactions list bare hashes; those decode to a transaction
/// with only `hash` set.
pub fn decode_transaction(v: &Value) -> RawTransaction {
    if let Some(hash) = v.as_str() {
        return RawTransaction {
            hash: Some(hash.to_string()),
            ..Default::default()
        };
    }
    RawTransaction {
        hash: opt_str(v, "hash"),
        from: opt_str(v, "from"),
        to: opt_str(v, "to"),
        value: opt_str(v, "value"),
        gas: opt_str(v, "gas"),
    }
}

/// Decode an `eth_getBlockByNumber` result object.
pub fn decode_block(v: &Value) -> Result<Block, SourceError> {
    let number = parse_hex_u64(
        v.get("number")
            .and_then(|n| n.as_str())
            .ok_or_else(|| SourceError::Decode("Missing block number".into()))?,
    )?;
    let transactions = match v.get("transactions") {
        Some(Value::Array(txs)) => txs.iter().map(decode_transaction).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(SourceError::Decode(format!(
                "transactions not an array: {other}"
            )))
        }
    };
    Ok(Block {
        hash: opt_str(v, "hash"),
        number,
        transactions,
    })
}

/// Normalized 32-byte hash (`0x` + 64 lower-case hex), or `None` when the input is not one.
pub fn normalize_tx_hash(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    match hex::decode(body) {
        Ok(bytes) if bytes.len() == 32 => Some(format!("0x{}", hex::encode(bytes))),
        _ => None,
    }
}

/// Parse a hex wei quantity; anything unparseable counts as zero.
pub fn wei_from_hex(raw: Option<&str>) -> U256 {
    let Some(raw) = raw else {
        return U256::ZERO;
    };
    let body = raw.trim().strip_prefix("0x").unwrap_or(raw.trim());
    if body.is_empty() {
        return U256::ZERO;
    }
    U256::from_str_radix(body, 16).unwrap_or(U256::ZERO)
}

/// Scale wei into native units (e.g. ETH) using the currency's decimals.
pub fn to_native_units(wei: U256, decimals: u8) -> f64 {
    let raw: f64 = wei.to_string().parse().unwrap_or(0.0);
    raw / 10f64.powi(i32::from(decimals))
}
