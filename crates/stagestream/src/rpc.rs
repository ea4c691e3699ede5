//! JSON-RPC block source: HTTP for heads and blocks, WebSocket `newHeads` for push delivery.

use crate::config::SourceConfig;
use crate::decode::{decode_block, parse_hex_u64};
use crate::source::{Block, BlockSource, HeadStream, SourceError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Block source over an EVM JSON-RPC endpoint.
pub struct HttpBlockSource {
    config: SourceConfig,
    client: reqwest::Client,
    next_id: AtomicU64,
    closed: AtomicBool,
    subscription: Mutex<Option<AbortHandle>>,
}

impl HttpBlockSource {
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;
        Ok(Self {
            config,
            client,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            subscription: Mutex::new(None),
        })
    }

    fn ensure_open(&self) -> Result<(), SourceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SourceError::Closed);
        }
        Ok(())
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, SourceError> {
        self.ensure_open()?;
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params
        });
        let resp = self
            .client
            .post(&self.config.http_url)
            .json(&body)
            .send()
            .await?;
        let resp = resp.error_for_status()?;
        let json: Value = resp.json().await?;
        if let Some(err) = json.get("error") {
            return Err(SourceError::Rpc(err.to_string()));
        }
        json.get("result")
            .cloned()
            .ok_or_else(|| SourceError::Decode("Missing result".into()))
    }
}

#[async_trait]
impl BlockSource for HttpBlockSource {
    async fn open(&self) -> Result<(), SourceError> {
        let result = self.call("eth_chainId", json!([])).await?;
        let chain_id = result
            .as_str()
            .ok_or_else(|| SourceError::Decode("chainId not string".into()))
            .and_then(parse_hex_u64)?;
        tracing::info!(chain_id, url = %self.config.http_url, "block source reachable");
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(handle) = self.subscription.lock().await.take() {
            handle.abort();
        }
    }

    async fn chain_head(&self) -> Result<u64, SourceError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let s = result
            .as_str()
            .ok_or_else(|| SourceError::Decode("blockNumber not string".into()))?;
        parse_hex_u64(s)
    }

    async fn block(&self, height: u64, include_transactions: bool) -> Result<Block, SourceError> {
        let params = json!([format!("0x{:x}", height), include_transactions]);
        let result = self.call("eth_getBlockByNumber", params).await?;
        if result.is_null() {
            return Err(SourceError::NotFound(height));
        }
        decode_block(&result)
    }

    fn supports_watch(&self) -> bool {
        self.config.ws_url.is_some()
    }

    async fn watch_heads(&self) -> Result<HeadStream, SourceError> {
        self.ensure_open()?;
        let ws_url = self.config.ws_url.as_deref().ok_or(SourceError::Unsupported)?;
        let handshake = Duration::from_secs(self.config.subscribe_timeout_secs);

        let (ws_stream, _) = timeout(handshake, connect_async(ws_url))
            .await
            .map_err(|_| SourceError::Timeout)?
            .map_err(|e| SourceError::Network(format!("WS connect: {e}")))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let sub_req_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sub_req = json!({
            "jsonrpc": "2.0",
            "id": sub_req_id,
            "method": "eth_subscribe",
            "params": ["newHeads"]
        });
        let text = serde_json::to_string(&sub_req).map_err(|e| SourceError::Decode(e.to_string()))?;
        ws_sender
            .send(Message::Text(text))
            .await
            .map_err(|e| SourceError::Network(format!("send subscribe: {e}")))?;

        let sub_id = timeout(handshake, async {
            while let Some(msg) = ws_receiver.next().await {
                let text = match msg.map_err(|e| SourceError::Network(format!("ws: {e}")))? {
                    Message::Text(t) => t,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let v: Value =
                    serde_json::from_str(&text).map_err(|e| SourceError::Decode(e.to_string()))?;
                if v.get("id").and_then(|i| i.as_u64()) != Some(sub_req_id) {
                    continue;
                }
                if let Some(err) = v.get("error") {
                    return Err(SourceError::Rpc(format!("subscribe: {err}")));
                }
                return v["result"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| SourceError::Decode("no subscription id".into()));
            }
            Err(SourceError::Closed)
        })
        .await
        .map_err(|_| SourceError::Timeout)??;
        tracing::info!(%sub_id, url = ws_url, "subscribed to newHeads");

        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(async move {
            // Keep the sink alive for the lifetime of the subscription.
            let _ws_sender = ws_sender;
            while let Some(msg) = ws_receiver.next().await {
                let text = match msg {
                    Ok(Message::Text(t)) => t,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = tx.send(Err(SourceError::Network(format!("ws: {e}")))).await;
                        return;
                    }
                };
                let v: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::debug!(%e, "unparseable ws message skipped");
                        continue;
                    }
                };
                if v.get("method").and_then(|m| m.as_str()) != Some("eth_subscription") {
                    continue;
                }
                let number = v
                    .get("params")
                    .and_then(|p| p.get("result"))
                    .and_then(|r| r.get("number"))
                    .and_then(|n| n.as_str())
                    .ok_or_else(|| SourceError::Decode("newHeads without number".into()))
                    .and_then(parse_hex_u64);
                match number {
                    Ok(n) => {
                        if tx.send(Ok(n)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => tracing::debug!(reason = %e, "newHeads message skipped"),
                }
            }
            let _ = tx.send(Err(SourceError::Closed)).await;
        });

        let mut slot = self.subscription.lock().await;
        if let Some(previous) = slot.replace(task.abort_handle()) {
            previous.abort();
        }
        Ok(HeadStream::with_task(rx, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(ws: Option<&str>) -> HttpBlockSource {
        HttpBlockSource::new(SourceConfig {
            http_url: "http://127.0.0.1:9".into(),
            ws_url: ws.map(str::to_string),
            request_timeout_secs: 1,
            subscribe_timeout_secs: 1,
        })
        .unwrap()
    }

    #[test]
    fn watch_support_follows_ws_url() {
        assert!(!source(None).supports_watch());
        assert!(source(Some("ws://127.0.0.1:9")).supports_watch());
    }

    #[tokio::test]
    async fn closed_source_rejects_calls() {
        let s = source(None);
        s.close().await;
        assert_eq!(s.chain_head().await, Err(SourceError::Closed));
        assert_eq!(s.watch_heads().await.unwrap_err(), SourceError::Closed);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_source_error() {
        let s = source(None);
        let err = s.chain_head().await.unwrap_err();
        assert!(
            matches!(err, SourceError::Network(_) | SourceError::Timeout),
            "got {err:?}"
        );
    }
}
