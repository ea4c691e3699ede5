//! Common helpers for integration tests.
//! Some helpers are only used by specific test binaries; allow dead_code to avoid per-binary warnings.
#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use stagestream::{Block, BlockSource, EngineSnapshot, HeadStream, RawTransaction, SourceError};
use std::collections::{HashMap, VecDeque};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

#[derive(Default)]
struct FakeState {
    head: u64,
    blocks: HashMap<u64, Block>,
    head_failures: VecDeque<SourceError>,
    open_error: Option<SourceError>,
    watch: bool,
    watch_failures: usize,
    watch_tx: Option<mpsc::Sender<Result<u64, SourceError>>>,
    block_delay: Option<Duration>,
    opened: bool,
    closed: bool,
}

/// Scripted in-memory block source.
#[derive(Default)]
pub struct FakeSource {
    state: Mutex<FakeState>,
}

pub fn tx_hash(block: u64, index: usize) -> String {
    format!("0x{:032x}{:032x}", block, index)
}

impl FakeSource {
    pub fn polling(head: u64) -> Arc<Self> {
        let s = Self::default();
        s.state.lock().unwrap().head = head;
        Arc::new(s)
    }

    /// Watch-capable source whose first `watch_failures` subscription attempts fail.
    pub fn watching(head: u64, watch_failures: usize) -> Arc<Self> {
        let s = Self::default();
        {
            let mut st = s.state.lock().unwrap();
            st.head = head;
            st.watch = true;
            st.watch_failures = watch_failures;
        }
        Arc::new(s)
    }

    /// Add block `number` with `txs` value-less transactions and move the head to it.
    pub fn mine(&self, number: u64, txs: usize) {
        let transactions = (0..txs)
            .map(|i| RawTransaction {
                hash: Some(tx_hash(number, i)),
                from: Some("0x00000000000000000000000000000000000000aa".into()),
                to: Some("0x00000000000000000000000000000000000000bb".into()),
                value: Some("0x0".into()),
                gas: Some("0x5208".into()),
            })
            .collect();
        self.mine_block(Block {
            hash: Some(format!("0x{:064x}", number)),
            number,
            transactions,
        });
    }

    pub fn mine_block(&self, block: Block) {
        let mut st = self.state.lock().unwrap();
        st.head = st.head.max(block.number);
        st.blocks.insert(block.number, block);
    }

    pub fn fail_next_head(&self, e: SourceError) {
        self.state.lock().unwrap().head_failures.push_back(e);
    }

    pub fn fail_open(&self, e: SourceError) {
        self.state.lock().unwrap().open_error = Some(e);
    }

    /// Make the next `n` subscription attempts fail.
    pub fn refuse_watch(&self, n: usize) {
        self.state.lock().unwrap().watch_failures = n;
    }

    pub fn set_block_delay(&self, d: Duration) {
        self.state.lock().unwrap().block_delay = Some(d);
    }

    /// Push a head notification to the live subscription, if any.
    pub async fn notify(&self, head: u64) -> bool {
        let tx = self.state.lock().unwrap().watch_tx.clone();
        match tx {
            Some(tx) => tx.send(Ok(head)).await.is_ok(),
            None => false,
        }
    }

    /// Fail the live subscription with a runtime error.
    pub async fn break_watch(&self) {
        let tx = self.state.lock().unwrap().watch_tx.take();
        if let Some(tx) = tx {
            let _ = tx.send(Err(SourceError::Network("socket reset".into()))).await;
        }
    }

    pub fn opened(&self) -> bool {
        self.state.lock().unwrap().opened
    }

    pub fn closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl BlockSource for FakeSource {
    async fn open(&self) -> Result<(), SourceError> {
        let mut st = self.state.lock().unwrap();
        st.opened = true;
        match st.open_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn close(&self) {
        let mut st = self.state.lock().unwrap();
        st.closed = true;
        st.watch_tx = None;
    }

    async fn chain_head(&self) -> Result<u64, SourceError> {
        let mut st = self.state.lock().unwrap();
        if st.closed {
            return Err(SourceError::Closed);
        }
        match st.head_failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(st.head),
        }
    }

    async fn block(&self, height: u64, _include_transactions: bool) -> Result<Block, SourceError> {
        let delay = self.state.lock().unwrap().block_delay;
        if let Some(d) = delay {
            sleep(d).await;
        }
        self.state
            .lock()
            .unwrap()
            .blocks
            .get(&height)
            .cloned()
            .ok_or(SourceError::NotFound(height))
    }

    fn supports_watch(&self) -> bool {
        self.state.lock().unwrap().watch
    }

    async fn watch_heads(&self) -> Result<HeadStream, SourceError> {
        let mut st = self.state.lock().unwrap();
        if !st.watch {
            return Err(SourceError::Unsupported);
        }
        if st.watch_failures > 0 {
            st.watch_failures -= 1;
            return Err(SourceError::Network("ws connect refused".into()));
        }
        let (tx, rx) = mpsc::channel(16);
        st.watch_tx = Some(tx);
        Ok(HeadStream::new(rx))
    }
}

/// Wait (up to 60s of engine time) for a snapshot matching `pred`.
pub async fn wait_for(
    rx: &mut watch::Receiver<EngineSnapshot>,
    pred: impl FnMut(&EngineSnapshot) -> bool,
) -> EngineSnapshot {
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(pred))
        .await
        .expect("timed out waiting for snapshot")
        .expect("engine dropped")
        .clone()
}

/// Reqwest client that does not use system proxy (avoids SCDynamicStore panic in sandbox/CI).
fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("reqwest client")
}

async fn http_json_rpc(client: &reqwest::Client, url: &str, method: &str, params: Value, id: u64) -> Result<Value> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    });
    let resp = client.post(url).json(&body).send().await.context("HTTP request")?;
    let resp = resp.error_for_status().context("HTTP status")?;
    let v: Value = resp.json().await.context("parse response")?;
    if let Some(err) = v.get("error") {
        anyhow::bail!("RPC error: {}", err);
    }
    v.get("result").cloned().ok_or_else(|| anyhow::anyhow!("Missing result"))
}

/// True if `anvil` is in PATH.
pub fn anvil_available() -> bool {
    Command::new("anvil")
        .arg("--help")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Spawn Anvil on a dynamic port and wait until ready.
pub async fn spawn_anvil() -> Result<(Child, String)> {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")
            .context("bind for port")?;
        listener.local_addr()?.port()
    };
    let rpc_url = format!("http://127.0.0.1:{}", port);
    let mut cmd = Command::new("anvil");
    cmd.arg("--port").arg(port.to_string()).arg("--host").arg("127.0.0.1");
    cmd.stdout(Stdio::null()).stderr(Stdio::null());
    let process = cmd.spawn().context("spawn anvil")?;
    wait_for_rpc(&rpc_url).await?;
    Ok((process, rpc_url))
}

async fn wait_for_rpc(url: &str) -> Result<()> {
    let client = http_client();
    for _ in 0..30 {
        let ok = client
            .post(url)
            .json(&json!({"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}))
            .send()
            .await
            .is_ok();
        if ok {
            return Ok(());
        }
        sleep(Duration::from_millis(100)).await;
    }
    anyhow::bail!("RPC not ready");
}

/// Anvil's first two dev accounts (unlocked by default).
pub const DEV_SENDER: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
pub const DEV_RECIPIENT: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";

/// Send `wei` from the first dev account via eth_sendTransaction; Anvil mines one block per tx.
pub async fn send_value(http_url: &str, to: &str, wei: u128) -> Result<String> {
    let client = http_client();
    let params = json!([{
        "from": DEV_SENDER,
        "to": to,
        "value": format!("0x{:x}", wei),
    }]);
    let result = http_json_rpc(&client, http_url, "eth_sendTransaction", params, 20).await?;
    let hash = result.as_str().ok_or_else(|| anyhow::anyhow!("tx hash not string"))?;
    Ok(hash.to_string())
}
