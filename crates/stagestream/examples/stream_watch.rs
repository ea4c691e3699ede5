//! Example: follow a chain and print every engine snapshot as one JSON line.
//!
//! Usage:
//!
//!   cargo run -p stagestream --example stream_watch -- --http-url URL [--ws-url WS_URL]
//!       [--chain NAME] [--symbol SYM] [--decimals N] [--interval-ms MS] [--polling]
//!
//! Without `--ws-url` the WebSocket URL is derived from the HTTP one; `--polling` disables
//! push delivery entirely. Stop with Ctrl-C.

use anyhow::{bail, Context, Result};
use stagestream::{EngineConfig, HttpBlockSource, NetworkConfig, SourceConfig, StreamEngine};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("stagestream=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut http_url = String::new();
    let mut ws_url: Option<String> = None;
    let mut chain: Option<String> = None;
    let mut symbol: Option<String> = None;
    let mut decimals: Option<u8> = None;
    let mut interval_ms: Option<u64> = None;
    let mut polling = false;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--http-url" => {
                i += 1;
                http_url = args.get(i).cloned().unwrap_or_default();
            }
            "--ws-url" => {
                i += 1;
                ws_url = args.get(i).cloned();
            }
            "--chain" => {
                i += 1;
                chain = args.get(i).cloned();
            }
            "--symbol" => {
                i += 1;
                symbol = args.get(i).cloned();
            }
            "--decimals" => {
                i += 1;
                let raw = args.get(i).map(String::as_str).unwrap_or_default();
                decimals = Some(raw.parse().context("--decimals")?);
            }
            "--interval-ms" => {
                i += 1;
                let raw = args.get(i).map(String::as_str).unwrap_or_default();
                interval_ms = Some(raw.parse().context("--interval-ms")?);
            }
            "--polling" => polling = true,
            other => bail!("unknown argument {other}"),
        }
        i += 1;
    }
    if http_url.is_empty() {
        eprintln!("Usage: stream_watch --http-url URL [--ws-url WS_URL] [--chain NAME] [--symbol SYM] [--decimals N] [--interval-ms MS] [--polling]");
        std::process::exit(1);
    }

    let mut network = NetworkConfig::local(http_url);
    if ws_url.is_some() {
        network.ws_url = ws_url;
    }
    if polling {
        network.ws_url = None;
    }
    if let Some(chain) = chain {
        network.chain_name = chain;
    }
    if let Some(symbol) = symbol {
        network.native_currency.symbol = symbol;
    }
    if let Some(decimals) = decimals {
        network.native_currency.decimals = decimals;
    }
    let mut config = EngineConfig::default();
    if let Some(ms) = interval_ms {
        config.block_fetch_interval_ms = ms;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let source = Arc::new(HttpBlockSource::new(SourceConfig::from_network(&network))?);
        let engine = StreamEngine::start(source, &network, config).await?;
        let mut rx = engine.subscribe();
        loop {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let line = serde_json::to_string(&*rx.borrow_and_update())?;
                    println!("{line}");
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        engine.shutdown().await;
        Ok::<(), anyhow::Error>(())
    })
}
