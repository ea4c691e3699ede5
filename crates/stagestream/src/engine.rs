//! StreamEngine: ingestion, stage progression and the statistics clock over one shared
//! packet collection.
//!
//! Three tasks share a single mutex. Each tick does its full read-modify-write under the lock
//! and then replaces the published [EngineSnapshot] wholesale, so subscribers never see a
//! partially applied tick. The ingestion task never holds the lock across network I/O.

use crate::clock::Clock;
use crate::config::{ConfigError, EngineConfig, NetworkConfig};
use crate::ingest::{IngestOutcome, Ingestor};
use crate::merge::merge_new;
use crate::packet::StreamPacket;
use crate::progress::progress_tick;
use crate::snapshot::{ConnectionInfo, ConnectionStatus, EngineSnapshot, NetworkLabel, TransportMethod};
use crate::source::{BlockSource, HeadStream, SourceError};
use crate::stats::StatsAggregator;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, timeout, Duration, Instant, MissedTickBehavior};

/// Mutable engine state; only touched under [Shared::state].
struct EngineState {
    packets: Vec<StreamPacket>,
    stats: StatsAggregator,
    connection: ConnectionInfo,
}

struct Shared {
    state: Mutex<EngineState>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    alive: AtomicBool,
    clock: Clock,
    config: EngineConfig,
    network: NetworkLabel,
}

impl Shared {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn publish(&self, state: &EngineState) {
        self.snapshot_tx.send_replace(EngineSnapshot {
            packets: state.packets.clone(),
            stats: state.stats.stats().clone(),
            connection: state.connection.clone(),
            network: self.network.clone(),
        });
    }

    /// Apply one ingestion result. Returns false when the engine was torn down while the
    /// fetch was in flight and the result was discarded.
    async fn apply_ingest(
        &self,
        result: Result<IngestOutcome, SourceError>,
        on_fallback: bool,
    ) -> bool {
        let mut state = self.state.lock().await;
        if !self.is_alive() {
            tracing::debug!("engine stopped, discarding ingestion result");
            return false;
        }
        let now = self.clock.now_ms();
        match result {
            Ok(IngestOutcome::Initialized { .. }) | Ok(IngestOutcome::Unchanged { .. }) => {
                state.connection.mark_success(now, on_fallback);
            }
            Ok(IngestOutcome::Advanced { head, mut packets }) => {
                // Stage timing starts when packets become visible, not when the fetch began.
                for p in &mut packets {
                    p.timestamp = now;
                    p.last_stage_time = now;
                }
                let existing = std::mem::take(&mut state.packets);
                let (merged, accepted) = merge_new(existing, packets, self.config.max_streams);
                let latest = merged
                    .first()
                    .filter(|_| accepted > 0)
                    .map(|p| p.id.clone());
                state.packets = merged;
                state.stats.record_ingest(accepted, head, latest, now);
                state.connection.mark_success(now, on_fallback);
            }
            Err(e) => {
                tracing::warn!(reason = %e, "block fetch failed, retrying next tick");
                state.connection.mark_error(e.to_string());
            }
        }
        self.publish(&state);
        true
    }

    async fn progress(&self) {
        let mut state = self.state.lock().await;
        if !self.is_alive() {
            return;
        }
        let packets = std::mem::take(&mut state.packets);
        let (packets, report) = progress_tick(packets, self.clock.now_ms(), &self.config);
        state.packets = packets;
        if report.evicted > 0 {
            tracing::debug!(evicted = report.evicted, "evicted packets over capacity");
        }
        self.publish(&state);
    }

    async fn stats_tick(&self) {
        let mut state = self.state.lock().await;
        if !self.is_alive() {
            return;
        }
        state.stats.tick(self.clock.now_ms());
        self.publish(&state);
    }

    async fn set_transport(&self, method: TransportMethod, fallback: Option<&SourceError>) {
        let mut state = self.state.lock().await;
        if !self.is_alive() {
            return;
        }
        state.connection.method = method;
        if let Some(e) = fallback {
            state.connection.status = ConnectionStatus::Polling;
            state.connection.error = Some(e.to_string());
        }
        self.publish(&state);
    }
}

/// Handle to a running engine. Dropping it stops the loops; [StreamEngine::shutdown] also
/// closes the block source.
pub struct StreamEngine<S: BlockSource> {
    shared: Arc<Shared>,
    source: Arc<S>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl<S: BlockSource> StreamEngine<S> {
    /// Open `source` and start the ingestion, progression and statistics loops.
    ///
    /// Only invalid configuration is an error. A source that fails to open is reported through
    /// the connection status and retried by the ingestion loop.
    pub async fn start(
        source: Arc<S>,
        network: &NetworkConfig,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let clock = Clock::new();
        let now = clock.now_ms();
        let method = if source.supports_watch() {
            TransportMethod::WebSocket
        } else {
            TransportMethod::Polling
        };
        let state = EngineState {
            packets: Vec::new(),
            stats: StatsAggregator::new(now, config.stats_reset_window_secs),
            connection: ConnectionInfo::connecting(method),
        };
        let network_label = NetworkLabel::from(network);
        let (snapshot_tx, _) = watch::channel(EngineSnapshot {
            packets: Vec::new(),
            stats: state.stats.stats().clone(),
            connection: state.connection.clone(),
            network: network_label.clone(),
        });
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            snapshot_tx,
            alive: AtomicBool::new(true),
            clock,
            config,
            network: network_label,
        });

        if let Err(e) = source.open().await {
            tracing::warn!(reason = %e, "block source failed to open");
            let mut state = shared.state.lock().await;
            state.connection.mark_error(e.to_string());
            shared.publish(&state);
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let ingestor = Ingestor::new(Arc::clone(&source), network, &shared.config);
        let tasks = vec![
            tokio::spawn(ingestion_loop(
                Arc::clone(&shared),
                Arc::clone(&source),
                ingestor,
                shutdown_tx.subscribe(),
            )),
            tokio::spawn(progression_loop(Arc::clone(&shared), shutdown_tx.subscribe())),
            tokio::spawn(stats_loop(Arc::clone(&shared), shutdown_tx.subscribe())),
        ];
        tracing::info!(chain = %network.chain_name, ?method, "stream engine started");

        Ok(Self {
            shared,
            source,
            shutdown_tx,
            tasks: std::sync::Mutex::new(tasks),
        })
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.shared.snapshot_tx.borrow().clone()
    }

    pub fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    /// Stop all loops, close the source and publish a final `disconnected` snapshot.
    /// Safe to call more than once and while a fetch is in flight.
    pub async fn shutdown(&self) {
        let was_alive = self.shared.alive.swap(false, Ordering::AcqRel);
        let _ = self.shutdown_tx.send(());
        let tasks = std::mem::take(&mut *self.lock_tasks());
        for mut task in tasks {
            if timeout(Duration::from_secs(1), &mut task).await.is_err() {
                task.abort();
            }
        }
        if !was_alive {
            return;
        }
        self.source.close().await;
        let mut state = self.shared.state.lock().await;
        state.connection.status = ConnectionStatus::Disconnected;
        self.shared.publish(&state);
        tracing::info!("stream engine stopped");
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<S: BlockSource> Drop for StreamEngine<S> {
    fn drop(&mut self) {
        self.shared.alive.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(());
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..500))
}

/// One ingestion tick. Returns true when the fetch failed and should be retried.
async fn run_ingest<S: BlockSource>(
    shared: &Shared,
    ingestor: &mut Ingestor<S>,
    on_fallback: bool,
) -> bool {
    let result = ingestor.poll(shared.clock.now_ms()).await;
    let failed = result.is_err();
    shared.apply_ingest(result, on_fallback).await;
    failed
}

/// Ingestion: push-driven while a head subscription is up, interval polling otherwise.
///
/// The same [Ingestor] (and so the same cursor) serves both transports.
async fn ingestion_loop<S: BlockSource>(
    shared: Arc<Shared>,
    source: Arc<S>,
    mut ingestor: Ingestor<S>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let can_watch = source.supports_watch();
    let reconnection = shared.config.reconnection.clone();
    let mut heads: Option<HeadStream> = None;
    let mut on_fallback = false;
    let mut resubscribe_attempt: u32 = 0;
    let mut resubscribe_at = Instant::now();
    // Push mode only: a failed fetch is retried on the poll interval until one succeeds.
    let mut retry_pending = false;

    if can_watch {
        match source.watch_heads().await {
            Ok(stream) => heads = Some(stream),
            Err(e) => {
                tracing::warn!(reason = %e, "head subscription failed, falling back to polling");
                on_fallback = true;
                resubscribe_at = Instant::now() + reconnection.backoff(0) + jitter();
                shared.set_transport(TransportMethod::Polling, Some(&e)).await;
            }
        }
    }

    // Polling gets its first tick immediately from the interval; push mode needs one by hand
    // so the cursor is initialized before the first notification.
    let mut poll = interval(shared.config.block_fetch_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    if heads.is_some() && run_ingest(&shared, &mut ingestor, on_fallback).await {
        retry_pending = true;
        poll.reset();
    }

    loop {
        if let Some(stream) = heads.as_mut() {
            tokio::select! {
                _ = shutdown.recv() => break,
                msg = stream.next() => match msg {
                    Some(Ok(height)) => {
                        tracing::debug!(height, "new head notification");
                        retry_pending = run_ingest(&shared, &mut ingestor, on_fallback).await;
                        if retry_pending {
                            poll.reset();
                        }
                    }
                    other => {
                        let e = match other {
                            Some(Err(e)) => e,
                            _ => SourceError::Closed,
                        };
                        tracing::warn!(reason = %e, "head subscription lost, falling back to polling");
                        heads = None;
                        on_fallback = true;
                        retry_pending = false;
                        resubscribe_attempt = 0;
                        resubscribe_at = Instant::now() + reconnection.backoff(0) + jitter();
                        shared.set_transport(TransportMethod::Polling, Some(&e)).await;
                        poll.reset_immediately();
                    }
                },
                _ = poll.tick(), if retry_pending => {
                    tracing::debug!("retrying failed fetch");
                    retry_pending = run_ingest(&shared, &mut ingestor, on_fallback).await;
                }
            }
        } else {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = poll.tick() => {
                    run_ingest(&shared, &mut ingestor, on_fallback).await;
                }
                _ = sleep_until(resubscribe_at), if can_watch && on_fallback => {
                    match source.watch_heads().await {
                        Ok(stream) => {
                            tracing::info!(attempt = resubscribe_attempt, "head subscription restored");
                            heads = Some(stream);
                            on_fallback = false;
                            resubscribe_attempt = 0;
                            shared.set_transport(TransportMethod::WebSocket, None).await;
                            // Pick up anything mined while the subscription was being rebuilt.
                            retry_pending = run_ingest(&shared, &mut ingestor, on_fallback).await;
                            if retry_pending {
                                poll.reset();
                            }
                        }
                        Err(e) => {
                            resubscribe_attempt = resubscribe_attempt.saturating_add(1);
                            let wait = reconnection.backoff(resubscribe_attempt) + jitter();
                            tracing::debug!(reason = %e, attempt = resubscribe_attempt, ?wait, "resubscribe failed");
                            resubscribe_at = Instant::now() + wait;
                        }
                    }
                }
            }
        }
    }
    tracing::debug!("ingestion loop stopped");
}

async fn progression_loop(shared: Arc<Shared>, mut shutdown: broadcast::Receiver<()>) {
    let mut tick = interval(shared.config.progression_tick());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tick.tick() => shared.progress().await,
        }
    }
}

async fn stats_loop(shared: Arc<Shared>, mut shutdown: broadcast::Receiver<()>) {
    let mut tick = interval(shared.config.stats_tick());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tick.tick() => shared.stats_tick().await,
        }
    }
}
