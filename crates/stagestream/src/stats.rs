//! Throughput and latest-block bookkeeping.
//!
//! `streams_per_second` is a tumbling window: packets counted since the window start divided
//! by the seconds elapsed, with the counter and base reset once the window length has passed.

use serde::Serialize;

/// Aggregate statistics exposed in the read model.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    /// Id of the newest packet from the most recent successful ingestion.
    pub latest_stream: Option<String>,
    pub streams_per_second: f64,
    /// Wall-clock of the last statistics refresh, unix ms.
    pub update_time: u64,
    pub latest_block_number: Option<u64>,
    /// Packets ingested since the engine started.
    pub total_packets: u64,
}

#[derive(Debug, Clone)]
pub struct StatsAggregator {
    window_ms: u64,
    window_start_ms: u64,
    window_count: u64,
    stats: StreamStats,
}

impl StatsAggregator {
    pub fn new(now_ms: u64, window_secs: u64) -> Self {
        Self {
            window_ms: window_secs.saturating_mul(1000),
            window_start_ms: now_ms,
            window_count: 0,
            stats: StreamStats {
                update_time: now_ms,
                ..Default::default()
            },
        }
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Account for a successful ingestion of `count` new packets from `block_number`.
    pub fn record_ingest(
        &mut self,
        count: usize,
        block_number: u64,
        latest_stream: Option<String>,
        now_ms: u64,
    ) {
        self.window_count += count as u64;
        self.stats.total_packets += count as u64;
        self.stats.latest_block_number = Some(
            self.stats
                .latest_block_number
                .map_or(block_number, |b| b.max(block_number)),
        );
        if latest_stream.is_some() {
            self.stats.latest_stream = latest_stream;
        }
        self.recompute(now_ms);
    }

    /// Clock tick: refresh `update_time` and the rate even when nothing was ingested.
    pub fn tick(&mut self, now_ms: u64) {
        self.stats.update_time = now_ms;
        self.recompute(now_ms);
    }

    fn recompute(&mut self, now_ms: u64) {
        let elapsed_ms = now_ms.saturating_sub(self.window_start_ms);
        if elapsed_ms > 0 {
            self.stats.streams_per_second = self.window_count as f64 * 1000.0 / elapsed_ms as f64;
        }
        if elapsed_ms >= self.window_ms {
            self.window_count = 0;
            self.window_start_ms = now_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_is_count_over_elapsed() {
        let mut s = StatsAggregator::new(0, 10);
        s.record_ingest(3, 101, Some("0xa".into()), 1_000);
        assert_eq!(s.stats().streams_per_second, 3.0);
        s.record_ingest(5, 102, None, 4_000);
        assert_eq!(s.stats().streams_per_second, 2.0);
        assert_eq!(s.stats().latest_block_number, Some(102));
        assert_eq!(s.stats().latest_stream.as_deref(), Some("0xa"));
        assert_eq!(s.stats().total_packets, 8);
    }

    #[test]
    fn window_resets_after_its_length() {
        let mut s = StatsAggregator::new(0, 10);
        s.record_ingest(20, 1, None, 2_000);
        s.tick(10_000);
        assert_eq!(s.stats().streams_per_second, 2.0);
        // Counter restarted at t=10s: nothing new, rate falls to zero.
        s.tick(11_000);
        assert_eq!(s.stats().streams_per_second, 0.0);
        s.record_ingest(4, 2, None, 12_000);
        assert_eq!(s.stats().streams_per_second, 2.0);
        assert_eq!(s.stats().total_packets, 24);
    }

    #[test]
    fn tick_keeps_clock_moving_without_ingestion() {
        let mut s = StatsAggregator::new(500, 10);
        s.tick(1_500);
        assert_eq!(s.stats().update_time, 1_500);
        s.tick(2_500);
        assert_eq!(s.stats().update_time, 2_500);
        assert_eq!(s.stats().latest_block_number, None);
    }

    #[test]
    fn latest_block_never_regresses() {
        let mut s = StatsAggregator::new(0, 10);
        s.record_ingest(1, 50, None, 100);
        s.record_ingest(1, 40, None, 200);
        assert_eq!(s.stats().latest_block_number, Some(50));
    }
}
