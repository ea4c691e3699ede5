//! Engine time base.
//!
//! Packet timestamps are unix milliseconds, but they are derived from a monotonic
//! `tokio::time::Instant` anchored at construction, so timer tests can run under paused time.

use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Unix-millisecond clock anchored to a monotonic instant.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    started: Instant,
    wall_at_start_ms: u64,
}

impl Clock {
    pub fn new() -> Self {
        let wall_at_start_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            started: Instant::now(),
            wall_at_start_ms,
        }
    }

    /// Current time in unix milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.wall_at_start_ms + self.started.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
