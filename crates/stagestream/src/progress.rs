//! Stage progression: the timer-driven state machine over the packet collection.
//!
//! Pure in-memory transitions; the engine supplies `now` and owns the schedule.

use crate::config::EngineConfig;
use crate::merge::{dedupe, evict_overflow};
use crate::packet::StreamPacket;

/// What one progression tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressReport {
    pub advanced: usize,
    pub evicted: usize,
}

/// Advance every packet whose current stage has lasted at least `stage_duration_ms`.
///
/// Finalized packets never change status; their confirmations are pinned to
/// `finalized_confirmations`.
pub fn advance_stages(
    packets: &mut [StreamPacket],
    now_ms: u64,
    stage_duration_ms: u64,
    finalized_confirmations: u32,
) -> usize {
    let mut advanced = 0;
    for p in packets.iter_mut() {
        if p.status.is_terminal() {
            p.confirmations = finalized_confirmations;
            continue;
        }
        if now_ms.saturating_sub(p.last_stage_time) >= stage_duration_ms {
            p.status = p.status.next();
            p.last_stage_time = now_ms;
            p.confirmations = p.confirmations.saturating_add(1);
            advanced += 1;
        }
    }
    advanced
}

/// One full progression tick: advance, evict overflow, then re-check uniqueness.
pub fn progress_tick(
    packets: Vec<StreamPacket>,
    now_ms: u64,
    config: &EngineConfig,
) -> (Vec<StreamPacket>, ProgressReport) {
    let mut packets = packets;
    let advanced = advance_stages(
        &mut packets,
        now_ms,
        config.stage_duration_ms,
        config.finalized_confirmations,
    );
    let evicted = evict_overflow(&mut packets, config.max_streams);
    let packets = dedupe(packets);
    (packets, ProgressReport { advanced, evicted })
}
