//! Keyed reconciliation of packet collections.
//!
//! Every write site of the collection goes through these helpers, so any interleaving of
//! ingestion and progression still leaves at most one packet per id and at most
//! `max_streams` packets.

use crate::packet::{PacketStatus, StreamPacket};
use std::collections::{HashMap, HashSet};

/// Collapse packets sharing an id into one, keeping the strictly more advanced status.
///
/// On equal status the first occurrence wins. The result keeps the position of each id's
/// first occurrence.
pub fn dedupe(packets: Vec<StreamPacket>) -> Vec<StreamPacket> {
    let mut slot: HashMap<String, usize> = HashMap::with_capacity(packets.len());
    let mut out: Vec<StreamPacket> = Vec::with_capacity(packets.len());
    for p in packets {
        match slot.get(&p.id) {
            Some(&i) => {
                if p.status.order() > out[i].status.order() {
                    out[i] = p;
                }
            }
            None => {
                slot.insert(p.id.clone(), out.len());
                out.push(p);
            }
        }
    }
    out
}

/// Put freshly streamed packets in front of `existing`.
///
/// Fresh packets whose id is already live are dropped so a re-streamed id never replaces a
/// further-progressed packet. The result is deduplicated and truncated to `max_streams`,
/// keeping the front (most recently touched) entries. Also returns how many fresh packets
/// were accepted before truncation.
pub fn merge_new(
    existing: Vec<StreamPacket>,
    fresh: Vec<StreamPacket>,
    max_streams: usize,
) -> (Vec<StreamPacket>, usize) {
    let live: HashSet<&str> = existing.iter().map(|p| p.id.as_str()).collect();
    let mut merged = dedupe(
        fresh
            .into_iter()
            .filter(|p| !live.contains(p.id.as_str()))
            .collect(),
    );
    drop(live);
    let accepted = merged.len();
    merged.extend(existing);
    let mut merged = dedupe(merged);
    merged.truncate(max_streams);
    (merged, accepted)
}

/// Index of the packet to evict next: the most recently finalized packet (ties go to the one
/// nearest the front), or the last element when nothing is finalized.
fn eviction_victim(packets: &[StreamPacket]) -> Option<usize> {
    let mut victim: Option<usize> = None;
    for (i, p) in packets.iter().enumerate() {
        if p.status != PacketStatus::Finalized {
            continue;
        }
        match victim {
            Some(v) if packets[v].last_stage_time >= p.last_stage_time => {}
            _ => victim = Some(i),
        }
    }
    victim.or_else(|| packets.len().checked_sub(1))
}

/// Evict packets until `packets.len() <= max_streams`. Returns how many were removed.
pub fn evict_overflow(packets: &mut Vec<StreamPacket>, max_streams: usize) -> usize {
    let mut removed = 0;
    while packets.len() > max_streams {
        match eviction_victim(packets) {
            Some(i) => {
                packets.remove(i);
                removed += 1;
            }
            None => break,
        }
    }
    removed
}
