//! Scheduling policies: weighted round-robin (static) and min-RTT (dynamic).
//!
//! Both operate on a single `RegistrySnapshot` so a selection is made against
//! one consistent instant of the registry, never a live view that could
//! change mid-decision.
use crate::registry::{Backend, Mode, RegistrySnapshot};

/// Run the scheduler for one client handshake.
///
/// `next_cursor` advances the shared RR cursor: every inspected position,
/// not just every successful selection, advances it, so concurrent callers
/// interleave fairly over the weighted schedule.
pub fn select(
    snapshot: &RegistrySnapshot,
    mode: Mode,
    max_per_backend: Option<u32>,
    next_cursor: impl FnMut() -> u64,
) -> Option<Backend> {
    let candidates = snapshot.candidates(max_per_backend);
    match mode {
        Mode::Static => static_select(snapshot, &candidates, next_cursor),
        Mode::Dynamic => dynamic_select(snapshot, &candidates, next_cursor),
    }
}

/// Weighted round-robin over the candidate set.
///
/// Advances the cursor once per inspected position (at most `2 * |W|`
/// positions); returns the first inspected backend that is a candidate. If
/// none of the inspected positions qualify, falls back to the first
/// candidate in snapshot order. Returns `None` only if the candidate set is
/// empty.
fn static_select(
    snapshot: &RegistrySnapshot,
    candidates: &[usize],
    mut next_cursor: impl FnMut() -> u64,
) -> Option<Backend> {
    if candidates.is_empty() {
        return None;
    }
    let w = &snapshot.schedule;
    if w.is_empty() {
        return Some(snapshot.entries[candidates[0]].0.clone());
    }
    let limit = 2 * w.len();
    for _ in 0..limit {
        let cursor = next_cursor();
        let idx = w[(cursor as usize) % w.len()];
        if candidates.contains(&idx) {
            return Some(snapshot.entries[idx].0.clone());
        }
    }
    Some(snapshot.entries[candidates[0]].0.clone())
}

/// Min-RTT over the candidate set, ignoring backends with no known RTT.
/// Falls through to weighted round-robin over the same candidate set if no
/// candidate has a known RTT yet. Ties broken by first occurrence in the
/// snapshot.
fn dynamic_select(
    snapshot: &RegistrySnapshot,
    candidates: &[usize],
    next_cursor: impl FnMut() -> u64,
) -> Option<Backend> {
    let best = candidates
        .iter()
        .filter_map(|&i| snapshot.entries[i].1.rtt_ms.map(|rtt| (i, rtt)))
        .min_by_key(|&(_, rtt)| rtt);

    match best {
        Some((i, _)) => Some(snapshot.entries[i].0.clone()),
        None => static_select(snapshot, candidates, next_cursor),
    }
}
