//! Stale-response discipline for rapid-fire queries.
//!
//! A consumer issuing a new query while an older one is still in flight
//! tracks a monotonically increasing generation. A response is applied
//! only if its generation is still the latest issued one; otherwise it is
//! discarded silently. Dropped responses are not errors and are never
//! reported as failures.

use std::sync::atomic::{AtomicU64, Ordering};

/// Request id issued by a [`GenerationTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

/// Monotonic request counter for one logical consumer (one chart, one
/// paginated table, one filter popover).
///
/// Responses within a consumer are applied in issue order by discarding
/// anything that resolves after a newer request was issued. Independent
/// consumers use independent trackers; no cross-consumer ordering exists
/// or is needed.
#[derive(Debug, Default)]
pub struct GenerationTracker {
    latest: AtomicU64,
}

impl GenerationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next generation, superseding all earlier ones.
    pub fn issue(&self) -> Generation {
        Generation(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Whether `generation` is still the latest issued request.
    pub fn is_latest(&self, generation: Generation) -> bool {
        self.latest.load(Ordering::SeqCst) == generation.0
    }

    /// Gate a resolved result on its generation: `Some` when current,
    /// `None` when a newer request has superseded it.
    pub fn apply<T>(&self, generation: Generation, result: T) -> Option<T> {
        self.is_latest(generation).then_some(result)
    }
}
