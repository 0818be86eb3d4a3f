use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time copy of the aggregator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    /// Events accepted into the queue.
    pub submitted: u64,
    /// Events dropped because the queue was full or closed.
    pub dropped: u64,
    /// Events rejected for arriving before the open bucket.
    pub late: u64,
    /// Events rejected for a non-finite timestamp.
    pub invalid: u64,
    /// Non-empty buckets handed to the exporters.
    pub flushed_buckets: u64,
}

/// Shared atomic counters, cloned into the consumer task.
#[derive(Debug, Default)]
pub(crate) struct SharedStats {
    pub submitted: AtomicU64,
    pub dropped: AtomicU64,
    pub late: AtomicU64,
    pub invalid: AtomicU64,
    pub flushed_buckets: AtomicU64,
}

impl SharedStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SinkStats {
        SinkStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            late: self.late.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            flushed_buckets: self.flushed_buckets.load(Ordering::Relaxed),
        }
    }
}
