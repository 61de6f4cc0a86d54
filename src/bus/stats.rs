use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic delivery counters since the bus was last started.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Envelopes accepted by `publish`/`request`/`reply`.
    pub published: u64,
    /// Successful handler invocations.
    pub delivered: u64,
    /// Command redeliveries scheduled.
    pub retried: u64,
    /// Envelopes moved to the dead-letter set.
    pub dead_lettered: u64,
    /// Handler invocations that returned an error or panicked.
    pub failed: u64,
    /// Deliveries skipped because the deadline had passed.
    pub expired: u64,
    /// Deliveries discarded (queue full, unsubscribed, bus stopped).
    pub dropped: u64,
}

#[derive(Default)]
pub(crate) struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    failed: AtomicU64,
    expired: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Clone, Copy)]
pub(crate) enum Counter {
    Published,
    Delivered,
    Retried,
    DeadLettered,
    Failed,
    Expired,
    Dropped,
}

impl Counters {
    fn cell(&self, c: Counter) -> &AtomicU64 {
        match c {
            Counter::Published => &self.published,
            Counter::Delivered => &self.delivered,
            Counter::Retried => &self.retried,
            Counter::DeadLettered => &self.dead_lettered,
            Counter::Failed => &self.failed,
            Counter::Expired => &self.expired,
            Counter::Dropped => &self.dropped,
        }
    }

    pub(crate) fn incr(&self, c: Counter) {
        self.cell(c).fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        for c in [
            Counter::Published,
            Counter::Delivered,
            Counter::Retried,
            Counter::DeadLettered,
            Counter::Failed,
            Counter::Expired,
            Counter::Dropped,
        ] {
            self.cell(c).store(0, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> BusStats {
        let get = |c| self.cell(c).load(Ordering::Relaxed);
        BusStats {
            published: get(Counter::Published),
            delivered: get(Counter::Delivered),
            retried: get(Counter::Retried),
            dead_lettered: get(Counter::DeadLettered),
            failed: get(Counter::Failed),
            expired: get(Counter::Expired),
            dropped: get(Counter::Dropped),
        }
    }
}
