use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CounterSnapshot {
    pub active: u64,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub total_elapsed_ms: u64,
    pub max_elapsed_ms: u64,
}

impl CounterSnapshot {
    pub fn average_elapsed_ms(&self) -> u64 {
        let finished = self.succeeded + self.failed;
        if finished == 0 {
            0
        } else {
            self.total_elapsed_ms / finished
        }
    }
}

/// Call statistics for one URI of one endpoint.
#[derive(Debug, Default)]
pub struct Counter {
    active: AtomicU64,
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    total_elapsed_ms: AtomicU64,
    max_elapsed_ms: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Starts a call only while fewer than `max_active` calls are in flight.
    pub fn try_begin(&self, max_active: u64) -> bool {
        let admitted = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < max_active).then_some(active + 1)
            })
            .is_ok();
        if admitted {
            self.total.fetch_add(1, Ordering::Relaxed);
        }
        admitted
    }

    pub fn end(&self, elapsed: Duration, success: bool) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| active.checked_sub(1));
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let elapsed_ms = elapsed.as_millis() as u64;
        self.total_elapsed_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        self.max_elapsed_ms.fetch_max(elapsed_ms, Ordering::Relaxed);
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            active: self.active.load(Ordering::Acquire),
            total: self.total.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            total_elapsed_ms: self.total_elapsed_ms.load(Ordering::Relaxed),
            max_elapsed_ms: self.max_elapsed_ms.load(Ordering::Relaxed),
        }
    }
}
