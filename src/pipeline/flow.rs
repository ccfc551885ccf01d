// src/pipeline/flow.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{self, Instant};

/// Interval between parity re-checks while loads are still outstanding.
pub const PARITY_RECHECK: Duration = Duration::from_millis(100);

/// Read/write accounting for one extraction action.
///
/// Every record read is settled exactly once, either as a write or as a
/// failure, so `reads == writes + failures` is reachable even when loads
/// fail or a record is abandoned mid-flight.
#[derive(Debug, Default)]
pub struct FlowCounter {
    reads: AtomicU64,
    writes: AtomicU64,
    failures: AtomicU64,
    first_read: OnceLock<Instant>,
    settled: Notify,
}

impl FlowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one read and returns the ticket that settles it.
    pub fn begin(&self) -> InFlight<'_> {
        self.first_read.get_or_init(Instant::now);
        self.reads.fetch_add(1, Ordering::AcqRel);
        InFlight {
            counter: self,
            settled: false,
        }
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Acquire)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> u64 {
        let settled = self.writes() + self.failures();
        self.reads().saturating_sub(settled)
    }

    pub fn is_balanced(&self) -> bool {
        // settled never exceeds reads, so reading it first cannot report a
        // false balance while a new read is being counted
        let settled = self.writes() + self.failures();
        settled == self.reads()
    }

    /// Writes per second since the first read.
    pub fn throughput(&self) -> Option<f64> {
        let elapsed = self.first_read.get()?.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            Some(self.writes() as f64 / elapsed)
        } else {
            None
        }
    }

    /// Waits until every counted read has settled.
    pub async fn wait_balanced(&self) {
        loop {
            let notified = self.settled.notified();
            if self.is_balanced() {
                return;
            }
            let _ = time::timeout(PARITY_RECHECK, notified).await;
        }
    }

    fn settle(&self, slot: &AtomicU64) -> u64 {
        let total = slot.fetch_add(1, Ordering::AcqRel) + 1;
        self.settled.notify_waiters();
        total
    }
}

/// A record that has been read but not yet settled.
///
/// Dropping the ticket without settling it counts the record as failed.
#[must_use = "an unsettled record is counted as a failure"]
#[derive(Debug)]
pub struct InFlight<'a> {
    counter: &'a FlowCounter,
    settled: bool,
}

impl InFlight<'_> {
    /// Marks the record written and returns the new write count.
    pub fn complete(mut self) -> u64 {
        self.settled = true;
        self.counter.settle(&self.counter.writes)
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.counter.settle(&self.counter.failures);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.counter.settle(&self.counter.failures);
        }
    }
}
