//! Delay queue for operations waiting out a backoff.

use bizsync_core::SyncOperation;
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

struct Entry {
    due: Instant,
    seq: u64,
    operation: SyncOperation,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

#[derive(Default)]
struct Pending {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

/// Holds operations until their retry delay has elapsed.
///
/// Time comes from `tokio::time`, so a runtime with paused time drives
/// retries deterministically. Operations that fall due at the same
/// instant are released in the order they were scheduled.
#[derive(Default)]
pub struct RetryScheduler {
    pending: Mutex<Pending>,
    wakeup: Notify,
}

impl RetryScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `operation` to be released after `delay`.
    pub fn schedule(&self, operation: SyncOperation, delay: Duration) {
        {
            let mut pending = self.pending.lock();
            let seq = pending.next_seq;
            pending.next_seq += 1;
            pending.heap.push(Reverse(Entry {
                due: Instant::now() + delay,
                seq,
                operation,
            }));
        }
        self.wakeup.notify_one();
    }

    /// Number of operations waiting.
    pub fn len(&self) -> usize {
        self.pending.lock().heap.len()
    }

    /// Returns true if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().heap.is_empty()
    }

    /// Earliest due time, if anything is waiting.
    pub fn next_due(&self) -> Option<Instant> {
        self.pending.lock().heap.peek().map(|Reverse(entry)| entry.due)
    }

    /// Removes and returns every operation due at or before `now`.
    pub fn pop_due(&self, now: Instant) -> Vec<SyncOperation> {
        let mut pending = self.pending.lock();
        let mut due = Vec::new();
        while pending
            .heap
            .peek()
            .is_some_and(|Reverse(entry)| entry.due <= now)
        {
            if let Some(Reverse(entry)) = pending.heap.pop() {
                due.push(entry.operation);
            }
        }
        due
    }

    /// Releases operations to `on_due` as they fall due. Never returns.
    pub async fn run<F>(&self, mut on_due: F)
    where
        F: FnMut(Vec<SyncOperation>),
    {
        loop {
            let due = self.pop_due(Instant::now());
            if !due.is_empty() {
                on_due(due);
            }

            match self.next_due() {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = self.wakeup.notified() => {}
                    }
                }
                None => self.wakeup.notified().await,
            }
        }
    }
}

impl std::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("pending", &self.len())
            .finish()
    }
}
