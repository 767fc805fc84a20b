//! Sync status snapshots.

use bizsync_core::{OperationId, Resource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// A dropped operation, as reported to status subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncFailure {
    /// Operation that was dropped.
    pub operation_id: OperationId,
    /// Resource it targeted.
    pub resource: Resource,
    /// Last failure reason.
    pub message: String,
    /// When it was dropped.
    pub failed_at: DateTime<Utc>,
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation {} ({}) failed: {}",
            self.operation_id, self.resource, self.message
        )
    }
}

/// Snapshot of the engine's sync state.
///
/// Derived on demand; never persisted.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SyncStatus {
    /// Whether the network monitor reports online.
    pub is_online: bool,
    /// Whether an operation is being dispatched.
    pub is_syncing: bool,
    /// Operations waiting in the queue, including the one in flight.
    pub pending_operations: usize,
    /// Operations waiting out a backoff delay before re-entering the queue.
    pub scheduled_retries: usize,
    /// Operations dropped after exhausting their retries.
    pub failed_operations: usize,
    /// Time of the last successful dispatch.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Most recent failures, oldest first.
    pub errors: Vec<SyncFailure>,
    /// Increases with every published snapshot.
    pub version: u64,
}

impl SyncStatus {
    /// Returns the failures as display strings.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// Returns true when nothing is queued, scheduled or in flight.
    pub fn is_idle(&self) -> bool {
        !self.is_syncing && self.pending_operations == 0 && self.scheduled_retries == 0
    }
}
