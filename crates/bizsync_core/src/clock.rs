//! Clock and identifier sources.
//!
//! The engine never reads wall-clock time or generates identifiers
//! directly; both come through these traits so tests can pin them.

use crate::operation::OperationId;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Source of operation and entity identifiers.
pub trait IdGenerator: Send + Sync {
    /// Generates a new operation ID.
    fn operation_id(&self) -> OperationId;

    /// Generates a new entity ID for payloads that lack one.
    fn entity_id(&self) -> String;
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock fixed at the given time.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Creates a clock fixed at 2024-01-01T00:00:00Z.
    pub fn epoch() -> Self {
        Self::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default())
    }

    /// Sets the current time.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Random UUID v4 identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn operation_id(&self) -> OperationId {
        OperationId::new()
    }

    fn entity_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Predictable identifiers: `00000000-0000-0000-0000-000000000001`, ...
/// for operations and `entity-1`, `entity-2`, ... for entities.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next_operation: AtomicU64,
    next_entity: AtomicU64,
}

impl SequentialIds {
    /// Creates a generator starting at 1.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn operation_id(&self) -> OperationId {
        let n = self.next_operation.fetch_add(1, Ordering::SeqCst) + 1;
        OperationId::from_uuid(Uuid::from_u128(u128::from(n)))
    }

    fn entity_id(&self) -> String {
        let n = self.next_entity.fetch_add(1, Ordering::SeqCst) + 1;
        format!("entity-{n}")
    }
}
