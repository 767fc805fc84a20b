//! Availability tracking for the engine's backends.

use bizsync_core::Clock;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Consecutive errors above which a source is reported as unhealthy.
const MAX_HEALTHY_ERRORS: u32 = 5;

/// Consecutive errors after which [`SourceRegistry::should_attempt`]
/// starts holding a source back.
const SUSPEND_AFTER_ERRORS: u32 = 3;

/// A backend the writer talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Durable, authoritative record store.
    RecordStore,
    /// Real-time collaborative mirror.
    Collaborative,
    /// Local/offline cache.
    LocalCache,
}

impl DataSource {
    /// Returns the source name.
    pub fn name(&self) -> &'static str {
        match self {
            DataSource::RecordStore => "record_store",
            DataSource::Collaborative => "collaborative",
            DataSource::LocalCache => "local_cache",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Observed state of one backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSourceRecord {
    /// Which backend.
    pub source: DataSource,
    /// Display name.
    pub name: String,
    /// Whether the last attempt succeeded.
    pub available: bool,
    /// Time of the last attempt, if any.
    pub last_checked: Option<DateTime<Utc>>,
    /// Failures since the last success.
    pub error_count: u32,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

impl DataSourceRecord {
    fn new(source: DataSource) -> Self {
        Self {
            source,
            name: source.name().to_string(),
            available: true,
            last_checked: None,
            error_count: 0,
            last_error: None,
        }
    }
}

/// Aggregated health of all registered sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// True when no issues were found.
    pub healthy: bool,
    /// One line per unhealthy source.
    pub issues: Vec<String>,
}

/// Registry of backend availability.
///
/// Records are created once, when the engine is assembled, for each
/// configured backend and are never removed.
pub struct SourceRegistry {
    clock: Arc<dyn Clock>,
    records: RwLock<Vec<DataSourceRecord>>,
}

impl SourceRegistry {
    /// Creates a registry tracking `sources`.
    pub fn new(clock: Arc<dyn Clock>, sources: &[DataSource]) -> Self {
        let mut records: Vec<DataSourceRecord> = Vec::with_capacity(sources.len());
        for source in sources {
            if !records.iter().any(|r| r.source == *source) {
                records.push(DataSourceRecord::new(*source));
            }
        }

        Self {
            clock,
            records: RwLock::new(records),
        }
    }

    /// Records the outcome of an attempt against `source`.
    ///
    /// With no error the attempt counts as a success: the source becomes
    /// available and its error count resets. With an error the count is
    /// incremented and availability is set to `available`.
    pub fn update_status(&self, source: DataSource, available: bool, error: Option<String>) {
        let now = self.clock.now();
        let mut records = self.records.write();
        let Some(record) = records.iter_mut().find(|r| r.source == source) else {
            tracing::debug!(source = %source, "status update for unregistered source");
            return;
        };

        record.last_checked = Some(now);
        match error {
            None => {
                record.available = true;
                record.error_count = 0;
                record.last_error = None;
            }
            Some(message) => {
                record.available = available;
                record.error_count = record.error_count.saturating_add(1);
                record.last_error = Some(message);
            }
        }
    }

    /// Records a successful attempt.
    pub fn record_success(&self, source: DataSource) {
        self.update_status(source, true, None);
    }

    /// Records a failed attempt and marks the source unavailable.
    pub fn record_failure(&self, source: DataSource, message: impl Into<String>) {
        self.update_status(source, false, Some(message.into()));
    }

    /// Returns a copy of every record.
    pub fn status(&self) -> Vec<DataSourceRecord> {
        self.records.read().clone()
    }

    /// Returns the record for one source.
    pub fn get(&self, source: DataSource) -> Option<DataSourceRecord> {
        self.records.read().iter().find(|r| r.source == source).cloned()
    }

    /// Returns true if `source` is registered and currently available.
    pub fn is_available(&self, source: DataSource) -> bool {
        self.get(source).is_some_and(|r| r.available)
    }

    /// Returns true if an attempt against `source` should be made now.
    ///
    /// A source that is unavailable after three or more consecutive
    /// failures is held back until `retry_after` has passed since its
    /// last attempt; the next attempt then decides whether it recovers.
    /// Unregistered sources are never attempted.
    pub fn should_attempt(&self, source: DataSource, retry_after: chrono::Duration) -> bool {
        let Some(record) = self.get(source) else {
            return false;
        };
        if record.available || record.error_count < SUSPEND_AFTER_ERRORS {
            return true;
        }
        match record.last_checked {
            Some(at) => self.clock.now() - at >= retry_after,
            None => true,
        }
    }

    /// Flags sources that are unavailable or failing repeatedly.
    pub fn health_check(&self) -> HealthReport {
        let records = self.records.read();
        let mut issues = Vec::new();

        for record in records.iter() {
            if !record.available {
                match &record.last_error {
                    Some(error) => issues.push(format!("{} is unavailable: {error}", record.name)),
                    None => issues.push(format!("{} is unavailable", record.name)),
                }
            } else if record.error_count > MAX_HEALTHY_ERRORS {
                issues.push(format!(
                    "{} has {} consecutive errors",
                    record.name, record.error_count
                ));
            }
        }

        HealthReport {
            healthy: issues.is_empty(),
            issues,
        }
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("records", &*self.records.read())
            .finish()
    }
}
