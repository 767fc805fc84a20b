//! In-memory backends for tests, simulations and embedding.

use crate::collaborators::{LocalCache, MirrorClient, RecordStore, StoreError};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Record store method, as recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMethod {
    /// `create`
    Create,
    /// `update`
    Update,
    /// `get`
    Get,
    /// `delete`
    Delete,
}

/// One call made against a [`MemoryRecordStore`].
#[derive(Debug, Clone)]
pub struct StoreCall {
    /// Method called.
    pub method: StoreMethod,
    /// Table addressed.
    pub table: String,
    /// Record ID, when known.
    pub id: Option<String>,
    /// When the call was made (Tokio time).
    pub at: Instant,
    /// Whether the call succeeded.
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct FailurePlan {
    next: u32,
    always: bool,
    rate: f64,
}

/// A record store that keeps tables in memory.
///
/// Failures can be scripted: the next N calls, every call, or a random
/// fraction of calls fail with a network error. Every call, failed or
/// not, is appended to a call log.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tables: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    failures: Mutex<FailurePlan>,
    calls: Mutex<Vec<StoreCall>>,
    latency: Mutex<Duration>,
}

impl MemoryRecordStore {
    /// Creates an empty, always-healthy store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a delay applied to every call.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = latency;
        self
    }

    /// Makes the next `count` calls fail.
    pub fn fail_next(&self, count: u32) {
        self.failures.lock().next = count;
    }

    /// Makes every call fail until turned off.
    pub fn fail_always(&self, fail: bool) {
        self.failures.lock().always = fail;
    }

    /// Makes a random fraction of calls fail.
    pub fn set_failure_rate(&self, rate: f64) {
        self.failures.lock().rate = rate.clamp(0.0, 1.0);
    }

    /// Seeds a record directly, bypassing failure injection.
    pub fn insert(&self, table: &str, record: Value) {
        let Some(id) = record.get("id").and_then(Value::as_str).map(str::to_string) else {
            return;
        };
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(id, record);
    }

    /// Reads a record directly.
    pub fn record(&self, table: &str, id: &str) -> Option<Value> {
        self.tables.read().get(table).and_then(|t| t.get(id)).cloned()
    }

    /// Returns every record of a table, ordered by ID.
    pub fn records(&self, table: &str) -> Vec<Value> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the call log.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    /// Number of calls made with `method`.
    pub fn call_count(&self, method: StoreMethod) -> usize {
        self.calls.lock().iter().filter(|c| c.method == method).count()
    }

    async fn begin(
        &self,
        method: StoreMethod,
        table: &str,
        id: Option<&str>,
    ) -> Result<(), StoreError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let failed = {
            let mut plan = self.failures.lock();
            if plan.next > 0 {
                plan.next -= 1;
                true
            } else {
                plan.always || (plan.rate > 0.0 && rand::random::<f64>() < plan.rate)
            }
        };

        self.calls.lock().push(StoreCall {
            method,
            table: table.to_string(),
            id: id.map(str::to_string),
            at: Instant::now(),
            succeeded: !failed,
        });

        if failed {
            Err(StoreError::network("record store unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, table: &str, fields: Value) -> Result<Value, StoreError> {
        let id = fields.get("id").and_then(Value::as_str).map(str::to_string);
        self.begin(StoreMethod::Create, table, id.as_deref()).await?;

        let id = id.ok_or_else(|| StoreError::rejected("record has no id"))?;
        // Creates are upserts so a retried create after a lost response
        // does not fail.
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(id, fields.clone());
        Ok(fields)
    }

    async fn update(&self, table: &str, id: &str, fields: Value) -> Result<Value, StoreError> {
        self.begin(StoreMethod::Update, table, Some(id)).await?;

        let mut tables = self.tables.write();
        let record = tables
            .get_mut(table)
            .and_then(|t| t.get_mut(id))
            .ok_or_else(|| StoreError::not_found(format!("{table}/{id}")))?;

        match fields {
            Value::Object(changes) if record.is_object() => {
                if let Some(existing) = record.as_object_mut() {
                    existing.extend(changes);
                }
            }
            replacement => *record = replacement,
        }
        Ok(record.clone())
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<Value>, StoreError> {
        self.begin(StoreMethod::Get, table, Some(id)).await?;
        Ok(self.record(table, id))
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), StoreError> {
        self.begin(StoreMethod::Delete, table, Some(id)).await?;
        if let Some(t) = self.tables.write().get_mut(table) {
            t.remove(id);
        }
        Ok(())
    }
}

/// A mirror that records every publication.
#[derive(Debug, Default)]
pub struct MemoryMirror {
    published: Mutex<Vec<(String, Value)>>,
    failing: AtomicBool,
}

impl MemoryMirror {
    /// Creates a healthy mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publication fail until turned off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All successful publications, oldest first.
    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().clone()
    }

    /// The last entity published to `room_key`.
    pub fn last(&self, room_key: &str) -> Option<Value> {
        self.published
            .lock()
            .iter()
            .rev()
            .find(|(room, _)| room == room_key)
            .map(|(_, entity)| entity.clone())
    }
}

#[async_trait]
impl MirrorClient for MemoryMirror {
    async fn mirror(&self, room_key: &str, entity: &Value) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::network("mirror connection lost"));
        }
        self.published
            .lock()
            .push((room_key.to_string(), entity.clone()));
        Ok(())
    }
}

/// A cache held in a hash map.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Value>>,
    failing: AtomicBool,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write fail until turned off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::rejected("cache quota exceeded"))
        } else {
            Ok(())
        }
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.check()?;
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StoreErrorKind;
    use serde_json::json;

    #[tokio::test]
    async fn create_update_get_delete() {
        let store = MemoryRecordStore::new();

        store
            .create("plans", json!({ "id": "p1", "title": "Acme", "stage": "seed" }))
            .await
            .unwrap();
        let updated = store
            .update("plans", "p1", json!({ "title": "Acme Inc" }))
            .await
            .unwrap();
        assert_eq!(updated, json!({ "id": "p1", "title": "Acme Inc", "stage": "seed" }));

        assert!(store.get("plans", "p1").await.unwrap().is_some());
        store.delete("plans", "p1").await.unwrap();
        assert!(store.get("plans", "p1").await.unwrap().is_none());
        assert_eq!(store.calls().len(), 5);
    }

    #[tokio::test]
    async fn update_missing_record() {
        let store = MemoryRecordStore::new();
        let err = store.update("plans", "nope", json!({})).await.unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::NotFound);
    }

    #[tokio::test]
    async fn scripted_failures() {
        let store = MemoryRecordStore::new();
        store.fail_next(2);

        assert!(store.get("plans", "p1").await.is_err());
        assert!(store.get("plans", "p1").await.is_err());
        assert!(store.get("plans", "p1").await.is_ok());

        store.fail_always(true);
        assert!(store.delete("plans", "p1").await.is_err());

        let calls = store.calls();
        assert_eq!(calls.iter().filter(|c| !c.succeeded).count(), 3);
        assert_eq!(store.call_count(StoreMethod::Get), 3);
    }

    #[tokio::test]
    async fn create_requires_id() {
        let store = MemoryRecordStore::new();
        let err = store.create("plans", json!({ "title": "x" })).await.unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::Rejected);
    }

    #[tokio::test]
    async fn mirror_records_and_fails() {
        let mirror = MemoryMirror::new();
        mirror.mirror("business_plan:p1", &json!({ "v": 1 })).await.unwrap();
        mirror.mirror("business_plan:p1", &json!({ "v": 2 })).await.unwrap();
        assert_eq!(mirror.last("business_plan:p1"), Some(json!({ "v": 2 })));

        mirror.set_failing(true);
        assert!(mirror.mirror("business_plan:p1", &json!({})).await.is_err());
        assert_eq!(mirror.published().len(), 2);
    }

    #[test]
    fn cache_get_set_remove() {
        let cache = MemoryCache::new();
        cache.set("plans/p1", json!({ "id": "p1" })).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("plans/p1"), Some(json!({ "id": "p1" })));

        cache.set_failing(true);
        assert!(cache.remove("plans/p1").is_err());
        cache.set_failing(false);
        cache.remove("plans/p1").unwrap();
        assert!(cache.is_empty());
    }
}
