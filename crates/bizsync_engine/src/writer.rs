//! Multi-destination writer.
//!
//! Applies one operation to every configured backend:
//!
//! 1. Validate the payload, repairing it once if it is invalid
//! 2. Write to the record store (authoritative)
//! 3. Mirror the result to the collaborative backend (best effort)
//! 4. Write the result through to the local cache (best effort)
//!
//! Updates are partial: the payload is checked field by field, merged
//! over the stored record, and the merged record is validated before it
//! is written back. Section operations are the same read-modify-write on
//! the parent plan's `sections` map.
//!
//! A mirror that keeps failing is skipped for a while instead of being
//! called on every write.
//!
//! Without a record store the writer runs in local-only mode and the
//! cache takes the record store's place.

use crate::collaborators::{LocalCache, MirrorClient, RecordStore, StoreError, StoreErrorKind};
use crate::error::{SyncError, SyncResult};
use crate::registry::{DataSource, SourceRegistry};
use bizsync_core::{
    entity_key, validate, validate_patch, Clock, OperationType, Repairer, Resource,
    SyncOperation, ValidationResult,
};
use chrono::{Duration, SecondsFormat};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// How long a suspended mirror is left alone before it is tried again.
const MIRROR_RETRY_AFTER_SECS: i64 = 30;

/// Writes operations to the record store, mirror and cache.
pub struct Writer {
    store: Option<Arc<dyn RecordStore>>,
    mirror: Option<Arc<dyn MirrorClient>>,
    cache: Option<Arc<dyn LocalCache>>,
    registry: Arc<SourceRegistry>,
    repairer: Arc<Repairer>,
    clock: Arc<dyn Clock>,
}

impl Writer {
    /// Creates a writer.
    ///
    /// At least one of `store` and `cache` must be present for writes to
    /// go anywhere; the engine builder enforces this.
    pub fn new(
        store: Option<Arc<dyn RecordStore>>,
        mirror: Option<Arc<dyn MirrorClient>>,
        cache: Option<Arc<dyn LocalCache>>,
        registry: Arc<SourceRegistry>,
        repairer: Arc<Repairer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            mirror,
            cache,
            registry,
            repairer,
            clock,
        }
    }

    /// Returns true when there is no record store.
    pub fn is_local_only(&self) -> bool {
        self.store.is_none()
    }

    /// Applies `op` to every destination.
    ///
    /// Fails if the payload cannot be made valid or the authoritative
    /// write fails. Mirror and cache write-through failures are logged
    /// and recorded in the registry only.
    ///
    /// A repaired plan or profile payload is written back into `op`, so a
    /// retry sends the same entity, generated ID included.
    pub async fn dispatch(&self, op: &mut SyncOperation) -> SyncResult<()> {
        match op.resource {
            Resource::Section => self.write_section(op).await,
            Resource::BusinessPlan | Resource::UserProfile => self.write_entity(op).await,
        }
    }

    /// Reads an entity, falling back to the local cache when the record
    /// store cannot be reached.
    ///
    /// Sections are addressed as `<plan_id>/<section_key>` and resolve to
    /// the section's content.
    pub async fn fetch(&self, resource: Resource, id: &str) -> SyncResult<Option<Value>> {
        if resource == Resource::Section {
            let Some((plan_id, section_key)) = id.split_once('/') else {
                return Err(SyncError::Validation {
                    resource,
                    violations: format!("section address '{id}' is not <plan_id>/<section_key>"),
                });
            };
            let plan = self.fetch_record(Resource::BusinessPlan.table(), plan_id).await?;
            return Ok(plan.and_then(|p| p.get("sections")?.get(section_key).cloned()));
        }

        self.fetch_record(resource.table(), id).await
    }

    async fn fetch_record(&self, table: &str, id: &str) -> SyncResult<Option<Value>> {
        let Some(store) = &self.store else {
            return Ok(self.cache_get(table, id));
        };

        match store.get(table, id).await {
            Ok(record) => {
                self.registry.record_success(DataSource::RecordStore);
                Ok(record)
            }
            Err(err) if err.kind == StoreErrorKind::Network => {
                self.registry
                    .record_failure(DataSource::RecordStore, err.message.clone());
                match self.cache_get(table, id) {
                    Some(cached) => {
                        tracing::warn!(table, id, error = %err, "record store unreachable, serving cached entity");
                        Ok(Some(cached))
                    }
                    None => Err(SyncError::transport(DataSource::RecordStore, err.message)),
                }
            }
            Err(err) => Err(self.store_failure(table, id, err)),
        }
    }

    async fn write_entity(&self, op: &mut SyncOperation) -> SyncResult<()> {
        let table = op.resource.table();

        if op.op_type == OperationType::Delete {
            let id = required_text(op.resource, &op.payload, "id")?;
            self.store_delete(table, &id).await?;
            self.cache_remove(table, &id);
            self.mirror(
                &room_key(op.resource, &id),
                &json!({ "id": id, "deleted": true }),
            )
            .await;
            return Ok(());
        }

        if op.op_type == OperationType::Update {
            return self.write_update(op).await;
        }

        let payload = self.prepare(op.resource, &op.payload)?;
        let id = required_text(op.resource, &payload, "id")?;
        if payload != op.payload {
            op.payload = payload.clone();
        }

        let record = self.store_create(table, &id, payload).await?;
        self.cache_set(table, &id, &record);
        self.mirror(&room_key(op.resource, &id), &record).await;
        Ok(())
    }

    async fn write_update(&self, op: &mut SyncOperation) -> SyncResult<()> {
        let resource = op.resource;
        let table = resource.table();

        let patch = self.prepare_patch(resource, &op.payload)?;
        let id = required_text(resource, &patch, "id")?;
        if patch != op.payload {
            op.payload = patch.clone();
        }

        let stored = self
            .store_get(table, &id)
            .await?
            .ok_or_else(|| SyncError::NotFound {
                table: table.to_string(),
                id: id.clone(),
            })?;
        let merged = match (stored, patch) {
            (Value::Object(mut fields), Value::Object(changes)) => {
                fields.extend(changes);
                Value::Object(fields)
            }
            (_, patch) => patch,
        };

        let merged = self.prepare(resource, &merged)?;
        let record = self.store_update(table, &id, merged).await?;

        tracing::debug!(resource = %resource, id = %id, "update merged");
        self.cache_set(table, &id, &record);
        self.mirror(&room_key(resource, &id), &record).await;
        Ok(())
    }

    async fn write_section(&self, op: &SyncOperation) -> SyncResult<()> {
        let section = self.prepare(Resource::Section, &op.payload)?;
        let plan_id = required_text(Resource::Section, &section, "plan_id")?;
        let section_key = required_text(Resource::Section, &section, "section_key")?;
        let table = Resource::BusinessPlan.table();

        let mut plan = self
            .store_get(table, &plan_id)
            .await?
            .ok_or_else(|| SyncError::NotFound {
                table: table.to_string(),
                id: plan_id.clone(),
            })?;

        let Some(fields) = plan.as_object_mut() else {
            return Err(SyncError::Validation {
                resource: Resource::BusinessPlan,
                violations: format!("stored plan {plan_id} is not an object"),
            });
        };

        let sections = fields
            .entry("sections")
            .or_insert_with(|| Value::Object(Map::new()));
        if !sections.is_object() {
            *sections = Value::Object(Map::new());
        }
        if let Some(sections) = sections.as_object_mut() {
            match op.op_type {
                OperationType::Delete => {
                    sections.remove(&section_key);
                }
                OperationType::Create | OperationType::Update => {
                    let content = section.get("content").cloned().unwrap_or(Value::Null);
                    sections.insert(section_key.clone(), content);
                }
            }
        }
        fields.insert(
            "updated_at".into(),
            Value::String(self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        let merged = self.prepare(Resource::BusinessPlan, &plan)?;
        let record = self.store_update(table, &plan_id, merged).await?;

        tracing::debug!(plan_id = %plan_id, section = %section_key, op = %op.op_type, "section merged");
        self.cache_set(table, &plan_id, &record);
        self.mirror(&room_key(Resource::BusinessPlan, &plan_id), &record)
            .await;
        Ok(())
    }

    /// Validates a full entity, repairing it once if needed.
    fn prepare(&self, resource: Resource, payload: &Value) -> SyncResult<Value> {
        self.check(resource, payload, Schema::Full)
    }

    /// Validates a partial update, repairing it once if needed.
    fn prepare_patch(&self, resource: Resource, payload: &Value) -> SyncResult<Value> {
        self.check(resource, payload, Schema::Patch)
    }

    fn check(&self, resource: Resource, payload: &Value, schema: Schema) -> SyncResult<Value> {
        let validator: fn(Resource, &Value) -> ValidationResult = match schema {
            Schema::Full => validate,
            Schema::Patch => validate_patch,
        };

        let result = validator(resource, payload);
        for warning in &result.warnings {
            tracing::debug!(resource = %resource, warning = %warning, "validation warning");
        }
        if result.is_valid {
            return Ok(payload.clone());
        }

        tracing::debug!(resource = %resource, violations = %result.summary(), "repairing payload");
        let outcome = match schema {
            Schema::Full => self.repairer.repair(resource, payload),
            Schema::Patch => self.repairer.repair_patch(resource, payload),
        };
        if outcome.success {
            return Ok(outcome.repaired);
        }

        if let Some(key) = entity_key(resource, payload) {
            if outcome.repaired == *payload && self.repairer.attempts(&key) >= self.repairer.ceiling()
            {
                return Err(SyncError::RepairExhausted {
                    resource,
                    entity: key,
                });
            }
        }

        Err(SyncError::Validation {
            resource,
            violations: validator(resource, &outcome.repaired).summary(),
        })
    }

    async fn store_create(&self, table: &str, id: &str, fields: Value) -> SyncResult<Value> {
        let Some(store) = &self.store else {
            self.local_write(table, id, &fields)?;
            return Ok(fields);
        };
        let result = store.create(table, fields).await;
        self.track_store(table, id, result)
    }

    async fn store_update(&self, table: &str, id: &str, fields: Value) -> SyncResult<Value> {
        let Some(store) = &self.store else {
            let merged = match (self.cache_get(table, id), fields) {
                (Some(Value::Object(mut existing)), Value::Object(changes)) => {
                    existing.extend(changes);
                    Value::Object(existing)
                }
                (_, fields) => fields,
            };
            self.local_write(table, id, &merged)?;
            return Ok(merged);
        };
        let result = store.update(table, id, fields).await;
        self.track_store(table, id, result)
    }

    async fn store_get(&self, table: &str, id: &str) -> SyncResult<Option<Value>> {
        let Some(store) = &self.store else {
            return Ok(self.cache_get(table, id));
        };
        let result = store.get(table, id).await;
        self.track_store(table, id, result)
    }

    async fn store_delete(&self, table: &str, id: &str) -> SyncResult<()> {
        let Some(store) = &self.store else {
            return match &self.cache {
                Some(cache) => cache
                    .remove(&cache_key(table, id))
                    .map_err(|err| self.local_failure(err)),
                None => Ok(()),
            };
        };
        let result = store.delete(table, id).await;
        self.track_store(table, id, result)
    }

    fn track_store<T>(&self, table: &str, id: &str, result: Result<T, StoreError>) -> SyncResult<T> {
        match result {
            Ok(value) => {
                self.registry.record_success(DataSource::RecordStore);
                Ok(value)
            }
            Err(err) => Err(self.store_failure(table, id, err)),
        }
    }

    fn store_failure(&self, table: &str, id: &str, err: StoreError) -> SyncError {
        match err.kind {
            StoreErrorKind::NotFound => {
                // The store answered; it is reachable.
                self.registry.record_success(DataSource::RecordStore);
                SyncError::NotFound {
                    table: table.to_string(),
                    id: id.to_string(),
                }
            }
            StoreErrorKind::Network | StoreErrorKind::Rejected => {
                self.registry
                    .record_failure(DataSource::RecordStore, err.message.clone());
                SyncError::transport(DataSource::RecordStore, err.message)
            }
        }
    }

    fn local_write(&self, table: &str, id: &str, value: &Value) -> SyncResult<()> {
        match &self.cache {
            Some(cache) => cache
                .set(&cache_key(table, id), value.clone())
                .map(|()| self.registry.record_success(DataSource::LocalCache))
                .map_err(|err| self.local_failure(err)),
            None => Err(SyncError::Config("no record store or local cache".into())),
        }
    }

    fn local_failure(&self, err: StoreError) -> SyncError {
        self.registry
            .record_failure(DataSource::LocalCache, err.message.clone());
        SyncError::transport(DataSource::LocalCache, err.message)
    }

    fn cache_get(&self, table: &str, id: &str) -> Option<Value> {
        self.cache.as_ref()?.get(&cache_key(table, id))
    }

    fn cache_set(&self, table: &str, id: &str, record: &Value) {
        // In local-only mode the cache already holds the record.
        if self.is_local_only() {
            return;
        }
        let Some(cache) = &self.cache else { return };
        match cache.set(&cache_key(table, id), record.clone()) {
            Ok(()) => self.registry.record_success(DataSource::LocalCache),
            Err(err) => {
                tracing::warn!(table, id, error = %err, "cache write-through failed");
                self.registry.record_failure(DataSource::LocalCache, err.message);
            }
        }
    }

    fn cache_remove(&self, table: &str, id: &str) {
        if self.is_local_only() {
            return;
        }
        let Some(cache) = &self.cache else { return };
        match cache.remove(&cache_key(table, id)) {
            Ok(()) => self.registry.record_success(DataSource::LocalCache),
            Err(err) => {
                tracing::warn!(table, id, error = %err, "cache eviction failed");
                self.registry.record_failure(DataSource::LocalCache, err.message);
            }
        }
    }

    async fn mirror(&self, room: &str, entity: &Value) {
        let Some(mirror) = &self.mirror else { return };
        let retry_after = Duration::seconds(MIRROR_RETRY_AFTER_SECS);
        if !self
            .registry
            .should_attempt(DataSource::Collaborative, retry_after)
        {
            tracing::debug!(room, "mirror suspended, skipping");
            return;
        }
        match mirror.mirror(room, entity).await {
            Ok(()) => self.registry.record_success(DataSource::Collaborative),
            Err(err) => {
                let err = SyncError::Mirror(err.message);
                tracing::warn!(room, error = %err, "mirror write failed");
                self.registry
                    .record_failure(DataSource::Collaborative, err.to_string());
            }
        }
    }
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("record_store", &self.store.is_some())
            .field("mirror", &self.mirror.is_some())
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

/// Which schema a payload is checked against.
#[derive(Debug, Clone, Copy)]
enum Schema {
    /// A complete entity.
    Full,
    /// A partial update, merged over the stored entity later.
    Patch,
}

/// Cache key for a record.
fn cache_key(table: &str, id: &str) -> String {
    format!("{table}/{id}")
}

/// Mirror room for an entity.
fn room_key(resource: Resource, id: &str) -> String {
    format!("{resource}:{id}")
}

fn required_text(resource: Resource, payload: &Value, field: &str) -> SyncResult<String> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| SyncError::Validation {
            resource,
            violations: format!("{field}: is required"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCache, MemoryMirror, MemoryRecordStore, StoreMethod};
    use bizsync_core::{ManualClock, OperationId, OperationRequest, SequentialIds};
    use chrono::Utc;

    struct Harness {
        store: Arc<MemoryRecordStore>,
        mirror: Arc<MemoryMirror>,
        cache: Arc<MemoryCache>,
        registry: Arc<SourceRegistry>,
        clock: Arc<ManualClock>,
        writer: Writer,
    }

    fn harness() -> Harness {
        let manual = Arc::new(ManualClock::epoch());
        let clock: Arc<dyn Clock> = manual.clone();
        let store = Arc::new(MemoryRecordStore::new());
        let mirror = Arc::new(MemoryMirror::new());
        let cache = Arc::new(MemoryCache::new());
        let registry = Arc::new(SourceRegistry::new(
            Arc::clone(&clock),
            &[
                DataSource::RecordStore,
                DataSource::Collaborative,
                DataSource::LocalCache,
            ],
        ));
        let repairer = Arc::new(Repairer::new(
            Arc::clone(&clock),
            Arc::new(SequentialIds::new()),
        ));
        let writer = Writer::new(
            Some(store.clone()),
            Some(mirror.clone()),
            Some(cache.clone()),
            Arc::clone(&registry),
            repairer,
            clock,
        );
        Harness {
            store,
            mirror,
            cache,
            registry,
            clock: manual,
            writer,
        }
    }

    fn op(request: OperationRequest) -> SyncOperation {
        SyncOperation::new(OperationId::new(), request, Utc::now())
    }

    fn plan(id: &str) -> Value {
        json!({
            "id": id,
            "title": "Acme",
            "sections": { "summary": "We sell anvils" },
            "created_at": "2023-06-01T00:00:00Z",
            "updated_at": "2023-06-01T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn create_writes_everywhere() {
        let h = harness();
        h.writer
            .dispatch(&mut op(OperationRequest::create(Resource::BusinessPlan, plan("p1"))))
            .await
            .unwrap();

        assert_eq!(h.store.record("business_plans", "p1"), Some(plan("p1")));
        assert_eq!(h.mirror.last("business_plan:p1"), Some(plan("p1")));
        assert_eq!(h.cache.get("business_plans/p1"), Some(plan("p1")));
        assert!(h.registry.health_check().healthy);
    }

    #[tokio::test]
    async fn create_repairs_incomplete_payload() {
        let h = harness();
        let mut operation = op(OperationRequest::create(
            Resource::BusinessPlan,
            json!({ "title": "Acme" }),
        ));
        h.writer.dispatch(&mut operation).await.unwrap();
        assert_eq!(operation.payload["id"], "entity-1");

        let stored = h.store.record("business_plans", "entity-1").unwrap();
        assert_eq!(stored["title"], "Acme");
        assert_eq!(stored["sections"], json!({}));
        assert_eq!(stored["created_at"], stored["updated_at"]);
    }

    #[tokio::test]
    async fn unrepairable_payload_fails_before_writing() {
        let h = harness();
        let err = h
            .writer
            .dispatch(&mut op(OperationRequest::create(
                Resource::UserProfile,
                json!({ "id": "u1", "name": "Ada" }),
            )))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Validation { .. }));
        assert!(h.store.calls().is_empty());
    }

    #[tokio::test]
    async fn repeated_repairs_exhaust() {
        let h = harness();
        let mut bad = op(OperationRequest::create(
            Resource::UserProfile,
            json!({ "id": "u1" }),
        ));

        for _ in 0..3 {
            let err = h.writer.dispatch(&mut bad).await.unwrap_err();
            assert!(matches!(err, SyncError::Validation { .. }));
        }
        let err = h.writer.dispatch(&mut bad).await.unwrap_err();
        assert!(matches!(err, SyncError::RepairExhausted { .. }));
    }

    #[tokio::test]
    async fn store_failure_is_transport_error() {
        let h = harness();
        h.store.fail_next(1);

        let err = h
            .writer
            .dispatch(&mut op(OperationRequest::create(Resource::BusinessPlan, plan("p1"))))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Transport {
                target: DataSource::RecordStore,
                ..
            }
        ));
        let record = h.registry.get(DataSource::RecordStore).unwrap();
        assert_eq!(record.error_count, 1);
        assert!(h.mirror.published().is_empty());
    }

    #[tokio::test]
    async fn mirror_failure_does_not_fail_operation() {
        let h = harness();
        h.mirror.set_failing(true);

        h.writer
            .dispatch(&mut op(OperationRequest::create(Resource::BusinessPlan, plan("p1"))))
            .await
            .unwrap();

        assert!(h.store.record("business_plans", "p1").is_some());
        let record = h.registry.get(DataSource::Collaborative).unwrap();
        assert!(!record.available);
        assert_eq!(record.error_count, 1);
    }

    #[tokio::test]
    async fn failing_mirror_is_suspended_then_retried() {
        let h = harness();
        h.mirror.set_failing(true);

        for i in 0..5 {
            h.writer
                .dispatch(&mut op(OperationRequest::create(
                    Resource::BusinessPlan,
                    plan(&format!("p{i}")),
                )))
                .await
                .unwrap();
        }
        // Two writes were not attempted against the mirror.
        let record = h.registry.get(DataSource::Collaborative).unwrap();
        assert_eq!(record.error_count, 3);
        assert_eq!(h.store.records("business_plans").len(), 5);

        h.mirror.set_failing(false);
        h.writer
            .dispatch(&mut op(OperationRequest::create(Resource::BusinessPlan, plan("p5"))))
            .await
            .unwrap();
        assert!(h.mirror.published().is_empty());

        h.clock.advance(Duration::seconds(MIRROR_RETRY_AFTER_SECS));
        h.writer
            .dispatch(&mut op(OperationRequest::create(Resource::BusinessPlan, plan("p6"))))
            .await
            .unwrap();
        assert_eq!(h.mirror.last("business_plan:p6"), Some(plan("p6")));
        assert!(h.registry.is_available(DataSource::Collaborative));
    }

    #[tokio::test]
    async fn partial_update_keeps_stored_fields() {
        let h = harness();
        h.store.insert("business_plans", plan("p1"));

        let patch = json!({ "id": "p1", "title": "Acme Inc" });
        let mut update = op(OperationRequest::update(Resource::BusinessPlan, patch.clone()));
        h.writer.dispatch(&mut update).await.unwrap();

        let mut expected = plan("p1");
        expected["title"] = json!("Acme Inc");
        assert_eq!(h.store.record("business_plans", "p1"), Some(expected.clone()));
        assert_eq!(h.cache.get("business_plans/p1"), Some(expected.clone()));
        assert_eq!(h.mirror.last("business_plan:p1"), Some(expected));
        assert_eq!(update.payload, patch);
    }

    #[tokio::test]
    async fn mistyped_patch_field_is_dropped() {
        let h = harness();
        h.store.insert("business_plans", plan("p1"));

        let mut update = op(OperationRequest::update(
            Resource::BusinessPlan,
            json!({ "id": "p1", "title": "Acme Inc", "sections": null }),
        ));
        h.writer.dispatch(&mut update).await.unwrap();

        let stored = h.store.record("business_plans", "p1").unwrap();
        assert_eq!(stored["title"], "Acme Inc");
        assert_eq!(stored["sections"]["summary"], "We sell anvils");
        assert_eq!(update.payload, json!({ "id": "p1", "title": "Acme Inc" }));
    }

    #[tokio::test]
    async fn merged_update_is_revalidated() {
        let h = harness();
        h.store.insert("business_plans", plan("p1"));

        h.writer
            .dispatch(&mut op(OperationRequest::update(
                Resource::BusinessPlan,
                json!({ "id": "p1", "updated_at": "2020-01-01T00:00:00Z" }),
            )))
            .await
            .unwrap();

        let stored = h.store.record("business_plans", "p1").unwrap();
        assert_eq!(stored["created_at"], "2023-06-01T00:00:00Z");
        assert_eq!(stored["updated_at"], stored["created_at"]);
    }

    #[tokio::test]
    async fn update_of_missing_record_is_not_found() {
        let h = harness();
        let err = h
            .writer
            .dispatch(&mut op(OperationRequest::update(
                Resource::UserProfile,
                json!({ "id": "ghost", "company": "Acme" }),
            )))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::NotFound { .. }));
        assert_eq!(h.store.call_count(StoreMethod::Update), 0);
    }

    #[tokio::test]
    async fn delete_removes_everywhere() {
        let h = harness();
        h.writer
            .dispatch(&mut op(OperationRequest::create(Resource::BusinessPlan, plan("p1"))))
            .await
            .unwrap();
        h.writer
            .dispatch(&mut op(OperationRequest::delete(
                Resource::BusinessPlan,
                json!({ "id": "p1" }),
            )))
            .await
            .unwrap();

        assert!(h.store.record("business_plans", "p1").is_none());
        assert!(h.cache.get("business_plans/p1").is_none());
        assert_eq!(
            h.mirror.last("business_plan:p1"),
            Some(json!({ "id": "p1", "deleted": true }))
        );
    }

    #[tokio::test]
    async fn delete_without_id_is_invalid() {
        let h = harness();
        let err = h
            .writer
            .dispatch(&mut op(OperationRequest::delete(Resource::UserProfile, json!({}))))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation { .. }));
    }

    #[tokio::test]
    async fn section_update_merges_into_plan() {
        let h = harness();
        h.store.insert("business_plans", plan("p1"));

        h.writer
            .dispatch(&mut op(OperationRequest::update(
                Resource::Section,
                json!({ "plan_id": "p1", "section_key": "market", "content": "Blacksmiths" }),
            )))
            .await
            .unwrap();

        let stored = h.store.record("business_plans", "p1").unwrap();
        assert_eq!(stored["sections"]["summary"], "We sell anvils");
        assert_eq!(stored["sections"]["market"], "Blacksmiths");
        assert_eq!(stored["updated_at"], "2024-01-01T00:00:00.000Z");
        assert_eq!(h.store.call_count(StoreMethod::Get), 1);
        assert_eq!(h.store.call_count(StoreMethod::Update), 1);
        assert_eq!(
            h.mirror.last("business_plan:p1").unwrap()["sections"]["market"],
            "Blacksmiths"
        );
    }

    #[tokio::test]
    async fn section_delete_removes_key() {
        let h = harness();
        h.store.insert("business_plans", plan("p1"));

        h.writer
            .dispatch(&mut op(OperationRequest::delete(
                Resource::Section,
                json!({ "plan_id": "p1", "section_key": "summary" }),
            )))
            .await
            .unwrap();

        let stored = h.store.record("business_plans", "p1").unwrap();
        assert_eq!(stored["sections"], json!({}));
    }

    #[tokio::test]
    async fn section_merge_revalidates_plan() {
        let h = harness();
        let mut broken = plan("p1");
        broken["created_at"] = json!("2030-01-01T00:00:00Z");
        h.store.insert("business_plans", broken);

        h.writer
            .dispatch(&mut op(OperationRequest::update(
                Resource::Section,
                json!({ "plan_id": "p1", "section_key": "market", "content": "x" }),
            )))
            .await
            .unwrap();

        // The merged plan was repaired: updated_at no longer precedes created_at.
        let stored = h.store.record("business_plans", "p1").unwrap();
        assert_eq!(stored["updated_at"], stored["created_at"]);
    }

    #[tokio::test]
    async fn section_for_missing_plan_is_not_found() {
        let h = harness();
        let err = h
            .writer
            .dispatch(&mut op(OperationRequest::update(
                Resource::Section,
                json!({ "plan_id": "ghost", "section_key": "market", "content": "x" }),
            )))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }

    #[tokio::test]
    async fn fetch_falls_back_to_cache() {
        let h = harness();
        h.writer
            .dispatch(&mut op(OperationRequest::create(Resource::BusinessPlan, plan("p1"))))
            .await
            .unwrap();

        h.store.fail_always(true);
        let fetched = h.writer.fetch(Resource::BusinessPlan, "p1").await.unwrap();
        assert_eq!(fetched, Some(plan("p1")));

        let section = h
            .writer
            .fetch(Resource::Section, "p1/summary")
            .await
            .unwrap();
        assert_eq!(section, Some(json!("We sell anvils")));

        let err = h.writer.fetch(Resource::BusinessPlan, "p2").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn local_only_mode_uses_cache() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::epoch());
        let cache = Arc::new(MemoryCache::new());
        let registry = Arc::new(SourceRegistry::new(
            Arc::clone(&clock),
            &[DataSource::RecordStore, DataSource::LocalCache],
        ));
        let repairer = Arc::new(Repairer::new(
            Arc::clone(&clock),
            Arc::new(SequentialIds::new()),
        ));
        let writer = Writer::new(None, None, Some(cache.clone()), registry, repairer, clock);
        assert!(writer.is_local_only());

        writer
            .dispatch(&mut op(OperationRequest::create(Resource::BusinessPlan, plan("p1"))))
            .await
            .unwrap();
        writer
            .dispatch(&mut op(OperationRequest::update(
                Resource::Section,
                json!({ "plan_id": "p1", "section_key": "team", "content": "Two founders" }),
            )))
            .await
            .unwrap();

        let cached = cache.get("business_plans/p1").unwrap();
        assert_eq!(cached["sections"]["team"], "Two founders");
        assert_eq!(
            writer.fetch(Resource::Section, "p1/team").await.unwrap(),
            Some(json!("Two founders"))
        );
    }
}
