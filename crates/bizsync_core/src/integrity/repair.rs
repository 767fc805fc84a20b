//! Best-effort payload repair with a per-entity attempt ceiling.

use super::validate::parse_timestamp;
use super::{entity_key, scoped_key, validate, validate_patch};
use crate::clock::{Clock, IdGenerator};
use crate::operation::Resource;
use chrono::SecondsFormat;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Default number of repairs allowed per entity.
pub const DEFAULT_REPAIR_CEILING: u32 = 3;

/// Result of a repair attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairOutcome {
    /// The repaired payload, or the original when repair was refused.
    pub repaired: Value,
    /// True when the returned payload passes validation.
    pub success: bool,
}

/// Normalizes payloads that fail validation.
///
/// Repairs are deterministic given the injected clock and id generator.
/// Each entity may be repaired at most `ceiling` times over the life of
/// the repairer; the counter is never reset.
pub struct Repairer {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    ceiling: u32,
    attempts: Mutex<HashMap<String, u32>>,
}

impl Repairer {
    /// Creates a repairer with the default ceiling.
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            clock,
            ids,
            ceiling: DEFAULT_REPAIR_CEILING,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the per-entity repair ceiling.
    pub fn with_ceiling(mut self, ceiling: u32) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Returns the per-entity repair ceiling.
    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Number of repairs already spent on `key`.
    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts.lock().get(key).copied().unwrap_or(0)
    }

    /// Repairs `payload` for `resource`.
    ///
    /// A payload that already validates is returned unchanged and does
    /// not count against the ceiling.
    pub fn repair(&self, resource: Resource, payload: &Value) -> RepairOutcome {
        if validate(resource, payload).is_valid {
            return RepairOutcome {
                repaired: payload.clone(),
                success: true,
            };
        }

        if let Some(refused) = self.spend(resource, payload) {
            return refused;
        }

        let mut fields = payload.as_object().cloned().unwrap_or_default();
        match resource {
            Resource::BusinessPlan => self.repair_plan(resource, &mut fields),
            Resource::UserProfile => self.repair_profile(resource, &mut fields),
            Resource::Section => {}
        }

        let repaired = Value::Object(fields);
        let result = validate(resource, &repaired);
        if result.is_valid {
            tracing::debug!(resource = %resource, "payload repaired");
        } else {
            tracing::debug!(
                resource = %resource,
                violations = %result.summary(),
                "payload still invalid after repair"
            );
        }

        RepairOutcome {
            repaired,
            success: result.is_valid,
        }
    }

    /// Repairs a partial update payload for `resource`.
    ///
    /// Fields that fail [`validate_patch`] are dropped so the stored
    /// values survive the merge; nothing is invented. Payloads that
    /// already pass are returned unchanged and cost nothing. Sections
    /// are repaired with [`repair`](Self::repair).
    pub fn repair_patch(&self, resource: Resource, payload: &Value) -> RepairOutcome {
        if resource == Resource::Section {
            return self.repair(resource, payload);
        }

        let result = validate_patch(resource, payload);
        if result.is_valid {
            return RepairOutcome {
                repaired: payload.clone(),
                success: true,
            };
        }

        if let Some(refused) = self.spend(resource, payload) {
            return refused;
        }

        let mut fields = payload.as_object().cloned().unwrap_or_default();
        for violation in &result.errors {
            if violation.field != "id" {
                fields.remove(&violation.field);
            }
        }

        let repaired = Value::Object(fields);
        let success = validate_patch(resource, &repaired).is_valid;
        tracing::debug!(resource = %resource, success, "patch repaired");
        RepairOutcome { repaired, success }
    }

    /// Spends one attempt for the payload's entity, or returns the
    /// refusal outcome when the ceiling is reached.
    fn spend(&self, resource: Resource, payload: &Value) -> Option<RepairOutcome> {
        let key = entity_key(resource, payload)?;
        if self.try_spend(&key) {
            return None;
        }
        tracing::warn!(
            resource = %resource,
            entity = %key,
            ceiling = self.ceiling,
            "repair ceiling reached"
        );
        Some(RepairOutcome {
            repaired: payload.clone(),
            success: false,
        })
    }

    fn try_spend(&self, key: &str) -> bool {
        let mut attempts = self.attempts.lock();
        let used = attempts.entry(key.to_string()).or_insert(0);
        if *used >= self.ceiling {
            return false;
        }
        *used += 1;
        true
    }

    fn ensure_id(&self, resource: Resource, fields: &mut Map<String, Value>) {
        let has_id = fields
            .get("id")
            .and_then(Value::as_str)
            .is_some_and(|id| !id.trim().is_empty());
        if !has_id {
            let id = self.ids.entity_id();
            // A freshly generated id is its own entity; count this repair.
            self.try_spend(&scoped_key(resource, &id));
            fields.insert("id".into(), Value::String(id));
        }
    }

    fn repair_plan(&self, resource: Resource, fields: &mut Map<String, Value>) {
        self.ensure_id(resource, fields);

        if !matches!(fields.get("title"), Some(Value::String(_))) {
            fields.insert("title".into(), Value::String("Untitled".into()));
        }
        if !matches!(fields.get("sections"), Some(Value::Object(_))) {
            fields.insert("sections".into(), Value::Object(Map::new()));
        }

        drop_mistyped(fields, &["description", "owner_id"]);
        self.repair_timestamps(fields);
    }

    fn repair_profile(&self, resource: Resource, fields: &mut Map<String, Value>) {
        self.ensure_id(resource, fields);
        drop_mistyped(fields, &["name", "company", "role"]);
        self.repair_timestamps(fields);
    }

    fn repair_timestamps(&self, fields: &mut Map<String, Value>) {
        let now = Value::String(self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true));

        if parse_timestamp(fields, "created_at").is_none() {
            fields.insert("created_at".into(), now.clone());
        }
        if parse_timestamp(fields, "updated_at").is_none() {
            fields.insert("updated_at".into(), now);
        }

        if let (Some(created), Some(updated)) = (
            parse_timestamp(fields, "created_at"),
            parse_timestamp(fields, "updated_at"),
        ) {
            if updated < created {
                let created = fields.get("created_at").cloned().unwrap_or(Value::Null);
                fields.insert("updated_at".into(), created);
            }
        }
    }
}

impl std::fmt::Debug for Repairer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repairer")
            .field("ceiling", &self.ceiling)
            .field("tracked_entities", &self.attempts.lock().len())
            .finish()
    }
}

/// Removes optional string fields that hold a non-string value.
fn drop_mistyped(fields: &mut Map<String, Value>, optional: &[&str]) {
    for field in optional {
        if matches!(fields.get(*field), Some(v) if !v.is_string() && !v.is_null()) {
            fields.remove(*field);
        }
    }
}
