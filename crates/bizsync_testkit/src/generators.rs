//! Property-based test generators using proptest.
//!
//! Valid strategies produce payloads that pass validation for their
//! resource. Damaged strategies start from a valid payload and break it
//! in ways the repairer is able to fix.

use bizsync_core::{OperationRequest, OperationType, Resource};
use chrono::{DateTime, SecondsFormat};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

/// 2020-01-01T00:00:00Z.
const TIME_FLOOR: i64 = 1_577_836_800;
/// Ten years after [`TIME_FLOOR`].
const TIME_SPAN: i64 = 10 * 365 * 24 * 60 * 60;

/// Strategy for resources.
pub fn resource_strategy() -> impl Strategy<Value = Resource> {
    prop::sample::select(Resource::ALL.to_vec())
}

/// Strategy for operation types.
pub fn operation_type_strategy() -> impl Strategy<Value = OperationType> {
    prop_oneof![
        Just(OperationType::Create),
        Just(OperationType::Update),
        Just(OperationType::Delete),
    ]
}

/// Strategy for entity IDs.
pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{2,15}").expect("Invalid regex")
}

/// Strategy for an ordered `(created_at, updated_at)` pair.
pub fn timestamp_pair_strategy() -> impl Strategy<Value = (String, String)> {
    (0..TIME_SPAN, 0..TIME_SPAN).prop_map(|(created, delta)| {
        let format = |secs: i64| {
            DateTime::from_timestamp(TIME_FLOOR + secs, 0)
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default()
        };
        (format(created), format(created + delta))
    })
}

fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9 ]{0,23}").expect("Invalid regex")
}

/// Strategy for section maps.
pub fn sections_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z_]{1,12}").expect("Invalid regex"),
        text_strategy(),
        0..4,
    )
    .prop_map(|sections| {
        Value::Object(
            sections
                .into_iter()
                .map(|(key, content)| (key, Value::String(content)))
                .collect(),
        )
    })
}

/// Strategy for valid business plans.
pub fn valid_plan_strategy() -> impl Strategy<Value = Value> {
    (
        entity_id_strategy(),
        text_strategy(),
        sections_strategy(),
        timestamp_pair_strategy(),
        prop::option::of(text_strategy()),
    )
        .prop_map(|(id, title, sections, (created, updated), description)| {
            let mut plan = json!({
                "id": id,
                "title": title,
                "sections": sections,
                "created_at": created,
                "updated_at": updated
            });
            if let (Some(description), Some(fields)) = (description, plan.as_object_mut()) {
                fields.insert("description".into(), Value::String(description));
            }
            plan
        })
}

/// Strategy for valid user profiles.
pub fn valid_profile_strategy() -> impl Strategy<Value = Value> {
    (
        entity_id_strategy(),
        prop::string::string_regex("[a-z]{1,10}@[a-z]{1,10}\\.com").expect("Invalid regex"),
        timestamp_pair_strategy(),
        prop::option::of(text_strategy()),
        prop::option::of(text_strategy()),
    )
        .prop_map(|(id, email, (created, updated), company, role)| {
            let mut fields = Map::new();
            fields.insert("id".into(), json!(id));
            fields.insert("email".into(), json!(email));
            fields.insert("created_at".into(), json!(created));
            fields.insert("updated_at".into(), json!(updated));
            if let Some(company) = company {
                fields.insert("company".into(), json!(company));
            }
            if let Some(role) = role {
                fields.insert("role".into(), json!(role));
            }
            Value::Object(fields)
        })
}

/// Strategy for valid sections.
pub fn valid_section_strategy() -> impl Strategy<Value = Value> {
    (
        entity_id_strategy(),
        prop::string::string_regex("[a-z_]{1,12}").expect("Invalid regex"),
        text_strategy(),
    )
        .prop_map(|(plan_id, key, content)| {
            json!({ "plan_id": plan_id, "section_key": key, "content": content })
        })
}

/// Strategy for a resource paired with a valid payload for it.
pub fn valid_payload_strategy() -> impl Strategy<Value = (Resource, Value)> {
    prop_oneof![
        valid_plan_strategy().prop_map(|p| (Resource::BusinessPlan, p)),
        valid_profile_strategy().prop_map(|p| (Resource::UserProfile, p)),
        valid_section_strategy().prop_map(|p| (Resource::Section, p)),
    ]
}

/// Strategy for plans broken in repairable ways.
///
/// Each plan keeps its `id` and loses or corrupts at least one of
/// `title`, `sections`, `created_at` and `updated_at`.
pub fn damaged_plan_strategy() -> impl Strategy<Value = Value> {
    (valid_plan_strategy(), 1u8..16, any::<bool>()).prop_map(|(mut plan, mask, corrupt)| {
        let damaged = if corrupt { json!(17) } else { Value::Null };
        if let Some(fields) = plan.as_object_mut() {
            for (bit, field) in ["title", "sections", "created_at", "updated_at"]
                .into_iter()
                .enumerate()
            {
                if mask & (1 << bit) != 0 {
                    fields.insert(field.into(), damaged.clone());
                }
            }
        }
        plan
    })
}

/// Strategy for create requests carrying valid payloads.
pub fn create_request_strategy() -> impl Strategy<Value = OperationRequest> {
    valid_payload_strategy()
        .prop_map(|(resource, payload)| OperationRequest::create(resource, payload))
}

/// Strategy for a batch of plan creates with distinct IDs.
pub fn plan_batch_strategy(max: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(valid_plan_strategy(), 1..=max.max(1)).prop_map(|plans| {
        plans
            .into_iter()
            .enumerate()
            .map(|(index, mut plan)| {
                plan["id"] = json!(format!("plan-{index}"));
                plan
            })
            .collect()
    })
}
