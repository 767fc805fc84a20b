//! Payload fixtures.
//!
//! Every fixture is valid for its resource unless its name says
//! otherwise.

use bizsync_core::{OperationRequest, Resource};
use serde_json::{json, Value};

/// Timestamp used by fixtures.
pub const FIXTURE_TIME: &str = "2024-03-01T09:30:00Z";

/// A valid business plan.
pub fn plan(id: &str) -> Value {
    json!({
        "id": id,
        "title": format!("Plan {id}"),
        "description": "A plan for testing",
        "owner_id": "owner-1",
        "sections": {
            "executive_summary": "We make things people want."
        },
        "created_at": FIXTURE_TIME,
        "updated_at": FIXTURE_TIME
    })
}

/// A valid user profile.
pub fn profile(id: &str) -> Value {
    json!({
        "id": id,
        "email": format!("{id}@example.com"),
        "name": "Ada Lovelace",
        "company": "Analytical Engines Ltd",
        "role": "founder",
        "created_at": FIXTURE_TIME,
        "updated_at": FIXTURE_TIME
    })
}

/// A valid section of `plan_id`.
pub fn section(plan_id: &str, key: &str, content: Value) -> Value {
    json!({
        "plan_id": plan_id,
        "section_key": key,
        "content": content
    })
}

/// A plan with neither timestamp.
pub fn plan_without_timestamps(id: &str) -> Value {
    let mut plan = plan(id);
    if let Some(fields) = plan.as_object_mut() {
        fields.remove("created_at");
        fields.remove("updated_at");
    }
    plan
}

/// A profile without an email. No repair can fix it.
pub fn profile_without_email(id: &str) -> Value {
    let mut profile = profile(id);
    if let Some(fields) = profile.as_object_mut() {
        fields.remove("email");
    }
    profile
}

/// A create request for [`plan`].
pub fn create_plan(id: &str) -> OperationRequest {
    OperationRequest::create(Resource::BusinessPlan, plan(id))
}

/// A create request for [`profile`].
pub fn create_profile(id: &str) -> OperationRequest {
    OperationRequest::create(Resource::UserProfile, profile(id))
}

/// An update request setting one section of a plan.
pub fn update_section(plan_id: &str, key: &str, content: &str) -> OperationRequest {
    OperationRequest::update(Resource::Section, section(plan_id, key, json!(content)))
}
