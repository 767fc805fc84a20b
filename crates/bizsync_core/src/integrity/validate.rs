//! Schema validation per resource.

use super::ValidationResult;
use crate::operation::Resource;
use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};

type Fields = Map<String, Value>;

/// Checks a payload against the schema of `resource`.
///
/// Never fails; problems are reported in the returned result.
pub fn validate(resource: Resource, payload: &Value) -> ValidationResult {
    let mut result = ValidationResult::default();

    let Some(fields) = payload.as_object() else {
        result.error("$", "payload must be a JSON object");
        return result.finish();
    };

    match resource {
        Resource::BusinessPlan => validate_plan(fields, &mut result),
        Resource::Section => validate_section(fields, &mut result),
        Resource::UserProfile => validate_profile(fields, &mut result),
    }

    result.finish()
}

/// Checks a partial update payload for `resource`.
///
/// Only `id` is required. Every other field present must have the type
/// the full schema gives it, and must not be `null` if the full schema
/// requires it. Timestamp ordering is checked only when both timestamps
/// are present; the merged record is checked with [`validate`].
///
/// Sections have no partial form and are checked with [`validate`].
pub fn validate_patch(resource: Resource, payload: &Value) -> ValidationResult {
    if resource == Resource::Section {
        return validate(resource, payload);
    }

    let mut result = ValidationResult::default();
    let Some(fields) = payload.as_object() else {
        result.error("$", "payload must be a JSON object");
        return result.finish();
    };

    required_id(fields, "id", &mut result);
    match resource {
        Resource::BusinessPlan => {
            match fields.get("title") {
                None => {}
                Some(Value::Null) => result.error("title", "must not be null"),
                Some(Value::String(title)) if title.trim().is_empty() => {
                    result.warning("title is blank");
                }
                Some(Value::String(_)) => {}
                Some(_) => result.error("title", "must be a string"),
            }
            match fields.get("sections") {
                None | Some(Value::Object(_)) => {}
                Some(Value::Null) => result.error("sections", "must not be null"),
                Some(_) => result.error("sections", "must be an object"),
            }
            optional_string(fields, "description", &mut result);
            optional_string(fields, "owner_id", &mut result);
        }
        Resource::UserProfile => {
            match fields.get("email") {
                None => {}
                Some(Value::Null) => result.error("email", "must not be null"),
                Some(Value::String(email)) if !email.contains('@') => {
                    result.error("email", "must be a valid email address");
                }
                Some(Value::String(_)) => {}
                Some(_) => result.error("email", "must be a string"),
            }
            optional_string(fields, "name", &mut result);
            optional_string(fields, "company", &mut result);
            optional_string(fields, "role", &mut result);
        }
        Resource::Section => {}
    }

    let created = patch_timestamp(fields, "created_at", &mut result);
    let updated = patch_timestamp(fields, "updated_at", &mut result);
    if let (Some(created), Some(updated)) = (created, updated) {
        if updated < created {
            result.error("updated_at", "must not precede created_at");
        }
    }

    result.finish()
}

fn patch_timestamp(
    fields: &Fields,
    field: &str,
    result: &mut ValidationResult,
) -> Option<DateTime<FixedOffset>> {
    match fields.get(field) {
        None => None,
        Some(Value::Null) => {
            result.error(field, "must not be null");
            None
        }
        Some(_) => timestamp(fields, field, result),
    }
}

fn validate_plan(fields: &Fields, result: &mut ValidationResult) {
    required_id(fields, "id", result);

    match fields.get("title") {
        None | Some(Value::Null) => result.error("title", "is required"),
        Some(Value::String(title)) if title.trim().is_empty() => {
            result.warning("title is blank");
        }
        Some(Value::String(_)) => {}
        Some(_) => result.error("title", "must be a string"),
    }

    match fields.get("sections") {
        None | Some(Value::Null) => result.error("sections", "is required"),
        Some(Value::Object(_)) => {}
        Some(_) => result.error("sections", "must be an object"),
    }

    optional_string(fields, "description", result);
    optional_string(fields, "owner_id", result);
    check_timestamps(fields, result);
}

fn validate_profile(fields: &Fields, result: &mut ValidationResult) {
    required_id(fields, "id", result);

    match fields.get("email") {
        None | Some(Value::Null) => result.error("email", "is required"),
        Some(Value::String(email)) if !email.contains('@') => {
            result.error("email", "must be a valid email address");
        }
        Some(Value::String(_)) => {}
        Some(_) => result.error("email", "must be a string"),
    }

    optional_string(fields, "name", result);
    optional_string(fields, "company", result);
    optional_string(fields, "role", result);

    if is_absent(fields, "company") && is_absent(fields, "role") {
        result.warning("profile has neither company nor role");
    }

    check_timestamps(fields, result);
}

fn validate_section(fields: &Fields, result: &mut ValidationResult) {
    required_id(fields, "plan_id", result);
    required_id(fields, "section_key", result);

    if is_absent(fields, "content") {
        result.warning("section has no content");
    }
}

fn is_absent(fields: &Fields, field: &str) -> bool {
    matches!(fields.get(field), None | Some(Value::Null))
}

fn required_id(fields: &Fields, field: &str, result: &mut ValidationResult) {
    match fields.get(field) {
        None | Some(Value::Null) => result.error(field, "is required"),
        Some(Value::String(s)) if s.trim().is_empty() => result.error(field, "must not be empty"),
        Some(Value::String(_)) => {}
        Some(_) => result.error(field, "must be a string"),
    }
}

fn optional_string(fields: &Fields, field: &str, result: &mut ValidationResult) {
    match fields.get(field) {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(_) => result.error(field, "must be a string"),
    }
}

/// Parses an RFC 3339 timestamp field, or `None` if missing or malformed.
pub(crate) fn parse_timestamp(fields: &Fields, field: &str) -> Option<DateTime<FixedOffset>> {
    fields
        .get(field)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
}

fn timestamp(
    fields: &Fields,
    field: &str,
    result: &mut ValidationResult,
) -> Option<DateTime<FixedOffset>> {
    match fields.get(field) {
        None | Some(Value::Null) => {
            result.error(field, "is required");
            None
        }
        Some(Value::String(_)) => {
            let parsed = parse_timestamp(fields, field);
            if parsed.is_none() {
                result.error(field, "must be an RFC 3339 timestamp");
            }
            parsed
        }
        Some(_) => {
            result.error(field, "must be a string");
            None
        }
    }
}

fn check_timestamps(fields: &Fields, result: &mut ValidationResult) {
    let created = timestamp(fields, "created_at", result);
    let updated = timestamp(fields, "updated_at", result);

    if let (Some(created), Some(updated)) = (created, updated) {
        if updated < created {
            result.error("updated_at", "must not precede created_at");
        }
    }
}
