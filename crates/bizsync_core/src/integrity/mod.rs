//! Payload integrity checks.
//!
//! [`validate`] is a pure schema check that never fails: an invalid
//! payload yields a [`ValidationResult`] with `is_valid == false` and a
//! populated violation list. [`Repairer`] normalizes invalid payloads on
//! a best-effort basis and caps how many times any single entity may be
//! repaired, so one bad record cannot spin the sync queue forever.

mod repair;
mod validate;

pub use repair::{RepairOutcome, Repairer, DEFAULT_REPAIR_CEILING};
pub use validate::{validate, validate_patch};

use crate::operation::Resource;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// A single field-level schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    /// Offending field, or `$` for the payload as a whole.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Outcome of validating one payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ValidationResult {
    /// True when no errors were found.
    pub is_valid: bool,
    /// Violations that make the payload unusable.
    pub errors: Vec<FieldViolation>,
    /// Non-fatal observations.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub(crate) fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldViolation {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub(crate) fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub(crate) fn finish(mut self) -> Self {
        self.is_valid = self.errors.is_empty();
        self
    }

    /// Joins all violations into one line.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Key under which repair attempts for a payload are counted.
///
/// Keys are scoped by resource: `business_plan/<id>`,
/// `user_profile/<id>` and `section/<plan_id>/<section_key>`. Returns
/// `None` when the payload carries no usable identity.
pub fn entity_key(resource: Resource, payload: &Value) -> Option<String> {
    let text = |field: &str| {
        payload
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    };

    match resource {
        Resource::BusinessPlan | Resource::UserProfile => {
            text("id").map(|id| scoped_key(resource, id))
        }
        Resource::Section => match (text("plan_id"), text("section_key")) {
            (Some(plan), Some(key)) => Some(scoped_key(resource, &format!("{plan}/{key}"))),
            _ => None,
        },
    }
}

pub(crate) fn scoped_key(resource: Resource, id: &str) -> String {
    format!("{resource}/{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_keys() {
        assert_eq!(
            entity_key(Resource::BusinessPlan, &json!({ "id": "p1" })),
            Some("business_plan/p1".to_string())
        );
        assert_eq!(
            entity_key(Resource::UserProfile, &json!({ "id": "p1" })),
            Some("user_profile/p1".to_string())
        );
        assert_eq!(
            entity_key(
                Resource::Section,
                &json!({ "plan_id": "p1", "section_key": "market" })
            ),
            Some("section/p1/market".to_string())
        );
        assert_eq!(entity_key(Resource::Section, &json!({ "plan_id": "p1" })), None);
        assert_eq!(entity_key(Resource::UserProfile, &json!({ "id": "  " })), None);
    }

    #[test]
    fn summary_joins_violations() {
        let mut result = ValidationResult::default();
        result.error("id", "is required");
        result.error("email", "must be a string");
        let result = result.finish();

        assert!(!result.is_valid);
        assert_eq!(result.summary(), "id: is required; email: must be a string");
    }
}
