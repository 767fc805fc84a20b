//! Queued operations.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a queued operation.
///
/// Assigned once at enqueue time and never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Creates an operation ID from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates a new random operation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Converts to a UUID.
    #[must_use]
    pub const fn to_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationId({})", self.0)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| CoreError::InvalidOperationId(s.to_string()))
    }
}

/// Kind of change an operation applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Entity is created.
    Create,
    /// Entity is updated.
    Update,
    /// Entity is deleted.
    Delete,
}

impl OperationType {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            other => Err(CoreError::UnknownOperationType(other.to_string())),
        }
    }
}

/// Business resource an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// A business plan with its nested section map.
    BusinessPlan,
    /// A single named section inside a business plan.
    Section,
    /// A user profile.
    UserProfile,
}

impl Resource {
    /// All known resources.
    pub const ALL: [Resource; 3] = [
        Resource::BusinessPlan,
        Resource::Section,
        Resource::UserProfile,
    ];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::BusinessPlan => "business_plan",
            Resource::Section => "section",
            Resource::UserProfile => "user_profile",
        }
    }

    /// Record store table backing this resource.
    ///
    /// Sections live inside their parent plan, so they share its table.
    pub fn table(&self) -> &'static str {
        match self {
            Resource::BusinessPlan | Resource::Section => "business_plans",
            Resource::UserProfile => "user_profiles",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "business_plan" => Ok(Resource::BusinessPlan),
            "section" => Ok(Resource::Section),
            "user_profile" => Ok(Resource::UserProfile),
            other => Err(CoreError::UnknownResource(other.to_string())),
        }
    }
}

/// Lifecycle state of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting in the queue or waiting out a backoff delay.
    Pending,
    /// Currently being dispatched.
    InProgress,
    /// Written successfully.
    Completed,
    /// Retry ceiling reached.
    Failed,
}

/// What a caller submits to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Kind of change.
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Target resource.
    pub resource: Resource,
    /// Entity data.
    pub payload: Value,
}

impl OperationRequest {
    /// Creates a new request.
    pub fn new(op_type: OperationType, resource: Resource, payload: Value) -> Self {
        Self {
            op_type,
            resource,
            payload,
        }
    }

    /// Creates a create request.
    pub fn create(resource: Resource, payload: Value) -> Self {
        Self::new(OperationType::Create, resource, payload)
    }

    /// Creates an update request.
    pub fn update(resource: Resource, payload: Value) -> Self {
        Self::new(OperationType::Update, resource, payload)
    }

    /// Creates a delete request.
    pub fn delete(resource: Resource, payload: Value) -> Self {
        Self::new(OperationType::Delete, resource, payload)
    }
}

/// An operation held in the sync queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Unique operation ID.
    pub id: OperationId,
    /// Kind of change.
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Target resource.
    pub resource: Resource,
    /// Entity data.
    pub payload: Value,
    /// When the operation entered the queue.
    pub enqueued_at: DateTime<Utc>,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Lifecycle state.
    pub status: OperationStatus,
}

impl SyncOperation {
    /// Creates a pending operation from a request.
    pub fn new(id: OperationId, request: OperationRequest, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id,
            op_type: request.op_type,
            resource: request.resource,
            payload: request.payload,
            enqueued_at,
            retry_count: 0,
            status: OperationStatus::Pending,
        }
    }

    /// Returns the `id` field of the payload, if it is a string.
    pub fn entity_id(&self) -> Option<&str> {
        self.payload.get("id").and_then(Value::as_str)
    }
}
