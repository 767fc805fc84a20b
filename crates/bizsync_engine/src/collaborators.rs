//! Backend abstractions.
//!
//! The engine does not speak any wire protocol itself. The record store
//! client, the collaborative mirror and the local cache are supplied by
//! the embedding application through these traits.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// Classification of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Unreachable, timed out or returned a server error.
    Network,
    /// The addressed record does not exist.
    NotFound,
    /// The backend refused the request.
    Rejected,
}

/// Error returned by a backend client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    /// Failure class.
    pub kind: StoreErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl StoreError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Network,
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::NotFound,
            message: message.into(),
        }
    }

    /// Creates a rejection error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Rejected,
            message: message.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StoreError {}

/// Client for the durable, authoritative record store.
///
/// Records are JSON objects addressed by table and `id`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Creates a record and returns it as stored.
    async fn create(&self, table: &str, fields: Value) -> Result<Value, StoreError>;

    /// Updates fields of an existing record and returns it as stored.
    async fn update(&self, table: &str, id: &str, fields: Value) -> Result<Value, StoreError>;

    /// Fetches a record.
    async fn get(&self, table: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Deletes a record.
    async fn delete(&self, table: &str, id: &str) -> Result<(), StoreError>;
}

/// Client for the real-time collaborative backend.
///
/// Writes are best effort; failures are logged and never fail an
/// operation.
#[async_trait]
pub trait MirrorClient: Send + Sync {
    /// Publishes the current state of an entity to a room.
    async fn mirror(&self, room_key: &str, entity: &Value) -> Result<(), StoreError>;
}

/// Local/offline cache keyed by `<table>/<id>`.
pub trait LocalCache: Send + Sync {
    /// Reads an entry.
    fn get(&self, key: &str) -> Option<Value>;

    /// Writes an entry.
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Removes an entry.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}
