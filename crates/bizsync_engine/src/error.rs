//! Error types for the sync engine.

use crate::registry::DataSource;
use bizsync_core::Resource;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while dispatching an operation.
///
/// None of these reach the caller of `enqueue`; the engine turns them
/// into retries and, eventually, into `SyncStatus::errors` entries.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Payload fails validation and could not be repaired.
    #[error("invalid {resource} payload: {violations}")]
    Validation {
        /// Resource the payload was validated against.
        resource: Resource,
        /// Joined violation list.
        violations: String,
    },

    /// The repair ceiling for this entity has been reached.
    #[error("repair limit reached for {entity}")]
    RepairExhausted {
        /// Resource of the entity.
        resource: Resource,
        /// Entity key the attempts were counted under, `<resource>/<id>`.
        entity: String,
    },

    /// A backend was unreachable or rejected the request.
    #[error("{target} error: {message}")]
    Transport {
        /// Backend that failed.
        target: DataSource,
        /// Error message.
        message: String,
    },

    /// An entity the operation depends on does not exist.
    #[error("{table}/{id} not found")]
    NotFound {
        /// Record store table.
        table: String,
        /// Entity ID.
        id: String,
    },

    /// Dispatch did not finish in time.
    #[error("dispatch timed out after {0:?}")]
    Timeout(Duration),

    /// Mirror write failed. Logged only; never fails an operation.
    #[error("mirror error: {0}")]
    Mirror(String),

    /// Engine was assembled incorrectly.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Creates a transport error for the given backend.
    pub fn transport(target: DataSource, message: impl Into<String>) -> Self {
        Self::Transport {
            target,
            message: message.into(),
        }
    }

    /// Returns true if a later attempt may succeed without the payload
    /// changing.
    ///
    /// The queue retries every failure regardless; this drives log levels
    /// and diagnostics.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transport { .. } | SyncError::NotFound { .. } | SyncError::Timeout(_)
        )
    }
}
