//! Error types for BizSync core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Resource name is not one of the known resources.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// Operation type name is not one of create, update or delete.
    #[error("unknown operation type: {0}")]
    UnknownOperationType(String),

    /// Payload could not be decoded as JSON.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// Operation identifier could not be parsed.
    #[error("invalid operation id: {0}")]
    InvalidOperationId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::UnknownResource("invoice".into());
        assert_eq!(err.to_string(), "unknown resource: invoice");

        let err = CoreError::UnknownOperationType("upsert".into());
        assert!(err.to_string().contains("upsert"));
    }

    #[test]
    fn json_error_converts() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: CoreError = json_err.into();
        assert!(matches!(err, CoreError::InvalidPayload(_)));
    }
}
