//! # BizSync Core
//!
//! Operation model and data integrity checks for the BizSync engine.
//!
//! This crate provides:
//! - The queued operation model (`SyncOperation`, `OperationRequest`)
//! - Clock and identifier abstractions for deterministic tests
//! - Schema validation for business plans, sections and user profiles
//! - A bounded best-effort repairer for payloads that fail validation
//!
//! Nothing in this crate touches the network or the queue; the engine
//! crate builds on these pieces.
//!
//! ## Example
//!
//! ```
//! use bizsync_core::{validate, Resource};
//! use serde_json::json;
//!
//! let result = validate(Resource::BusinessPlan, &json!({ "title": "Acme" }));
//! assert!(!result.is_valid);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod clock;
mod error;
pub mod integrity;
mod operation;

pub use clock::{Clock, IdGenerator, ManualClock, SequentialIds, SystemClock, UuidGenerator};
pub use error::{CoreError, CoreResult};
pub use integrity::{
    entity_key, validate, validate_patch, FieldViolation, RepairOutcome, Repairer,
    ValidationResult, DEFAULT_REPAIR_CEILING,
};
pub use operation::{
    OperationId, OperationRequest, OperationStatus, OperationType, Resource, SyncOperation,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
