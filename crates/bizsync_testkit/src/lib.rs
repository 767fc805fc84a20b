//! # BizSync Testkit
//!
//! Test utilities for BizSync.
//!
//! This crate provides:
//! - Payload fixtures for every resource
//! - Property-based generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bizsync_testkit::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn plans_validate(plan in valid_plan_strategy()) {
//!         prop_assert!(validate(Resource::BusinessPlan, &plan).is_valid);
//!     }
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
