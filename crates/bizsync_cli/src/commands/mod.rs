//! CLI command implementations.

pub mod repair;
pub mod simulate;
pub mod validate;

use bizsync_core::CoreError;
use serde_json::Value;
use std::path::Path;

/// Reads a JSON payload from `path`.
pub fn read_payload(path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    let payload: Value = serde_json::from_str(&text).map_err(CoreError::from)?;
    Ok(payload)
}
