//! Validate command implementation.

use super::read_payload;
use bizsync_core::{validate, Resource, ValidationResult};
use std::path::Path;

/// Runs the validate command.
pub fn run(path: &Path, resource: Resource, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let payload = read_payload(path)?;
    let result = validate(resource, &payload);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_result(path, resource, &result),
    }

    if result.is_valid {
        Ok(())
    } else {
        Err("Validation failed".into())
    }
}

fn print_result(path: &Path, resource: Resource, result: &ValidationResult) {
    println!("Validating {:?} as {resource}", path);
    println!();

    for error in &result.errors {
        println!("  error:   {error}");
    }
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }
    if !result.errors.is_empty() || !result.warnings.is_empty() {
        println!();
    }

    if result.is_valid {
        println!("✓ Payload is valid");
    } else {
        println!("✗ Payload has {} error(s)", result.errors.len());
    }
}
