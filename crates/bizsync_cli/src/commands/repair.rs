//! Repair command implementation.

use super::read_payload;
use bizsync_core::{validate, Repairer, Resource, SystemClock, UuidGenerator};
use std::path::Path;
use std::sync::Arc;

/// Runs the repair command.
///
/// Prints the repaired payload to stdout and the remaining violations,
/// if any, to stderr.
pub fn run(path: &Path, resource: Resource) -> Result<(), Box<dyn std::error::Error>> {
    let payload = read_payload(path)?;
    let repairer = Repairer::new(Arc::new(SystemClock), Arc::new(UuidGenerator));

    let outcome = repairer.repair(resource, &payload);
    println!("{}", serde_json::to_string_pretty(&outcome.repaired)?);

    if outcome.success {
        if outcome.repaired != payload {
            tracing::info!(resource = %resource, "payload repaired");
        }
        Ok(())
    } else {
        let remaining = validate(resource, &outcome.repaired);
        for error in &remaining.errors {
            eprintln!("  error: {error}");
        }
        Err("Payload could not be repaired".into())
    }
}
