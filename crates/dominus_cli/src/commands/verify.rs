//! Verify command implementation.

use super::open_store;
use std::path::Path;

/// Runs the verify command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let report = store.verify()?;
    store.close()?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Verifying store at {}", path.display());
        println!();
        println!(
            "  slots checked: {}, live: {}, free: {}, payloads: {}",
            report.slots, report.live_nodes, report.free_slots, report.payloads
        );
        for violation in &report.violations {
            println!("    - {violation}");
        }
        println!();
    }

    if report.is_ok() {
        if format != "json" {
            println!("✓ Store verification passed");
        }
        Ok(())
    } else {
        if format != "json" {
            println!("✗ Store verification failed");
        }
        Err(format!("{} violations found", report.violations.len()).into())
    }
}
