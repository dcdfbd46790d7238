//! Compact command implementation.

use super::{format_size, open_store};
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;

    println!("Compacting text pool at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let plan = store.estimate_compaction()?;
    println!("Compaction Analysis:");
    println!("  Live payloads:      {}", plan.payloads);
    println!("  Free chunks:        {}", plan.free_chunks_dropped);
    println!();
    println!("  Size before: {}", format_size(plan.bytes_before));
    println!("  Size after:  {}", format_size(plan.bytes_after));
    println!(
        "  Space saved: {} ({:.1}%)",
        format_size(plan.bytes_saved()),
        if plan.bytes_before > 0 {
            plan.bytes_saved() as f64 / plan.bytes_before as f64 * 100.0
        } else {
            0.0
        }
    );

    if !dry_run {
        println!();
        if plan.bytes_saved() == 0 && plan.free_chunks_dropped == 0 {
            println!("No compaction needed - text pool is already dense");
        } else {
            println!("Performing compaction...");
            let result = store.compact_text_pool()?;
            println!("✓ Compaction complete ({} reclaimed)", format_size(result.bytes_saved()));
        }
    }

    store.close()?;
    Ok(())
}
