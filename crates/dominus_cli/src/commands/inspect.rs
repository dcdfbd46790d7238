//! Inspect command implementation.

use super::{format_size, open_store};
use dominus_core::{StatsSnapshot, StoreHeader, VERSION};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Version of the library that read the store.
    pub library_version: &'static str,
    /// Node directory header.
    pub header: StoreHeader,
    /// Sizes and counters.
    pub stats: StatsSnapshot,
    /// Interned names, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_names: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let result = InspectResult {
        path: path.display().to_string(),
        library_version: VERSION,
        header: store.header(),
        stats: store.stats()?,
        names: show_names.then(|| {
            store
                .names()
                .into_iter()
                .map(|(code, name)| format!("{code} {name}"))
                .collect()
        }),
    };
    store.close()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    let header = &result.header;
    let stats = &result.stats;

    println!("Dominus Store Inspection");
    println!("========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Header:");
    println!("  Format version:  {}.{}", header.version.0, header.version.1);
    println!(
        "  Oldest readable: {}.{}",
        header.oldest_readable.0, header.oldest_readable.1
    );
    println!("  Handle width:    {}", header.width);
    println!("  Record size:     {} bytes", header.record_size);
    println!("  Free list head:  {}", header.free_list_head);
    println!("  Document root:   {}", header.root);
    println!();
    println!("Nodes:");
    println!("  Slots:      {}", stats.slots);
    println!("  Live:       {}", stats.live_nodes());
    println!("  Free:       {}", stats.free_slots);
    println!("  Names:      {}", stats.names);
    println!();
    println!("Storage:");
    println!("  Node directory: {}", format_size(stats.directory_bytes));
    println!("  Text pool:      {}", format_size(stats.text_pool_bytes));
    println!("  Free text:      {}", format_size(stats.text_free_bytes));

    if let Some(names) = &result.names {
        println!();
        println!("Names:");
        for name in names {
            println!("  {name}");
        }
    }
}
