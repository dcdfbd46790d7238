//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod verify;

use dominus_core::{Config, Store};
use std::path::Path;

/// Opens an existing store; the CLI never creates one.
pub fn open_store(path: &Path) -> Result<Store, Box<dyn std::error::Error>> {
    let config = Config::new().create_if_missing(false);
    Store::open_with_config(path, config)
        .map_err(|e| format!("cannot open store at {}: {e}", path.display()).into())
}

/// Renders a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
