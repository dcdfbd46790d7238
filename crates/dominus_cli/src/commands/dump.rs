//! Dump command implementation.

use super::open_store;
use dominus_core::{Eid, NodeKind, Store};
use serde::Serialize;
use std::path::Path;

/// Longest payload excerpt shown in text output.
const PREVIEW_CHARS: usize = 40;

/// One dumped slot.
#[derive(Debug, Serialize)]
pub struct DumpEntry {
    /// Slot handle.
    pub eid: u64,
    /// Node kind, `free` for reclaimed slots.
    pub kind: String,
    /// Node name, if the slot is live.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Parent handle (next free slot for free slots).
    pub parent: u64,
    /// Previous sibling handle.
    pub previous_sibling: u64,
    /// Next sibling handle.
    pub next_sibling: u64,
    /// First child handle.
    pub first_child: u64,
    /// Cached child ordinal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_ordinal: Option<u16>,
    /// Text pool offset of the payload.
    pub text_start: u64,
    /// Payload text, or the error hit while reading it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    start: u64,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let entries = collect(&store, start, limit)?;
    store.close()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => {
            for entry in &entries {
                print_entry(entry);
            }
            println!();
            println!("{} slots dumped", entries.len());
        }
    }
    Ok(())
}

fn collect(
    store: &Store,
    start: u64,
    limit: Option<usize>,
) -> Result<Vec<DumpEntry>, Box<dyn std::error::Error>> {
    let handles = store
        .handles()?
        .into_iter()
        .filter(|eid| eid.as_u64() >= start)
        .take(limit.unwrap_or(usize::MAX));

    let mut entries = Vec::new();
    for eid in handles {
        entries.push(entry(store, eid)?);
    }
    Ok(entries)
}

fn entry(store: &Store, eid: Eid) -> Result<DumpEntry, Box<dyn std::error::Error>> {
    let record = store.record(eid)?;
    let (name, payload) = if record.kind == NodeKind::Free {
        (None, None)
    } else {
        match store.get(eid) {
            Ok(node) => {
                let payload = match node.kind() {
                    NodeKind::Element => Some(
                        node.attributes()
                            .iter()
                            .map(|a| format!("{}={:?}", a.name, a.value))
                            .collect::<Vec<_>>()
                            .join(" "),
                    )
                    .filter(|s| !s.is_empty()),
                    _ => node.text(),
                };
                (Some(node.name().to_string()), payload)
            }
            Err(e) => (None, Some(format!("<unreadable: {e}>"))),
        }
    };

    Ok(DumpEntry {
        eid: eid.as_u64(),
        kind: record.kind.to_string(),
        name,
        parent: record.parent.as_u64(),
        previous_sibling: record.previous_sibling.as_u64(),
        next_sibling: record.next_sibling.as_u64(),
        first_child: record.first_child.as_u64(),
        child_ordinal: record.ordinal(),
        text_start: record.text_start,
        payload,
    })
}

fn print_entry(entry: &DumpEntry) {
    if entry.kind == "free" {
        println!("[{:>6}] free, next {}", entry.eid, entry.parent);
        return;
    }
    let ordinal = entry
        .child_ordinal
        .map_or_else(|| "?".to_string(), |o| o.to_string());
    print!(
        "[{:>6}] {} {} parent={} prev={} next={} first={} ordinal={}",
        entry.eid,
        entry.kind,
        entry.name.as_deref().unwrap_or("?"),
        entry.parent,
        entry.previous_sibling,
        entry.next_sibling,
        entry.first_child,
        ordinal
    );
    if let Some(payload) = &entry.payload {
        print!(" {:?}", preview(payload));
    }
    println!();
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dominus_core::{Attribute, Config};
    use tempfile::tempdir;

    #[test]
    fn dump_lists_live_and_free_slots() {
        let temp = tempdir().unwrap();
        let store = Store::open_with_config(temp.path(), Config::new()).unwrap();
        let doc = store.create_document().unwrap();
        let el = store
            .create_element("p", vec![Attribute::new("class", "x")])
            .unwrap();
        store.append_child(doc, el).unwrap();
        let gone = store.create_text("gone").unwrap();
        store.free_node(gone).unwrap();

        let entries = collect(&store, 0, None).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].name.as_deref(), Some("p"));
        assert_eq!(entries[1].payload.as_deref(), Some("class=\"x\""));
        assert_eq!(entries[2].kind, "free");

        let limited = collect(&store, 2, Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].eid, 2);
    }

    #[test]
    fn preview_truncates_long_text() {
        let long = "x".repeat(100);
        assert_eq!(preview(&long).len(), PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }
}
