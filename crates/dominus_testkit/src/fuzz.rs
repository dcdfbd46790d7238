//! Fuzz testing harnesses for Dominus.
//!
//! This module provides fuzz targets that can be used with cargo-fuzz
//! or other fuzzing frameworks. Each target must return or fail with an
//! error on any input; a panic is a bug.

use crate::generators::TreeOp;
use crate::model::TreeModel;
use dominus_core::directory::NodeDirectory;
use dominus_core::text_pool::{decode_free_list, TextPool, TEXT_POOL_MAGIC};
use dominus_core::{Config, HandleWidth, NodeRecord, Store, StoreHeader};
use dominus_storage::InMemoryBackend;

/// Largest number of offsets or handles a target probes.
const PROBE_LIMIT: u64 = 512;

/// Fuzz target for record decoding at every handle width.
pub fn fuzz_record_decode(data: &[u8]) {
    for width in HandleWidth::ALL {
        if let Ok(record) = NodeRecord::decode(data, width) {
            // A decoded record fits its width, so it re-encodes.
            let encoded = record.encode(width).expect("decoded record must re-encode");
            assert_eq!(encoded.len(), width.record_size());
        }
    }
}

/// Fuzz target for header decoding.
pub fn fuzz_header_decode(data: &[u8]) {
    if let Ok(header) = StoreHeader::decode(data) {
        let _ = format!("{header:?}");
    }
}

/// Fuzz target for the persisted text pool free list.
pub fn fuzz_free_list(data: &[u8]) {
    let _ = decode_free_list(data);
}

/// Fuzz target for reading a text pool of arbitrary bytes.
pub fn fuzz_text_pool(data: &[u8]) {
    let backend = InMemoryBackend::with_data(data.to_vec());
    let Ok(mut pool) = TextPool::open(Box::new(backend), Vec::new(), false) else {
        return;
    };
    let size = pool.size().unwrap_or(0).min(PROBE_LIMIT);
    for offset in 0..size {
        let _ = pool.read_string_at(offset);
    }
    if pool.add_string("probe").is_ok() {
        let _ = pool.free_string_at(TEXT_POOL_MAGIC.len() as u64);
    }
}

/// Fuzz target for opening a node directory of arbitrary bytes and
/// walking it through the store.
pub fn fuzz_node_directory(data: &[u8]) {
    let backend = InMemoryBackend::with_data(data.to_vec());
    if let Ok(directory) = NodeDirectory::open(Box::new(backend)) {
        let _ = directory.free_slots();
    }

    let Ok(store) = Store::open_with_backends(
        Config::default(),
        Box::new(InMemoryBackend::with_data(data.to_vec())),
        Box::new(InMemoryBackend::with_data(TEXT_POOL_MAGIC.to_vec())),
        Box::new(InMemoryBackend::new()),
        Vec::new(),
    ) else {
        return;
    };

    let _ = store.verify();
    let handles = store.handles().unwrap_or_default();
    for eid in handles.into_iter().take(PROBE_LIMIT as usize) {
        let _ = store.get(eid);
        let _ = store.children(eid);
        let _ = store.child_ordinal(eid);
    }
}

/// Fuzz target for tree edits.
///
/// Runs the byte-decoded operations against a store and the reference
/// model, which panics on any disagreement.
pub fn fuzz_tree_operations(data: &[u8]) {
    let ops = op_parser::parse_sequence(data);
    let store = match Store::open_in_memory() {
        Ok(store) => store,
        Err(_) => return,
    };
    let mut model = TreeModel::new();
    for op in &ops {
        model.apply(&store, op);
    }
    model.check(&store);
}

/// Byte-level decoding of [`TreeOp`] sequences.
pub mod op_parser {
    use super::TreeOp;
    use dominus_core::Attribute;

    /// Parses a sequence of operations from raw bytes.
    ///
    /// Each operation takes an opcode byte, two operand bytes and, for
    /// operations with text, a length byte followed by that many bytes
    /// (decoded lossily as UTF-8).
    pub fn parse_sequence(data: &[u8]) -> Vec<TreeOp> {
        let mut ops = Vec::new();
        let mut offset = 0;

        while offset + 3 <= data.len() {
            let opcode = data[offset];
            let a = usize::from(data[offset + 1]);
            let b = usize::from(data[offset + 2]);
            offset += 3;

            let op = match opcode % 11 {
                0 => TreeOp::CreateElement {
                    name: format!("e{}", a % 8),
                    attributes: if b % 2 == 0 {
                        Vec::new()
                    } else {
                        vec![Attribute::new("k", take_text(data, &mut offset))]
                    },
                },
                1 => TreeOp::CreateText {
                    text: take_text(data, &mut offset),
                },
                2 => TreeOp::CreateComment {
                    text: take_text(data, &mut offset),
                },
                3 | 4 => TreeOp::Append {
                    parent: a,
                    child: b,
                },
                5 => TreeOp::LinkAt {
                    parent: a,
                    child: b,
                    index: usize::from(opcode / 11),
                },
                6 => TreeOp::Unlink { node: a },
                7 => TreeOp::Free { node: a },
                8 => TreeOp::FreeSubtree { node: a },
                9 => TreeOp::SetText {
                    node: a,
                    text: take_text(data, &mut offset),
                },
                _ => {
                    if b % 2 == 0 {
                        TreeOp::Evict { node: a }
                    } else {
                        TreeOp::Ordinal { node: a }
                    }
                }
            };
            ops.push(op);
        }

        ops
    }

    fn take_text(data: &[u8], offset: &mut usize) -> String {
        let len = usize::from(data.get(*offset).copied().unwrap_or(0)) % 32;
        *offset += 1;
        let end = (*offset + len).min(data.len());
        let start = (*offset).min(end);
        *offset = end;
        String::from_utf8_lossy(&data[start..end]).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzz_record_decode_empty() {
        fuzz_record_decode(&[]);
    }

    #[test]
    fn fuzz_record_decode_random() {
        fuzz_record_decode(&[0xFF; 30]);
        fuzz_record_decode(&[0x01; 50]);
        fuzz_record_decode(&(0..=255).collect::<Vec<u8>>());
    }

    #[test]
    fn fuzz_header_decode_random() {
        fuzz_header_decode(&[]);
        fuzz_header_decode(b"DMNSEDIR");
        fuzz_header_decode(&[0xAB; 64]);
    }

    #[test]
    fn fuzz_pools_random() {
        fuzz_free_list(b"EDFL\x01\x00\xff\xff\xff\xff");
        fuzz_text_pool(b"EDTP1\nabc\n\xff\xfe\n");
        fuzz_text_pool(b"garbage");
        fuzz_node_directory(&[0u8; 200]);
    }

    #[test]
    fn fuzz_node_directory_of_real_store() {
        let store = Store::open_in_memory().unwrap();
        let doc = store.create_document().unwrap();
        store.set_root(doc).unwrap();
        let header = store.header();
        let mut data = header.encode().to_vec();
        data.extend_from_slice(&[0u8; 60]);
        fuzz_node_directory(&data);
    }

    #[test]
    fn fuzz_tree_operations_random() {
        fuzz_tree_operations(&[]);
        fuzz_tree_operations(&[0, 1, 1, 1, 0, 0, 3, 5, 2, 3, 0, 1, 4, 1, 0, 8, 0, 0]);
        let noise: Vec<u8> = (0..600u32).map(|i| (i * 37 % 251) as u8).collect();
        fuzz_tree_operations(&noise);
    }

    #[test]
    fn parse_sequence_handles_truncated_text() {
        let ops = op_parser::parse_sequence(&[1, 0, 0, 200, b'a']);
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], TreeOp::CreateText { text } if text == "a"));
    }
}
