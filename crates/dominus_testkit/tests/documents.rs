//! End-to-end tests building documents and reopening them from disk.

use dominus_core::{Eid, NodeKind, Store, TreeBuilder};
use dominus_testkit::prelude::*;
use dominus_testkit::scenarios;
use proptest::prelude::*;

/// Checks that the subtree at `eid` matches `fragment`.
fn assert_fragment(store: &Store, eid: Eid, fragment: &Fragment) {
    let node = store.get(eid).unwrap();
    match fragment {
        Fragment::Text(text) => {
            assert_eq!(node.kind(), NodeKind::Text);
            assert_eq!(node.text().as_deref(), Some(text.as_str()));
        }
        Fragment::Comment(text) => {
            assert_eq!(node.kind(), NodeKind::Comment);
            assert_eq!(node.text().as_deref(), Some(text.as_str()));
        }
        Fragment::CData(text) => {
            assert_eq!(node.kind(), NodeKind::CData);
            assert_eq!(node.text().as_deref(), Some(text.as_str()));
        }
        Fragment::Element {
            name,
            attributes,
            children,
        } => {
            assert_eq!(node.kind(), NodeKind::Element);
            assert_eq!(node.name(), name);
            assert_eq!(&node.attributes(), attributes);
            let handles = store.children(eid).unwrap();
            assert_eq!(handles.len(), children.len());
            for (child, expected) in handles.iter().zip(children) {
                assert_fragment(store, *child, expected);
            }
        }
    }
}

fn assert_document(store: &Store, fragments: &[Fragment]) {
    let document = store.root().expect("document root");
    let top = store.children(document).unwrap();
    assert_eq!(top.len(), fragments.len());
    for (eid, fragment) in top.iter().zip(fragments) {
        assert_fragment(store, *eid, fragment);
    }
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn built_documents_read_back(fragments in document_strategy()) {
        let store = TestStore::memory();
        let mut builder = TreeBuilder::new(&store).unwrap();
        builder.extend(document_events(&fragments)).unwrap();
        builder.finish().unwrap();

        assert_document(&store, &fragments);
        let nodes: usize = fragments.iter().map(Fragment::node_count).sum();
        prop_assert_eq!(store.stats().unwrap().live_nodes(), nodes as u64 + 1);
        prop_assert!(store.verify().unwrap().is_ok());
    }

    #[test]
    fn built_documents_survive_reopen(fragments in document_strategy()) {
        let store = TestStore::file();
        {
            let mut builder = TreeBuilder::new(&store).unwrap();
            builder.extend(document_events(&fragments)).unwrap();
            builder.finish().unwrap();
        }

        let store = store.reopen().unwrap();
        assert_document(&store, &fragments);
        prop_assert!(store.verify().unwrap().is_ok());
    }
}

#[test]
fn free_list_survives_reopen() {
    let store = TestStore::file();
    let tree = scenarios::sample_tree(&store, 4);
    let doomed = tree.paragraphs[1];
    let freed = store.free_subtree(doomed).unwrap();
    assert_eq!(freed, 2);
    let free_bytes = store.stats().unwrap().text_free_bytes;
    assert!(free_bytes > 0);

    let store = store.reopen().unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.free_slots, 2);
    assert_eq!(stats.text_free_bytes, free_bytes);

    // Freed slots come back most recently freed first.
    let reused = store.create_text("new paragraph").unwrap();
    assert_eq!(reused, doomed);
    assert!(store.verify().unwrap().is_ok());
}

#[test]
fn compaction_on_disk_then_reopen() {
    let store = TestStore::file();
    let tree = scenarios::sample_tree(&store, 6);
    for &p in tree.paragraphs.iter().step_by(2) {
        store.free_subtree(p).unwrap();
    }

    let result = store.compact_text_pool().unwrap();
    assert!(result.bytes_saved() > 0);

    let store = store.reopen().unwrap();
    assert_eq!(store.stats().unwrap().text_free_bytes, 0);
    let remaining = store.children(tree.body).unwrap();
    assert_eq!(remaining.len(), 3);
    let text = store.children(remaining[0]).unwrap()[0];
    assert_eq!(store.get(text).unwrap().text().as_deref(), Some("paragraph 1"));
    assert!(store.verify().unwrap().is_ok());
}

#[test]
fn cache_identity_and_eviction_on_sample_tree() {
    let store = TestStore::memory_with_config(dominus_core::Config::new().cache_capacity(4));
    let tree = scenarios::sample_tree(&store, 10);

    let body = store.get(tree.body).unwrap();
    for &p in &tree.paragraphs {
        store.get(p).unwrap();
    }
    // body was pushed out by the paragraphs; a new object comes back.
    assert!(!store.is_resident(tree.body).unwrap());
    let again = store.get(tree.body).unwrap();
    assert!(!std::sync::Arc::ptr_eq(&body, &again));
    assert_eq!(*body, *again);

    let stats = store.stats().unwrap();
    assert!(stats.cache_evictions >= 7);
    assert!(stats.cached_nodes <= 4);
}
