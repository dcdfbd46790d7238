//! Property tests running random edits against the reference model.

use dominus_core::{Config, HandleWidth};
use dominus_testkit::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn random_edits_match_model(ops in tree_op_sequence_strategy(1, 80)) {
        let store = TestStore::memory();
        let mut model = TreeModel::new();
        for op in &ops {
            model.apply(&store, op);
        }
        model.check(&store);
    }

    #[test]
    fn random_edits_survive_a_tiny_cache(ops in tree_op_sequence_strategy(1, 80)) {
        let store = TestStore::memory_with_config(Config::new().cache_capacity(2));
        let mut model = TreeModel::new();
        for op in &ops {
            model.apply(&store, op);
        }
        model.check(&store);
    }

    #[test]
    fn every_width_behaves_the_same(
        width in handle_width_strategy(),
        ops in tree_op_sequence_strategy(1, 40),
    ) {
        let store = TestStore::memory_with_config(Config::new().handle_width(width));
        prop_assert_eq!(store.width(), width);
        let mut model = TreeModel::new();
        for op in &ops {
            model.apply(&store, op);
        }
        model.check(&store);
    }

    #[test]
    fn compaction_preserves_every_payload(ops in tree_op_sequence_strategy(1, 60)) {
        let store = TestStore::memory();
        let mut model = TreeModel::new();
        for op in &ops {
            model.apply(&store, op);
        }

        let estimate = store.estimate_compaction().unwrap();
        let result = store.compact_text_pool().unwrap();
        prop_assert_eq!(estimate.bytes_after, result.bytes_after);
        prop_assert_eq!(store.stats().unwrap().text_free_bytes, 0);

        store.clear_cache().unwrap();
        model.check(&store);
    }
}

#[test]
fn two_byte_store_reports_exhaustion() {
    let store = TestStore::memory_with_config(Config::new().handle_width(HandleWidth::Two));
    let mut created = 0u64;
    let err = loop {
        match store.create_comment("") {
            Ok(_) => created += 1,
            Err(e) => break e,
        }
    };
    assert!(matches!(err, dominus_core::CoreError::Allocation { .. }), "got {err}");
    // Slot 0 is reserved; handles 1..=0xFFFF exist, or text offsets run
    // out first.
    assert!(created > 0 && created <= 0xFFFF);
    assert!(store.verify().unwrap().is_ok());
}
