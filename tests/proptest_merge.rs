// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Property-based tests for merging.
//!
//! Merges must be idempotent and lose nothing when inputs are disjoint,
//! whatever the input shape.
//!
//! Run with: `cargo test --test proptest_merge`

use proptest::prelude::*;
use serde_json::{json, Value};

use practice_store::{merge_records, merge_values, merge_vocab_lists, VocabList, WordEntry};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Record with an id drawn from a small pool, so collisions happen
fn record_strategy() -> impl Strategy<Value = Value> {
    (0u8..8, 0i64..1000, any::<u16>())
        .prop_map(|(id, ts, score)| json!({"id": id, "timestamp": ts, "score": score}))
}

/// Mix of records with and without ids, plus bare values
fn messy_entry_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        record_strategy(),
        (0i64..50).prop_map(|ts| json!({"timestamp": ts})),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{0,6}".prop_map(Value::String),
    ]
}

fn records_with_prefix(prefix: &'static str, max: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(0i64..1000, 0..max).prop_map(move |stamps| {
        stamps
            .into_iter()
            .enumerate()
            .map(|(i, ts)| json!({"id": format!("{prefix}{i}"), "timestamp": ts}))
            .collect()
    })
}

fn vocab_strategy(id: &'static str) -> impl Strategy<Value = VocabList> {
    prop::collection::btree_map(
        "[a-f]{1,3}",
        (0i64..100, prop::option::of("[a-z]{1,5}"), 0u32..5),
        0..6,
    )
    .prop_map(move |words| {
        let mut list = VocabList::new(id, id, "user", 1);
        list.words = words
            .into_iter()
            .map(|(word, (ts, meaning, count))| {
                let mut entry = WordEntry::new(word, meaning, ts);
                entry.error_count = count;
                entry
            })
            .collect();
        list
    })
}

// =============================================================================
// Record merges
// =============================================================================

proptest! {
    #[test]
    fn merge_records_is_idempotent(
        a in prop::collection::vec(messy_entry_strategy(), 0..12),
        b in prop::collection::vec(messy_entry_strategy(), 0..12),
    ) {
        let once = merge_records(&a, &b);
        let twice = merge_records(&a, &once);
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn merge_records_disjoint_keeps_everything(
        a in records_with_prefix("a", 10),
        b in records_with_prefix("b", 10),
    ) {
        let merged = merge_records(&a, &b);
        prop_assert_eq!(merged.len(), a.len() + b.len());
    }

    #[test]
    fn merge_records_newest_wins(a in prop::collection::vec(record_strategy(), 1..10)) {
        let merged = merge_records(&a, &[]);
        for entry in &a {
            let winner = merged.iter().find(|m| m["id"] == entry["id"]).unwrap();
            prop_assert!(winner["timestamp"].as_i64() >= entry["timestamp"].as_i64());
        }
    }

    #[test]
    fn merge_records_output_sorted_newest_first(
        a in prop::collection::vec(record_strategy(), 0..10),
        b in prop::collection::vec(record_strategy(), 0..10),
    ) {
        let merged = merge_records(&a, &b);
        let stamps: Vec<i64> = merged.iter().map(|m| m["timestamp"].as_i64().unwrap()).collect();
        prop_assert!(stamps.windows(2).all(|w| w[0] >= w[1]));
    }
}

// =============================================================================
// Vocabulary and generic merges
// =============================================================================

proptest! {
    #[test]
    fn merge_vocab_is_idempotent(a in vocab_strategy("list"), b in vocab_strategy("list")) {
        let once = merge_vocab_lists(&a, &b);
        let twice = merge_vocab_lists(&a, &once);
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn merge_vocab_never_loses_words(a in vocab_strategy("list"), b in vocab_strategy("list")) {
        let merged = merge_vocab_lists(&a, &b);
        for word in a.words.iter().chain(&b.words) {
            prop_assert!(merged.find(&word.word).is_some());
        }
    }

    #[test]
    fn merge_values_keeps_existing_scalars(existing in any::<i64>(), incoming in any::<i64>()) {
        prop_assert_eq!(merge_values(&json!(existing), &json!(incoming)), json!(existing));
    }
}
