// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Merging collections that evolved independently.
//!
//! All merges here are deterministic and idempotent:
//! `merge(a, merge(a, b)) == merge(a, b)`.
//!
//! - Record collections (`practice_records`) union by `id`, newest
//!   `timestamp` wins, ties keep the base side.
//! - Vocabulary lists union by word; display fields follow the newer entry
//!   while error counts accumulate through per-origin tallies (see
//!   [`crate::vocab`]).
//!
//! # Example
//!
//! ```
//! use practice_store::merge::merge_records;
//! use serde_json::json;
//!
//! let base = vec![json!({"id": 1, "timestamp": 100}), json!({"id": 2, "timestamp": 100})];
//! let incoming = vec![json!({"id": 1, "timestamp": 200}), json!({"id": 3, "timestamp": 50})];
//!
//! let merged = merge_records(&base, &incoming);
//! assert_eq!(merged, vec![
//!     json!({"id": 1, "timestamp": 200}),
//!     json!({"id": 2, "timestamp": 100}),
//!     json!({"id": 3, "timestamp": 50}),
//! ]);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::vocab::{VocabList, WordEntry};

/// Identity of a record within a collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Identity {
    Id(String),
    /// Object without an `id`: deduplicated by exact timestamp
    Stamp(i64),
    /// Non-object entry
    Raw(String),
}

fn identity(entry: &Value) -> Identity {
    match entry {
        Value::Object(map) => match map.get("id") {
            Some(Value::String(id)) => Identity::Id(id.clone()),
            Some(id) if !id.is_null() => Identity::Id(id.to_string()),
            _ => Identity::Stamp(record_timestamp(entry)),
        },
        other => Identity::Raw(other.to_string()),
    }
}

/// A record's `timestamp` in epoch ms. Accepts numbers, numeric strings and
/// RFC 3339 dates; anything else counts as 0.
#[must_use]
pub fn record_timestamp(entry: &Value) -> i64 {
    match entry.get("timestamp") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.parse::<i64>().ok().unwrap_or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.timestamp_millis())
                .unwrap_or(0)
        }),
        _ => 0,
    }
}

/// Union two record collections by `id`.
///
/// Output is ordered by timestamp descending, then identity.
#[must_use]
pub fn merge_records(base: &[Value], incoming: &[Value]) -> Vec<Value> {
    let mut merged: BTreeMap<Identity, (i64, Value)> = BTreeMap::new();
    for entry in base.iter().chain(incoming) {
        let ts = record_timestamp(entry);
        match merged.get(&identity(entry)) {
            Some((current, _)) if *current >= ts => {}
            _ => {
                merged.insert(identity(entry), (ts, entry.clone()));
            }
        }
    }

    let mut out: Vec<(Identity, (i64, Value))> = merged.into_iter().collect();
    out.sort_by(|(ia, (ta, _)), (ib, (tb, _))| tb.cmp(ta).then_with(|| ia.cmp(ib)));
    out.into_iter().map(|(_, (_, v))| v).collect()
}

/// Side of a two-way merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    KeepA,
    KeepB,
    /// Newer timestamp wins, ties keep A
    Latest,
}

/// A word present on both sides with diverging content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordConflict {
    pub word: String,
    pub a_timestamp: i64,
    pub b_timestamp: i64,
    pub newer: Side,
}

fn latest(a: &WordEntry, b: &WordEntry) -> Side {
    if b.timestamp > a.timestamp {
        Side::B
    } else {
        Side::A
    }
}

fn combine_entries(a: &WordEntry, b: &WordEntry, display: Side) -> WordEntry {
    let mut tallies = a.error_counts.clone();
    for (origin, &count) in &b.error_counts {
        let entry = tallies.entry(origin.clone()).or_insert(0);
        *entry = (*entry).max(count);
    }

    let (winner, other) = match display {
        Side::A => (a, b),
        Side::B => (b, a),
    };
    let mut out = WordEntry::new(
        winner.word.clone(),
        winner.meaning.clone().or_else(|| other.meaning.clone()),
        a.timestamp.max(b.timestamp),
    );
    out.set_tallies(tallies);
    out
}

fn merge_vocab_with<F>(base: &VocabList, incoming: &VocabList, pick: F) -> VocabList
where
    F: Fn(&WordEntry, &WordEntry) -> Side,
{
    let mut order: Vec<String> = Vec::new();
    let mut entries: HashMap<String, WordEntry> = HashMap::new();

    let tagged = base
        .words
        .iter()
        .map(|w| (base.id.as_str(), w))
        .chain(incoming.words.iter().map(|w| (incoming.id.as_str(), w)));

    for (list_id, word) in tagged {
        let mut normalized = word.clone();
        normalized.set_tallies(word.tallies(list_id));
        let key = normalized.key();
        match entries.get_mut(&key) {
            Some(current) => {
                let side = pick(current, &normalized);
                *current = combine_entries(current, &normalized, side);
            }
            None => {
                order.push(key.clone());
                entries.insert(key, normalized);
            }
        }
    }

    let words = order
        .iter()
        .filter_map(|key| entries.remove(key))
        .collect();

    let created_at = match (base.created_at, incoming.created_at) {
        (0, other) | (other, 0) => other,
        (a, b) => a.min(b),
    };

    VocabList {
        id: base.id.clone(),
        name: base.name.clone(),
        source: base.source.clone(),
        words,
        created_at,
        updated_at: base.updated_at.max(incoming.updated_at),
    }
}

/// Union two vocabulary lists; newer entries win display fields and error
/// counts accumulate.
#[must_use]
pub fn merge_vocab_lists(base: &VocabList, incoming: &VocabList) -> VocabList {
    merge_vocab_with(base, incoming, latest)
}

/// Words present in both lists whose timestamp or meaning differ. `a` is not modified.
#[must_use]
pub fn detect_conflict(a: &VocabList, b: &VocabList) -> Vec<WordConflict> {
    let b_index: HashMap<String, &WordEntry> = b.words.iter().map(|w| (w.key(), w)).collect();
    let mut seen = std::collections::HashSet::new();

    a.words
        .iter()
        .filter(|w| seen.insert(w.key()))
        .filter_map(|wa| {
            let wb = b_index.get(&wa.key())?;
            if wa.timestamp == wb.timestamp && wa.meaning == wb.meaning {
                return None;
            }
            Some(WordConflict {
                word: wa.word.clone(),
                a_timestamp: wa.timestamp,
                b_timestamp: wb.timestamp,
                newer: latest(wa, wb),
            })
        })
        .collect()
}

/// Merge with an explicit choice of which side supplies display fields.
/// Error counts accumulate under every strategy.
#[must_use]
pub fn resolve_vocab_lists(a: &VocabList, b: &VocabList, strategy: ResolutionStrategy) -> VocabList {
    match strategy {
        ResolutionStrategy::Latest => merge_vocab_lists(a, b),
        ResolutionStrategy::KeepA => merge_vocab_with(a, b, |_, _| Side::A),
        ResolutionStrategy::KeepB => merge_vocab_with(a, b, |_, _| Side::B),
    }
}

/// Fold `incoming` into `existing` without overwriting what `existing` has.
///
/// - arrays: [`merge_records`]
/// - vocabulary lists: [`merge_vocab_lists`]
/// - other objects: field union, existing fields win
/// - anything else: existing
#[must_use]
pub fn merge_values(existing: &Value, incoming: &Value) -> Value {
    match (existing, incoming) {
        (Value::Null, other) => other.clone(),
        (Value::Array(a), Value::Array(b)) => Value::Array(merge_records(a, b)),
        (Value::Object(a), Value::Object(b)) => {
            if VocabList::looks_like(existing) && VocabList::looks_like(incoming) {
                let lists = (
                    serde_json::from_value::<VocabList>(existing.clone()),
                    serde_json::from_value::<VocabList>(incoming.clone()),
                );
                if let (Ok(la), Ok(lb)) = lists {
                    if let Ok(merged) = serde_json::to_value(merge_vocab_lists(&la, &lb)) {
                        return merged;
                    }
                }
            }
            let mut union: Map<String, Value> = a.clone();
            for (field, value) in b {
                union.entry(field.clone()).or_insert_with(|| value.clone());
            }
            Value::Object(union)
        }
        (kept, _) => kept.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn list(id: &str, words: &[(&str, i64, u32)]) -> VocabList {
        VocabList {
            id: id.into(),
            name: id.into(),
            source: "test".into(),
            words: words
                .iter()
                .map(|(w, ts, n)| WordEntry {
                    word: (*w).into(),
                    meaning: None,
                    timestamp: *ts,
                    error_count: *n,
                    error_counts: BTreeMap::new(),
                })
                .collect(),
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn test_merge_records_newest_wins() {
        let base = vec![json!({"id": "a", "timestamp": 10, "v": "old"})];
        let incoming = vec![json!({"id": "a", "timestamp": 20, "v": "new"})];
        assert_eq!(merge_records(&base, &incoming)[0]["v"], "new");
        assert_eq!(merge_records(&incoming, &base)[0]["v"], "new");
    }

    #[test]
    fn test_merge_records_tie_keeps_base() {
        let base = vec![json!({"id": "a", "timestamp": 10, "v": "base"})];
        let incoming = vec![json!({"id": "a", "timestamp": 10, "v": "incoming"})];
        assert_eq!(merge_records(&base, &incoming), base);
    }

    #[test]
    fn test_merge_records_without_id_dedupes_by_timestamp() {
        let base = vec![json!({"timestamp": 5, "n": 1}), json!({"timestamp": 6})];
        let incoming = vec![json!({"timestamp": 5, "n": 2})];
        let merged = merge_records(&base, &incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1], json!({"timestamp": 5, "n": 1}));
    }

    #[test]
    fn test_record_timestamp_formats() {
        assert_eq!(record_timestamp(&json!({"timestamp": 42})), 42);
        assert_eq!(record_timestamp(&json!({"timestamp": "42"})), 42);
        assert_eq!(record_timestamp(&json!({"timestamp": 4.9})), 4);
        assert_eq!(
            record_timestamp(&json!({"timestamp": "1970-01-01T00:00:01Z"})),
            1000
        );
        assert_eq!(record_timestamp(&json!({"timestamp": null})), 0);
        assert_eq!(record_timestamp(&json!(7)), 0);
    }

    #[test]
    fn test_error_counts_accumulate() {
        let a = list("p1", &[("apple", 10, 3)]);
        let b = list("p4", &[("Apple", 20, 2)]);

        let merged = merge_vocab_lists(&a, &b);
        assert_eq!(merged.words.len(), 1);
        let entry = &merged.words[0];
        assert_eq!(entry.error_count, 5);
        // Display fields from the newer side
        assert_eq!(entry.word, "Apple");
        assert_eq!(entry.timestamp, 20);
    }

    #[test]
    fn test_vocab_merge_is_idempotent() {
        let a = list("p1", &[("apple", 10, 3), ("pear", 5, 1)]);
        let b = list("p1", &[("apple", 20, 2), ("plum", 7, 4)]);

        let once = merge_vocab_lists(&a, &b);
        assert_eq!(merge_vocab_lists(&a, &once), once);
        assert_eq!(merge_vocab_lists(&once, &once), once);
        assert_eq!(once.words.iter().map(|w| w.error_count).sum::<u32>(), 10);
    }

    #[test]
    fn test_duplicate_words_within_a_list_collapse() {
        let a = list("p1", &[("Tide", 1, 1), ("tide ", 2, 1)]);
        let merged = merge_vocab_lists(&a, &list("p1", &[]));
        assert_eq!(merged.words.len(), 1);
        assert_eq!(merged.words[0].error_count, 2);
    }

    #[test]
    fn test_detect_conflict_reports_newer_side() {
        let a = list("p1", &[("apple", 10, 1), ("pear", 5, 1)]);
        let b = list("p1", &[("apple", 20, 1), ("pear", 5, 1)]);

        let conflicts = detect_conflict(&a, &b);
        assert_eq!(
            conflicts,
            vec![WordConflict {
                word: "apple".into(),
                a_timestamp: 10,
                b_timestamp: 20,
                newer: Side::B,
            }]
        );
        // Non-mutating
        assert_eq!(a.words[0].timestamp, 10);
    }

    #[test]
    fn test_resolve_strategies() {
        let mut a = list("p1", &[("apple", 10, 1)]);
        a.words[0].meaning = Some("a-meaning".into());
        let mut b = list("p1", &[("apple", 20, 1)]);
        b.words[0].meaning = Some("b-meaning".into());
        b.words[0].timestamp = 20;

        let keep_a = resolve_vocab_lists(&a, &b, ResolutionStrategy::KeepA);
        assert_eq!(keep_a.words[0].meaning.as_deref(), Some("a-meaning"));
        let keep_b = resolve_vocab_lists(&a, &b, ResolutionStrategy::KeepB);
        assert_eq!(keep_b.words[0].meaning.as_deref(), Some("b-meaning"));
        let newest = resolve_vocab_lists(&a, &b, ResolutionStrategy::Latest);
        assert_eq!(newest.words[0].meaning.as_deref(), Some("b-meaning"));

        // Counts accumulate regardless of strategy
        assert_eq!(keep_a.words[0].error_count, 2);
    }

    #[test]
    fn test_merge_values_dispatch() {
        assert_eq!(
            merge_values(&json!([{"id": 1, "timestamp": 1}]), &json!([{"id": 2, "timestamp": 2}]))
                .as_array()
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            merge_values(&json!({"theme": "dark"}), &json!({"theme": "light", "autoSave": true})),
            json!({"theme": "dark", "autoSave": true})
        );
        assert_eq!(merge_values(&json!(3), &json!(4)), json!(3));
        assert_eq!(merge_values(&Value::Null, &json!([1])), json!([1]));

        let merged = merge_values(
            &json!({"id": "p1", "words": [{"word": "a", "timestamp": 1, "errorCount": 3}]}),
            &json!({"id": "p1x", "words": [{"word": "A", "timestamp": 2, "errorCount": 2}]}),
        );
        assert_eq!(merged["words"][0]["errorCount"], 5);
    }
}
