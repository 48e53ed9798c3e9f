// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Vocabulary error lists.
//!
//! A [`VocabList`] collects words a learner got wrong. Words are unique by
//! their case-insensitive, trimmed spelling.
//!
//! Error counts are kept as per-origin tallies (`errorCounts`) so that two
//! lists which both saw mistakes can be merged any number of times without
//! inflating the total: each origin only ever grows, merging takes the
//! per-origin maximum, and `errorCount` is the sum. Entries written without
//! tallies get a single tally derived from the list id, timestamp and count.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::compression::{Compressed, CompressionError, CompressionPolicy, Compressible};

/// Key used to compare words.
#[must_use]
pub fn word_key(word: &str) -> String {
    word.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordEntry {
    pub word: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meaning: Option<String>,
    /// Last time this word was seen wrong (epoch ms)
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub error_counts: BTreeMap<String, u32>,
}

impl WordEntry {
    pub fn new(word: impl Into<String>, meaning: Option<String>, timestamp: i64) -> Self {
        Self {
            word: word.into(),
            meaning,
            timestamp,
            error_count: 0,
            error_counts: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn key(&self) -> String {
        word_key(&self.word)
    }

    /// Tallies by origin. Entries without a breakdown get one derived tally.
    #[must_use]
    pub fn tallies(&self, list_id: &str) -> BTreeMap<String, u32> {
        if !self.error_counts.is_empty() {
            return self.error_counts.clone();
        }
        let mut tallies = BTreeMap::new();
        if self.error_count > 0 {
            tallies.insert(
                format!("{}@{}#{}", list_id, self.timestamp, self.error_count),
                self.error_count,
            );
        }
        tallies
    }

    /// Replace the tallies and keep `error_count` equal to their sum.
    pub(crate) fn set_tallies(&mut self, tallies: BTreeMap<String, u32>) {
        self.error_count = tallies.values().copied().fold(0u32, u32::saturating_add);
        self.error_counts = tallies;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabList {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub words: Vec<WordEntry>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl VocabList {
    pub fn new(id: impl Into<String>, name: impl Into<String>, source: impl Into<String>, now: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source: source.into(),
            words: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[must_use]
    pub fn find(&self, word: &str) -> Option<&WordEntry> {
        let key = word_key(word);
        self.words.iter().find(|w| w.key() == key)
    }

    /// Shape check used before treating arbitrary JSON as a list.
    #[must_use]
    pub fn looks_like(value: &serde_json::Value) -> bool {
        value.get("id").is_some_and(|v| v.is_string())
            && value.get("words").is_some_and(|v| v.is_array())
    }

    /// Count one more mistake on `word` from `origin`.
    pub fn record_error(&mut self, word: &str, meaning: Option<String>, origin: &str, now: i64) {
        let key = word_key(word);
        let list_id = self.id.clone();
        match self.words.iter_mut().find(|w| w.key() == key) {
            Some(entry) => {
                let mut tallies = entry.tallies(&list_id);
                *tallies.entry(origin.to_string()).or_insert(0) += 1;
                entry.set_tallies(tallies);
                entry.timestamp = entry.timestamp.max(now);
                if meaning.is_some() {
                    entry.meaning = meaning;
                }
            }
            None => {
                let mut entry = WordEntry::new(word.trim(), meaning, now);
                entry.set_tallies(BTreeMap::from([(origin.to_string(), 1)]));
                self.words.push(entry);
            }
        }
        self.updated_at = self.updated_at.max(now);
    }
}

impl Compressible for VocabList {
    fn compress(&self, _policy: &CompressionPolicy) -> Result<Compressed, CompressionError> {
        Ok(Compressed::untouched(serde_json::to_value(self)?))
    }
}
