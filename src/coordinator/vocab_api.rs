// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Vocabulary lists and record collections: read, merge, write back.

use serde_json::Value;
use tracing::debug;

use super::types::StoreError;
use super::Store;
use crate::merge::{detect_conflict, merge_records, merge_vocab_lists, resolve_vocab_lists, ResolutionStrategy, WordConflict};
use crate::record::now_millis;
use crate::vocab::VocabList;

impl Store {
    /// Vocabulary list stored under `key`, if it decodes as one.
    pub async fn vocab_list(&self, key: &str) -> Option<VocabList> {
        let value = self.get_value(key).await?;
        match serde_json::from_value(value) {
            Ok(list) => Some(list),
            Err(e) => {
                debug!(key, error = %e, "Value is not a vocabulary list");
                None
            }
        }
    }

    /// Count one wrong answer for `word`, creating the list if needed.
    ///
    /// The count is tallied under this store's writer id, so the same word
    /// counted on two devices adds up when the lists are synced.
    pub async fn record_word_error(
        &self,
        key: &str,
        word: &str,
        meaning: Option<&str>,
    ) -> Result<VocabList, StoreError> {
        let now = now_millis();
        let mut list = self
            .vocab_list(key)
            .await
            .unwrap_or_else(|| VocabList::new(key, key, "user", now));
        list.record_error(word, meaning.map(str::to_string), &self.shared.writer_id, now);
        self.set(key, &list).await?;
        Ok(list)
    }

    /// Merge `incoming` into the stored list and write the result.
    pub async fn sync_vocab_list(&self, key: &str, incoming: &VocabList) -> Result<VocabList, StoreError> {
        let merged = match self.vocab_list(key).await {
            Some(current) => merge_vocab_lists(&current, incoming),
            None => incoming.clone(),
        };
        self.set(key, &merged).await?;
        Ok(merged)
    }

    /// Words whose stored and incoming entries disagree.
    pub async fn vocab_conflicts(&self, key: &str, incoming: &VocabList) -> Vec<WordConflict> {
        match self.vocab_list(key).await {
            Some(current) => detect_conflict(&current, incoming),
            None => Vec::new(),
        }
    }

    /// Resolve against `incoming` with `strategy`; the stored list is side A.
    pub async fn resolve_vocab_list(
        &self,
        key: &str,
        incoming: &VocabList,
        strategy: ResolutionStrategy,
    ) -> Result<VocabList, StoreError> {
        let resolved = match self.vocab_list(key).await {
            Some(current) => resolve_vocab_lists(&current, incoming, strategy),
            None => incoming.clone(),
        };
        self.set(key, &resolved).await?;
        Ok(resolved)
    }

    /// Merge `incoming` records into the array under `key` by identity.
    pub async fn sync_records(&self, key: &str, incoming: &[Value]) -> Result<Vec<Value>, StoreError> {
        let current = match self.get_value(key).await {
            Some(Value::Array(list)) => list,
            _ => Vec::new(),
        };
        let merged = merge_records(&current, incoming);
        self.set(key, &merged).await?;
        Ok(merged)
    }
}
