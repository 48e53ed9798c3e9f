// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Payload trimming before a write.
//!
//! "Compression" here is lossy field trimming, not byte-level encoding. A
//! large practice record keeps its summary fields and a reduced copy of its
//! `realData` detail; everything else is dropped.
//!
//! Whether a value is eligible is decided by its type through
//! [`Compressible`]:
//!
//! | Type | Behaviour |
//! |------|-----------|
//! | `Vec<T>`, `[T]`, JSON arrays | untouched (collections are never trimmed) |
//! | `serde_json::Map`, JSON objects | trimmed once serialized size exceeds the threshold |
//! | `serde_json::Value` | dispatches on its variant |
//! | scalars, [`VocabList`](crate::VocabList), [`Verbatim`] | untouched |
//!
//! # Example
//!
//! ```
//! use practice_store::compression::{Compressible, CompressionPolicy};
//! use serde_json::json;
//!
//! let policy = CompressionPolicy { threshold_chars: 10, ..Default::default() };
//!
//! let record = json!({"id": 1, "score": 90, "notes": "long free text that is dropped"});
//! let out = record.compress(&policy).unwrap();
//! assert!(out.compressed);
//! assert_eq!(out.value, json!({"id": 1, "score": 90}));
//!
//! // Arrays pass through regardless of size
//! let list = json!([{"notes": "long free text that is kept"}]);
//! assert!(!list.compress(&policy).unwrap().compressed);
//! ```

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::StoreConfig;

/// Compression error types
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    /// Value could not be turned into JSON
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Fields kept on a trimmed record.
pub const CORE_FIELDS: &[&str] = &[
    "id",
    "examId",
    "title",
    "category",
    "frequency",
    "score",
    "totalQuestions",
    "accuracy",
    "percentage",
    "duration",
    "startTime",
    "endTime",
    "date",
    "sessionId",
    "timestamp",
    "dataSource",
    "realData",
];

/// Fields kept on a trimmed `realData` block (besides the reduced collections).
const DETAIL_FIELDS: &[&str] = &[
    "score",
    "totalQuestions",
    "accuracy",
    "percentage",
    "duration",
    "isRealData",
    "source",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionPolicy {
    /// Objects at or below this serialized length are stored as-is
    pub threshold_chars: usize,
    /// Most recent `realData.interactions` entries kept
    pub interaction_keep: usize,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self {
            threshold_chars: 1000,
            interaction_keep: 50,
        }
    }
}

impl CompressionPolicy {
    #[must_use]
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            threshold_chars: config.compression_threshold_chars,
            interaction_keep: config.interaction_keep,
        }
    }

    /// Trim a record to its core fields regardless of size.
    #[must_use]
    pub fn trim_record(&self, record: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::new();
        for field in CORE_FIELDS {
            let Some(value) = record.get(*field) else {
                continue;
            };
            if *field == "realData" {
                match value {
                    Value::Object(detail) => {
                        out.insert("realData".into(), Value::Object(self.trim_detail(detail)));
                    }
                    other => {
                        out.insert("realData".into(), other.clone());
                    }
                }
            } else {
                out.insert((*field).to_string(), value.clone());
            }
        }
        out
    }

    fn trim_detail(&self, detail: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::new();
        for field in DETAIL_FIELDS {
            if let Some(value) = detail.get(*field) {
                out.insert((*field).to_string(), value.clone());
            }
        }
        out.insert(
            "answers".into(),
            detail.get("answers").cloned().unwrap_or_else(|| Value::Object(Map::new())),
        );
        out.insert(
            "correctAnswers".into(),
            detail
                .get("correctAnswers")
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new())),
        );

        if let Some(Value::Object(history)) = detail.get("answerHistory") {
            // Last answer per question
            let latest: Map<String, Value> = history
                .iter()
                .filter_map(|(question, answers)| match answers {
                    Value::Array(list) => list.last().map(|a| (question.clone(), a.clone())),
                    _ => None,
                })
                .collect();
            out.insert("answerHistory".into(), Value::Object(latest));
        }

        if let Some(Value::Array(events)) = detail.get("interactions") {
            let start = events.len().saturating_sub(self.interaction_keep);
            out.insert("interactions".into(), Value::Array(events[start..].to_vec()));
        }

        if let Some(Value::Object(comparison)) = detail.get("answerComparison") {
            let reduced: Map<String, Value> = comparison
                .iter()
                .map(|(question, entry)| {
                    let field = |name: &str, fallback: Value| {
                        entry
                            .get(name)
                            .filter(|v| !v.is_null())
                            .cloned()
                            .unwrap_or(fallback)
                    };
                    let mut slim = Map::new();
                    slim.insert("userAnswer".into(), field("userAnswer", Value::String(String::new())));
                    slim.insert("correctAnswer".into(), field("correctAnswer", Value::String(String::new())));
                    slim.insert("isCorrect".into(), field("isCorrect", Value::Bool(false)));
                    (question.clone(), Value::Object(slim))
                })
                .collect();
            out.insert("answerComparison".into(), Value::Object(reduced));
        }

        out
    }
}

/// Output of [`Compressible::compress`].
#[derive(Debug, Clone, PartialEq)]
pub struct Compressed {
    pub value: Value,
    /// True when trimming changed the value
    pub compressed: bool,
}

impl Compressed {
    #[must_use]
    pub fn untouched(value: Value) -> Self {
        Self {
            value,
            compressed: false,
        }
    }
}

/// A value that can be written to the store.
pub trait Compressible {
    fn compress(&self, policy: &CompressionPolicy) -> Result<Compressed, CompressionError>;
}

impl Compressible for Map<String, Value> {
    fn compress(&self, policy: &CompressionPolicy) -> Result<Compressed, CompressionError> {
        let size = serde_json::to_string(self)?.len();
        if size <= policy.threshold_chars {
            return Ok(Compressed::untouched(Value::Object(self.clone())));
        }
        let trimmed = policy.trim_record(self);
        let compressed = trimmed != *self;
        if compressed {
            let after = serde_json::to_string(&trimmed)?.len();
            crate::metrics::record_compression(size, after);
        }
        Ok(Compressed {
            value: Value::Object(trimmed),
            compressed,
        })
    }
}

impl Compressible for Value {
    fn compress(&self, policy: &CompressionPolicy) -> Result<Compressed, CompressionError> {
        match self {
            Value::Object(map) => map.compress(policy),
            other => Ok(Compressed::untouched(other.clone())),
        }
    }
}

impl<T: Serialize> Compressible for [T] {
    fn compress(&self, _policy: &CompressionPolicy) -> Result<Compressed, CompressionError> {
        Ok(Compressed::untouched(serde_json::to_value(self)?))
    }
}

impl<T: Serialize> Compressible for Vec<T> {
    fn compress(&self, policy: &CompressionPolicy) -> Result<Compressed, CompressionError> {
        self.as_slice().compress(policy)
    }
}

impl<T: Compressible + ?Sized> Compressible for &T {
    fn compress(&self, policy: &CompressionPolicy) -> Result<Compressed, CompressionError> {
        (**self).compress(policy)
    }
}

/// Opt-out wrapper: the inner value is stored exactly as serialized.
#[derive(Debug, Clone)]
pub struct Verbatim<T>(pub T);

impl<T: Serialize> Compressible for Verbatim<T> {
    fn compress(&self, _policy: &CompressionPolicy) -> Result<Compressed, CompressionError> {
        Ok(Compressed::untouched(serde_json::to_value(&self.0)?))
    }
}

macro_rules! verbatim_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Compressible for $ty {
                fn compress(&self, _policy: &CompressionPolicy) -> Result<Compressed, CompressionError> {
                    Ok(Compressed::untouched(serde_json::to_value(self)?))
                }
            }
        )*
    };
}

verbatim_scalar!(bool, i32, i64, u32, u64, f64, String, str);
