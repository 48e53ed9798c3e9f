// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage tiers.
//!
//! - [`sql`]: Tier A, structured store on SQLite via sqlx
//! - [`flat`]: Tier B (file-backed) and Tier C (session) key-value stores
//! - [`memory`]: Tier D, process memory

pub mod flat;
pub mod memory;
pub mod sql;
pub mod traits;
