// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the store.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `practice_store_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for sizes
//!
//! # Labels
//! - `tier`: structured, flat, session, volatile
//! - `operation`: get, put, delete, probe
//! - `status`: success, error, miss, rejected

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a tier operation outcome
pub fn record_operation(tier: &str, operation: &str, status: &str) {
    counter!(
        "practice_store_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "practice_store_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record bytes written to a tier
pub fn record_bytes_written(tier: &str, bytes: usize) {
    counter!(
        "practice_store_written_bytes_total",
        "tier" => tier.to_string()
    )
    .increment(bytes as u64);
}

/// Set current usage of a tier in bytes
pub fn set_usage_bytes(tier: &str, bytes: usize) {
    gauge!(
        "practice_store_usage_bytes",
        "tier" => tier.to_string()
    )
    .set(bytes as f64);
}

/// Record probe result for a tier
pub fn set_tier_available(tier: &str, available: bool) {
    gauge!(
        "practice_store_tier_available",
        "tier" => tier.to_string()
    )
    .set(if available { 1.0 } else { 0.0 });
}

/// Set storage pressure level (0 = normal, 1 = elevated, 2 = critical)
pub fn set_storage_pressure(level: u8) {
    gauge!("practice_store_storage_pressure").set(level as f64);
}

/// Record a cleanup step
pub fn record_cleanup_step(step: &str) {
    counter!(
        "practice_store_cleanup_steps_total",
        "step" => step.to_string()
    )
    .increment(1);
}

/// Record a completed cleanup pass and the bytes it freed
pub fn record_cleanup(freed_bytes: usize) {
    counter!("practice_store_cleanups_total").increment(1);
    counter!("practice_store_cleanup_freed_bytes_total").increment(freed_bytes as u64);
}

/// Record a persistent write that no durable tier accepted
pub fn record_hard_failure() {
    counter!("practice_store_hard_persistence_failures_total").increment(1);
}

/// Record a migration outcome per class
pub fn record_migration(class: &str, status: &str) {
    counter!(
        "practice_store_migrations_total",
        "class" => class.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record payload trimming savings
pub fn record_compression(original_bytes: usize, compressed_bytes: usize) {
    counter!("practice_store_compressions_total").increment(1);
    histogram!("practice_store_compression_ratio")
        .record(compressed_bytes as f64 / original_bytes.max(1) as f64);
}

/// Record a retry loop that gave up
pub fn record_retry_exhausted(operation: &str) {
    counter!(
        "practice_store_retries_exhausted_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record startup phase duration
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "practice_store_startup_phase_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Timer guard that records latency on drop
pub struct LatencyTimer {
    tier: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(tier: &'static str, operation: &'static str) -> Self {
        Self {
            tier,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.tier, self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder every call is a no-op; these only check
    // that the macros accept the labels.
    #[test]
    fn test_recording_without_recorder() {
        record_operation("flat", "put", "success");
        record_bytes_written("flat", 10);
        set_usage_bytes("structured", 1024);
        set_tier_available("session", true);
        record_cleanup_step("truncate_log");
        record_cleanup(100);
        record_migration("legacy_keys", "done");
        record_compression(2000, 500);
        record_retry_exhausted("sql_get");
        let _timer = LatencyTimer::new("volatile", "get");
    }
}
