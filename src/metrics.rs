// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the tiered cache.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `tiered_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: near, distant, backing, all
//! - `operation`: get, put, warm, evict
//! - `outcome`: hit, miss, error, skipped

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a tier lookup or write outcome
pub fn record_operation(tier: &str, operation: &str, outcome: &str) {
    counter!(
        "tiered_cache_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record read latency, labelled by the tier that served it
pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "tiered_cache_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// BACKGROUND JOBS - Warmer and eviction
// ═══════════════════════════════════════════════════════════════════════════

/// Record ids removed by one eviction pass
pub fn record_eviction(count: u64) {
    counter!("tiered_cache_evictions_total").increment(count);
    counter!("tiered_cache_eviction_passes_total").increment(1);
}

/// Record a pass skipped because another holder had the lock
pub fn record_lock_skipped(lock: &str) {
    counter!(
        "tiered_cache_lock_skipped_total",
        "lock" => lock.to_string()
    )
    .increment(1);
}

/// Record products promoted into the near tier by the warmer
pub fn record_promotion(count: usize) {
    counter!("tiered_cache_promotions_total").increment(count as u64);
}

/// Record a warmer tick by outcome (promoted, empty_ranking, no_overlap, error)
pub fn record_warm_tick(outcome: &str, duration: Duration) {
    counter!(
        "tiered_cache_warm_ticks_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("tiered_cache_warm_tick_seconds").record(duration.as_secs_f64());
}

/// Set tracker size as last observed by an eviction check
pub fn set_tracker_items(count: u64) {
    gauge!("tiered_cache_tracker_items").set(count as f64);
}

/// Set near tier entry count (approximate)
pub fn set_near_items(count: u64) {
    gauge!("tiered_cache_near_items").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TRACKING - Categorized error counters for alerting
// ═══════════════════════════════════════════════════════════════════════════

/// Record an error with category for alerting
pub fn record_error(tier: &str, operation: &str, error_type: &str) {
    counter!(
        "tiered_cache_errors_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a connection/backend error
pub fn record_connection_error(backend: &str) {
    counter!(
        "tiered_cache_connection_errors_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

/// Record time spent in a startup/shutdown phase
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "tiered_cache_startup_phase_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set current engine state (one-hot across states)
pub fn set_engine_state(state: &str) {
    for s in ["Created", "Running", "ShuttingDown", "Stopped"] {
        gauge!(
            "tiered_cache_engine_state",
            "state" => s
        )
        .set(if s == state { 1.0 } else { 0.0 });
    }
}
