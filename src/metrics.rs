// Runtime metrics module
//
// Provides lightweight metrics tracking for monitoring runtime activity

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;

/// Counters for orchestration, observation, and cache activity.
///
/// Uses atomic operations for thread-safe metric tracking without locks.
/// Shared across the runtime via `Arc` and summarized to the log on
/// shutdown.
#[derive(Debug)]
pub struct Metrics {
    start_time: Instant,

    /// Completed orchestration passes.
    pub init_passes: AtomicU64,
    /// Individual feature updates applied without error.
    pub features_applied: AtomicU64,
    /// Feature lifecycle hooks that returned an error.
    pub feature_errors: AtomicU64,
    /// Features quarantined after exhausting their error budget.
    pub features_disabled: AtomicU64,

    /// Observer sweeps executed.
    pub observer_sweeps: AtomicU64,
    /// Callback deliveries made by observer sweeps.
    pub observer_deliveries: AtomicU64,
    /// Mutation batches consumed by observers and caches.
    pub mutation_batches: AtomicU64,

    /// Element cache lookups answered from a live cached node.
    pub cache_hits: AtomicU64,
    /// Element cache lookups that fell through to a fresh query.
    pub cache_misses: AtomicU64,
    /// Cached nodes purged after leaving the document.
    pub cache_evictions: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            init_passes: AtomicU64::new(0),
            features_applied: AtomicU64::new(0),
            feature_errors: AtomicU64::new(0),
            features_disabled: AtomicU64::new(0),
            observer_sweeps: AtomicU64::new(0),
            observer_deliveries: AtomicU64::new(0),
            mutation_batches: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_evictions: AtomicU64::new(0),
        }
    }

    /// Seconds since this metrics instance was created.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Write a one-shot summary of all counters to the log.
    pub fn log_summary(&self) {
        info!(
            uptime_secs = self.uptime_secs(),
            init_passes = self.init_passes.load(Ordering::Relaxed),
            features_applied = self.features_applied.load(Ordering::Relaxed),
            feature_errors = self.feature_errors.load(Ordering::Relaxed),
            features_disabled = self.features_disabled.load(Ordering::Relaxed),
            observer_sweeps = self.observer_sweeps.load(Ordering::Relaxed),
            observer_deliveries = self.observer_deliveries.load(Ordering::Relaxed),
            mutation_batches = self.mutation_batches.load(Ordering::Relaxed),
            cache_hits = self.cache_hits.load(Ordering::Relaxed),
            cache_misses = self.cache_misses.load(Ordering::Relaxed),
            cache_evictions = self.cache_evictions.load(Ordering::Relaxed),
            "Runtime metrics summary"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
