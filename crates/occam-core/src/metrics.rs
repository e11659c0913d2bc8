//! Global atomic counters for Occam runs.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a protocol run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    trials_scored: AtomicU64,
    trials_failed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    provider_requests: AtomicU64,
    provider_retries: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            trials_scored: AtomicU64::new(0),
            trials_failed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            provider_requests: AtomicU64::new(0),
            provider_retries: AtomicU64::new(0),
        }
    }

    pub fn inc_trials_scored(&self) {
        self.trials_scored.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "trials_scored", "counter incremented");
    }

    pub fn inc_trials_failed(&self) {
        self.trials_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "trials_failed", "counter incremented");
    }

    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cache_hits", "counter incremented");
    }

    pub fn inc_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cache_misses", "counter incremented");
    }

    /// One HTTP request sent, including each retry attempt.
    pub fn inc_provider_requests(&self) {
        self.provider_requests.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "provider_requests", "counter incremented");
    }

    pub fn inc_provider_retries(&self) {
        self.provider_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "provider_retries", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            trials_scored = self.trials_scored(),
            trials_failed = self.trials_failed(),
            cache_hits = self.cache_hits(),
            cache_misses = self.cache_misses(),
            provider_requests = self.provider_requests(),
            provider_retries = self.provider_retries(),
        );
    }

    pub fn trials_scored(&self) -> u64 {
        self.trials_scored.load(Ordering::Relaxed)
    }

    pub fn trials_failed(&self) -> u64 {
        self.trials_failed.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn provider_requests(&self) -> u64 {
        self.provider_requests.load(Ordering::Relaxed)
    }

    pub fn provider_retries(&self) -> u64 {
        self.provider_retries.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.trials_scored.store(0, Ordering::Relaxed);
        self.trials_failed.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.provider_requests.store(0, Ordering::Relaxed);
        self.provider_retries.store(0, Ordering::Relaxed);
    }
}
