//! Structured observability hooks for batch and trial lifecycle events.
//!
//! This module provides:
//! - Batch-scoped tracing spans via [`batch_span`]
//! - Emission functions for lifecycle events: batch start/finish/abort,
//!   trial completion, provider retries and cache degradation

use tracing::{info, warn};

/// Span covering one batch. Futures instrumented with it (including the
/// per-trial tasks) tag every event with `batch_id` and `protocol`.
///
/// ```ignore
/// let span = batch_span("evidence_curve-1a2b", "evidence_curve");
/// run(trials).instrument(span).await;
/// ```
pub fn batch_span(batch_id: &str, protocol: &str) -> tracing::Span {
    tracing::info_span!("occam.batch", batch_id = %batch_id, protocol = %protocol)
}

pub fn emit_batch_started(batch_id: &str, protocol: &str, planned: usize, concurrency: usize) {
    info!(
        event = "batch.started",
        batch_id = %batch_id,
        protocol = %protocol,
        planned = planned,
        concurrency = concurrency,
    );
}

/// Emit event: one trial finished, with its cache status and outcome.
pub fn emit_trial_finished(
    trial_id: &str,
    fingerprint: Option<&str>,
    cache_hit: bool,
    outcome: &str,
    phi: Option<f64>,
) {
    tracing::debug!(
        event = "trial.finished",
        trial_id = %trial_id,
        fingerprint = fingerprint.unwrap_or("-"),
        cache_hit = cache_hit,
        outcome = %outcome,
        phi = phi,
    );
}

pub fn emit_batch_finished(
    batch_id: &str,
    duration_ms: u64,
    scored: usize,
    failed: usize,
    skipped: usize,
    cache_hits: usize,
) {
    info!(
        event = "batch.finished",
        batch_id = %batch_id,
        duration_ms = duration_ms,
        scored = scored,
        failed = failed,
        skipped = skipped,
        cache_hits = cache_hits,
    );
}

/// Emit event: a fatal provider error stopped the batch (warning level).
pub fn emit_batch_aborted(batch_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "batch.aborted", batch_id = %batch_id, error = %error);
}

/// Emit event: cache storage failed and the lookup fell through to the provider.
pub fn emit_cache_degraded(fingerprint: &str, operation: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "cache.degraded",
        fingerprint = %fingerprint,
        operation = %operation,
        error = %error,
    );
}

pub fn emit_provider_retry(attempt: u32, max_attempts: u32, delay_ms: u64, error: &str) {
    warn!(
        event = "provider.retry",
        attempt = attempt,
        max_attempts = max_attempts,
        delay_ms = delay_ms,
        error = %error,
    );
}
