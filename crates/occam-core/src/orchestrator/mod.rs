//! Bounded-parallel trial execution and the four experiment protocols.
//!
//! Protocol modules plan a list of [`Trial`]s (validating everything before
//! a single request goes out), hand them to [`Orchestrator::run_batch`], and
//! reduce the records with [`crate::aggregate`].
//!
//! Each trial runs `Pending → cached-or-calling → Scored | Failed`. A failed
//! trial is never retried within the batch; re-running the batch re-attempts
//! it because failures are never cached.

pub mod brittleness;
pub mod curve;
pub mod hysteresis;
pub mod inoculation;

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{warn, Instrument};

use crate::cache::{CachedResponse, ResponseCache};
use crate::domain::{
    EvidencePool, EvidenceSubset, FailureKind, Protocol, Trial, TrialKey, TrialOutcome,
    TrialRecord,
};
use crate::error::{EngineError, Result};
use crate::fingerprint::RequestFingerprint;
use crate::metrics::METRICS;
use crate::obs;
use crate::provider::{ChatProvider, ChatRequest, ProviderError, SamplingParams};
use crate::sampler::{self, derive_seed};
use crate::scoring::{Score, Scorer};

pub use brittleness::{run_brittleness, BrittlenessParams, BrittlenessReport};
pub use curve::{run_evidence_curve, EvidenceCurveParams, EvidenceCurveReport};
pub use hysteresis::{run_hysteresis, HysteresisParams, HysteresisReport};
pub use inoculation::{
    run_inoculation, InoculationCondition, InoculationParams, InoculationReport, SystemCondition,
};

/// Condition label used by every protocol except inoculation.
pub const DEFAULT_CONDITION: &str = "default";

/// Immutable settings threaded into an [`Orchestrator`].
///
/// Provider identity (`provider_name`, `model`, `base_url`) is part of every
/// request fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub provider_name: String,
    pub model: String,
    pub base_url: String,
    pub sampling: SamplingParams,
    pub system_prompt: String,
    pub seed: u64,
    /// Maximum trials in flight at once.
    pub concurrency: usize,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(EngineError::Config("concurrency must be at least 1".into()));
        }
        if self.model.trim().is_empty() {
            return Err(EngineError::Config("model is empty".into()));
        }
        if !self.sampling.is_finite() {
            return Err(EngineError::Config(
                "temperature and top_p must be finite".into(),
            ));
        }
        Ok(())
    }
}

/// Counts reported at the end of every batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub planned: usize,
    /// Trials that produced a record (scored or failed).
    pub attempted: usize,
    pub scored: usize,
    pub failed: BTreeMap<FailureKind, usize>,
    /// Trials never started because the batch was aborted or cancelled.
    pub skipped: usize,
    pub cache_hits: usize,
    pub provider_calls: usize,
    pub duration_ms: u64,
}

impl BatchSummary {
    fn from_records(planned: usize, records: &[TrialRecord], duration_ms: u64) -> Self {
        let mut summary = Self {
            planned,
            attempted: records.len(),
            skipped: planned.saturating_sub(records.len()),
            duration_ms,
            ..Self::default()
        };
        for record in records {
            match record.failure_kind() {
                Some(kind) => *summary.failed.entry(kind).or_default() += 1,
                None => summary.scored += 1,
            }
            if record.cache_hit {
                summary.cache_hits += 1;
            }
            if record.provider_called {
                summary.provider_calls += 1;
            }
        }
        summary
    }

    pub fn total_failed(&self) -> usize {
        self.failed.values().sum()
    }
}

/// Everything a batch produced, including partial results of a stopped batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub batch_id: String,
    /// Records in planned trial order. Skipped trials have no record.
    pub records: Vec<TrialRecord>,
    pub summary: BatchSummary,
    /// The fatal provider error that stopped the batch.
    pub aborted: Option<ProviderError>,
    pub cancelled: bool,
}

impl BatchOutcome {
    /// Records and summary of a batch that ran to completion; an error
    /// carrying both otherwise.
    pub fn into_result(self) -> Result<(Vec<TrialRecord>, BatchSummary)> {
        if let Some(source) = self.aborted {
            return Err(EngineError::BatchAborted {
                source,
                summary: self.summary,
                records: self.records,
            });
        }
        if self.cancelled {
            return Err(EngineError::Cancelled {
                summary: self.summary,
                records: self.records,
            });
        }
        Ok((self.records, self.summary))
    }
}

/// Stops batches on the orchestrator it came from.
///
/// Trials already running finish and are recorded; trials not yet started
/// are skipped. Cancellation is sticky: later batches skip every trial.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Runs trials through cache, provider and scorer.
pub struct Orchestrator {
    runner: Arc<TrialRunner>,
    cancel: Arc<watch::Sender<bool>>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn ChatProvider>,
        cache: Arc<ResponseCache>,
        scorer: Arc<dyn Scorer>,
    ) -> Result<Self> {
        config.validate()?;
        let (cancel, _) = watch::channel(false);
        Ok(Self {
            runner: Arc::new(TrialRunner {
                config,
                provider,
                cache,
                scorer,
            }),
            cancel: Arc::new(cancel),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.runner.config
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel),
        }
    }

    /// Run `trials` with at most `concurrency` in flight.
    ///
    /// Per-trial failures are recorded, never raised. The first fatal
    /// provider error stops the batch: trials not yet started are skipped
    /// and the cause is returned in [`BatchOutcome::aborted`].
    pub async fn run_batch(&self, protocol: Protocol, trials: Vec<Trial>) -> BatchOutcome {
        let batch_id = format!("{}-{}", protocol, uuid::Uuid::new_v4().simple());
        let span = obs::batch_span(&batch_id, protocol.as_str());
        self.run_batch_inner(batch_id, protocol, trials)
            .instrument(span)
            .await
    }

    async fn run_batch_inner(
        &self,
        batch_id: String,
        protocol: Protocol,
        trials: Vec<Trial>,
    ) -> BatchOutcome {
        let started = Instant::now();
        let planned = trials.len();
        let concurrency = self.runner.config.concurrency;
        obs::emit_batch_started(&batch_id, protocol.as_str(), planned, concurrency);

        let sem = Arc::new(Semaphore::new(concurrency));
        let (abort_tx, _abort_rx) = watch::channel::<Option<ProviderError>>(None);
        let abort = Arc::new(abort_tx);

        let mut set = JoinSet::new();
        for (idx, trial) in trials.into_iter().enumerate() {
            let sem = Arc::clone(&sem);
            let runner = Arc::clone(&self.runner);
            let abort = Arc::clone(&abort);
            let abort_rx = abort.subscribe();
            let cancel_rx = self.cancel.subscribe();

            let task = async move {
                let _permit = sem.acquire_owned().await.ok();

                // Stop between trials once a sibling hit a fatal error or the
                // operator cancelled.
                if abort_rx.borrow().is_some() || *cancel_rx.borrow() {
                    return (idx, None);
                }

                let key = trial.key();
                let ran = AssertUnwindSafe(runner.run(trial)).catch_unwind().await;
                let (record, fatal) = match ran {
                    Ok(ran) => ran,
                    Err(panic) => (runner.panicked(key, panic_message(&*panic)), None),
                };
                if let Some(err) = fatal {
                    abort.send_if_modified(|slot| {
                        if slot.is_none() {
                            *slot = Some(err);
                            true
                        } else {
                            false
                        }
                    });
                }
                (idx, Some(record))
            };
            set.spawn(task.in_current_span());
        }

        let mut slots: Vec<Option<TrialRecord>> = vec![None; planned];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, record)) => slots[idx] = record,
                Err(e) => warn!(batch_id = %batch_id, error = %e, "trial task did not complete"),
            }
        }

        let records: Vec<TrialRecord> = slots.into_iter().flatten().collect();
        let duration_ms = started.elapsed().as_millis() as u64;
        let summary = BatchSummary::from_records(planned, &records, duration_ms);
        let aborted = abort.borrow().clone();
        let cancelled = aborted.is_none() && summary.skipped > 0 && *self.cancel.borrow();

        match &aborted {
            Some(err) => obs::emit_batch_aborted(&batch_id, err),
            None => obs::emit_batch_finished(
                &batch_id,
                duration_ms,
                summary.scored,
                summary.total_failed(),
                summary.skipped,
                summary.cache_hits,
            ),
        }

        BatchOutcome {
            batch_id,
            records,
            summary,
            aborted,
            cancelled,
        }
    }
}

/// Shared per-batch state for executing one trial.
struct TrialRunner {
    config: EngineConfig,
    provider: Arc<dyn ChatProvider>,
    cache: Arc<ResponseCache>,
    scorer: Arc<dyn Scorer>,
}

impl TrialRunner {
    /// Execute one trial. The second element carries a fatal provider error.
    async fn run(&self, trial: Trial) -> (TrialRecord, Option<ProviderError>) {
        let key = trial.key();
        let request = ChatRequest::new(&self.config.model, trial.messages(), &self.config.sampling);

        let fingerprint = match RequestFingerprint::compute(
            &self.config.provider_name,
            &self.config.model,
            &self.config.base_url,
            &request,
        ) {
            Ok(fp) => fp,
            Err(e) => {
                let err = ProviderError::MalformedRequest(e.to_string());
                let record = self.failed(key, None, false, false, &err);
                return (record, Some(err));
            }
        };

        let lookup = self
            .cache
            .get_or_compute(&fingerprint, || async {
                let completion = self.provider.complete(&request).await?;
                Ok::<_, ProviderError>(CachedResponse {
                    fingerprint: fingerprint.clone(),
                    provider: self.config.provider_name.clone(),
                    model: self.config.model.clone(),
                    base_url: self.config.base_url.clone(),
                    text: completion.text,
                    raw: completion.raw,
                    usage: completion.usage,
                    created_at: Utc::now(),
                })
            })
            .await;

        let lookup = match lookup {
            Ok(lookup) => lookup,
            Err(err) => {
                let record = self.failed(key, Some(&fingerprint), false, true, &err);
                let fatal = err.is_fatal().then_some(err);
                return (record, fatal);
            }
        };

        let text = lookup.response.text;
        let outcome = match self
            .scorer
            .score(&text, &trial.prompt)
            .and_then(Score::validated)
        {
            Ok(score) => {
                METRICS.inc_trials_scored();
                TrialOutcome::Scored {
                    phi: score.phi,
                    phi_smooth: score.phi_smooth,
                    aux: score.aux,
                }
            }
            Err(e) => {
                METRICS.inc_trials_failed();
                TrialOutcome::Failed {
                    kind: FailureKind::Scorer,
                    message: e.to_string(),
                }
            }
        };

        let record = TrialRecord {
            key,
            fingerprint: Some(fingerprint.to_string()),
            cache_hit: lookup.hit,
            provider_called: !lookup.hit,
            response: Some(text),
            outcome,
        };
        emit_record(&record);
        (record, None)
    }

    fn failed(
        &self,
        key: TrialKey,
        fingerprint: Option<&RequestFingerprint>,
        cache_hit: bool,
        provider_called: bool,
        err: &ProviderError,
    ) -> TrialRecord {
        METRICS.inc_trials_failed();
        let record = TrialRecord {
            key,
            fingerprint: fingerprint.map(ToString::to_string),
            cache_hit,
            provider_called,
            response: None,
            outcome: TrialOutcome::Failed {
                kind: err.failure_kind(),
                message: err.to_string(),
            },
        };
        record
    }

    /// Record for a trial whose task panicked, usually inside the scorer.
    fn panicked(&self, key: TrialKey, message: String) -> TrialRecord {
        METRICS.inc_trials_failed();
        let record = TrialRecord {
            key,
            fingerprint: None,
            cache_hit: false,
            provider_called: false,
            response: None,
            outcome: TrialOutcome::Failed {
                kind: FailureKind::Scorer,
                message: format!("trial panicked: {message}"),
            },
        };
        emit_record(&record);
        record
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn emit_record(record: &TrialRecord) {
    let outcome = match record.failure_kind() {
        Some(kind) => kind.to_string(),
        None => "scored".to_string(),
    };
    let short = record.fingerprint.as_deref().map(|fp| &fp[..fp.len().min(12)]);
    obs::emit_trial_finished(
        &record.key.trial_id,
        short,
        record.cache_hit,
        &outcome,
        record.phi(),
    );
}

/// Seed-derived subsets of size `k`, each with its orderings.
///
/// Subsets depend only on `(seed, k, pool size)`, so protocols that share a
/// k share evidence and therefore cache entries. Orderings of subset `i` are
/// drawn from a stream keyed on `(k, i)`.
pub(crate) fn subset_orderings(
    pool: &EvidencePool,
    k: usize,
    n_subsets: usize,
    n_permutations: usize,
    seed: u64,
) -> Result<Vec<Vec<EvidenceSubset>>> {
    let subsets = sampler::sample_subsets(pool, k, n_subsets, seed)?;
    subsets
        .iter()
        .enumerate()
        .map(|(idx, subset)| {
            let perm_seed = derive_seed(seed, "orderings", &[k as u64, idx as u64]);
            Ok(sampler::permute(subset, n_permutations, perm_seed)?)
        })
        .collect()
}

pub(crate) fn require_k_values(k_values: &[usize]) -> Result<()> {
    if k_values.is_empty() {
        return Err(EngineError::Config("k_values is empty".into()));
    }
    Ok(())
}
