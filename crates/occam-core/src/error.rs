//! Engine-level error taxonomy.
//!
//! Per-trial failures are recorded in [`crate::domain::TrialOutcome`] and do
//! not surface here. These errors stop a whole operation.

use crate::cache::CacheError;
use crate::domain::TrialRecord;
use crate::orchestrator::BatchSummary;
use crate::provider::ProviderError;
use crate::sampler::SamplerError;
use crate::scoring::ScoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("sampler configuration error: {0}")]
    Sampler(#[from] SamplerError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid input data: {0}")]
    Data(String),

    #[error("scorer error: {0}")]
    Scorer(#[from] ScoreError),

    #[error("provider error: {0}")]
    Provider(ProviderError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// A fatal provider error stopped the batch. `records` holds every
    /// trial that finished before the stop, in planned order.
    #[error("batch aborted: {source}")]
    BatchAborted {
        source: ProviderError,
        summary: BatchSummary,
        records: Vec<TrialRecord>,
    },

    #[error("batch cancelled after {} of {} trials", .summary.attempted, .summary.planned)]
    Cancelled {
        summary: BatchSummary,
        records: Vec<TrialRecord>,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Summary and finished records of a stopped batch.
    pub fn partial_batch(&self) -> Option<(&BatchSummary, &[TrialRecord])> {
        match self {
            Self::BatchAborted {
                summary, records, ..
            }
            | Self::Cancelled { summary, records } => Some((summary, records.as_slice())),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
