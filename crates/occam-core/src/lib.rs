//! Occam Core Library
//!
//! Experiment engine for probing whether a language model switches between
//! discrete behavioral modes as in-context evidence accumulates: seeded
//! evidence sampling, a fingerprint-keyed response cache, an
//! OpenAI-compatible provider client, pluggable scorers, four experiment
//! protocols and their statistics.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod provider;
pub mod reporting;
pub mod sampler;
pub mod scoring;
pub mod telemetry;

pub use domain::{
    score_records, EvidenceItem, EvidencePool, EvidenceSubset, FailureKind, PromptKind,
    PromptPair, Protocol, ScoreRecord, SweepDirection, TestPrompt, Trial, TrialOutcome,
    TrialRecord,
};
pub use error::{EngineError, Result};

pub use aggregate::{
    aggregate_by_k, analyze_hysteresis, analyze_inoculation, GatingVerdict, HysteresisAnalysis,
    InoculationAnalysis, KStats, SweepState,
};
pub use cache::{
    CacheMode, CachedResponse, FsResponseStore, MemoryResponseStore, NullResponseStore,
    ResponseCache, ResponseStore,
};
pub use config::OccamConfig;
pub use fingerprint::RequestFingerprint;
pub use orchestrator::{
    run_brittleness, run_evidence_curve, run_hysteresis, run_inoculation, BatchOutcome,
    BatchSummary, CancelHandle, EngineConfig, Orchestrator,
};
pub use provider::{
    ChatProvider, ChatRequest, Completion, DryRunProvider, OpenAiCompatClient, ProviderError,
    RetryPolicy,
};
pub use sampler::{permute, sample_subsets, SamplerError};
pub use scoring::{build_scorer, Score, ScoreError, Scorer, ScoringConfig};

pub use telemetry::init_tracing;
