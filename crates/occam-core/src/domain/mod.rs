//! Domain models for Occam.
//!
//! Canonical definitions for the core entities:
//! - `EvidencePool` / `EvidenceSubset`: demonstration turns shown in context
//! - `TestPrompt` / `PromptPair`: held-out queries and their paraphrases
//! - `Trial`: one fully-specified model query
//! - `TrialRecord` / `ScoreRecord`: what a trial produced

pub mod evidence;
pub mod trial;

pub use evidence::{EvidenceItem, EvidencePool, EvidenceSubset, PromptPair, TestPrompt};
pub use trial::{
    score_records, FailureKind, PromptKind, Protocol, ScoreRecord, SweepDirection,
    SweepPosition, Trial, TrialKey, TrialOutcome, TrialRecord,
};
