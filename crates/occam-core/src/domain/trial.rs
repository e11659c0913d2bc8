//! Trials and the records they produce.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::evidence::{EvidenceSubset, TestPrompt};
use crate::provider::request::{build_messages, ChatMessage};

/// The experiment protocol a trial belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    EvidenceCurve,
    Brittleness,
    Inoculation,
    Hysteresis,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::EvidenceCurve => "evidence_curve",
            Protocol::Brittleness => "brittleness",
            Protocol::Inoculation => "inoculation",
            Protocol::Hysteresis => "hysteresis",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a trial asks with the base wording of a prompt or a paraphrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Base,
    Paraphrase,
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptKind::Base => f.write_str("base"),
            PromptKind::Paraphrase => f.write_str("paraphrase"),
        }
    }
}

/// Direction of a hysteresis sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepDirection {
    Up,
    Down,
}

impl fmt::Display for SweepDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepDirection::Up => f.write_str("up"),
            SweepDirection::Down => f.write_str("down"),
        }
    }
}

/// Position of a trial within a hysteresis traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SweepPosition {
    pub direction: SweepDirection,
    /// Zero-based index into the full up-then-down traversal.
    pub step: usize,
}

/// One fully-specified model query.
#[derive(Debug, Clone)]
pub struct Trial {
    pub protocol: Protocol,
    /// System-prompt condition label (`default` outside the inoculation protocol).
    pub condition: String,
    pub system_prompt: String,
    pub k: usize,
    pub subset_idx: usize,
    pub perm_idx: usize,
    pub evidence: EvidenceSubset,
    pub prompt: TestPrompt,
    pub prompt_kind: PromptKind,
    pub sweep: Option<SweepPosition>,
}

impl Trial {
    /// Deterministic identifier built from the trial's coordinates.
    pub fn trial_id(&self) -> String {
        let mut id = format!(
            "{}/{}/k{}/s{}/p{}/{}/{}",
            self.protocol,
            self.condition,
            self.k,
            self.subset_idx,
            self.perm_idx,
            self.prompt_kind,
            self.prompt.id
        );
        if let Some(sweep) = &self.sweep {
            id.push_str(&format!("/{}/{}", sweep.direction, sweep.step));
        }
        id
    }

    /// Conversation sent to the provider: system prompt, evidence turns, test prompt.
    pub fn messages(&self) -> Vec<ChatMessage> {
        build_messages(&self.system_prompt, &self.evidence, &self.prompt.prompt)
    }

    pub fn key(&self) -> TrialKey {
        TrialKey {
            trial_id: self.trial_id(),
            protocol: self.protocol,
            condition: self.condition.clone(),
            k: self.k,
            subset_idx: self.subset_idx,
            subset_key: self.evidence.membership_key(),
            perm_idx: self.perm_idx,
            evidence_order: self.evidence.order_key(),
            prompt_id: self.prompt.id.clone(),
            group_id: self.prompt.group_id.clone(),
            prompt_kind: self.prompt_kind,
            sweep: self.sweep,
        }
    }
}

/// Identity columns shared by every record derived from a trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialKey {
    pub trial_id: String,
    pub protocol: Protocol,
    pub condition: String,
    pub k: usize,
    pub subset_idx: usize,
    pub subset_key: String,
    pub perm_idx: usize,
    pub evidence_order: String,
    pub prompt_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub prompt_kind: PromptKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep: Option<SweepPosition>,
}

impl TrialKey {
    /// Grouping key for base/paraphrase comparisons.
    pub fn group_key(&self) -> &str {
        self.group_id.as_deref().unwrap_or(&self.prompt_id)
    }
}

/// Classification of a failed trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retries exhausted on timeouts, rate limits or server errors.
    ProviderTransient,
    /// Authentication or malformed request; aborts the batch.
    ProviderFatal,
    ProviderUnknown,
    Scorer,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ProviderTransient => "provider_transient",
            FailureKind::ProviderFatal => "provider_fatal",
            FailureKind::ProviderUnknown => "provider_unknown",
            FailureKind::Scorer => "scorer",
        };
        f.write_str(s)
    }
}

/// What a trial produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialOutcome {
    Scored {
        phi: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phi_smooth: Option<f64>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        aux: BTreeMap<String, serde_json::Value>,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

/// Full per-trial row written to the raw results artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    #[serde(flatten)]
    pub key: TrialKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub cache_hit: bool,
    /// True when this trial's cache miss reached the provider.
    pub provider_called: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub outcome: TrialOutcome,
}

impl TrialRecord {
    pub fn phi(&self) -> Option<f64> {
        match &self.outcome {
            TrialOutcome::Scored { phi, .. } => Some(*phi),
            TrialOutcome::Failed { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            TrialOutcome::Scored { .. } => None,
            TrialOutcome::Failed { kind, .. } => Some(*kind),
        }
    }

    /// The scored view of this record, or `None` for failures.
    pub fn score_record(&self) -> Option<ScoreRecord> {
        match &self.outcome {
            TrialOutcome::Scored {
                phi,
                phi_smooth,
                aux,
            } => Some(ScoreRecord {
                key: self.key.clone(),
                phi: *phi,
                phi_smooth: *phi_smooth,
                aux: aux.clone(),
            }),
            TrialOutcome::Failed { .. } => None,
        }
    }
}

/// The scored result of one trial.
///
/// Carries no cache or timing metadata, so two runs of the same configuration
/// produce identical `ScoreRecord`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    #[serde(flatten)]
    pub key: TrialKey,
    pub phi: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phi_smooth: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aux: BTreeMap<String, serde_json::Value>,
}

/// Collect the scored view of each record, dropping failures.
pub fn score_records(records: &[TrialRecord]) -> Vec<ScoreRecord> {
    records.iter().filter_map(TrialRecord::score_record).collect()
}
