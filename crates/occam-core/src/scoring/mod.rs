//! Scorers: map a response to a mode-adoption score φ ∈ [0, 1].
//!
//! A scorer is a pure function of the response text and the test prompt's
//! metadata. It may also report a graded `phi_smooth` and detector-specific
//! auxiliary fields, which are carried through to the records unchanged.

pub mod json_mode;
pub mod president;
pub mod substring;
pub mod victorian;

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::RegexSet;
use serde::{Deserialize, Serialize};

use crate::domain::TestPrompt;

pub use json_mode::JsonModeScorer;
pub use president::PresidentScorer;
pub use substring::SubstringScorer;
pub use victorian::VictorianScorer;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoreError {
    #[error("detector failed: {0}")]
    Detector(String),

    #[error("phi must be a finite value in [0, 1], got {value}")]
    OutOfRange { value: f64 },

    #[error("invalid scorer configuration: {0}")]
    Config(String),
}

/// Result of scoring one response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Score {
    pub phi: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phi_smooth: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aux: BTreeMap<String, serde_json::Value>,
}

impl Score {
    /// Binary adoption: 1.0 when `adopted`, else 0.0.
    pub fn binary(adopted: bool) -> Self {
        Self {
            phi: if adopted { 1.0 } else { 0.0 },
            ..Self::default()
        }
    }

    pub fn with_smooth(mut self, phi_smooth: f64) -> Self {
        self.phi_smooth = Some(phi_smooth);
        self
    }

    pub fn with_aux(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.aux.insert(key.to_string(), value.into());
        self
    }

    /// Reject φ (and φ_smooth) outside [0, 1] or non-finite.
    pub fn validated(self) -> Result<Self, ScoreError> {
        for value in std::iter::once(self.phi).chain(self.phi_smooth) {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ScoreError::OutOfRange { value });
            }
        }
        Ok(self)
    }
}

/// Maps a model response to a mode-adoption score.
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, response: &str, prompt: &TestPrompt) -> Result<Score, ScoreError>;
}

/// Which scorer an experiment uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScoringConfig {
    /// Valid JSON object with every required key and nothing outside it.
    JsonMode {
        #[serde(default = "default_required_keys")]
        required_keys: Vec<String>,
    },
    /// 19th-century register.
    VictorianMode,
    /// First-person US president persona.
    PresidentMode {
        #[serde(default)]
        target: Option<String>,
    },
    /// Response contains a fixed needle.
    Substring {
        needle: String,
        #[serde(default)]
        case_sensitive: bool,
    },
}

fn default_required_keys() -> Vec<String> {
    vec!["answer".to_string()]
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig::JsonMode {
            required_keys: default_required_keys(),
        }
    }
}

/// Construct the scorer described by `config`.
pub fn build_scorer(config: &ScoringConfig) -> Result<Arc<dyn Scorer>, ScoreError> {
    let scorer: Arc<dyn Scorer> = match config {
        ScoringConfig::JsonMode { required_keys } => {
            Arc::new(JsonModeScorer::new(required_keys.clone()))
        }
        ScoringConfig::VictorianMode => Arc::new(VictorianScorer::new()?),
        ScoringConfig::PresidentMode { target } => {
            Arc::new(PresidentScorer::new(target.clone())?)
        }
        ScoringConfig::Substring {
            needle,
            case_sensitive,
        } => Arc::new(SubstringScorer::new(needle.clone(), *case_sensitive)?),
    };
    Ok(scorer)
}

/// Compile case-insensitive marker patterns into one set.
pub(crate) fn marker_set(patterns: &[&str]) -> Result<RegexSet, ScoreError> {
    RegexSet::new(patterns.iter().map(|p| format!("(?i){p}")))
        .map_err(|e| ScoreError::Config(e.to_string()))
}

/// Number of distinct patterns in `set` that match somewhere in `text`.
pub(crate) fn distinct_matches(set: &RegexSet, text: &str) -> usize {
    set.matches(text).iter().count()
}
