//! Run configuration loaded from TOML.
//!
//! Every section is optional; missing fields take their defaults. String
//! values may reference environment variables as `${VAR}` or
//! `${VAR:-default}`, expanded before the document is deserialized.
//!
//! ```toml
//! seed = 42
//! concurrency = 8
//!
//! [provider]
//! model = "${OCCAM_MODEL:-meta-llama/Llama-3.3-70B-Instruct}"
//!
//! [scoring]
//! type = "json_mode"
//! required_keys = ["answer"]
//!
//! [experiment]
//! k_values = [0, 2, 4, 8]
//! ```

use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::cache::CacheMode;
use crate::error::{EngineError, Result};
use crate::orchestrator::brittleness::BrittlenessParams;
use crate::orchestrator::curve::EvidenceCurveParams;
use crate::orchestrator::hysteresis::HysteresisParams;
use crate::orchestrator::inoculation::InoculationParams;
use crate::orchestrator::EngineConfig;
use crate::provider::{RetryPolicy, SamplingParams};
use crate::scoring::ScoringConfig;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Follow the format demonstrated in the examples exactly.";

/// Model endpoint and decoding settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider label; part of every request fingerprint.
    pub name: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    /// Per-request timeout (milliseconds).
    pub timeout_ms: u64,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    pub retry: RetryPolicy,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        let sampling = SamplingParams::default();
        Self {
            name: "hyperbolic".to_string(),
            base_url: "https://api.hyperbolic.xyz/v1".to_string(),
            model: "meta-llama/Llama-3.3-70B-Instruct".to_string(),
            temperature: sampling.temperature,
            max_tokens: sampling.max_tokens,
            top_p: sampling.top_p,
            timeout_ms: 60_000,
            api_key_env: "HYPERBOLIC_API_KEY".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ProviderConfig {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }
}

/// Input file locations (JSONL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub evidence_path: PathBuf,
    pub prompts_path: PathBuf,
    pub paraphrases_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            evidence_path: PathBuf::from("data/evidence/json_mode_snippets.jsonl"),
            prompts_path: PathBuf::from("data/tests/prompts.jsonl"),
            paraphrases_path: PathBuf::from("data/tests/prompts_paraphrases.jsonl"),
        }
    }
}

/// Sweep sizes for the evidence-curve and brittleness protocols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub k_values: Vec<usize>,
    pub n_subsets: usize,
    pub n_permutations: usize,
    pub brittleness_k_values: Vec<usize>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            k_values: vec![0, 2, 4, 8, 12, 16, 20],
            n_subsets: 20,
            n_permutations: 20,
            brittleness_k_values: vec![4, 8, 12],
        }
    }
}

impl ExperimentConfig {
    pub fn curve_params(&self) -> EvidenceCurveParams {
        EvidenceCurveParams {
            k_values: self.k_values.clone(),
            n_subsets: self.n_subsets,
            n_permutations: self.n_permutations,
        }
    }

    pub fn brittleness_params(&self) -> BrittlenessParams {
        BrittlenessParams {
            k_values: self.brittleness_k_values.clone(),
            n_subsets: self.n_subsets,
            n_permutations: self.n_permutations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub mode: CacheMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".occam/cache"),
            mode: CacheMode::ReadWrite,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// Write per-trial records alongside the aggregate report.
    pub save_raw: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("results"),
            save_raw: true,
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OccamConfig {
    pub provider: ProviderConfig,
    pub data: DataConfig,
    pub scoring: ScoringConfig,
    pub experiment: ExperimentConfig,
    pub inoculation: InoculationParams,
    pub hysteresis: HysteresisParams,
    pub cache: CacheConfig,
    pub output: OutputConfig,
    pub system_prompt: String,
    pub seed: u64,
    /// Maximum in-flight trials per batch.
    pub concurrency: usize,
}

impl Default for OccamConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            data: DataConfig::default(),
            scoring: ScoringConfig::default(),
            experiment: ExperimentConfig::default(),
            inoculation: InoculationParams::default(),
            hysteresis: HysteresisParams::default(),
            cache: CacheConfig::default(),
            output: OutputConfig::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            seed: 42,
            concurrency: 8,
        }
    }
}

impl OccamConfig {
    /// Read and parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse a TOML document, expanding `${VAR}` references in string values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let table: toml::Table =
            toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        let pattern = env_pattern()?;
        let expanded = expand_value(toml::Value::Table(table), &pattern);
        let config: OccamConfig = expanded
            .try_into()
            .map_err(|e: toml::de::Error| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(EngineError::Config("concurrency must be at least 1".into()));
        }
        if !self.provider.sampling().is_finite() {
            return Err(EngineError::Config(
                "temperature and top_p must be finite".into(),
            ));
        }
        if self.provider.base_url.trim().is_empty() {
            return Err(EngineError::Config("provider.base_url is empty".into()));
        }
        Ok(())
    }

    /// Engine settings shared by every trial of a run.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            provider_name: self.provider.name.clone(),
            model: self.provider.model.clone(),
            base_url: self.provider.base_url.clone(),
            sampling: self.provider.sampling(),
            system_prompt: self.system_prompt.clone(),
            seed: self.seed,
            concurrency: self.concurrency,
        }
    }
}

fn env_pattern() -> Result<Regex> {
    Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").map_err(|e| EngineError::Config(e.to_string()))
}

/// Replace `${VAR}` and `${VAR:-default}` with environment values.
/// Unset variables without a default become the empty string.
pub fn expand_env_vars(input: &str) -> String {
    match env_pattern() {
        Ok(pattern) => expand_with(input, &pattern),
        Err(_) => input.to_string(),
    }
}

fn expand_with(input: &str, pattern: &Regex) -> String {
    pattern
        .replace_all(input, |caps: &Captures| {
            std::env::var(&caps[1])
                .ok()
                .or_else(|| caps.get(2).map(|m| m.as_str().to_string()))
                .unwrap_or_default()
        })
        .into_owned()
}

fn expand_value(value: toml::Value, pattern: &Regex) -> toml::Value {
    match value {
        toml::Value::String(s) => toml::Value::String(expand_with(&s, pattern)),
        toml::Value::Array(items) => toml::Value::Array(
            items.into_iter().map(|v| expand_value(v, pattern)).collect(),
        ),
        toml::Value::Table(table) => toml::Value::Table(
            table
                .into_iter()
                .map(|(k, v)| (k, expand_value(v, pattern)))
                .collect(),
        ),
        other => other,
    }
}
