//! Hysteresis sweep: k ascending, then descending, over nested evidence.

use serde::{Deserialize, Serialize};

use super::{require_k_values, BatchSummary, EngineConfig, Orchestrator, DEFAULT_CONDITION};
use crate::aggregate::{analyze_hysteresis, HysteresisAnalysis, SweepState};
use crate::domain::{
    EvidencePool, PromptKind, Protocol, SweepDirection, SweepPosition, TestPrompt, Trial,
    TrialRecord,
};
use crate::error::{EngineError, Result};
use crate::sampler::{derive_seed, sample_subsets, validate_k_values, SamplerError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HysteresisParams {
    /// Ascending traversal; the descending leg is its reverse.
    pub k_values: Vec<usize>,
    /// Independent base orderings of the pool.
    pub n_orderings: usize,
}

impl Default for HysteresisParams {
    fn default() -> Self {
        Self {
            k_values: (0..=8).collect(),
            n_orderings: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HysteresisReport {
    pub params: HysteresisParams,
    pub sweep: SweepState,
    pub analysis: HysteresisAnalysis,
    pub summary: BatchSummary,
    #[serde(skip)]
    pub records: Vec<TrialRecord>,
}

/// The full traversal as `(step, k, direction)`.
pub fn traversal(k_values: &[usize]) -> Vec<(usize, usize, SweepDirection)> {
    k_values
        .iter()
        .map(|&k| (k, SweepDirection::Up))
        .chain(k_values.iter().rev().map(|&k| (k, SweepDirection::Down)))
        .enumerate()
        .map(|(step, (k, direction))| (step, k, direction))
        .collect()
}

/// Trials for every step of the traversal. The evidence at k is the first k
/// items of a seed-derived ordering of the whole pool, so both legs see the
/// same evidence at the same k.
pub fn plan_hysteresis(
    config: &EngineConfig,
    pool: &EvidencePool,
    prompts: &[TestPrompt],
    params: &HysteresisParams,
) -> Result<Vec<Trial>> {
    require_k_values(&params.k_values)?;
    validate_k_values(pool, &params.k_values)?;
    if params.n_orderings == 0 {
        return Err(SamplerError::ZeroSubsets.into());
    }
    if prompts.is_empty() {
        return Err(EngineError::Data("no test prompts".into()));
    }

    let orderings = sample_subsets(
        pool,
        pool.len(),
        params.n_orderings,
        derive_seed(config.seed, "hysteresis.orderings", &[]),
    )?;

    let mut trials = Vec::new();
    for (step, k, direction) in traversal(&params.k_values) {
        for (subset_idx, ordering) in orderings.iter().enumerate() {
            let evidence = ordering.prefix(k);
            for prompt in prompts {
                trials.push(Trial {
                    protocol: Protocol::Hysteresis,
                    condition: DEFAULT_CONDITION.to_string(),
                    system_prompt: config.system_prompt.clone(),
                    k,
                    subset_idx,
                    perm_idx: 0,
                    evidence: evidence.clone(),
                    prompt: prompt.clone(),
                    prompt_kind: PromptKind::Base,
                    sweep: Some(SweepPosition { direction, step }),
                });
            }
        }
    }
    Ok(trials)
}

pub async fn run_hysteresis(
    orchestrator: &Orchestrator,
    pool: &EvidencePool,
    prompts: &[TestPrompt],
    params: &HysteresisParams,
) -> Result<HysteresisReport> {
    let trials = plan_hysteresis(orchestrator.config(), pool, prompts, params)?;
    let (records, summary) = orchestrator
        .run_batch(Protocol::Hysteresis, trials)
        .await
        .into_result()?;

    let sweep = SweepState::from_records(&records);
    Ok(HysteresisReport {
        params: params.clone(),
        analysis: analyze_hysteresis(&sweep),
        sweep,
        summary,
        records,
    })
}
