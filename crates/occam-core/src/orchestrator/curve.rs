//! Evidence-response curve: mean φ as a function of k.

use serde::{Deserialize, Serialize};

use super::{
    require_k_values, subset_orderings, BatchSummary, EngineConfig, Orchestrator,
    DEFAULT_CONDITION,
};
use crate::aggregate::{
    aggregate_by_k, permutation_sensitivity_by_k, KStats, PermutationSensitivity,
};
use crate::domain::{EvidencePool, PromptKind, Protocol, TestPrompt, Trial, TrialRecord};
use crate::error::{EngineError, Result};
use crate::sampler::validate_k_values;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceCurveParams {
    pub k_values: Vec<usize>,
    pub n_subsets: usize,
    pub n_permutations: usize,
}

impl Default for EvidenceCurveParams {
    fn default() -> Self {
        Self {
            k_values: vec![0, 2, 4, 8, 12, 16, 20],
            n_subsets: 20,
            n_permutations: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceCurveReport {
    pub params: EvidenceCurveParams,
    pub curve: Vec<KStats>,
    pub permutation_sensitivity: Vec<PermutationSensitivity>,
    pub summary: BatchSummary,
    #[serde(skip)]
    pub records: Vec<TrialRecord>,
}

/// Every (k, subset, ordering, prompt) trial of the sweep, in that nesting order.
pub fn plan_evidence_curve(
    config: &EngineConfig,
    pool: &EvidencePool,
    prompts: &[TestPrompt],
    params: &EvidenceCurveParams,
) -> Result<Vec<Trial>> {
    require_k_values(&params.k_values)?;
    validate_k_values(pool, &params.k_values)?;
    if prompts.is_empty() {
        return Err(EngineError::Data("no test prompts".into()));
    }

    let mut trials = Vec::new();
    for &k in &params.k_values {
        let subsets = subset_orderings(
            pool,
            k,
            params.n_subsets,
            params.n_permutations,
            config.seed,
        )?;
        for (subset_idx, orderings) in subsets.into_iter().enumerate() {
            for (perm_idx, evidence) in orderings.into_iter().enumerate() {
                for prompt in prompts {
                    trials.push(Trial {
                        protocol: Protocol::EvidenceCurve,
                        condition: DEFAULT_CONDITION.to_string(),
                        system_prompt: config.system_prompt.clone(),
                        k,
                        subset_idx,
                        perm_idx,
                        evidence: evidence.clone(),
                        prompt: prompt.clone(),
                        prompt_kind: PromptKind::Base,
                        sweep: None,
                    });
                }
            }
        }
    }
    Ok(trials)
}

pub async fn run_evidence_curve(
    orchestrator: &Orchestrator,
    pool: &EvidencePool,
    prompts: &[TestPrompt],
    params: &EvidenceCurveParams,
) -> Result<EvidenceCurveReport> {
    let trials = plan_evidence_curve(orchestrator.config(), pool, prompts, params)?;
    let (records, summary) = orchestrator
        .run_batch(Protocol::EvidenceCurve, trials)
        .await
        .into_result()?;

    Ok(EvidenceCurveReport {
        params: params.clone(),
        curve: aggregate_by_k(&records),
        permutation_sensitivity: permutation_sensitivity_by_k(&records),
        summary,
        records,
    })
}
