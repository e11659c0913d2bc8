//! Permutation brittleness: does sensitivity to evidence order track
//! sensitivity to prompt wording?
//!
//! Every ordering of every subset is run with both the base and the
//! paraphrased wording of each prompt group.

use serde::{Deserialize, Serialize};

use super::{
    require_k_values, subset_orderings, BatchSummary, EngineConfig, Orchestrator,
    DEFAULT_CONDITION,
};
use crate::aggregate::{
    group_robustness, permutation_sensitivity_by_k, sensitivity_correlations,
    subset_brittleness, GroupRobustness, PermutationSensitivity, SensitivityCorrelation,
    SubsetBrittleness,
};
use crate::domain::{EvidencePool, PromptKind, PromptPair, Protocol, Trial, TrialRecord};
use crate::error::{EngineError, Result};
use crate::sampler::validate_k_values;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrittlenessParams {
    /// Evidence counts near the suspected boundary.
    pub k_values: Vec<usize>,
    pub n_subsets: usize,
    pub n_permutations: usize,
}

impl Default for BrittlenessParams {
    fn default() -> Self {
        Self {
            k_values: vec![4, 8, 12],
            n_subsets: 20,
            n_permutations: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BrittlenessReport {
    pub params: BrittlenessParams,
    pub subsets: Vec<SubsetBrittleness>,
    pub permutation_sensitivity: Vec<PermutationSensitivity>,
    pub groups: Vec<GroupRobustness>,
    pub correlations: Vec<SensitivityCorrelation>,
    pub summary: BatchSummary,
    #[serde(skip)]
    pub records: Vec<TrialRecord>,
}

pub fn plan_brittleness(
    config: &EngineConfig,
    pool: &EvidencePool,
    pairs: &[PromptPair],
    params: &BrittlenessParams,
) -> Result<Vec<Trial>> {
    require_k_values(&params.k_values)?;
    validate_k_values(pool, &params.k_values)?;
    if pairs.is_empty() {
        return Err(EngineError::Data(
            "no prompt group has both a base prompt and a paraphrase".into(),
        ));
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
                for pair in pairs {
                    let variants = [
                        (PromptKind::Base, &pair.base),
                        (PromptKind::Paraphrase, &pair.paraphrase),
                    ];
                    for (prompt_kind, prompt) in variants {
                        trials.push(Trial {
                            protocol: Protocol::Brittleness,
                            condition: DEFAULT_CONDITION.to_string(),
                            system_prompt: config.system_prompt.clone(),
                            k,
                            subset_idx,
                            perm_idx,
                            evidence: evidence.clone(),
                            prompt: prompt.clone().with_group(pair.group_id.clone()),
                            prompt_kind,
                            sweep: None,
                        });
                    }
                }
            }
        }
    }
    Ok(trials)
}

pub async fn run_brittleness(
    orchestrator: &Orchestrator,
    pool: &EvidencePool,
    pairs: &[PromptPair],
    params: &BrittlenessParams,
) -> Result<BrittlenessReport> {
    let trials = plan_brittleness(orchestrator.config(), pool, pairs, params)?;
    let (records, summary) = orchestrator
        .run_batch(Protocol::Brittleness, trials)
        .await
        .into_result()?;

    let subsets = subset_brittleness(&records);
    Ok(BrittlenessReport {
        params: params.clone(),
        correlations: sensitivity_correlations(&subsets),
        permutation_sensitivity: permutation_sensitivity_by_k(&records),
        groups: group_robustness(&records),
        subsets,
        summary,
        records,
    })
}
