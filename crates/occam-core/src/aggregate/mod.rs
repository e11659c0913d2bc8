//! Reduction of trial records into summary statistics.
//!
//! Every function here is pure: the same records always give the same
//! statistics. Failed trials are excluded from means and variances and
//! counted separately.

pub mod hysteresis;
pub mod inoculation;
pub mod stats;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{PromptKind, TrialRecord};

pub use hysteresis::{analyze_hysteresis, HysteresisAnalysis, SweepState, SweepStep};
pub use inoculation::{analyze_inoculation, GatingVerdict, InoculationAnalysis};
pub use stats::{
    correlation_p_value, mean, pearson, population_variance, sample_variance, spearman,
    Correlation,
};

/// φ statistics at one evidence count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KStats {
    pub k: usize,
    pub n_scored: usize,
    pub n_failed: usize,
    /// `None` when every trial at this k failed.
    pub mean: Option<f64>,
    /// Sample variance; zero with fewer than two scored trials.
    pub variance: f64,
    pub std: f64,
    pub stderr: f64,
}

/// Mean and variance of φ per k, ordered by k.
pub fn aggregate_by_k(records: &[TrialRecord]) -> Vec<KStats> {
    let mut by_k: BTreeMap<usize, (Vec<f64>, usize)> = BTreeMap::new();
    for record in records {
        let slot = by_k.entry(record.key.k).or_default();
        match record.phi() {
            Some(phi) => slot.0.push(phi),
            None => slot.1 += 1,
        }
    }

    by_k.into_iter()
        .map(|(k, (phis, n_failed))| {
            let variance = sample_variance(&phis);
            let std = variance.sqrt();
            let stderr = if phis.is_empty() {
                0.0
            } else {
                std / (phis.len() as f64).sqrt()
            };
            KStats {
                k,
                n_scored: phis.len(),
                n_failed,
                mean: mean(&phis),
                variance,
                std,
                stderr,
            }
        })
        .collect()
}

/// How much the ordering of the same evidence moves φ at one k.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermutationSensitivity {
    pub k: usize,
    /// Mean over subsets of the sample variance of per-permutation mean φ.
    pub mean_sensitivity: f64,
    /// Subsets with at least two scored permutations.
    pub n_subsets: usize,
}

type PermTable = BTreeMap<usize, BTreeMap<usize, BTreeMap<usize, Vec<f64>>>>;

/// Base-prompt φ grouped as k → subset → permutation.
fn base_phi_by_permutation(records: &[TrialRecord]) -> PermTable {
    let mut table = PermTable::new();
    for record in records {
        if record.key.prompt_kind != PromptKind::Base {
            continue;
        }
        if let Some(phi) = record.phi() {
            table
                .entry(record.key.k)
                .or_default()
                .entry(record.key.subset_idx)
                .or_default()
                .entry(record.key.perm_idx)
                .or_default()
                .push(phi);
        }
    }
    table
}

/// Variance across permutations of the per-permutation mean φ.
fn perm_variance(perms: &BTreeMap<usize, Vec<f64>>) -> Option<f64> {
    let perm_means: Vec<f64> = perms.values().filter_map(|phis| mean(phis)).collect();
    (perm_means.len() >= 2).then(|| sample_variance(&perm_means))
}

/// Permutation sensitivity per k, over base-prompt records.
pub fn permutation_sensitivity_by_k(records: &[TrialRecord]) -> Vec<PermutationSensitivity> {
    base_phi_by_permutation(records)
        .into_iter()
        .map(|(k, subsets)| {
            let variances: Vec<f64> = subsets.values().filter_map(perm_variance).collect();
            PermutationSensitivity {
                k,
                mean_sensitivity: mean(&variances).unwrap_or(0.0),
                n_subsets: variances.len(),
            }
        })
        .collect()
}

/// Brittleness diagnostics for one evidence subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetBrittleness {
    pub k: usize,
    pub subset_idx: usize,
    pub subset_key: String,
    /// Sample variance of per-permutation mean base φ (zero with one permutation).
    pub perm_sensitivity: f64,
    pub base_mean: Option<f64>,
    pub paraphrase_mean: Option<f64>,
    /// `base_mean - paraphrase_mean`; `None` when either side has no scored trials.
    pub robustness_drop: Option<f64>,
}

/// Per-subset permutation sensitivity and paraphrase robustness drop.
pub fn subset_brittleness(records: &[TrialRecord]) -> Vec<SubsetBrittleness> {
    #[derive(Default)]
    struct Acc {
        key: String,
        perms: BTreeMap<usize, Vec<f64>>,
        base: Vec<f64>,
        para: Vec<f64>,
    }

    let mut subsets: BTreeMap<(usize, usize), Acc> = BTreeMap::new();
    for record in records {
        let acc = subsets
            .entry((record.key.k, record.key.subset_idx))
            .or_default();
        if acc.key.is_empty() {
            acc.key = record.key.subset_key.clone();
        }
        let Some(phi) = record.phi() else { continue };
        match record.key.prompt_kind {
            PromptKind::Base => {
                acc.base.push(phi);
                acc.perms.entry(record.key.perm_idx).or_default().push(phi);
            }
            PromptKind::Paraphrase => acc.para.push(phi),
        }
    }

    subsets
        .into_iter()
        .map(|((k, subset_idx), acc)| {
            let base_mean = mean(&acc.base);
            let paraphrase_mean = mean(&acc.para);
            SubsetBrittleness {
                k,
                subset_idx,
                subset_key: acc.key,
                perm_sensitivity: perm_variance(&acc.perms).unwrap_or(0.0),
                base_mean,
                paraphrase_mean,
                robustness_drop: base_mean.zip(paraphrase_mean).map(|(b, p)| b - p),
            }
        })
        .collect()
}

/// Paraphrase robustness of one prompt group, pooled over all evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRobustness {
    pub group_id: String,
    pub base_mean: Option<f64>,
    pub paraphrase_mean: Option<f64>,
    pub drop: Option<f64>,
}

/// `mean φ(base) - mean φ(paraphrase)` per group id.
pub fn group_robustness(records: &[TrialRecord]) -> Vec<GroupRobustness> {
    let mut groups: BTreeMap<String, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for record in records {
        let slot = groups.entry(record.key.group_key().to_string()).or_default();
        if let Some(phi) = record.phi() {
            match record.key.prompt_kind {
                PromptKind::Base => slot.0.push(phi),
                PromptKind::Paraphrase => slot.1.push(phi),
            }
        }
    }
    groups
        .into_iter()
        .map(|(group_id, (base, para))| {
            let base_mean = mean(&base);
            let paraphrase_mean = mean(&para);
            GroupRobustness {
                group_id,
                base_mean,
                paraphrase_mean,
                drop: base_mean.zip(paraphrase_mean).map(|(b, p)| b - p),
            }
        })
        .collect()
}

/// Correlation between permutation sensitivity and robustness drop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityCorrelation {
    /// `None` for the correlation pooled across all k.
    pub k: Option<usize>,
    pub correlation: Correlation,
}

/// Per-k and pooled correlations across subsets that have a robustness drop.
pub fn sensitivity_correlations(subsets: &[SubsetBrittleness]) -> Vec<SensitivityCorrelation> {
    let mut by_k: BTreeMap<usize, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    let mut all = (Vec::new(), Vec::new());
    for subset in subsets {
        if let Some(drop) = subset.robustness_drop {
            let slot = by_k.entry(subset.k).or_default();
            slot.0.push(subset.perm_sensitivity);
            slot.1.push(drop);
            all.0.push(subset.perm_sensitivity);
            all.1.push(drop);
        }
    }

    let mut out: Vec<SensitivityCorrelation> = by_k
        .into_iter()
        .map(|(k, (x, y))| SensitivityCorrelation {
            k: Some(k),
            correlation: Correlation::compute(&x, &y),
        })
        .collect();
    out.push(SensitivityCorrelation {
        k: None,
        correlation: Correlation::compute(&all.0, &all.1),
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FailureKind, Protocol, TrialKey, TrialOutcome};

    pub(crate) fn record(
        k: usize,
        subset_idx: usize,
        perm_idx: usize,
        kind: PromptKind,
        group: &str,
        phi: Option<f64>,
    ) -> TrialRecord {
        TrialRecord {
            key: TrialKey {
                trial_id: format!("t/{k}/{subset_idx}/{perm_idx}/{kind}/{group}"),
                protocol: Protocol::Brittleness,
                condition: "default".into(),
                k,
                subset_idx,
                subset_key: format!("subset-{subset_idx}"),
                perm_idx,
                evidence_order: String::new(),
                prompt_id: format!("{group}-{kind}"),
                group_id: Some(group.into()),
                prompt_kind: kind,
                sweep: None,
            },
            fingerprint: None,
            cache_hit: false,
            provider_called: true,
            response: None,
            outcome: match phi {
                Some(phi) => TrialOutcome::Scored {
                    phi,
                    phi_smooth: None,
                    aux: BTreeMap::new(),
                },
                None => TrialOutcome::Failed {
                    kind: FailureKind::ProviderTransient,
                    message: "503".into(),
                },
            },
        }
    }

    #[test]
    fn per_k_stats_exclude_failures() {
        let records = vec![
            record(0, 0, 0, PromptKind::Base, "g", Some(0.0)),
            record(0, 0, 0, PromptKind::Base, "h", Some(1.0)),
            record(2, 0, 0, PromptKind::Base, "g", Some(1.0)),
            record(2, 0, 0, PromptKind::Base, "h", None),
        ];
        let stats = aggregate_by_k(&records);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].mean, Some(0.5));
        assert!((stats[0].variance - 0.5).abs() < 1e-12);
        assert_eq!(stats[1].n_scored, 1);
        assert_eq!(stats[1].n_failed, 1);
        assert_eq!(stats[1].variance, 0.0);
    }

    #[test]
    fn all_failed_k_has_no_mean() {
        let stats = aggregate_by_k(&[record(4, 0, 0, PromptKind::Base, "g", None)]);
        assert_eq!(stats[0].mean, None);
        assert_eq!(stats[0].stderr, 0.0);
    }

    #[test]
    fn permutation_sensitivity_averages_subsets() {
        // subset 0: perm means 0 and 1 -> variance 0.5; subset 1: identical perms -> 0.
        let records = vec![
            record(2, 0, 0, PromptKind::Base, "g", Some(0.0)),
            record(2, 0, 1, PromptKind::Base, "g", Some(1.0)),
            record(2, 1, 0, PromptKind::Base, "g", Some(1.0)),
            record(2, 1, 1, PromptKind::Base, "g", Some(1.0)),
            record(2, 1, 1, PromptKind::Paraphrase, "g", Some(0.0)),
        ];
        let sens = permutation_sensitivity_by_k(&records);
        assert_eq!(sens.len(), 1);
        assert_eq!(sens[0].n_subsets, 2);
        assert!((sens[0].mean_sensitivity - 0.25).abs() < 1e-12);
    }

    #[test]
    fn single_permutation_has_zero_sensitivity() {
        let records = vec![record(0, 0, 0, PromptKind::Base, "g", Some(1.0))];
        let sens = permutation_sensitivity_by_k(&records);
        assert_eq!(sens[0].mean_sensitivity, 0.0);
        assert_eq!(sens[0].n_subsets, 0);
    }

    #[test]
    fn subset_brittleness_measures_drop() {
        let records = vec![
            record(4, 0, 0, PromptKind::Base, "g", Some(1.0)),
            record(4, 0, 0, PromptKind::Paraphrase, "g", Some(0.0)),
            record(4, 0, 1, PromptKind::Base, "g", Some(1.0)),
            record(4, 0, 1, PromptKind::Paraphrase, "g", Some(1.0)),
        ];
        let rows = subset_brittleness(&records);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].base_mean, Some(1.0));
        assert_eq!(rows[0].paraphrase_mean, Some(0.5));
        assert_eq!(rows[0].robustness_drop, Some(0.5));
        assert_eq!(rows[0].perm_sensitivity, 0.0);
        assert_eq!(rows[0].subset_key, "subset-0");
    }

    #[test]
    fn group_robustness_pairs_by_group() {
        let records = vec![
            record(4, 0, 0, PromptKind::Base, "a", Some(1.0)),
            record(4, 0, 0, PromptKind::Paraphrase, "a", Some(0.0)),
            record(4, 0, 0, PromptKind::Base, "b", Some(1.0)),
        ];
        let groups = group_robustness(&records);
        assert_eq!(groups[0].group_id, "a");
        assert_eq!(groups[0].drop, Some(1.0));
        assert_eq!(groups[1].drop, None);
    }

    #[test]
    fn correlations_include_pooled_row() {
        let subsets: Vec<SubsetBrittleness> = (0..4)
            .map(|i| SubsetBrittleness {
                k: 4,
                subset_idx: i,
                subset_key: i.to_string(),
                perm_sensitivity: i as f64,
                base_mean: Some(1.0),
                paraphrase_mean: Some(0.0),
                robustness_drop: Some(i as f64 * 2.0),
            })
            .collect();
        let rows = sensitivity_correlations(&subsets);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].k, Some(4));
        assert!((rows[0].correlation.pearson.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(rows[1].k, None);
        assert_eq!(rows[1].correlation.n, 4);
    }

    #[test]
    fn constant_drops_leave_correlation_undefined() {
        let subsets: Vec<SubsetBrittleness> = (0..4)
            .map(|i| SubsetBrittleness {
                k: 8,
                subset_idx: i,
                subset_key: i.to_string(),
                perm_sensitivity: i as f64,
                base_mean: Some(1.0),
                paraphrase_mean: Some(1.0),
                robustness_drop: Some(0.0),
            })
            .collect();
        let rows = sensitivity_correlations(&subsets);
        assert_eq!(rows[0].correlation.pearson, None);
        assert_eq!(rows[0].correlation.spearman, None);
    }
}
