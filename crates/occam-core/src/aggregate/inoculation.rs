//! Inoculation gating analysis: does an identity-framing system prompt
//! suppress an evidence-driven mode, and does a cue bring it back?

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::stats::{mean, sample_variance};
use crate::domain::TrialRecord;
use crate::orchestrator::inoculation::InoculationCondition;

/// Clamp applied to rates before taking the logit.
pub const LOGIT_EPSILON: f64 = 0.01;

/// Suppression (`p_baseline - p_inoculation`) must exceed this for a gating call.
pub const SUPPRESSION_MIN: f64 = 0.3;
/// Cue recovery above this means the mode was gated.
pub const RECOVERY_MIN: f64 = 0.3;
/// Cue recovery at or below this means the mode was deleted.
pub const DELETION_MAX: f64 = 0.1;

/// `ln(p / (1 - p))` with `p` clamped to `[ε, 1 - ε]`.
pub fn smoothed_logit(p: f64) -> f64 {
    let p = p.clamp(LOGIT_EPSILON, 1.0 - LOGIT_EPSILON);
    (p / (1.0 - p)).ln()
}

/// Adoption rate under one condition at one k.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRate {
    pub condition: String,
    pub n: usize,
    /// Trials with φ ≥ 0.5.
    pub n_positive: usize,
    /// Mean φ.
    pub p_trait: f64,
    pub variance: f64,
    pub logit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatingVerdict {
    /// The inoculation prompt did not lower the adoption rate.
    NoSuppression,
    /// Suppressed, and the cue restored the mode.
    Gated,
    /// Suppressed, and the cue restored little or nothing.
    Deleted,
    /// Missing conditions, weak suppression, or a recovery between the
    /// deletion and gating bands.
    Undetermined,
}

impl GatingVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatingVerdict::NoSuppression => "no_suppression",
            GatingVerdict::Gated => "gated",
            GatingVerdict::Deleted => "deleted",
            GatingVerdict::Undetermined => "undetermined",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InoculationKRow {
    pub k: usize,
    pub rates: Vec<ConditionRate>,
    /// Logit deltas, baseline minus condition (positive means suppression).
    pub delta_inoc: Option<f64>,
    pub delta_para: Option<f64>,
    pub delta_near: Option<f64>,
    /// `delta_inoc - delta_near`: suppression beyond prompt length.
    pub semantic_effect: Option<f64>,
    /// `delta_para / delta_inoc`; undefined when `delta_inoc` is zero.
    pub paraphrase_transfer: Option<f64>,
    /// `p_baseline - p_inoculation`.
    pub suppression: Option<f64>,
    /// `p_cue - p_inoculation`.
    pub cue_recovery: Option<f64>,
    pub verdict: GatingVerdict,
}

impl InoculationKRow {
    pub fn rate(&self, condition: InoculationCondition) -> Option<&ConditionRate> {
        self.rates.iter().find(|r| r.condition == condition.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InoculationSummary {
    pub mean_delta_inoc: Option<f64>,
    pub mean_delta_near: Option<f64>,
    /// Inoculation lowered the logit at every k.
    pub inoculation_gates: bool,
    /// The inoculation effect exceeded the length-matched control at every k.
    pub semantic_not_surface: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InoculationAnalysis {
    pub by_k: Vec<InoculationKRow>,
    pub summary: InoculationSummary,
}

fn condition_rate(condition: &str, phis: &[f64]) -> ConditionRate {
    let p_trait = mean(phis).unwrap_or(0.0);
    ConditionRate {
        condition: condition.to_string(),
        n: phis.len(),
        n_positive: phis.iter().filter(|&&p| p >= 0.5).count(),
        p_trait,
        variance: sample_variance(phis),
        logit: smoothed_logit(p_trait),
    }
}

fn verdict(suppression: Option<f64>, cue_recovery: Option<f64>) -> GatingVerdict {
    match (suppression, cue_recovery) {
        (None, _) => GatingVerdict::Undetermined,
        (Some(s), _) if s <= 0.0 => GatingVerdict::NoSuppression,
        (Some(s), _) if s <= SUPPRESSION_MIN => GatingVerdict::Undetermined,
        (Some(_), Some(r)) if r > RECOVERY_MIN => GatingVerdict::Gated,
        (Some(_), Some(r)) if r <= DELETION_MAX => GatingVerdict::Deleted,
        _ => GatingVerdict::Undetermined,
    }
}

/// Per-k condition rates, logit deltas and verdicts, plus a run summary.
pub fn analyze_inoculation(records: &[TrialRecord]) -> InoculationAnalysis {
    let mut table: BTreeMap<usize, BTreeMap<String, Vec<f64>>> = BTreeMap::new();
    for record in records {
        let by_condition = table.entry(record.key.k).or_default();
        let phis = by_condition.entry(record.key.condition.clone()).or_default();
        if let Some(phi) = record.phi() {
            phis.push(phi);
        }
    }

    let by_k: Vec<InoculationKRow> = table
        .into_iter()
        .map(|(k, by_condition)| {
            let rates: Vec<ConditionRate> = InoculationCondition::ALL
                .iter()
                .filter_map(|c| {
                    by_condition
                        .get(c.as_str())
                        .filter(|phis| !phis.is_empty())
                        .map(|phis| condition_rate(c.as_str(), phis))
                })
                .collect();
            let find = |c: InoculationCondition| rates.iter().find(|r| r.condition == c.as_str());

            let base = find(InoculationCondition::Baseline);
            let inoc = find(InoculationCondition::Inoculation);
            let para = find(InoculationCondition::ParaphrasedInoculation);
            let near = find(InoculationCondition::NearControl);
            let cue = find(InoculationCondition::InoculationCue);

            let delta = |other: Option<&ConditionRate>| {
                base.zip(other).map(|(b, o)| b.logit - o.logit)
            };
            let delta_inoc = delta(inoc);
            let delta_para = delta(para);
            let delta_near = delta(near);
            let suppression = base.zip(inoc).map(|(b, i)| b.p_trait - i.p_trait);
            let cue_recovery = cue.zip(inoc).map(|(c, i)| c.p_trait - i.p_trait);

            InoculationKRow {
                k,
                delta_inoc,
                delta_para,
                delta_near,
                semantic_effect: delta_inoc.zip(delta_near).map(|(i, n)| i - n),
                paraphrase_transfer: delta_inoc
                    .zip(delta_para)
                    .filter(|(i, _)| *i != 0.0)
                    .map(|(i, p)| p / i),
                suppression,
                cue_recovery,
                verdict: verdict(suppression, cue_recovery),
                rates,
            }
        })
        .collect();

    let inoc_deltas: Vec<f64> = by_k.iter().filter_map(|r| r.delta_inoc).collect();
    let near_deltas: Vec<f64> = by_k.iter().filter_map(|r| r.delta_near).collect();
    let semantic: Vec<f64> = by_k.iter().filter_map(|r| r.semantic_effect).collect();

    let summary = InoculationSummary {
        mean_delta_inoc: mean(&inoc_deltas),
        mean_delta_near: mean(&near_deltas),
        inoculation_gates: !inoc_deltas.is_empty() && inoc_deltas.iter().all(|d| *d > 0.0),
        semantic_not_surface: !semantic.is_empty() && semantic.iter().all(|d| *d > 0.0),
    };

    InoculationAnalysis { by_k, summary }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Protocol, TrialKey, TrialOutcome};

    fn record(k: usize, condition: InoculationCondition, idx: usize, phi: f64) -> TrialRecord {
        TrialRecord {
            key: TrialKey {
                trial_id: format!("inoculation/{}/k{k}/{idx}", condition.as_str()),
                protocol: Protocol::Inoculation,
                condition: condition.as_str().to_string(),
                k,
                subset_idx: 0,
                subset_key: "0-1".into(),
                perm_idx: 0,
                evidence_order: "0-1".into(),
                prompt_id: idx.to_string(),
                group_id: None,
                prompt_kind: crate::domain::PromptKind::Base,
                sweep: None,
            },
            fingerprint: None,
            cache_hit: false,
            provider_called: true,
            response: None,
            outcome: TrialOutcome::Scored {
                phi,
                phi_smooth: None,
                aux: BTreeMap::new(),
            },
        }
    }

    fn rates(k: usize, condition: InoculationCondition, phis: &[f64]) -> Vec<TrialRecord> {
        phis.iter()
            .enumerate()
            .map(|(i, &phi)| record(k, condition, i, phi))
            .collect()
    }

    #[test]
    fn logit_is_clamped() {
        assert!((smoothed_logit(0.5)).abs() < 1e-12);
        assert!((smoothed_logit(0.0) - (0.01f64 / 0.99).ln()).abs() < 1e-12);
        assert!(smoothed_logit(1.0).is_finite());
    }

    #[test]
    fn full_suppression_is_reported_without_panicking() {
        let mut records = rates(6, InoculationCondition::Baseline, &[1.0, 1.0, 1.0, 0.0, 0.0]);
        records.extend(rates(6, InoculationCondition::Inoculation, &[0.0; 5]));
        let analysis = analyze_inoculation(&records);
        let row = &analysis.by_k[0];
        assert_eq!(row.k, 6);
        assert!((row.suppression.unwrap() - 0.6).abs() < 1e-12);
        assert!(row.delta_inoc.unwrap() > 0.0);
        assert_eq!(row.rate(InoculationCondition::Inoculation).unwrap().variance, 0.0);
        assert_eq!(row.verdict, GatingVerdict::Undetermined);
        assert!(analysis.summary.inoculation_gates);
    }

    #[test]
    fn cue_distinguishes_gated_from_deleted() {
        let mut records = rates(4, InoculationCondition::Baseline, &[1.0, 1.0]);
        records.extend(rates(4, InoculationCondition::Inoculation, &[0.0, 0.0]));
        records.extend(rates(4, InoculationCondition::InoculationCue, &[1.0, 0.0]));
        records.extend(rates(8, InoculationCondition::Baseline, &[1.0, 1.0]));
        records.extend(rates(8, InoculationCondition::Inoculation, &[0.0, 0.0]));
        records.extend(rates(8, InoculationCondition::InoculationCue, &[0.0, 0.0]));
        let analysis = analyze_inoculation(&records);
        assert_eq!(analysis.by_k[0].verdict, GatingVerdict::Gated);
        assert_eq!(analysis.by_k[1].verdict, GatingVerdict::Deleted);
    }

    #[test]
    fn no_drop_means_no_suppression() {
        let mut records = rates(2, InoculationCondition::Baseline, &[1.0, 0.0]);
        records.extend(rates(2, InoculationCondition::Inoculation, &[1.0, 0.0]));
        let row = &analyze_inoculation(&records).by_k[0];
        assert_eq!(row.verdict, GatingVerdict::NoSuppression);
        assert_eq!(row.delta_inoc, Some(0.0));
    }

    #[test]
    fn paraphrase_transfer_undefined_at_zero_delta() {
        let mut records = rates(2, InoculationCondition::Baseline, &[1.0]);
        records.extend(rates(2, InoculationCondition::Inoculation, &[1.0]));
        records.extend(rates(2, InoculationCondition::ParaphrasedInoculation, &[0.0]));
        let row = &analyze_inoculation(&records).by_k[0];
        assert_eq!(row.paraphrase_transfer, None);
        assert!(row.delta_para.unwrap() > 0.0);
    }

    #[test]
    fn semantic_effect_compares_with_near_control() {
        let mut records = rates(4, InoculationCondition::Baseline, &[1.0, 1.0]);
        records.extend(rates(4, InoculationCondition::Inoculation, &[0.0, 0.0]));
        records.extend(rates(4, InoculationCondition::NearControl, &[1.0, 1.0]));
        let analysis = analyze_inoculation(&records);
        assert!(analysis.by_k[0].semantic_effect.unwrap() > 0.0);
        assert!(analysis.summary.semantic_not_surface);
        assert_eq!(analysis.summary.mean_delta_near, Some(0.0));
    }

    #[test]
    fn weak_suppression_is_undetermined() {
        assert_eq!(verdict(Some(0.02), Some(0.01)), GatingVerdict::Undetermined);
        assert_eq!(verdict(Some(0.3), Some(0.9)), GatingVerdict::Undetermined);
        assert_eq!(verdict(Some(0.31), Some(0.9)), GatingVerdict::Gated);
        assert_eq!(verdict(Some(0.0), Some(0.9)), GatingVerdict::NoSuppression);
        assert_eq!(verdict(Some(-0.2), None), GatingVerdict::NoSuppression);
    }

    #[test]
    fn recovery_bands_split_gated_and_deleted() {
        assert_eq!(verdict(Some(0.8), Some(0.31)), GatingVerdict::Gated);
        assert_eq!(verdict(Some(0.8), Some(0.3)), GatingVerdict::Undetermined);
        assert_eq!(verdict(Some(0.8), Some(0.11)), GatingVerdict::Undetermined);
        assert_eq!(verdict(Some(0.8), Some(0.1)), GatingVerdict::Deleted);
        assert_eq!(verdict(Some(0.8), Some(0.0)), GatingVerdict::Deleted);
        assert_eq!(verdict(Some(0.8), None), GatingVerdict::Undetermined);
    }
}
