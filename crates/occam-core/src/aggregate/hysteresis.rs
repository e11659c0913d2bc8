//! Hysteresis analysis of an up-then-down sweep over k.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::stats::{mean, population_variance};
use crate::domain::{SweepDirection, TrialRecord};

/// Mean φ above this level counts as "in mode".
pub const TRANSITION_THRESHOLD: f64 = 0.5;
/// Bimodality ratio above which responses count as bimodal.
pub const BIMODAL_RATIO: f64 = 0.9;

/// All φ observed at one step of the traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepStep {
    pub step: usize,
    pub k: usize,
    pub direction: SweepDirection,
    pub phis: Vec<f64>,
}

impl SweepStep {
    pub fn mean(&self) -> Option<f64> {
        mean(&self.phis)
    }
}

/// The traversal in step order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepState {
    pub steps: Vec<SweepStep>,
}

impl SweepState {
    /// Group scored records carrying a sweep position by step.
    pub fn from_records(records: &[TrialRecord]) -> Self {
        let mut steps: BTreeMap<usize, SweepStep> = BTreeMap::new();
        for record in records {
            let Some(position) = record.key.sweep else {
                continue;
            };
            let step = steps.entry(position.step).or_insert_with(|| SweepStep {
                step: position.step,
                k: record.key.k,
                direction: position.direction,
                phis: Vec::new(),
            });
            if let Some(phi) = record.phi() {
                step.phis.push(phi);
            }
        }
        Self {
            steps: steps.into_values().collect(),
        }
    }

    /// Build directly from `(k, direction, phis)` per step, numbering steps in order.
    pub fn from_steps(steps: impl IntoIterator<Item = (usize, SweepDirection, Vec<f64>)>) -> Self {
        Self {
            steps: steps
                .into_iter()
                .enumerate()
                .map(|(step, (k, direction, phis))| SweepStep {
                    step,
                    k,
                    direction,
                    phis,
                })
                .collect(),
        }
    }
}

/// Mean φ at one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub step: usize,
    pub k: usize,
    pub direction: SweepDirection,
    pub n: usize,
    pub mean: Option<f64>,
}

/// Variance of φ at one k, per direction and combined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KVariance {
    pub k: usize,
    pub up: f64,
    pub down: f64,
    /// Mean of the up and down population variances.
    pub combined: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HysteresisAnalysis {
    pub points: Vec<SweepPoint>,
    /// Fraction of φ exactly 0 or 1 (zero when nothing was scored).
    pub bimodality_ratio: f64,
    pub is_bimodal: bool,
    pub variance_by_k: Vec<KVariance>,
    pub max_variance_k: Option<usize>,
    pub max_variance: f64,
    pub transition_up: Option<usize>,
    pub transition_down: Option<usize>,
    /// `transition_down - transition_up` when both exist.
    pub hysteresis_gap: Option<i64>,
    pub has_hysteresis: bool,
}

fn crosses(prev: f64, cur: f64) -> bool {
    (prev < TRANSITION_THRESHOLD && cur >= TRANSITION_THRESHOLD)
        || (prev >= TRANSITION_THRESHOLD && cur < TRANSITION_THRESHOLD)
}

/// Find transition points, bimodality and the variance profile of a sweep.
///
/// The traversal is read as one path: a crossing of
/// [`TRANSITION_THRESHOLD`] between two consecutive steps is attributed to
/// the direction of the later step, so the first down step is compared
/// against the last up step. Only the first crossing per direction counts,
/// in either sense (rising or falling). Steps with no scored φ are skipped.
///
/// A leg whose mean never crosses the threshold has no transition, and the
/// gap is then `None` with `has_hysteresis` false. A down leg that stays in
/// mode all the way back to the smallest k is therefore not reported as
/// hysteresis, even though it never returned.
pub fn analyze_hysteresis(state: &SweepState) -> HysteresisAnalysis {
    let points: Vec<SweepPoint> = state
        .steps
        .iter()
        .map(|s| SweepPoint {
            step: s.step,
            k: s.k,
            direction: s.direction,
            n: s.phis.len(),
            mean: s.mean(),
        })
        .collect();

    let mut transition_up = None;
    let mut transition_down = None;
    let mut prev: Option<f64> = None;
    for point in &points {
        let Some(cur) = point.mean else { continue };
        if let Some(prev) = prev {
            if crosses(prev, cur) {
                let slot = match point.direction {
                    SweepDirection::Up => &mut transition_up,
                    SweepDirection::Down => &mut transition_down,
                };
                slot.get_or_insert(point.k);
            }
        }
        prev = Some(cur);
    }

    let all: Vec<f64> = state.steps.iter().flat_map(|s| s.phis.iter().copied()).collect();
    let binary = all.iter().filter(|&&p| p == 0.0 || p == 1.0).count();
    let bimodality_ratio = if all.is_empty() {
        0.0
    } else {
        binary as f64 / all.len() as f64
    };

    let mut pooled: BTreeMap<usize, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for step in &state.steps {
        let slot = pooled.entry(step.k).or_default();
        match step.direction {
            SweepDirection::Up => slot.0.extend(&step.phis),
            SweepDirection::Down => slot.1.extend(&step.phis),
        }
    }
    let variance_by_k: Vec<KVariance> = pooled
        .into_iter()
        .map(|(k, (up, down))| {
            let (up, down) = (population_variance(&up), population_variance(&down));
            KVariance {
                k,
                up,
                down,
                combined: (up + down) / 2.0,
            }
        })
        .collect();

    let mut max_variance_k = None;
    let mut max_variance = 0.0;
    for row in &variance_by_k {
        if max_variance_k.is_none() || row.combined > max_variance {
            max_variance_k = Some(row.k);
            max_variance = row.combined;
        }
    }

    let hysteresis_gap = match (transition_up, transition_down) {
        (Some(up), Some(down)) => Some(down as i64 - up as i64),
        _ => None,
    };

    HysteresisAnalysis {
        points,
        bimodality_ratio,
        is_bimodal: bimodality_ratio > BIMODAL_RATIO,
        variance_by_k,
        max_variance_k,
        max_variance,
        transition_up,
        transition_down,
        hysteresis_gap,
        has_hysteresis: hysteresis_gap.is_some_and(|gap| gap != 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SweepDirection::{Down, Up};

    fn single(ks: &[usize], dirs: &[SweepDirection], phis: &[f64]) -> SweepState {
        SweepState::from_steps(
            ks.iter()
                .zip(dirs)
                .zip(phis)
                .map(|((&k, &d), &phi)| (k, d, vec![phi])),
        )
    }

    #[test]
    fn path_dependent_sweep_shows_gap() {
        let state = single(
            &[0, 1, 2, 3, 2, 1, 0],
            &[Up, Up, Up, Up, Down, Down, Down],
            &[0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0],
        );
        let analysis = analyze_hysteresis(&state);
        assert_eq!(analysis.bimodality_ratio, 1.0);
        assert!(analysis.is_bimodal);
        assert_eq!(analysis.transition_up, Some(2));
        assert_eq!(analysis.transition_down, Some(1));
        assert_eq!(analysis.hysteresis_gap, Some(-1));
        assert!(analysis.has_hysteresis);
    }

    #[test]
    fn crossings_are_tracked_per_direction() {
        let state = single(
            &[0, 1, 2, 2, 1, 0],
            &[Up, Up, Up, Down, Down, Down],
            &[0.0, 1.0, 1.0, 1.0, 1.0, 0.0],
        );
        let analysis = analyze_hysteresis(&state);
        assert_eq!(analysis.transition_up, Some(1));
        assert_eq!(analysis.transition_down, Some(0));
        assert!(analysis.has_hysteresis);

        let flat = single(&[0, 1, 1, 0], &[Up, Up, Down, Down], &[1.0, 1.0, 1.0, 1.0]);
        let analysis = analyze_hysteresis(&flat);
        assert_eq!(analysis.hysteresis_gap, None);
        assert!(!analysis.has_hysteresis);
    }

    #[test]
    fn down_leg_that_never_crosses_has_no_transition() {
        let state = single(
            &[0, 1, 2, 2, 1, 0],
            &[Up, Up, Up, Down, Down, Down],
            &[0.0, 1.0, 1.0, 1.0, 0.6, 0.5],
        );
        let analysis = analyze_hysteresis(&state);
        assert_eq!(analysis.transition_up, Some(1));
        assert_eq!(analysis.transition_down, None);
        assert_eq!(analysis.hysteresis_gap, None);
        assert!(!analysis.has_hysteresis);
    }

    #[test]
    fn crossing_at_the_turn_belongs_to_the_down_leg() {
        let state = single(
            &[0, 1, 2, 2, 1],
            &[Up, Up, Up, Down, Down],
            &[0.0, 0.0, 1.0, 0.0, 0.0],
        );
        let analysis = analyze_hysteresis(&state);
        assert_eq!(analysis.transition_up, Some(2));
        assert_eq!(analysis.transition_down, Some(2));
        assert_eq!(analysis.hysteresis_gap, Some(0));
        assert!(!analysis.has_hysteresis);
    }

    #[test]
    fn graded_values_lower_bimodality() {
        let state = single(&[0, 1], &[Up, Down], &[0.5, 1.0]);
        let analysis = analyze_hysteresis(&state);
        assert_eq!(analysis.bimodality_ratio, 0.5);
        assert!(!analysis.is_bimodal);
    }

    #[test]
    fn empty_sweep_is_well_defined() {
        let analysis = analyze_hysteresis(&SweepState::default());
        assert_eq!(analysis.bimodality_ratio, 0.0);
        assert_eq!(analysis.max_variance_k, None);
        assert_eq!(analysis.hysteresis_gap, None);
    }

    #[test]
    fn variance_spike_is_located() {
        let state = SweepState::from_steps(vec![
            (0, Up, vec![0.0, 0.0]),
            (1, Up, vec![0.0, 1.0]),
            (2, Up, vec![1.0, 1.0]),
            (2, Down, vec![1.0, 1.0]),
            (1, Down, vec![1.0, 0.0]),
            (0, Down, vec![0.0, 0.0]),
        ]);
        let analysis = analyze_hysteresis(&state);
        assert_eq!(analysis.max_variance_k, Some(1));
        assert!((analysis.max_variance - 0.25).abs() < 1e-12);
        assert_eq!(analysis.variance_by_k.len(), 3);
    }
}
