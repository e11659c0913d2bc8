//! Descriptive statistics and correlation with explicit degenerate cases.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn sum_sq_dev(values: &[f64]) -> f64 {
    match mean(values) {
        Some(m) => values.iter().map(|v| (v - m).powi(2)).sum(),
        None => 0.0,
    }
}

/// Sample variance (n - 1 denominator); zero when fewer than two values.
pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        0.0
    } else {
        sum_sq_dev(values) / (values.len() - 1) as f64
    }
}

/// Population variance (n denominator); zero for an empty slice.
pub fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        sum_sq_dev(values) / values.len() as f64
    }
}

/// Pearson and Spearman correlation over paired observations, each with a
/// two-sided p-value against zero correlation.
///
/// A coefficient is `None` when it is undefined: fewer than three pairs, or
/// either side has zero variance. Its p-value is then `None` as well.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub n: usize,
    pub pearson: Option<f64>,
    pub pearson_p: Option<f64>,
    pub spearman: Option<f64>,
    pub spearman_p: Option<f64>,
}

impl Correlation {
    pub fn compute(x: &[f64], y: &[f64]) -> Self {
        let n = x.len().min(y.len());
        let pearson = pearson(x, y);
        let spearman = spearman(x, y);
        Self {
            n,
            pearson,
            pearson_p: pearson.and_then(|r| correlation_p_value(r, n)),
            spearman,
            spearman_p: spearman.and_then(|r| correlation_p_value(r, n)),
        }
    }
}

/// Two-sided p-value of a correlation coefficient `r` over `n` pairs.
///
/// Uses `t = r * sqrt((n - 2) / (1 - r^2))` against Student's t with `n - 2`
/// degrees of freedom. `None` with fewer than three pairs.
pub fn correlation_p_value(r: f64, n: usize) -> Option<f64> {
    if n < 3 || !r.is_finite() {
        return None;
    }
    let r = r.clamp(-1.0, 1.0);
    let denom = 1.0 - r * r;
    if denom <= f64::EPSILON {
        return Some(0.0);
    }
    let df = (n - 2) as f64;
    let t = r * (df / denom).sqrt();
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    Some((2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0))
}

/// Pearson correlation coefficient.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 3 {
        return None;
    }
    let (mx, my) = (mean(x)?, mean(y)?);
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mx, b - my);
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if vx <= f64::EPSILON || vy <= f64::EPSILON {
        return None;
    }
    Some((cov / (vx.sqrt() * vy.sqrt())).clamp(-1.0, 1.0))
}

/// Spearman rank correlation: Pearson over average ranks (ties share a rank).
pub fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 3 {
        return None;
    }
    pearson(&average_ranks(x), &average_ranks(y))
}

/// 1-based ranks; tied values receive the mean of the ranks they span.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // Positions start..end (0-based) hold ranks start+1..=end.
        let rank = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn mean_and_variances() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(mean(&v), Some(2.5));
        assert!(close(sample_variance(&v), 5.0 / 3.0));
        assert!(close(population_variance(&v), 1.25));
        assert_eq!(mean(&[]), None);
        assert_eq!(sample_variance(&[1.0]), 0.0);
        assert_eq!(population_variance(&[]), 0.0);
    }

    #[test]
    fn constant_series_have_zero_variance() {
        assert_eq!(sample_variance(&[1.0; 5]), 0.0);
        assert_eq!(sample_variance(&[0.0; 5]), 0.0);
    }

    #[test]
    fn perfect_correlations() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 6.0, 8.0];
        assert!(close(pearson(&x, &y).unwrap(), 1.0));
        let neg: Vec<f64> = y.iter().map(|v| -v).collect();
        assert!(close(pearson(&x, &neg).unwrap(), -1.0));
    }

    #[test]
    fn spearman_sees_monotone_nonlinear() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, 4.0, 9.0, 16.0, 100.0];
        assert!(close(spearman(&x, &y).unwrap(), 1.0));
        assert!(pearson(&x, &y).unwrap() < 1.0);
    }

    #[test]
    fn degenerate_correlations_are_undefined() {
        assert_eq!(pearson(&[1.0, 2.0], &[1.0, 2.0]), None);
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), None);
        assert_eq!(pearson(&[1.0, 2.0, 3.0], &[1.0, 2.0]), None);
        let c = Correlation::compute(&[0.0; 4], &[0.5, 0.1, 0.2, 0.3]);
        assert_eq!(c.n, 4);
        assert_eq!(c.pearson, None);
        assert_eq!(c.pearson_p, None);
        assert_eq!(c.spearman, None);
        assert_eq!(c.spearman_p, None);
    }

    #[test]
    fn p_values_follow_students_t() {
        // r = 0.8 over five pairs: t = 2.3094 with 3 degrees of freedom.
        let c = Correlation::compute(&[1.0, 2.0, 3.0, 4.0, 5.0], &[2.0, 1.0, 4.0, 3.0, 5.0]);
        assert!(close(c.pearson.unwrap(), 0.8));
        assert!((c.pearson_p.unwrap() - 0.104_088).abs() < 1e-5);
        assert!(close(c.spearman.unwrap(), 0.8));
        assert!((c.spearman_p.unwrap() - 0.104_088).abs() < 1e-5);
    }

    #[test]
    fn p_value_edges() {
        // One degree of freedom: p = 1 - 2 atan(t) / pi, t = 1/sqrt(3).
        assert!((correlation_p_value(0.5, 3).unwrap() - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(correlation_p_value(1.0, 10), Some(0.0));
        assert!(close(correlation_p_value(0.0, 10).unwrap(), 1.0));
        assert_eq!(correlation_p_value(0.5, 2), None);
    }

    #[test]
    fn ties_share_average_rank() {
        assert_eq!(average_ranks(&[10.0, 20.0, 10.0, 30.0]), vec![1.5, 3.0, 1.5, 4.0]);
    }
}
