//! Metric aggregation.
//!
//! Compresses per-item grading results into comparable scalars:
//! - Pass@k and its bootstrap confidence interval
//! - QES = Pass@k − λ1·norm(time) − λ2·norm(length) − λ3·mean(axiom penalty)
//! - AUC@Time, a linearly decaying reward on time-to-first-success
//! - the same Pass@k / AUC@Time scoped to split and domain/style buckets

use crate::config::{QesWeights, StatSettings};
use crate::grader::ItemResult;
use crate::problem::Problem;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::collections::BTreeMap;

/// Ranges at or below this are treated as zero
pub const RANGE_EPSILON: f64 = 1e-9;

/// Floor applied to the AUC@Time threshold
pub const AUC_T_FLOOR: f64 = 1e-9;

/// Median of unsorted values; averages the two middle values for even counts
#[must_use]
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sorted = sorted(values);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Percentile with linear interpolation between closest ranks
/// (`p` in `[0, 100]`). Empty input yields 0.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sorted = sorted(values);
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    (sorted[upper] - sorted[lower]).mul_add(frac, sorted[lower])
}

/// Scalar in `[0, 1]` summarizing how large the values are.
///
/// Values are clipped to `[0, p95]`, min-max scaled, and averaged. Empty
/// input or a clipped range of at most [`RANGE_EPSILON`] yields 0.
#[must_use]
pub fn normalize(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let p95 = percentile(values, 95.0);
    let clipped: Vec<f64> = values.iter().map(|v| v.clamp(0.0, p95.max(0.0))).collect();

    let min = clipped.iter().copied().fold(f64::INFINITY, f64::min);
    let max = clipped.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range <= RANGE_EPSILON {
        return 0.0;
    }
    compute_mean(&clipped.iter().map(|v| (v - min) / range).collect::<Vec<_>>())
}

/// Mean of `max(0, 1 − t/T)`; unsolved items (`None`) contribute 0
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn auc_at_time(t_success: &[Option<f64>], threshold: f64) -> f64 {
    let threshold = threshold.max(AUC_T_FLOOR);
    let total: f64 = t_success
        .iter()
        .map(|t| t.map_or(0.0, |t| (1.0 - t / threshold).max(0.0)))
        .sum();
    total / t_success.len().max(1) as f64
}

/// Fraction of passes; 0 for an empty list
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn pass_rate(passed: usize, total: usize) -> f64 {
    passed as f64 / total.max(1) as f64
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Compute mean of samples
#[allow(clippy::cast_precision_loss)]
fn compute_mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Compute standard deviation of samples
#[allow(clippy::cast_precision_loss)]
fn compute_std(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = compute_mean(samples);
    let variance =
        samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
    variance.sqrt()
}

/// Bucket key for the item's split
#[must_use]
pub fn split_key(problem: &Problem) -> String {
    format!("split::{}", problem.split)
}

/// Bucket key for the item's domain/style pair
#[must_use]
pub fn domain_style_key(problem: &Problem) -> String {
    format!("ds::{}/{}", problem.domain, problem.style)
}

/// Running totals for one partition of items
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bucket {
    pub n: usize,
    pub pass_count: usize,
    pub t_success: Vec<Option<f64>>,
}

impl Bucket {
    pub fn record(&mut self, result: &ItemResult) {
        self.n += 1;
        self.pass_count += usize::from(result.pass);
        self.t_success.push(result.t_success);
    }

    #[must_use]
    pub fn metrics(&self, auc_t: f64) -> BucketMetrics {
        BucketMetrics {
            n: self.n,
            pass_at_k: pass_rate(self.pass_count, self.n),
            auc_at_time: auc_at_time(&self.t_success, auc_t),
        }
    }
}

/// Reported metrics of one bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketMetrics {
    pub n: usize,
    pub pass_at_k: f64,
    pub auc_at_time: f64,
}

/// Accumulates item results and computes the run's aggregate metrics
#[derive(Debug, Clone)]
pub struct ScoreAggregator {
    weights: QesWeights,
    auc_t: f64,
    stats: StatSettings,
    passes: Vec<f64>,
    kernel_times: Vec<f64>,
    proof_lengths: Vec<f64>,
    penalties: Vec<f64>,
    t_success: Vec<Option<f64>>,
    buckets: BTreeMap<String, Bucket>,
}

impl ScoreAggregator {
    #[must_use]
    pub const fn new(weights: QesWeights, auc_t: f64, stats: StatSettings) -> Self {
        Self {
            weights,
            auc_t,
            stats,
            passes: Vec::new(),
            kernel_times: Vec::new(),
            proof_lengths: Vec::new(),
            penalties: Vec::new(),
            t_success: Vec::new(),
            buckets: BTreeMap::new(),
        }
    }

    /// Record one graded item and route it into its two buckets
    pub fn record(&mut self, problem: &Problem, result: &ItemResult) {
        self.passes.push(if result.pass { 1.0 } else { 0.0 });
        if let Some(t) = result.kernel_time_median {
            self.kernel_times.push(t);
        }
        if let Some(len) = result.proof_len_median_tokens {
            self.proof_lengths.push(len);
        }
        self.penalties.push(result.axiom_penalty);
        self.t_success.push(result.t_success);

        for key in [split_key(problem), domain_style_key(problem)] {
            self.buckets.entry(key).or_default().record(result);
        }
    }

    /// Items recorded so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Passes recorded so far
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn passed(&self) -> usize {
        self.passes.iter().sum::<f64>() as usize
    }

    #[must_use]
    pub fn buckets(&self) -> &BTreeMap<String, Bucket> {
        &self.buckets
    }

    /// Compute aggregated metrics
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(&self) -> AggregatedMetrics {
        let n = self.len();
        let pass_at_k = pass_rate(self.passed(), n);
        let kernel_time_norm = normalize(&self.kernel_times);
        let proof_len_norm = normalize(&self.proof_lengths);
        let axiom_penalty_avg = self.penalties.iter().sum::<f64>() / n.max(1) as f64;

        let qes = self.weights.axiom.mul_add(
            -axiom_penalty_avg,
            self.weights.length.mul_add(
                -proof_len_norm,
                self.weights.time.mul_add(-kernel_time_norm, pass_at_k),
            ),
        );

        AggregatedMetrics {
            n,
            passed: self.passed(),
            pass_at_k,
            pass_at_k_ci: bootstrap_ci(&self.passes, &self.stats),
            qes,
            auc_at_time: auc_at_time(&self.t_success, self.auc_t),
            kernel_time_norm,
            proof_len_norm,
            axiom_penalty_avg,
            buckets: self
                .buckets
                .iter()
                .map(|(key, bucket)| (key.clone(), bucket.metrics(self.auc_t)))
                .collect(),
        }
    }
}

/// Aggregated metrics of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedMetrics {
    /// Items graded
    pub n: usize,
    /// Items passed
    pub passed: usize,
    pub pass_at_k: f64,
    /// Bootstrap confidence interval for Pass@k (lower, upper)
    pub pass_at_k_ci: (f64, f64),
    pub qes: f64,
    pub auc_at_time: f64,
    pub kernel_time_norm: f64,
    pub proof_len_norm: f64,
    pub axiom_penalty_avg: f64,
    pub buckets: BTreeMap<String, BucketMetrics>,
}

/// Bootstrap confidence interval (proper resampling)
///
/// Uses the percentile method with `n` resamples.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)]
pub fn bootstrap_ci(samples: &[f64], config: &StatSettings) -> (f64, f64) {
    if samples.len() < 2 || config.bootstrap_n == 0 {
        let mean = compute_mean(samples);
        return (mean, mean);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut bootstrap_means = Vec::with_capacity(config.bootstrap_n);

    // Resample with replacement
    for _ in 0..config.bootstrap_n {
        let resample_sum: f64 = (0..samples.len())
            .map(|_| {
                let idx = rng.next_u64() as usize % samples.len();
                samples[idx]
            })
            .sum();
        bootstrap_means.push(resample_sum / samples.len() as f64);
    }

    bootstrap_means.sort_by(f64::total_cmp);

    let alpha = 1.0 - config.confidence;
    let lower_idx = (config.bootstrap_n as f64 * (alpha / 2.0)).floor() as usize;
    let upper_idx = (config.bootstrap_n as f64 * (1.0 - alpha / 2.0)).ceil() as usize;

    let lower = bootstrap_means.get(lower_idx).copied().unwrap_or(0.0);
    let upper = bootstrap_means
        .get(upper_idx.min(bootstrap_means.len() - 1))
        .copied()
        .unwrap_or(0.0);

    (lower, upper)
}

/// Result of a significance test
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignificanceResult {
    /// t-statistic
    pub t_statistic: f64,
    /// p-value
    pub p_value: f64,
    /// Degrees of freedom
    pub degrees_of_freedom: f64,
    /// Is result significant at the given alpha?
    pub is_significant: bool,
    /// Cohen's d effect size
    pub cohens_d: f64,
    /// Effect size interpretation
    pub effect_interpretation: String,
}

/// Paired t-test for comparing two sample sets
///
/// Returns None if samples are too small or their differences have no
/// variance.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn paired_t_test(samples_a: &[f64], samples_b: &[f64], alpha: f64) -> Option<SignificanceResult> {
    if samples_a.len() != samples_b.len() || samples_a.len() < 2 {
        return None;
    }

    let n = samples_a.len();
    let differences: Vec<f64> = samples_a
        .iter()
        .zip(samples_b.iter())
        .map(|(a, b)| a - b)
        .collect();

    let mean_diff = compute_mean(&differences);
    let std_diff = compute_std(&differences);

    if std_diff < f64::EPSILON {
        return None;
    }

    let t_statistic = mean_diff / (std_diff / (n as f64).sqrt());
    let df = (n - 1) as f64;

    // Two-tailed
    let t_dist = StudentsT::new(0.0, 1.0, df).ok()?;
    let p_value = 2.0 * (1.0 - t_dist.cdf(t_statistic.abs()));

    let cohens_d = mean_diff / std_diff;

    Some(SignificanceResult {
        t_statistic,
        p_value,
        degrees_of_freedom: df,
        is_significant: p_value < alpha,
        cohens_d,
        effect_interpretation: interpret_cohens_d(cohens_d),
    })
}

/// Interpret Cohen's d effect size
fn interpret_cohens_d(d: f64) -> String {
    let abs_d = d.abs();
    if abs_d < 0.2 {
        "negligible".to_string()
    } else if abs_d < 0.5 {
        "small".to_string()
    } else if abs_d < 0.8 {
        "medium".to_string()
    } else {
        "large".to_string()
    }
}

#[cfg(test)]
#[allow(
    clippy::float_cmp,
    clippy::cast_precision_loss,
    clippy::unwrap_used
)]
mod tests {
    use super::*;
    use crate::problem::Split;
    use crate::state::UnitState;

    fn item(pass: bool, t: Option<f64>, time: Option<f64>, len: Option<f64>, penalty: f64) -> ItemResult {
        ItemResult {
            pass,
            winning_index: pass.then_some(0),
            winner: None,
            t_success: t,
            kernel_time_median: time,
            proof_len_median_tokens: len,
            axioms: crate::axioms::AxiomSet::new(),
            axiom_penalty: penalty,
            attempts: usize::from(time.is_some()),
            state: if pass { UnitState::Success } else { UnitState::Failed },
        }
    }

    fn problem(id: &str, split: Split, domain: &str, style: &str) -> Problem {
        Problem {
            split,
            domain: domain.to_string(),
            style: style.to_string(),
            ..Problem::new(id, "P")
        }
    }

    // =========================================================================
    // Scalar helpers
    // =========================================================================

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0]), Some(3.0));
        assert_eq!(median(&[4.0, 1.0, 3.0]), Some(3.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn test_percentile_linear() {
        assert!((percentile(&[1.0, 2.0, 3.0, 100.0], 95.0) - 85.45).abs() < 1e-9);
        assert_eq!(percentile(&[7.0], 95.0), 7.0);
        assert_eq!(percentile(&[1.0, 2.0], 50.0), 1.5);
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize(&[]), 0.0);
    }

    #[test]
    fn test_normalize_zero_range() {
        assert_eq!(normalize(&[5.0, 5.0, 5.0]), 0.0);
    }

    #[test]
    fn test_normalize_clips_outlier() {
        let value = normalize(&[1.0, 2.0, 3.0, 100.0]);
        assert!(value < 1.0);
        // clipped to [1, 2, 3, 85.45] → scaled mean
        let expected = (0.0 + 1.0 / 84.45 + 2.0 / 84.45 + 1.0) / 4.0;
        assert!((value - expected).abs() < 1e-12, "value = {value}");
    }

    #[test]
    fn test_normalize_negative_values_clip_to_zero() {
        // p95 of [-1, -1] is negative; everything clips to 0
        assert_eq!(normalize(&[-1.0, -1.0]), 0.0);
    }

    #[test]
    fn test_auc_at_time() {
        assert_eq!(auc_at_time(&[None], 5.0), 0.0);
        assert_eq!(auc_at_time(&[None], 1e-12), 0.0);
        assert_eq!(auc_at_time(&[Some(0.0)], 5.0), 1.0);
        assert_eq!(auc_at_time(&[Some(10.0)], 5.0), 0.0);
        assert_eq!(auc_at_time(&[Some(2.5), None], 5.0), 0.25);
        assert_eq!(auc_at_time(&[], 5.0), 0.0);
    }

    #[test]
    fn test_auc_threshold_floor() {
        // T = 0 is floored, so a zero-time success still scores 1
        assert_eq!(auc_at_time(&[Some(0.0)], 0.0), 1.0);
    }

    #[test]
    fn test_pass_rate() {
        assert_eq!(pass_rate(0, 0), 0.0);
        assert_eq!(pass_rate(1, 2), 0.5);
    }

    // =========================================================================
    // Aggregation
    // =========================================================================

    #[test]
    fn test_aggregator_empty_run() {
        let agg = ScoreAggregator::new(QesWeights::default(), 5.0, StatSettings::default());
        let metrics = agg.compute();
        assert_eq!(metrics.n, 0);
        assert_eq!(metrics.pass_at_k, 0.0);
        assert_eq!(metrics.qes, 0.0);
        assert_eq!(metrics.auc_at_time, 0.0);
        assert!(metrics.buckets.is_empty());
    }

    #[test]
    fn test_aggregator_qes_formula() {
        let mut agg = ScoreAggregator::new(QesWeights::default(), 5.0, StatSettings::default());
        let p = problem("a", Split::Id, "alg", "eq");
        agg.record(&p, &item(true, Some(1.0), Some(1.0), Some(2.0), 1.5));
        agg.record(&problem("b", Split::Id, "alg", "eq"), &item(false, None, Some(3.0), Some(4.0), 0.0));

        let m = agg.compute();
        let t_norm = normalize(&[1.0, 3.0]);
        let l_norm = normalize(&[2.0, 4.0]);
        let expected = 0.5 - 0.20 * t_norm - 0.10 * l_norm - 0.15 * 0.75;
        assert!((m.qes - expected).abs() < 1e-12);
        assert_eq!(m.pass_at_k, 0.5);
        assert_eq!(m.axiom_penalty_avg, 0.75);
        assert_eq!(m.kernel_time_norm, t_norm);
        assert!((m.auc_at_time - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_aggregator_skips_missing_medians() {
        let mut agg = ScoreAggregator::new(QesWeights::default(), 5.0, StatSettings::default());
        agg.record(&problem("a", Split::Id, "d", "s"), &item(false, None, None, None, 0.0));
        agg.record(&problem("b", Split::Id, "d", "s"), &item(true, Some(1.0), Some(1.0), Some(1.0), 0.0));
        let m = agg.compute();
        assert_eq!(m.n, 2);
        // one timing sample only → zero range
        assert_eq!(m.kernel_time_norm, 0.0);
        assert_eq!(m.proof_len_norm, 0.0);
    }

    #[test]
    fn test_buckets_are_routed_twice() {
        let mut agg = ScoreAggregator::new(QesWeights::default(), 5.0, StatSettings::default());
        agg.record(&problem("a", Split::Id, "alg", "eq"), &item(true, Some(0.0), Some(1.0), Some(1.0), 0.0));
        agg.record(&problem("b", Split::Id, "alg", "lin"), &item(false, None, Some(1.0), Some(1.0), 0.0));
        agg.record(&problem("c", Split::OodTopic, "geo", "eq"), &item(true, Some(0.0), Some(1.0), Some(1.0), 0.0));

        let m = agg.compute();
        let id = &m.buckets["split::id"];
        assert_eq!(id.n, 2);
        assert_eq!(id.pass_at_k, 0.5);
        assert_eq!(id.auc_at_time, 0.5);
        assert_eq!(m.buckets["split::ood_topic"].n, 1);
        assert_eq!(m.buckets["ds::alg/eq"].pass_at_k, 1.0);
        assert_eq!(m.buckets["ds::alg/lin"].pass_at_k, 0.0);
        assert_eq!(m.buckets.len(), 5);

        // every item lands in exactly one split bucket and one ds bucket
        let split_total: usize = m.buckets.iter().filter(|(k, _)| k.starts_with("split::")).map(|(_, b)| b.n).sum();
        let ds_total: usize = m.buckets.iter().filter(|(k, _)| k.starts_with("ds::")).map(|(_, b)| b.n).sum();
        assert_eq!(split_total, 3);
        assert_eq!(ds_total, 3);

        // global Pass@k ignores bucket membership
        assert!((m.pass_at_k - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_pass_at_k_ci_contains_point_estimate() {
        let mut agg = ScoreAggregator::new(QesWeights::default(), 5.0, StatSettings::default());
        for i in 0..40 {
            let pass = i % 4 != 0;
            agg.record(
                &problem(&format!("p{i}"), Split::Id, "d", "s"),
                &item(pass, pass.then_some(1.0), Some(1.0), Some(1.0), 0.0),
            );
        }
        let m = agg.compute();
        assert_eq!(m.pass_at_k, 0.75);
        assert!(m.pass_at_k_ci.0 <= 0.75 && m.pass_at_k_ci.1 >= 0.75);
        assert!(m.pass_at_k_ci.0 < m.pass_at_k_ci.1);
    }

    // =========================================================================
    // Statistical functions
    // =========================================================================

    #[test]
    fn test_compute_std() {
        let samples = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let std = compute_std(&samples);
        assert!(std > 2.0 && std < 2.2, "std = {std}");
        assert_eq!(compute_std(&[5.0]), 0.0);
    }

    #[test]
    fn test_bootstrap_ci_reproducible() {
        let samples: Vec<f64> = (0..100).map(|i| f64::from(i % 2)).collect();
        let config = StatSettings::default();
        assert_eq!(bootstrap_ci(&samples, &config), bootstrap_ci(&samples, &config));
    }

    #[test]
    fn test_bootstrap_ci_single_sample() {
        let (lower, upper) = bootstrap_ci(&[1.0], &StatSettings::default());
        assert_eq!((lower, upper), (1.0, 1.0));
    }

    #[test]
    fn test_paired_t_test_detects_improvement() {
        let baseline: Vec<f64> = (0..60).map(|i| f64::from(u8::from(i % 3 == 0))).collect();
        let candidate: Vec<f64> = (0..60).map(|i| f64::from(u8::from(i % 3 != 2))).collect();
        let result = paired_t_test(&candidate, &baseline, 0.05).unwrap();
        assert!(result.t_statistic > 0.0);
        assert!(result.is_significant, "p = {}", result.p_value);
    }

    #[test]
    fn test_paired_t_test_zero_variance() {
        let a = vec![1.0; 10];
        let b = vec![0.0; 10];
        assert!(paired_t_test(&a, &b, 0.05).is_none());
        assert!(paired_t_test(&[1.0], &[0.0], 0.05).is_none());
        assert!(paired_t_test(&[1.0, 0.0], &[0.0], 0.05).is_none());
    }

    #[test]
    fn test_cohens_d_interpretation() {
        assert_eq!(interpret_cohens_d(0.1), "negligible");
        assert_eq!(interpret_cohens_d(0.3), "small");
        assert_eq!(interpret_cohens_d(0.6), "medium");
        assert_eq!(interpret_cohens_d(-0.9), "large");
    }
}
