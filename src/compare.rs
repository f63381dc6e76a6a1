//! Cross-run comparison.
//!
//! Compares two reports over the problems they share: metric deltas, ids
//! solved by only one side, and a paired t-test on per-item pass indicators.

use crate::metrics::{paired_t_test, SignificanceResult};
use crate::report::AggregateReport;
use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;
use tabled::{Table, Tabled};

/// Default significance threshold
pub const DEFAULT_ALPHA: f64 = 0.05;

/// Candidate minus baseline for one metric
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Tabled)]
pub struct MetricDelta {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Baseline", display_with = "fmt4")]
    pub baseline: f64,
    #[tabled(rename = "Candidate", display_with = "fmt4")]
    pub candidate: f64,
    #[tabled(rename = "Delta", display_with = "fmt_signed")]
    pub delta: f64,
}

impl MetricDelta {
    fn new(metric: &str, baseline: f64, candidate: f64) -> Self {
        Self {
            metric: metric.to_string(),
            baseline,
            candidate,
            delta: candidate - baseline,
        }
    }
}

fn fmt4(value: &f64) -> String {
    format!("{value:.4}")
}

fn fmt_signed(value: &f64) -> String {
    format!("{value:+.4}")
}

/// Result of comparing two runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunComparison {
    pub deltas: Vec<MetricDelta>,
    /// Problem ids present in both reports
    pub shared: usize,
    pub solved_only_by_baseline: Vec<String>,
    pub solved_only_by_candidate: Vec<String>,
    /// Paired test on shared pass indicators (candidate vs baseline);
    /// `None` when the runs never disagree
    pub significance: Option<SignificanceResult>,
    /// Whether both runs used the same axiom policy
    pub same_policy: bool,
}

/// Compare a candidate run against a baseline run
#[must_use]
pub fn compare(baseline: &AggregateReport, candidate: &AggregateReport, alpha: f64) -> RunComparison {
    let (b, c) = (&baseline.metrics, &candidate.metrics);
    let deltas = vec![
        MetricDelta::new("pass_at_k", b.pass_at_k, c.pass_at_k),
        MetricDelta::new("qes", b.qes, c.qes),
        MetricDelta::new("auc_at_time", b.auc_at_time, c.auc_at_time),
        MetricDelta::new("kernel_time_norm", b.kernel_time_norm, c.kernel_time_norm),
        MetricDelta::new("proof_len_norm", b.proof_len_norm, c.proof_len_norm),
        MetricDelta::new("axiom_penalty_avg", b.axiom_penalty_avg, c.axiom_penalty_avg),
    ];

    let mut baseline_passes = Vec::new();
    let mut candidate_passes = Vec::new();
    let mut solved_only_by_baseline = Vec::new();
    let mut solved_only_by_candidate = Vec::new();

    // BTreeMap iteration keeps both id lists sorted
    for (id, base_item) in &baseline.items {
        let Some(cand_item) = candidate.items.get(id) else {
            continue;
        };
        baseline_passes.push(indicator(base_item.pass));
        candidate_passes.push(indicator(cand_item.pass));
        match (base_item.pass, cand_item.pass) {
            (true, false) => solved_only_by_baseline.push(id.clone()),
            (false, true) => solved_only_by_candidate.push(id.clone()),
            _ => {}
        }
    }

    RunComparison {
        deltas,
        shared: baseline_passes.len(),
        solved_only_by_baseline,
        solved_only_by_candidate,
        significance: paired_t_test(&candidate_passes, &baseline_passes, alpha),
        same_policy: baseline.metadata.axiom_policy == candidate.metadata.axiom_policy,
    }
}

const fn indicator(pass: bool) -> f64 {
    if pass {
        1.0
    } else {
        0.0
    }
}

impl RunComparison {
    /// Render as a delta table followed by the item-level findings
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut output = String::new();
        writeln!(output, "{}", Table::new(&self.deltas)).ok();
        writeln!(output).ok();
        writeln!(output, "Shared problems: {}", self.shared).ok();
        if !self.same_policy {
            writeln!(output, "Warning: runs used different axiom policies").ok();
        }
        writeln!(
            output,
            "Solved only by baseline ({}): {}",
            self.solved_only_by_baseline.len(),
            self.solved_only_by_baseline.join(", ")
        )
        .ok();
        writeln!(
            output,
            "Solved only by candidate ({}): {}",
            self.solved_only_by_candidate.len(),
            self.solved_only_by_candidate.join(", ")
        )
        .ok();
        match &self.significance {
            Some(sig) => {
                writeln!(
                    output,
                    "Paired t-test: t={:.3} df={} p={:.4} ({}, effect {})",
                    sig.t_statistic,
                    sig.degrees_of_freedom,
                    sig.p_value,
                    if sig.is_significant {
                        "significant"
                    } else {
                        "not significant"
                    },
                    sig.effect_interpretation
                )
                .ok();
            }
            None => {
                writeln!(output, "Paired t-test: not applicable").ok();
            }
        }
        output
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::axioms::AxiomPolicy;
    use crate::config::GradeConfig;
    use crate::grader::ItemResult;
    use crate::metrics::ScoreAggregator;
    use crate::problem::Problem;
    use crate::report::ReportMetadata;
    use std::collections::BTreeMap;

    fn report(passes: &[(&str, bool)], policy: AxiomPolicy) -> AggregateReport {
        let config = GradeConfig {
            axiom_policy: policy,
            ..GradeConfig::default()
        };
        let mut agg = ScoreAggregator::new(config.weights, config.auc_t, config.stats.clone());
        let mut items = BTreeMap::new();
        for (id, pass) in passes {
            let mut result = ItemResult::unattempted();
            if *pass {
                result.pass = true;
                result.winning_index = Some(0);
                result.t_success = Some(1.0);
            }
            agg.record(&Problem::new(id, "True"), &result);
            items.insert((*id).to_string(), result);
        }
        AggregateReport::new(ReportMetadata::from_config(&config), agg.compute(), items)
    }

    #[test]
    fn test_compare_solved_sets() {
        let base = report(&[("a", true), ("b", true), ("c", false), ("x", true)], AxiomPolicy::Permissive);
        let cand = report(&[("a", true), ("b", false), ("c", true), ("y", true)], AxiomPolicy::Permissive);

        let cmp = compare(&base, &cand, DEFAULT_ALPHA);
        assert_eq!(cmp.shared, 3);
        assert_eq!(cmp.solved_only_by_baseline, vec!["b".to_string()]);
        assert_eq!(cmp.solved_only_by_candidate, vec!["c".to_string()]);
        assert!(cmp.same_policy);

        let pass = &cmp.deltas[0];
        assert_eq!(pass.metric, "pass_at_k");
        assert_eq!(pass.delta, 0.0);
    }

    #[test]
    fn test_compare_identical_runs_has_no_test() {
        let base = report(&[("a", true), ("b", false)], AxiomPolicy::Permissive);
        let cmp = compare(&base, &base, DEFAULT_ALPHA);
        assert!(cmp.significance.is_none());
        assert!(cmp.deltas.iter().all(|d| d.delta == 0.0));
        assert!(cmp.to_text().contains("not applicable"));
    }

    #[test]
    fn test_compare_significant_improvement() {
        let ids: Vec<String> = (0..30).map(|i| format!("p{i:02}")).collect();
        let base_rows: Vec<(&str, bool)> = ids.iter().enumerate().map(|(i, id)| (id.as_str(), i % 5 == 0)).collect();
        let cand_rows: Vec<(&str, bool)> = ids.iter().enumerate().map(|(i, id)| (id.as_str(), i % 5 != 4)).collect();

        let cmp = compare(
            &report(&base_rows, AxiomPolicy::Permissive),
            &report(&cand_rows, AxiomPolicy::Permissive),
            DEFAULT_ALPHA,
        );
        let sig = cmp.significance.unwrap();
        assert!(sig.t_statistic > 0.0);
        assert!(sig.is_significant);
        assert!(cmp.deltas[0].delta > 0.0);
    }

    #[test]
    fn test_compare_flags_policy_mismatch() {
        let base = report(&[("a", true)], AxiomPolicy::Permissive);
        let cand = report(&[("a", true)], AxiomPolicy::Constructive);
        let cmp = compare(&base, &cand, DEFAULT_ALPHA);
        assert!(!cmp.same_policy);
        let text = cmp.to_text();
        assert!(text.contains("different axiom policies"));
        assert!(text.contains("pass_at_k"));
    }
}
