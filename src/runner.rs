//! Run orchestration.
//!
//! Wires configuration, inputs, graders and the aggregator together for the
//! two grading modes. Configuration problems are fatal before any verifier
//! call; per-attempt failures never escape the graders.

use crate::batch::{BatchGrader, BatchItem, BatchSummary, ChunkReport};
use crate::config::{preflight, ConfigError, GradeConfig};
use crate::grader::ItemGrader;
use crate::metrics::ScoreAggregator;
use crate::problem::{CandidateSets, ProblemError, ProblemSet};
use crate::report::{AggregateReport, ReportError, ReportMetadata};
use crate::verifier::{KernelVerifier, Verifier};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that abort a run before or after grading
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Input error: {0}")]
    Input(#[from] ProblemError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),
}

/// Validate the configuration, check the workdir, and build the kernel
/// verifier.
///
/// # Errors
///
/// Returns `ConfigError` for invalid values, a workdir without project
/// markers, or an unreadable template.
pub fn prepare_verifier(config: &GradeConfig) -> Result<KernelVerifier, ConfigError> {
    config.validate()?;
    preflight(&config.verifier.workdir, &config.verifier.project_markers)?;
    KernelVerifier::from_settings(&config.verifier, config.timeout())
}

/// Drives a whole run against one verifier
pub struct EvalRunner<'a, V: Verifier + ?Sized> {
    verifier: &'a V,
    config: GradeConfig,
}

impl<'a, V: Verifier + ?Sized> EvalRunner<'a, V> {
    #[must_use]
    pub const fn new(verifier: &'a V, config: GradeConfig) -> Self {
        Self { verifier, config }
    }

    #[must_use]
    pub const fn config(&self) -> &GradeConfig {
        &self.config
    }

    fn banned(&self) -> &[String] {
        if self.config.ban_strong {
            &self.config.banned_tactics
        } else {
            &[]
        }
    }

    /// Grade every problem and aggregate the run into a report.
    ///
    /// Problems without candidates are graded as failures. Always returns a
    /// complete report, including for runs with zero passes.
    #[must_use]
    pub fn grade_all(&self, problems: &ProblemSet, candidates: &CandidateSets) -> AggregateReport {
        let grader = ItemGrader::new(self.verifier, self.config.axiom_policy)
            .with_dump_dir(self.config.dump_dir.clone());
        let mut aggregator = ScoreAggregator::new(
            self.config.weights,
            self.config.auc_t,
            self.config.stats.clone(),
        );
        let mut items = BTreeMap::new();
        let total = problems.len();

        tracing::info!(
            total,
            k = self.config.k,
            policy = %self.config.axiom_policy,
            ban_strong = self.config.ban_strong,
            "grading started"
        );

        for (graded, problem) in problems.iter().enumerate() {
            let eligible = candidates.eligible(&problem.id, self.config.k, self.banned());
            let result = grader.grade(problem, &eligible, self.config.k);
            aggregator.record(problem, &result);

            tracing::info!(
                id = %problem.id,
                pass = result.pass,
                attempts = result.attempts,
                graded = graded + 1,
                passed = aggregator.passed(),
                total,
                "item graded"
            );
            items.insert(problem.id.clone(), result);
        }

        AggregateReport::new(
            ReportMetadata::from_config(&self.config),
            aggregator.compute(),
            items,
        )
    }

    /// Run batch mode over the top candidate of each problem.
    ///
    /// Returns every chunk report emitted before completion or halt, plus the
    /// run totals.
    #[must_use]
    pub fn run_batch(
        &self,
        problems: &ProblemSet,
        candidates: &CandidateSets,
    ) -> (Vec<ChunkReport>, BatchSummary) {
        let items = BatchItem::from_sources(problems, candidates, self.config.batch.limit);
        let grader = BatchGrader::new(self.verifier, &self.config.batch);

        tracing::info!(
            items = items.len(),
            batch_size = grader.batch_size(),
            fail_fast = self.config.batch.fail_fast,
            "batch run started"
        );

        let mut stream = grader.run_batches(&items);
        let chunks: Vec<ChunkReport> = stream.by_ref().collect();
        let summary = stream.summary();

        tracing::info!(
            ok = summary.ok,
            total = summary.total,
            rate = summary.success_rate,
            halted = summary.halted,
            elapsed = summary.elapsed_secs,
            "batch run finished"
        );

        (chunks, summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::problem::Problem;
    use crate::verifier::{VerificationOutcome, VerifierError};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Accepts programs containing "ok"; reports Classical.choice
    struct KeywordVerifier {
        seen: RefCell<Vec<String>>,
    }

    impl KeywordVerifier {
        fn new() -> Self {
            Self {
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl Verifier for KeywordVerifier {
        fn render(&self, proposition: &str, proof: &str) -> String {
            format!("theorem t : {proposition} := by\n  {proof}")
        }

        fn execute(&self, program: &str) -> Result<VerificationOutcome, VerifierError> {
            self.seen.borrow_mut().push(program.to_string());
            let success = program.contains("ok");
            Ok(VerificationOutcome {
                success,
                duration: Duration::from_secs(1),
                raw_diagnostic: if success {
                    "axioms t : Classical.choice".to_string()
                } else {
                    "error: unsolved goals".to_string()
                },
                exit_code: Some(i32::from(!success)),
            })
        }
    }

    fn inputs() -> (ProblemSet, CandidateSets) {
        let problems = ProblemSet::from_problems(vec![
            Problem::new("p1", "1 = 1"),
            Problem::new("p2", "2 = 2"),
            Problem::new("p3", "3 = 3"),
        ])
        .unwrap();
        let mut by_id = HashMap::new();
        by_id.insert("p1".to_string(), vec!["bad".to_string(), "ok".to_string()]);
        by_id.insert("p2".to_string(), vec!["aesop ok".to_string(), "bad".to_string()]);
        (problems, CandidateSets::new(by_id))
    }

    #[test]
    fn test_grade_all_covers_every_problem() {
        let (problems, candidates) = inputs();
        let verifier = KeywordVerifier::new();
        let runner = EvalRunner::new(&verifier, GradeConfig::default());
        let report = runner.grade_all(&problems, &candidates);

        assert_eq!(report.items.len(), 3);
        assert!(report.items["p1"].pass);
        assert_eq!(report.items["p1"].t_success, Some(2.0));
        assert!(report.items["p2"].pass);
        assert!(!report.items["p3"].pass);
        assert_eq!(report.items["p3"].attempts, 0);
        assert!((report.metrics.pass_at_k - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(report.metrics.axiom_penalty_avg, 2.0 / 3.0);
        assert_eq!(report.metrics.buckets["split::id"].n, 3);
    }

    #[test]
    fn test_ban_strong_filters_before_grading() {
        let (problems, candidates) = inputs();
        let verifier = KeywordVerifier::new();
        let config = GradeConfig {
            ban_strong: true,
            ..GradeConfig::default()
        };
        let report = EvalRunner::new(&verifier, config).grade_all(&problems, &candidates);

        // "aesop ok" is dropped, leaving only "bad"
        assert!(!report.items["p2"].pass);
        assert!(verifier.seen.borrow().iter().all(|p| !p.contains("aesop")));
        assert!(report.metadata.ban_strong);
    }

    #[test]
    fn test_k_limits_attempts() {
        let (problems, candidates) = inputs();
        let verifier = KeywordVerifier::new();
        let config = GradeConfig {
            k: 1,
            ..GradeConfig::default()
        };
        let report = EvalRunner::new(&verifier, config).grade_all(&problems, &candidates);
        assert!(!report.items["p1"].pass);
        assert!(report.items["p2"].pass);
        assert_eq!(report.metadata.k, 1);
    }

    #[test]
    fn test_run_batch_uses_top_candidate() {
        let (problems, candidates) = inputs();
        let verifier = KeywordVerifier::new();
        let config = GradeConfig {
            batch: crate::config::BatchSettings {
                batch_size: 1,
                ..crate::config::BatchSettings::default()
            },
            ..GradeConfig::default()
        };
        let (chunks, summary) = EvalRunner::new(&verifier, config).run_batch(&problems, &candidates);

        // p1's first candidate "bad" fails the first chunk and halts the run
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].success);
        assert!(summary.halted);
        assert_eq!(summary.total, 2);
    }

    #[test]
    fn test_prepare_verifier_requires_project_marker() {
        let dir = TempDir::new().unwrap();
        let mut config = GradeConfig::default();
        config.verifier.workdir = dir.path().to_path_buf();
        assert!(matches!(
            prepare_verifier(&config),
            Err(ConfigError::MissingProjectMarker { .. })
        ));

        std::fs::write(dir.path().join("lakefile.toml"), "").unwrap();
        let verifier = prepare_verifier(&config).unwrap();
        assert_eq!(verifier.workdir(), dir.path());
        assert_eq!(verifier.timeout(), Duration::from_secs(600));
    }
}
