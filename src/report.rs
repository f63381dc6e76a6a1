//! Report generation for grading runs.
//!
//! Generates one self-describing document per run:
//! - Global metrics (Pass@k with CI, QES, AUC@Time, penalty terms)
//! - Per-bucket Pass@k / AUC@Time
//! - The full per-item result map
//! - Run metadata (policy, weights, thresholds) for cross-run comparison

use crate::axioms::AxiomPolicy;
use crate::config::{GradeConfig, QesWeights};
use crate::grader::ItemResult;
use crate::metrics::AggregatedMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};
use thiserror::Error;

/// Errors that can occur reading or writing reports
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to (de)serialize report: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid glob pattern: {0}")]
    PatternError(#[from] glob::PatternError),

    #[error("No reports match {0}")]
    NoReports(String),
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportMetadata {
    /// Report generation timestamp
    pub generated_at: DateTime<Utc>,
    /// Framework version
    pub framework_version: String,
    pub k: usize,
    pub timeout_secs: u64,
    pub auc_t: f64,
    pub weights: QesWeights,
    /// Penalty policy applied to every item
    pub axiom_policy: AxiomPolicy,
    pub ban_strong: bool,
    pub banned_tactics: Vec<String>,
    /// Verifier working directory
    pub workdir: String,
    /// Wrapper template path, if not the built-in one
    pub template: Option<String>,
    /// Bootstrap resamples
    pub bootstrap_n: usize,
    /// Confidence level of `pass_at_k_ci`
    pub confidence: f64,
}

impl ReportMetadata {
    /// Snapshot the run-level settings of a configuration
    #[must_use]
    pub fn from_config(config: &GradeConfig) -> Self {
        Self {
            generated_at: Utc::now(),
            framework_version: env!("CARGO_PKG_VERSION").to_string(),
            k: config.k,
            timeout_secs: config.timeout_secs,
            auc_t: config.auc_t,
            weights: config.weights,
            axiom_policy: config.axiom_policy,
            ban_strong: config.ban_strong,
            banned_tactics: if config.ban_strong {
                config.banned_tactics.clone()
            } else {
                Vec::new()
            },
            workdir: config.verifier.workdir.display().to_string(),
            template: config
                .verifier
                .template
                .as_ref()
                .map(|p| p.display().to_string()),
            bootstrap_n: config.stats.bootstrap_n,
            confidence: config.stats.confidence,
        }
    }
}

/// Final snapshot of a grading run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateReport {
    pub metadata: ReportMetadata,
    #[serde(flatten)]
    pub metrics: AggregatedMetrics,
    /// Per-problem results keyed by problem id
    pub items: BTreeMap<String, ItemResult>,
}

/// Table row for bucket output
#[derive(Tabled)]
struct BucketRow {
    #[tabled(rename = "Bucket")]
    bucket: String,
    #[tabled(rename = "N")]
    n: usize,
    #[tabled(rename = "Pass@k")]
    pass_at_k: String,
    #[tabled(rename = "AUC@Time")]
    auc_at_time: String,
}

impl AggregateReport {
    #[must_use]
    pub const fn new(
        metadata: ReportMetadata,
        metrics: AggregatedMetrics,
        items: BTreeMap<String, ItemResult>,
    ) -> Self {
        Self {
            metadata,
            metrics,
            items,
        }
    }

    /// Render report as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a report from JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is not a report.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write the JSON report, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any filesystem step fails.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), ReportError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load a JSON report
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ReportError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&content)?)
    }

    /// One-line console summary
    #[must_use]
    pub fn headline(&self) -> String {
        let m = &self.metrics;
        format!(
            "Pass@{}={:.3}  QES={:.3}  AUC@{}s={:.3}  time_norm={:.3} len_norm={:.3} axiom_avg={:.3}  (N={})",
            self.metadata.k,
            m.pass_at_k,
            m.qes,
            self.metadata.auc_t,
            m.auc_at_time,
            m.kernel_time_norm,
            m.proof_len_norm,
            m.axiom_penalty_avg,
            m.n
        )
    }

    /// Bucket table rendered with `tabled`
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut output = String::new();
        writeln!(output, "{}", self.headline()).ok();
        writeln!(output).ok();
        writeln!(output, "{}", Table::new(self.bucket_rows())).ok();
        output
    }

    /// Render report as markdown
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();
        let m = &self.metrics;

        writeln!(output, "# Grading Report").ok();
        writeln!(output).ok();
        writeln!(
            output,
            "**Generated:** {}",
            self.metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
        .ok();
        writeln!(
            output,
            "**Framework Version:** {}",
            self.metadata.framework_version
        )
        .ok();
        writeln!(
            output,
            "**Axiom Policy:** {} | **k:** {} | **AUC T:** {}s | **Ban strong:** {}",
            self.metadata.axiom_policy,
            self.metadata.k,
            self.metadata.auc_t,
            if self.metadata.ban_strong { "Yes" } else { "No" }
        )
        .ok();
        writeln!(output).ok();

        // Summary
        writeln!(output, "## Summary").ok();
        writeln!(output).ok();
        writeln!(output, "| Metric | Value |").ok();
        writeln!(output, "|--------|-------|").ok();
        writeln!(output, "| Items | {} |", m.n).ok();
        writeln!(output, "| Passed | {} |", m.passed).ok();
        writeln!(
            output,
            "| Pass@{} | {:.2}% [{:.2}%, {:.2}%] |",
            self.metadata.k,
            m.pass_at_k * 100.0,
            m.pass_at_k_ci.0 * 100.0,
            m.pass_at_k_ci.1 * 100.0
        )
        .ok();
        writeln!(output, "| QES | {:.4} |", m.qes).ok();
        writeln!(output, "| AUC@Time | {:.4} |", m.auc_at_time).ok();
        writeln!(output, "| Kernel time (norm) | {:.4} |", m.kernel_time_norm).ok();
        writeln!(output, "| Proof length (norm) | {:.4} |", m.proof_len_norm).ok();
        writeln!(output, "| Axiom penalty (avg) | {:.4} |", m.axiom_penalty_avg).ok();
        writeln!(output).ok();

        // Buckets
        writeln!(output, "## Buckets").ok();
        writeln!(output).ok();
        writeln!(output, "| Bucket | N | Pass@k | AUC@Time |").ok();
        writeln!(output, "|--------|---|--------|----------|").ok();
        for (key, bucket) in &m.buckets {
            writeln!(
                output,
                "| {} | {} | {:.3} | {:.3} |",
                key, bucket.n, bucket.pass_at_k, bucket.auc_at_time
            )
            .ok();
        }
        writeln!(output).ok();

        // Failures are what a reader triages first
        let failed: Vec<&String> = self
            .items
            .iter()
            .filter(|(_, r)| !r.pass)
            .map(|(id, _)| id)
            .collect();
        if !failed.is_empty() {
            writeln!(output, "## Unsolved ({})", failed.len()).ok();
            writeln!(output).ok();
            for id in failed {
                writeln!(output, "- `{id}`").ok();
            }
            writeln!(output).ok();
        }

        output
    }

    fn bucket_rows(&self) -> Vec<BucketRow> {
        self.metrics
            .buckets
            .iter()
            .map(|(key, bucket)| BucketRow {
                bucket: key.clone(),
                n: bucket.n,
                pass_at_k: format!("{:.3}", bucket.pass_at_k),
                auc_at_time: format!("{:.3}", bucket.auc_at_time),
            })
            .collect()
    }
}

/// One row of a multi-run summary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Tabled)]
pub struct RunSummary {
    #[tabled(rename = "Report")]
    pub path: String,
    #[tabled(rename = "N")]
    pub n: usize,
    #[tabled(rename = "Pass@k", display_with = "fmt3")]
    pub pass_at_k: f64,
    #[tabled(rename = "QES", display_with = "fmt3")]
    pub qes: f64,
    #[tabled(rename = "AUC@Time", display_with = "fmt3")]
    pub auc_at_time: f64,
    #[tabled(rename = "Policy")]
    pub axiom_policy: AxiomPolicy,
}

fn fmt3(value: &f64) -> String {
    format!("{value:.3}")
}

/// Load every report matching a glob pattern, sorted by path
///
/// # Errors
///
/// Returns an error for an invalid pattern, an unreadable report, or when
/// nothing matches.
pub fn summarize(pattern: &str) -> Result<Vec<RunSummary>, ReportError> {
    let mut paths: Vec<PathBuf> = glob::glob(pattern)?.filter_map(Result::ok).collect();
    paths.sort();

    if paths.is_empty() {
        return Err(ReportError::NoReports(pattern.to_string()));
    }

    paths
        .iter()
        .map(|path| {
            let report = AggregateReport::load(path)?;
            Ok(RunSummary {
                path: path.display().to_string(),
                n: report.metrics.n,
                pass_at_k: report.metrics.pass_at_k,
                qes: report.metrics.qes,
                auc_at_time: report.metrics.auc_at_time,
                axiom_policy: report.metadata.axiom_policy,
            })
        })
        .collect()
}

/// Render summaries as a table
#[must_use]
pub fn summary_table(rows: &[RunSummary]) -> String {
    Table::new(rows).to_string()
}
