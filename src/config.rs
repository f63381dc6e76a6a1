//! Configuration for grading runs.
//!
//! Handles YAML run configuration loading, validation, and the verifier
//! workdir preflight check.

use crate::axioms::AxiomPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Verifier workdir {workdir} has none of the project markers {markers:?}")]
    MissingProjectMarker { workdir: String, markers: Vec<String> },

    #[error("Invalid axiom policy (expected permissive|constructive): {0}")]
    InvalidAxiomPolicy(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid verifier command: {0}")]
    InvalidCommand(String),
}

/// QES penalty weights (λ1, λ2, λ3)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QesWeights {
    /// λ1: normalized kernel time
    #[serde(default = "default_time_weight")]
    pub time: f64,
    /// λ2: normalized proof length
    #[serde(default = "default_length_weight")]
    pub length: f64,
    /// λ3: mean axiom penalty
    #[serde(default = "default_axiom_weight")]
    pub axiom: f64,
}

const fn default_time_weight() -> f64 {
    0.20
}
const fn default_length_weight() -> f64 {
    0.10
}
const fn default_axiom_weight() -> f64 {
    0.15
}

impl Default for QesWeights {
    fn default() -> Self {
        Self {
            time: default_time_weight(),
            length: default_length_weight(),
            axiom: default_axiom_weight(),
        }
    }
}

/// External verifier settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifierSettings {
    /// Command line; the program file path is appended as the last argument
    #[serde(default = "default_command")]
    pub command: String,
    /// Project directory the verifier is invoked from
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    /// Wrapper template file (built-in template when absent)
    #[serde(default)]
    pub template: Option<PathBuf>,
    /// At least one of these must exist inside `workdir`
    #[serde(default = "default_project_markers")]
    pub project_markers: Vec<String>,
}

fn default_command() -> String {
    "lake env lean --quiet".to_string()
}

fn default_workdir() -> PathBuf {
    PathBuf::from("lean")
}

fn default_project_markers() -> Vec<String> {
    vec!["lakefile.lean".to_string(), "lakefile.toml".to_string()]
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            command: default_command(),
            workdir: default_workdir(),
            template: None,
            project_markers: default_project_markers(),
        }
    }
}

impl VerifierSettings {
    /// Split the command line into program and arguments
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidCommand` if the command is empty or
    /// has unbalanced quoting.
    pub fn command_argv(&self) -> Result<Vec<String>, ConfigError> {
        let argv = shell_words::split(&self.command)
            .map_err(|e| ConfigError::InvalidCommand(format!("{}: {e}", self.command)))?;
        if argv.is_empty() {
            return Err(ConfigError::InvalidCommand("empty command".to_string()));
        }
        Ok(argv)
    }
}

/// Batch (chunked single-tactic) mode settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSettings {
    /// Items per compilation unit
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Tactic line run before every candidate tactic
    #[serde(default = "default_prelude")]
    pub prelude: String,
    /// Text placed at the top of every compilation unit
    #[serde(default = "default_header")]
    pub header: String,
    /// Halt the run on the first failing chunk
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,
    /// Optional item limit (0 = all)
    #[serde(default)]
    pub limit: usize,
}

const fn default_batch_size() -> usize {
    100
}

fn default_prelude() -> String {
    "repeat intro; try simp".to_string()
}

fn default_header() -> String {
    "import Mathlib\nset_option autoImplicit false\nset_option maxRecDepth 10000\nset_option maxHeartbeats 200000\n"
        .to_string()
}

const fn default_fail_fast() -> bool {
    true
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            prelude: default_prelude(),
            header: default_header(),
            fail_fast: default_fail_fast(),
            limit: 0,
        }
    }
}

/// Bootstrap settings for the Pass@k confidence interval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatSettings {
    /// Bootstrap resamples for CI
    #[serde(default = "default_bootstrap_n")]
    pub bootstrap_n: usize,
    /// Confidence level
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Random seed for reproducibility
    #[serde(default = "default_seed")]
    pub seed: u64,
}

const fn default_bootstrap_n() -> usize {
    10_000
}
const fn default_confidence() -> f64 {
    0.95
}
const fn default_seed() -> u64 {
    42
}

impl Default for StatSettings {
    fn default() -> Self {
        Self {
            bootstrap_n: default_bootstrap_n(),
            confidence: default_confidence(),
            seed: default_seed(),
        }
    }
}

/// Complete configuration of a grading run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradeConfig {
    /// Max candidates per item
    #[serde(default = "default_k")]
    pub k: usize,
    /// Seconds per verifier invocation
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// QES weights
    #[serde(default)]
    pub weights: QesWeights,
    /// AUC@Time threshold in seconds
    #[serde(default = "default_auc_t")]
    pub auc_t: f64,
    /// Axiom penalty policy
    #[serde(default)]
    pub axiom_policy: AxiomPolicy,
    /// Drop candidates that use a banned tactic
    #[serde(default)]
    pub ban_strong: bool,
    /// Tactics removed when `ban_strong` is set
    #[serde(default = "default_banned_tactics")]
    pub banned_tactics: Vec<String>,
    /// External verifier
    #[serde(default)]
    pub verifier: VerifierSettings,
    /// Batch mode
    #[serde(default)]
    pub batch: BatchSettings,
    /// Bootstrap CI
    #[serde(default)]
    pub stats: StatSettings,
    /// Directory receiving a copy of every rendered program
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
}

const fn default_k() -> usize {
    32
}
const fn default_timeout_secs() -> u64 {
    600
}
const fn default_auc_t() -> f64 {
    5.0
}

fn default_banned_tactics() -> Vec<String> {
    vec!["nlinarith".to_string(), "aesop".to_string()]
}

impl Default for GradeConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            timeout_secs: default_timeout_secs(),
            weights: QesWeights::default(),
            auc_t: default_auc_t(),
            axiom_policy: AxiomPolicy::default(),
            ban_strong: false,
            banned_tactics: default_banned_tactics(),
            verifier: VerifierSettings::default(),
            batch: BatchSettings::default(),
            stats: StatSettings::default(),
            dump_dir: None,
        }
    }
}

impl GradeConfig {
    /// Load run configuration from YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load run configuration from YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Per-invocation verifier timeout
    #[must_use]
    pub const fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    /// Check value ranges that serde cannot express
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for the first offending field,
    /// or `ConfigError::InvalidCommand` for an unusable verifier command.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite_non_negative = [
            ("weights.time", self.weights.time),
            ("weights.length", self.weights.length),
            ("weights.axiom", self.weights.axiom),
            ("auc_t", self.auc_t),
        ];
        for (field, value) in finite_non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, format!("must be finite and >= 0, got {value}")));
            }
        }
        if self.batch.batch_size == 0 {
            return Err(invalid("batch.batch_size", "must be at least 1".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs", "must be at least 1".to_string()));
        }
        let confidence = self.stats.confidence;
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(invalid("stats.confidence", format!("must be in (0, 1), got {confidence}")));
        }
        self.verifier.command_argv()?;
        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason,
    }
}

/// Verify that the verifier workdir is a kernel project
///
/// # Errors
///
/// Returns `ConfigError::MissingProjectMarker` if none of `markers` exists
/// under `workdir`. An empty marker list disables the check.
pub fn preflight<P: AsRef<Path>>(workdir: P, markers: &[String]) -> Result<(), ConfigError> {
    let workdir = workdir.as_ref();
    if markers.is_empty() || markers.iter().any(|m| workdir.join(m).exists()) {
        return Ok(());
    }
    Err(ConfigError::MissingProjectMarker {
        workdir: workdir.display().to_string(),
        markers: markers.to_vec(),
    })
}
