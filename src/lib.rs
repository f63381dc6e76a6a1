//! # Proof Eval
//!
//! Verification-and-scoring engine for machine-generated formal proofs.
//!
//! Candidate proofs are checked by an external proof kernel run as a child
//! process; the raw pass/fail, timing and axiom data are compressed into
//! comparable run-level metrics.
//!
//! ## Metrics
//!
//! - **Pass@k**: fraction of problems with an accepted proof among the first
//!   `k` ranked candidates
//! - **QES**: Pass@k minus weighted penalties for normalized kernel time,
//!   normalized proof length and mean axiom penalty
//! - **AUC@Time**: mean of `max(0, 1 - t_success / T)`, rewarding fast
//!   first successes
//!
//! ## Architecture
//!
//! ```text
//! Problems (JSONL) + ranked candidates (JSON)
//!        ↓
//! Item Grader (early exit)  |  Batch Grader (chunked, all-or-nothing)
//!        ↓
//! Verifier (render → kernel process → diagnostics/axioms)
//!        ↓
//! Score Aggregator (global + split / domain-style buckets)
//!        ↓
//! Aggregate Report (JSON, markdown, text)
//! ```

pub mod axioms;
pub mod batch;
pub mod compare;
pub mod config;
pub mod grader;
pub mod metrics;
pub mod problem;
pub mod report;
pub mod runner;
pub mod state;
pub mod verifier;

pub use axioms::{extract_axioms, AxiomPolicy, AxiomSet};
pub use batch::{
    first_tactic, render_chunk, BatchGrader, BatchItem, BatchStream, BatchSummary, ChunkReport,
};
pub use compare::{compare, MetricDelta, RunComparison};
pub use config::{
    preflight, BatchSettings, ConfigError, GradeConfig, QesWeights, StatSettings,
    VerifierSettings,
};
pub use grader::{ItemGrader, ItemResult};
pub use metrics::{
    auc_at_time, bootstrap_ci, median, normalize, paired_t_test, percentile, AggregatedMetrics,
    Bucket, BucketMetrics, ScoreAggregator, SignificanceResult,
};
pub use problem::{CandidateSets, Problem, ProblemError, ProblemSet, Split};
pub use report::{summarize, AggregateReport, ReportError, ReportMetadata, RunSummary};
pub use runner::{prepare_verifier, EvalRunner, RunnerError};
pub use state::{TransitionError, UnitEvent, UnitState};
pub use verifier::{
    attempt, KernelVerifier, ProgramTemplate, VerificationOutcome, Verifier, VerifierError,
};
