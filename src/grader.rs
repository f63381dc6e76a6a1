//! Per-item grading.
//!
//! Walks one problem's ranked candidates through the verifier and stops at
//! the first accepted proof. Rank order is significant: the first success
//! decides the winner and the cumulative time-to-success.

use crate::axioms::{AxiomPolicy, AxiomSet};
use crate::metrics::median;
use crate::problem::Problem;
use crate::state::{UnitEvent, UnitState};
use crate::verifier::{attempt, Verifier};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Grading result for one problem
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemResult {
    /// Some candidate was accepted
    pub pass: bool,
    /// Rank position of the accepted candidate
    pub winning_index: Option<usize>,
    /// Accepted proof text
    pub winner: Option<String>,
    /// Seconds spent on every attempt up to and including the winner
    pub t_success: Option<f64>,
    /// Median kernel seconds over all attempts
    pub kernel_time_median: Option<f64>,
    /// Median whitespace-token length over all attempted candidates
    pub proof_len_median_tokens: Option<f64>,
    /// Axioms the winning proof depended on
    pub axioms: AxiomSet,
    pub axiom_penalty: f64,
    /// Verifier calls made
    pub attempts: usize,
    pub state: UnitState,
}

impl ItemResult {
    /// Result for a problem with nothing to verify
    #[must_use]
    pub fn unattempted() -> Self {
        Self {
            pass: false,
            winning_index: None,
            winner: None,
            t_success: None,
            kernel_time_median: None,
            proof_len_median_tokens: None,
            axioms: AxiomSet::new(),
            axiom_penalty: 0.0,
            attempts: 0,
            state: UnitState::Pending.advance(UnitEvent::Exhaust),
        }
    }
}

/// Early-exit grader over ranked candidates
pub struct ItemGrader<'a, V: Verifier + ?Sized> {
    verifier: &'a V,
    policy: AxiomPolicy,
    dump_dir: Option<PathBuf>,
}

impl<'a, V: Verifier + ?Sized> ItemGrader<'a, V> {
    #[must_use]
    pub const fn new(verifier: &'a V, policy: AxiomPolicy) -> Self {
        Self {
            verifier,
            policy,
            dump_dir: None,
        }
    }

    /// Also write every rendered program under `dir`
    #[must_use]
    pub fn with_dump_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.dump_dir = dir;
        self
    }

    #[must_use]
    pub const fn policy(&self) -> AxiomPolicy {
        self.policy
    }

    /// Grade one problem against its first `k` candidates
    #[must_use]
    pub fn grade(&self, problem: &Problem, candidates: &[String], k: usize) -> ItemResult {
        let candidates = &candidates[..candidates.len().min(k)];
        if candidates.is_empty() {
            tracing::warn!(id = %problem.id, "no eligible candidates, graded as fail");
            return ItemResult::unattempted();
        }

        let mut state = UnitState::Pending;
        let mut times = Vec::with_capacity(candidates.len());
        let mut lengths = Vec::with_capacity(candidates.len());
        let mut t_cum = 0.0_f64;
        let mut winner: Option<(usize, AxiomSet)> = None;

        for (index, proof) in candidates.iter().enumerate() {
            state = state.advance(UnitEvent::Begin);
            let program = self.verifier.render(&problem.proposition, proof);
            self.dump(&problem.id, index, &program);

            let outcome = attempt(self.verifier, &program);
            let secs = outcome.duration.as_secs_f64();
            t_cum += secs;
            times.push(secs);
            lengths.push(token_len(proof));

            tracing::debug!(
                id = %problem.id,
                candidate = index,
                success = outcome.success,
                secs,
                "attempt finished"
            );

            if outcome.success {
                state = state.advance(UnitEvent::Accept);
                winner = Some((index, self.verifier.parse_axioms(&outcome.raw_diagnostic)));
                break;
            }
        }

        if !state.is_terminal() {
            state = state.advance(UnitEvent::Exhaust);
        }

        let attempts = times.len();
        let (winning_index, axioms) = match winner {
            Some((index, axioms)) => (Some(index), axioms),
            None => (None, AxiomSet::new()),
        };
        let axiom_penalty = self.policy.penalty(&axioms);

        ItemResult {
            pass: winning_index.is_some(),
            winning_index,
            winner: winning_index.map(|i| candidates[i].clone()),
            t_success: winning_index.map(|_| t_cum),
            kernel_time_median: median(&times),
            proof_len_median_tokens: median(&lengths),
            axioms,
            axiom_penalty,
            attempts,
            state,
        }
    }

    fn dump(&self, id: &str, index: usize, program: &str) {
        let Some(dir) = &self.dump_dir else {
            return;
        };
        if let Err(err) = write_dump(dir, id, index, program) {
            tracing::warn!(dir = %dir.display(), error = %err, "failed to dump rendered program");
        }
    }
}

fn write_dump(dir: &Path, id: &str, index: usize, program: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join("last.lean"), program)?;
    std::fs::write(dir.join(format!("last_{id}_{index}.lean")), program)
}

#[allow(clippy::cast_precision_loss)]
fn token_len(proof: &str) -> f64 {
    proof.split_whitespace().count() as f64
}
