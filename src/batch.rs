//! Chunked single-tactic verification.
//!
//! Packs many (problem, tactic) pairs into one compilation unit per chunk and
//! verifies each chunk with a single kernel call. A chunk is all-or-nothing:
//! if it compiles every member passes, otherwise none do and, under the
//! default fail-fast policy, no later chunk runs.

use crate::config::BatchSettings;
use crate::problem::{CandidateSets, ProblemSet};
use crate::state::{conjunction, gate_members, UnitEvent, UnitState};
use crate::verifier::{attempt, Verifier};
use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;
use std::time::{Duration, Instant};

/// Diagnostic lines surfaced for a failed chunk
pub const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Hint attached to every failed chunk
pub const REMEDIATION: &str =
    "re-run with --batch-size 1 to isolate the failing case";

/// One proof obligation in a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub problem_id: String,
    pub goal: String,
    pub tactic: String,
}

impl BatchItem {
    /// Join problems with the top-ranked candidate of each id.
    ///
    /// Problems whose goal or tactic is empty are skipped. `limit == 0`
    /// keeps every item.
    #[must_use]
    pub fn from_sources(problems: &ProblemSet, candidates: &CandidateSets, limit: usize) -> Vec<Self> {
        let items = problems.iter().filter_map(|problem| {
            let goal = problem.proposition.trim();
            let tactic = candidates.ranked(&problem.id).first().map(String::as_str).and_then(first_tactic)?;
            (!goal.is_empty()).then(|| Self {
                problem_id: problem.id.clone(),
                goal: goal.to_string(),
                tactic,
            })
        });

        if limit == 0 {
            items.collect()
        } else {
            items.take(limit).collect()
        }
    }
}

/// First non-empty line of a candidate, trimmed, without a trailing `.`
#[must_use]
pub fn first_tactic(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line.strip_suffix('.').unwrap_or(line).trim_end();
    (!line.is_empty()).then(|| line.to_string())
}

/// Render one compilation unit for a chunk (chunks are numbered from 1)
#[must_use]
pub fn render_chunk(index: usize, items: &[BatchItem], header: &str, prelude: &str) -> String {
    let mut output = String::from(header);
    if !output.ends_with('\n') {
        output.push('\n');
    }

    for (i, item) in items.iter().enumerate() {
        writeln!(output).ok();
        writeln!(output, "/-- {} -/", item.problem_id).ok();
        writeln!(output, "theorem _case_{index:03}_{i:03} : {} := by", item.goal).ok();
        if !prelude.trim().is_empty() {
            writeln!(output, "  {}", prelude.trim()).ok();
        }
        writeln!(output, "  {}", item.tactic).ok();
    }

    output
}

/// Progress record emitted after each chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkReport {
    /// 1-based chunk number
    pub index: usize,
    pub total_chunks: usize,
    pub problem_ids: Vec<String>,
    pub success: bool,
    /// Chunk-level state, the conjunction of `member_states`
    pub state: UnitState,
    pub member_states: Vec<UnitState>,
    /// Last lines of kernel output (empty on success)
    pub diagnostic_tail: String,
    pub remediation: Option<String>,
    pub elapsed: Duration,
    /// Running count of passed items
    pub ok: usize,
    /// Chunks completed so far, this one included
    pub processed: usize,
}

impl ChunkReport {
    #[must_use]
    pub fn size(&self) -> usize {
        self.problem_ids.len()
    }
}

/// Totals of a finished (or halted) batch run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub ok: usize,
    pub processed_chunks: usize,
    pub total_chunks: usize,
    pub halted: bool,
    pub success_rate: f64,
    pub elapsed_secs: f64,
}

/// Grouped-compilation grader.
///
/// The per-chunk time budget is the verifier's own timeout.
pub struct BatchGrader<'a, V: Verifier + ?Sized> {
    verifier: &'a V,
    batch_size: usize,
    header: String,
    prelude: String,
    fail_fast: bool,
}

impl<'a, V: Verifier + ?Sized> BatchGrader<'a, V> {
    /// Create a batch grader; a zero batch size is treated as 1
    #[must_use]
    pub fn new(verifier: &'a V, settings: &BatchSettings) -> Self {
        Self {
            verifier,
            batch_size: settings.batch_size.max(1),
            header: settings.header.clone(),
            prelude: settings.prelude.clone(),
            fail_fast: settings.fail_fast,
        }
    }

    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Lazily verify `items` chunk by chunk, in input order
    #[must_use]
    pub fn run_batches<'b>(&'b self, items: &'b [BatchItem]) -> BatchStream<'a, 'b, V> {
        BatchStream {
            grader: self,
            chunks: items.chunks(self.batch_size),
            total_items: items.len(),
            total_chunks: items.len().div_ceil(self.batch_size),
            index: 0,
            ok: 0,
            halted: false,
            started: Instant::now(),
        }
    }

    fn verify_chunk(&self, index: usize, chunk: &[BatchItem]) -> (bool, String, Duration) {
        let program = render_chunk(index, chunk, &self.header, &self.prelude);
        let outcome = attempt(self.verifier, &program);
        let tail = if outcome.success {
            String::new()
        } else {
            outcome.diagnostic_tail(DIAGNOSTIC_TAIL_LINES)
        };
        (outcome.success, tail, outcome.duration)
    }
}

/// Iterator over chunk outcomes
pub struct BatchStream<'a, 'b, V: Verifier + ?Sized> {
    grader: &'b BatchGrader<'a, V>,
    chunks: std::slice::Chunks<'b, BatchItem>,
    total_items: usize,
    total_chunks: usize,
    index: usize,
    ok: usize,
    halted: bool,
    started: Instant,
}

impl<V: Verifier + ?Sized> BatchStream<'_, '_, V> {
    /// Totals so far; final once the stream is exhausted
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.total_items,
            ok: self.ok,
            processed_chunks: self.index,
            total_chunks: self.total_chunks,
            halted: self.halted,
            success_rate: self.ok as f64 / self.total_items.max(1) as f64,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }

    #[must_use]
    pub const fn halted(&self) -> bool {
        self.halted
    }
}

impl<V: Verifier + ?Sized> Iterator for BatchStream<'_, '_, V> {
    type Item = ChunkReport;

    fn next(&mut self) -> Option<ChunkReport> {
        if self.halted {
            return None;
        }
        let chunk = self.chunks.next()?;
        self.index += 1;

        let state = UnitState::Pending.advance(UnitEvent::Begin);
        let (success, diagnostic_tail, elapsed) = self.grader.verify_chunk(self.index, chunk);
        let member_states = gate_members(chunk.len(), success);
        let state = state.advance(if success {
            UnitEvent::Accept
        } else {
            UnitEvent::Exhaust
        });
        debug_assert_eq!(state, conjunction(&member_states));

        if success {
            self.ok += chunk.len();
            tracing::info!(
                chunk = self.index,
                total_chunks = self.total_chunks,
                ok = self.ok,
                total = self.total_items,
                elapsed = elapsed.as_secs_f64(),
                "chunk verified"
            );
        } else {
            tracing::warn!(
                chunk = self.index,
                size = chunk.len(),
                remediation = REMEDIATION,
                "chunk failed\n{diagnostic_tail}"
            );
            self.halted = self.grader.fail_fast;
        }

        Some(ChunkReport {
            index: self.index,
            total_chunks: self.total_chunks,
            problem_ids: chunk.iter().map(|item| item.problem_id.clone()).collect(),
            success,
            state,
            member_states,
            diagnostic_tail,
            remediation: (!success).then(|| REMEDIATION.to_string()),
            elapsed,
            ok: self.ok,
            processed: self.index,
        })
    }
}
