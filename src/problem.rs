//! Problem and candidate loading.
//!
//! Problems arrive as JSONL (one proposition per line); candidates as a JSON
//! object mapping each problem id to its ranked proof bodies.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading problems or candidates
#[derive(Error, Debug)]
pub enum ProblemError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed record on line {line}: {source}")]
    MalformedRecord {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed candidate file: {0}")]
    MalformedCandidates(#[source] serde_json::Error),

    #[error("Duplicate problem id: {0}")]
    DuplicateId(String),

    #[error("Problem {0} has an empty proposition")]
    EmptyProposition(String),
}

/// Distribution split a problem belongs to
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    /// In-distribution
    #[default]
    Id,
    /// Out-of-distribution by phrasing style
    OodStyle,
    /// Out-of-distribution by topic
    OodTopic,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id => f.write_str("id"),
            Self::OodStyle => f.write_str("ood_style"),
            Self::OodTopic => f.write_str("ood_topic"),
        }
    }
}

/// A single proposition to be proved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Problem {
    /// Unique identifier
    pub id: String,
    /// Self-contained statement handed to the kernel
    #[serde(alias = "lean_prop", alias = "goal", alias = "statement")]
    pub proposition: String,
    #[serde(default)]
    pub split: Split,
    #[serde(default = "unknown")]
    pub domain: String,
    #[serde(default = "unknown")]
    pub style: String,
    #[serde(default)]
    pub difficulty: i64,
}

fn unknown() -> String {
    "?".to_string()
}

impl Problem {
    /// Convenience constructor with default metadata
    #[must_use]
    pub fn new(id: &str, proposition: &str) -> Self {
        Self {
            id: id.to_string(),
            proposition: proposition.to_string(),
            split: Split::Id,
            domain: unknown(),
            style: unknown(),
            difficulty: 0,
        }
    }
}

/// Ordered problem collection with unique ids
#[derive(Debug, Clone, Default)]
pub struct ProblemSet {
    problems: Vec<Problem>,
}

impl ProblemSet {
    /// Build from an in-memory list
    ///
    /// # Errors
    ///
    /// Returns `ProblemError::DuplicateId` or `ProblemError::EmptyProposition`.
    pub fn from_problems(problems: Vec<Problem>) -> Result<Self, ProblemError> {
        let mut seen = HashSet::with_capacity(problems.len());
        for problem in &problems {
            if !seen.insert(problem.id.as_str()) {
                return Err(ProblemError::DuplicateId(problem.id.clone()));
            }
            if problem.proposition.trim().is_empty() {
                return Err(ProblemError::EmptyProposition(problem.id.clone()));
            }
        }
        Ok(Self { problems })
    }

    /// Parse JSONL text; blank lines are skipped
    ///
    /// # Errors
    ///
    /// Returns an error for unparsable lines or invalid problem sets.
    pub fn from_jsonl(text: &str) -> Result<Self, ProblemError> {
        let mut problems = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let problem: Problem = serde_json::from_str(line)
                .map_err(|source| ProblemError::MalformedRecord { line: idx + 1, source })?;
            problems.push(problem);
        }
        Self::from_problems(problems)
    }

    /// Load a JSONL problem file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProblemError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_jsonl(&content)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.problems.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Problem> {
        self.problems.iter()
    }

    /// Look up a problem by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Problem> {
        self.problems.iter().find(|p| p.id == id)
    }

    /// Keep only the first `limit` problems (0 = keep all)
    #[must_use]
    pub fn truncated(mut self, limit: usize) -> Self {
        if limit > 0 {
            self.problems.truncate(limit);
        }
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CandidateEntry {
    Many(Vec<String>),
    One(String),
}

/// Ranked candidate proofs for every problem id
#[derive(Debug, Clone, Default)]
pub struct CandidateSets {
    by_id: HashMap<String, Vec<String>>,
}

impl CandidateSets {
    /// Build from an in-memory map
    #[must_use]
    pub const fn new(by_id: HashMap<String, Vec<String>>) -> Self {
        Self { by_id }
    }

    /// Parse `{id: [proof, ...]}`; a bare string counts as one candidate
    /// and `null` as none.
    ///
    /// # Errors
    ///
    /// Returns `ProblemError::MalformedCandidates` on invalid JSON.
    pub fn from_json(text: &str) -> Result<Self, ProblemError> {
        let raw: HashMap<String, Option<CandidateEntry>> =
            serde_json::from_str(text).map_err(ProblemError::MalformedCandidates)?;
        let by_id = raw
            .into_iter()
            .map(|(id, entry)| {
                let proofs = match entry {
                    Some(CandidateEntry::Many(list)) => list,
                    Some(CandidateEntry::One(single)) => vec![single],
                    None => Vec::new(),
                };
                (id, proofs)
            })
            .collect();
        Ok(Self { by_id })
    }

    /// Load a candidate JSON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProblemError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Raw ranked list for an id (empty when the id is missing)
    #[must_use]
    pub fn ranked(&self, id: &str) -> &[String] {
        self.by_id.get(id).map_or(&[], Vec::as_slice)
    }

    /// Eligible candidates: first `k`, then minus any using a banned tactic
    #[must_use]
    pub fn eligible(&self, id: &str, k: usize, banned: &[String]) -> Vec<String> {
        self.ranked(id)
            .iter()
            .take(k)
            .filter(|proof| !banned.iter().any(|tactic| proof.contains(tactic.as_str())))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
