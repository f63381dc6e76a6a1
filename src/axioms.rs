//! Axiom-usage accounting.
//!
//! The kernel reports which axioms a checked proof depended on. We pull that
//! list out of the diagnostic text and turn it into a scalar penalty under one
//! of two policies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

/// Substring identifying classical-logic axioms (`Classical.choice`, ...)
pub const CLASSICAL_MARKER: &str = "Classical";

/// `axioms <qualified.name> : a, b, c`, or Lean's
/// `'<qualified.name>' depends on axioms: [a, b, c]`
static AXIOM_LINES: LazyLock<[regex::Regex; 2]> = LazyLock::new(|| {
    [
        r"axioms\s+([A-Za-z0-9_.]+)\s*:\s*(.*)",
        r"'([A-Za-z0-9_.]+)'\s+depends\s+on\s+axioms\s*:\s*(.*)",
    ]
    .map(|pattern| {
        regex::RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("axiom pattern is a valid literal")
    })
});

/// Set of axiom names a successful proof depended on
pub type AxiomSet = BTreeSet<String>;

/// Extract the axiom set from kernel diagnostic output.
///
/// Only the first matching line is used. No match yields an empty set.
#[must_use]
pub fn extract_axioms(diagnostic: &str) -> AxiomSet {
    let Some(caps) = AXIOM_LINES.iter().find_map(|re| re.captures(diagnostic)) else {
        return AxiomSet::new();
    };

    caps.get(2)
        .map(|list| {
            list.as_str()
                .split(',')
                .map(|a| a.trim().trim_matches(|c| c == '[' || c == ']').trim())
                .filter(|a| !a.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Penalty policy applied to every item of a run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AxiomPolicy {
    /// Classical = 1.0, each other axiom = 0.5
    #[default]
    Permissive,
    /// Classical = 2.0, each other axiom = 1.0
    Constructive,
}

impl AxiomPolicy {
    const fn weights(self) -> (f64, f64) {
        match self {
            Self::Permissive => (1.0, 0.5),
            Self::Constructive => (2.0, 1.0),
        }
    }

    /// Scalar penalty for an axiom set.
    ///
    /// The classical charge is applied once no matter how many classical
    /// axioms appear; every non-classical axiom is charged individually.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn penalty(self, axioms: &AxiomSet) -> f64 {
        let (classical_weight, extra_weight) = self.weights();
        let uses_classical = axioms.iter().any(|a| a.contains(CLASSICAL_MARKER));
        let extra = axioms
            .iter()
            .filter(|a| !a.contains(CLASSICAL_MARKER))
            .count();

        let classical = if uses_classical { classical_weight } else { 0.0 };
        classical + extra_weight * extra as f64
    }
}

impl fmt::Display for AxiomPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permissive => f.write_str("permissive"),
            Self::Constructive => f.write_str("constructive"),
        }
    }
}

impl std::str::FromStr for AxiomPolicy {
    type Err = crate::config::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "permissive" | "default" => Ok(Self::Permissive),
            "constructive" | "strict" => Ok(Self::Constructive),
            _ => Err(crate::config::ConfigError::InvalidAxiomPolicy(s.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn set(names: &[&str]) -> AxiomSet {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_extract_axioms_basic() {
        let out = "info: axioms Demo.goal : propext, Classical.choice, Quot.sound\n";
        let axioms = extract_axioms(out);
        assert_eq!(axioms, set(&["propext", "Classical.choice", "Quot.sound"]));
    }

    #[test]
    fn test_extract_axioms_case_insensitive_and_brackets() {
        let out = "AXIOMS candidate_goal: [propext, Quot.sound]";
        let axioms = extract_axioms(out);
        assert_eq!(axioms, set(&["propext", "Quot.sound"]));
    }

    #[test]
    fn test_extract_axioms_depends_on_form() {
        let out = "'candidate_goal' depends on axioms: [propext, Classical.choice, Quot.sound]\n";
        let axioms = extract_axioms(out);
        assert_eq!(axioms, set(&["propext", "Classical.choice", "Quot.sound"]));
    }

    #[test]
    fn test_extract_axioms_no_match() {
        assert!(extract_axioms("").is_empty());
        assert!(extract_axioms("goals accomplished").is_empty());
    }

    #[test]
    fn test_extract_axioms_skips_empty_entries() {
        let axioms = extract_axioms("axioms x.y : propext, , ");
        assert_eq!(axioms, set(&["propext"]));
    }

    #[test]
    fn test_permissive_penalty() {
        let axioms = set(&["Classical.choice", "propext"]);
        assert!((AxiomPolicy::Permissive.penalty(&axioms) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_constructive_penalty() {
        let axioms = set(&["Classical.choice", "propext"]);
        assert!((AxiomPolicy::Constructive.penalty(&axioms) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_classical_charged_once() {
        let axioms = set(&["Classical.choice", "Classical.em"]);
        assert!((AxiomPolicy::Permissive.penalty(&axioms) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_set_has_no_penalty() {
        assert!(AxiomPolicy::Constructive.penalty(&AxiomSet::new()).abs() < f64::EPSILON);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(AxiomPolicy::from_str("permissive").unwrap(), AxiomPolicy::Permissive);
        assert_eq!(AxiomPolicy::from_str("CONSTRUCTIVE").unwrap(), AxiomPolicy::Constructive);
        assert!(AxiomPolicy::from_str("lenient").is_err());
        assert_eq!(AxiomPolicy::default(), AxiomPolicy::Permissive);
        assert_eq!(AxiomPolicy::Constructive.to_string(), "constructive");
    }
}
