//! Lifecycle of a grading unit.
//!
//! A unit (one item in per-item mode, one chunk in batch mode) moves
//! `Pending -> Verifying -> {Success, Failed}`. Terminal states never change.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Illegal state transition
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Illegal transition from {from:?} on {event:?}")]
pub struct TransitionError {
    pub from: UnitState,
    pub event: UnitEvent,
}

/// State of a grading unit
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    #[default]
    Pending,
    Verifying,
    Success,
    Failed,
}

/// Input driving a unit forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitEvent {
    /// A verifier call is about to be made
    Begin,
    /// The verifier accepted
    Accept,
    /// The verifier rejected and no further attempt follows
    Exhaust,
}

impl UnitState {
    /// Apply an event
    ///
    /// `Pending` may also exhaust directly: a unit with nothing to verify
    /// fails without ever entering `Verifying`.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` for any edge not in the lifecycle.
    pub const fn on(self, event: UnitEvent) -> Result<Self, TransitionError> {
        match (self, event) {
            (Self::Pending | Self::Verifying, UnitEvent::Begin) => Ok(Self::Verifying),
            (Self::Verifying, UnitEvent::Accept) => Ok(Self::Success),
            (Self::Pending | Self::Verifying, UnitEvent::Exhaust) => Ok(Self::Failed),
            (from, event) => Err(TransitionError { from, event }),
        }
    }

    /// Apply an event, logging an illegal edge and falling back to `Failed`
    #[must_use]
    pub fn advance(self, event: UnitEvent) -> Self {
        self.on(event).unwrap_or_else(|err| {
            tracing::error!(error = %err, "grading unit left its lifecycle");
            Self::Failed
        })
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// Chunk-level gate: every member shares the chunk's verdict.
///
/// Returns one state per member, all `Success` when the chunk compiled and
/// all `Failed` otherwise.
#[must_use]
pub fn gate_members(members: usize, chunk_compiled: bool) -> Vec<UnitState> {
    let verdict = if chunk_compiled {
        UnitState::Success
    } else {
        UnitState::Failed
    };
    vec![verdict; members]
}

/// Conjunction over member states: `Success` only if all succeeded
#[must_use]
pub fn conjunction(states: &[UnitState]) -> UnitState {
    if states.iter().all(|s| *s == UnitState::Success) && !states.is_empty() {
        UnitState::Success
    } else if states.iter().any(|s| *s == UnitState::Failed) {
        UnitState::Failed
    } else if states.iter().any(|s| *s == UnitState::Verifying) {
        UnitState::Verifying
    } else {
        UnitState::Pending
    }
}
