//! Round phase state machine.
//!
//! `Idle -> Selecting -> Broadcasting -> Collecting -> Aggregating ->
//! Reporting -> Idle`. Quorum failures move to the terminal `Aborted`
//! state from `Selecting`, `Collecting` or `Reporting` (evaluation cohorts
//! are selected and collected while reporting).

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Phase of the current round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundPhase {
    Idle,
    Selecting,
    Broadcasting,
    Collecting,
    Aggregating,
    Reporting,
    Aborted,
}

impl RoundPhase {
    /// Whether `self -> next` is a permitted transition.
    pub fn can_transition_to(self, next: RoundPhase) -> bool {
        use RoundPhase::*;
        matches!(
            (self, next),
            (Idle, Selecting)
                | (Selecting, Broadcasting)
                | (Broadcasting, Collecting)
                | (Collecting, Aggregating)
                | (Aggregating, Reporting)
                | (Reporting, Idle)
                | (Selecting, Aborted)
                | (Collecting, Aborted)
                | (Reporting, Aborted)
        )
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        self == RoundPhase::Aborted
    }
}

impl std::fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RoundPhase::Idle => "idle",
            RoundPhase::Selecting => "selecting",
            RoundPhase::Broadcasting => "broadcasting",
            RoundPhase::Collecting => "collecting",
            RoundPhase::Aggregating => "aggregating",
            RoundPhase::Reporting => "reporting",
            RoundPhase::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

/// Tracks the current phase and rejects illegal transitions.
#[derive(Clone, Debug)]
pub struct PhaseTracker {
    current: RoundPhase,
}

impl PhaseTracker {
    /// Start in `Idle`.
    pub fn new() -> Self {
        Self {
            current: RoundPhase::Idle,
        }
    }

    /// Current phase.
    pub fn current(&self) -> RoundPhase {
        self.current
    }

    /// Move to `next`.
    pub fn advance(&mut self, next: RoundPhase) -> Result<()> {
        if !self.current.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.current.to_string(),
                to: next.to_string(),
            });
        }
        tracing::trace!(from = %self.current, to = %next, "round phase");
        self.current = next;
        Ok(())
    }

    /// Return to `Idle` after a round failed without losing quorum.
    ///
    /// `Aborted` stays terminal.
    pub fn reset(&mut self) -> Result<()> {
        if self.current.is_terminal() {
            return Err(Error::InvalidTransition {
                from: self.current.to_string(),
                to: RoundPhase::Idle.to_string(),
            });
        }
        tracing::trace!(from = %self.current, "round phase reset");
        self.current = RoundPhase::Idle;
        Ok(())
    }

    /// Move to `Aborted` if allowed from the current phase.
    pub fn abort(&mut self) -> Result<()> {
        self.advance(RoundPhase::Aborted)
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
