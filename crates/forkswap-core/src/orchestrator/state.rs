//! Loop state machine
//!
//! The loop moves `Idle → Polling → Evaluating → (Executing → Settling)* →
//! Draining → Done`, with `NoProgress` looping back to `Polling` when no
//! source answers and `Stopped` reachable from any waiting state on shutdown.

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// State of the orchestrator loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoopState {
    /// Constructed, not yet polling
    Idle,
    /// Reading progress
    Polling,
    /// Progress unavailable; waiting to retry
    NoProgress,
    /// Scanning the registry for a due target
    Evaluating,
    /// Running one target's lifecycle
    Executing,
    /// Pausing after an execution before re-polling
    Settling,
    /// Every target has a marker
    Draining,
    /// Loop finished
    Done,
    /// Loop left early on shutdown or halt
    Stopped,
}

impl LoopState {
    /// Whether the loop has exited
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Stopped)
    }
}

/// States reachable from `from`
#[must_use]
pub fn allowed_transitions(from: LoopState) -> Vec<LoopState> {
    use LoopState::*;
    match from {
        Idle => vec![Polling, Draining, Stopped],
        Polling => vec![Evaluating, NoProgress, Stopped],
        NoProgress => vec![Polling, Draining, Stopped],
        Evaluating => vec![Executing, Polling, Draining, Stopped],
        Executing => vec![Settling, Stopped],
        Settling => vec![Polling, Draining, Stopped],
        Draining => vec![Done],
        Done | Stopped => vec![],
    }
}

/// Validate a transition
///
/// # Errors
/// Returns `OrchestratorError::IllegalTransition` if `to` is not reachable.
pub fn validate_transition(from: LoopState, to: LoopState) -> Result<(), OrchestratorError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(OrchestratorError::IllegalTransition { from, to })
    }
}
