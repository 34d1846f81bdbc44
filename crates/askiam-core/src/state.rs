//! Decision gate state machine

use crate::error::PipelineFault;
use serde::Serialize;
use std::fmt;

/// Validation run states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    /// Request accepted for processing
    Received,
    /// Entities extracted
    Extracted,
    /// Semantic path run (or started, in concurrent modes)
    SemanticAttempted,
    /// Semantic result accepted without deterministic confirmation
    Accepted,
    /// Deterministic path run
    DeterministicAttempted,
    /// Decision committed
    Finalized,
    /// Unhandled fault
    Error,
}

impl PipelineState {
    /// Upper-case state name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Extracted => "EXTRACTED",
            Self::SemanticAttempted => "SEMANTIC_ATTEMPTED",
            Self::Accepted => "ACCEPTED",
            Self::DeterministicAttempted => "DETERMINISTIC_ATTEMPTED",
            Self::Finalized => "FINALIZED",
            Self::Error => "ERROR",
        }
    }

    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Error)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States reachable from `from`
///
/// `Extracted -> Finalized` is the "no extractable entities" short-circuit.
/// Every non-terminal state may fall into `Error`.
#[must_use]
pub fn allowed_transitions(from: PipelineState) -> Vec<PipelineState> {
    use PipelineState::{
        Accepted, DeterministicAttempted, Error, Extracted, Finalized, Received,
        SemanticAttempted,
    };
    match from {
        Received => vec![Extracted, Finalized, Error],
        Extracted => vec![SemanticAttempted, Finalized, Error],
        SemanticAttempted => vec![Accepted, DeterministicAttempted, Error],
        Accepted | DeterministicAttempted => vec![Finalized, Error],
        Finalized | Error => vec![],
    }
}

/// Validate a state transition
///
/// # Errors
/// - `PipelineFault::IllegalTransition` if `to` is not reachable from `from`
pub fn validate_transition(from: PipelineState, to: PipelineState) -> Result<(), PipelineFault> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(PipelineFault::IllegalTransition {
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}

/// Current state of one validation run
#[derive(Debug)]
pub(crate) struct StateTracker {
    state: PipelineState,
}

impl StateTracker {
    pub(crate) fn new() -> Self {
        Self {
            state: PipelineState::Received,
        }
    }

    pub(crate) fn current(&self) -> PipelineState {
        self.state
    }

    pub(crate) fn advance(&mut self, to: PipelineState) -> Result<(), PipelineFault> {
        validate_transition(self.state, to)?;
        tracing::debug!(from = %self.state, to = %to, "pipeline state transition");
        self.state = to;
        Ok(())
    }
}
