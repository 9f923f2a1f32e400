//! Domain-level errors: invariant violations and illegal state transitions.
//! Adapters define their own boundary error enums (`OutboxError`,
//! `MatcherError`, ...) that wrap or convert from this one where relevant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid state transition: cannot transition from {current_state} via {attempted_transition}")]
    InvalidTransition {
        current_state: String,
        attempted_transition: String,
    },

    #[error("invariant violation: {invariant}")]
    InvariantViolation { invariant: String },
}
