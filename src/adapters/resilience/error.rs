//! Error type shared by the resilience wrappers.

use std::time::Duration;

/// Outcome of a wrapped call that did not succeed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResilienceError<E> {
    /// The circuit breaker rejected the call without running it.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The call did not complete in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The call ran and failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> ResilienceError<E> {
    /// Returns true if the call was rejected by an open circuit.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen)
    }

    /// Returns the wrapped call's own error, if it got that far.
    pub fn into_inner(self) -> Option<E> {
        match self {
            ResilienceError::Inner(e) => Some(e),
            _ => None,
        }
    }
}
