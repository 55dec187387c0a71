//! AccountSource port - The external data source sampled by the monitor.
//!
//! The monitor only relies on this narrow contract; authentication and
//! transport details belong to the adapter.

use async_trait::async_trait;

use crate::domain::account::AccountInfo;

/// Port for reading account state from the trading terminal.
#[async_trait]
pub trait AccountSource: Send + Sync {
    /// Establish (or re-establish) the session.
    ///
    /// Returns `Ok(true)` when the source is live afterwards.
    async fn connect(&self) -> Result<bool, SourceError>;

    /// Cheap liveness check.
    async fn is_connected(&self) -> bool;

    /// Read the current account state.
    ///
    /// `Ok(None)` means the source answered but had nothing new to report.
    async fn fetch_state(&self) -> Result<Option<AccountInfo>, SourceError>;

    /// Close the session. Safe to call when already disconnected.
    async fn disconnect(&self);
}

/// Errors that can occur when talking to the data source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// The source is not connected and could not reconnect.
    #[error("source not connected: {0}")]
    NotConnected(String),

    /// The source rejected the request or answered with an error.
    #[error("source request failed: {0}")]
    Request(String),

    /// The response could not be decoded.
    #[error("invalid source response: {0}")]
    InvalidResponse(String),

    /// The protecting circuit breaker is open.
    #[error("source circuit breaker is open")]
    CircuitOpen,

    /// The call did not finish in time.
    #[error("source request timed out")]
    Timeout,
}
