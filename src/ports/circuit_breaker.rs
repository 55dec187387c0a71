//! CircuitBreaker port - Interface for upstream dependency resilience.
//!
//! The circuit breaker prevents a failing dependency (the trading terminal,
//! the external message bus) from stalling every caller.
//!
//! ## States
//!
//! - **Closed**: Normal operation, requests flow through
//! - **Open**: Too many failures, requests rejected immediately
//! - **Half-Open**: Recovering, a single trial request is allowed
//!
//! ## Transitions
//!
//! ```text
//! Closed --[failure_threshold reached]--> Open
//! Open --[more than recovery_timeout since last failure]--> Half-Open
//! Half-Open --[trial succeeds]--> Closed
//! Half-Open --[trial fails]--> Open (failure clock restarted)
//! ```

use std::fmt;
use std::time::Duration;

/// Circuit breaker states for dependency protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests flow through to the dependency.
    Closed,

    /// Too many failures - requests rejected immediately without calling the dependency.
    /// The circuit will transition to HalfOpen once recovery_timeout has elapsed.
    Open,

    /// Probing whether the dependency recovered.
    /// Success → Closed, Failure → Open.
    HalfOpen,
}

impl CircuitState {
    /// Check if the circuit allows requests through.
    pub fn allows_requests(&self) -> bool {
        matches!(self, CircuitState::Closed | CircuitState::HalfOpen)
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit.
    ///
    /// Default: 5 failures
    pub failure_threshold: u32,

    /// Time since the last failure after which a trial request is allowed.
    ///
    /// Default: 60 seconds
    pub recovery_timeout: Duration,

    /// Maximum concurrent trial requests in half-open state.
    ///
    /// Default: 1 request at a time
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_requests: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a config with the given threshold and timeout.
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            half_open_max_requests: 1,
        }
    }

    /// Config for the trading terminal session.
    pub fn for_terminal() -> Self {
        Self::new(5, Duration::from_secs(60))
    }

    /// Config for the external message bus session.
    pub fn for_message_bus() -> Self {
        Self::new(3, Duration::from_secs(30))
    }
}

/// Port for circuit breaker functionality.
///
/// One instance protects exactly one dependency; instances never share state.
///
/// # Example
///
/// ```ignore
/// if !breaker.should_allow() {
///     return Err(SourceError::CircuitOpen);
/// }
///
/// match gateway.get_account().await {
///     Ok(info) => {
///         breaker.record_success();
///         Ok(info)
///     }
///     Err(e) => {
///         breaker.record_failure();
///         Err(e)
///     }
/// }
/// ```
pub trait CircuitBreaker: Send + Sync {
    /// Get the current state of the circuit.
    ///
    /// An open circuit whose recovery timeout elapsed reports `HalfOpen`.
    fn state(&self) -> CircuitState;

    /// Check if a request should be allowed through.
    ///
    /// Returns `true` if the circuit is closed, or half-open with trial capacity.
    /// Returns `false` if the circuit is open. A `true` in half-open state
    /// reserves the trial slot until an outcome is recorded.
    fn should_allow(&self) -> bool;

    /// Record a successful request. Resets the failure count and closes the circuit.
    fn record_success(&self);

    /// Record a failed request.
    ///
    /// In closed state, this counts toward the failure threshold.
    /// In half-open state, this immediately reopens the circuit.
    fn record_failure(&self);

    /// Force reset the circuit to closed state.
    fn reset(&self);

    /// Get metrics about the circuit breaker.
    fn metrics(&self) -> CircuitBreakerMetrics;
}

/// Metrics about circuit breaker behavior.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerMetrics {
    /// Current state
    pub state: Option<CircuitState>,

    /// Total successful requests since creation
    pub total_successes: u64,

    /// Total failed requests since creation
    pub total_failures: u64,

    /// Total requests rejected without calling the dependency
    pub total_rejections: u64,

    /// Times the circuit has opened
    pub times_opened: u64,

    /// Current consecutive failure count
    pub current_failures: u32,

    /// Time until circuit transitions to half-open (when open)
    pub time_until_half_open: Option<Duration>,
}
