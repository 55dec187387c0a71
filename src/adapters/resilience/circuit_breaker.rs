//! In-process circuit breaker.
//!
//! State lives behind a short-lived `std::sync::Mutex`; the lock is never
//! held across an await. Time is read from `tokio::time::Instant` so tests
//! can drive the recovery timeout with a paused clock.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::ports::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};

use super::ResilienceError;

/// Circuit breaker protecting a single dependency.
#[derive(Debug)]
pub struct InMemoryCircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_in_flight: u32,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
    times_opened: u64,
}

impl InMemoryCircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                half_open_in_flight: 0,
                total_successes: 0,
                total_failures: 0,
                total_rejections: 0,
                times_opened: 0,
            }),
        }
    }

    /// Name used in log output.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `op` if the circuit allows it and records the outcome.
    ///
    /// Rejected calls never invoke `op`.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        guarded(self, op).await
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn recovery_elapsed(&self, state: &BreakerState, now: Instant) -> bool {
        state
            .last_failure
            .map(|at| now.duration_since(at) > self.config.recovery_timeout)
            .unwrap_or(false)
    }

    fn open(&self, state: &mut BreakerState) {
        state.state = CircuitState::Open;
        state.half_open_in_flight = 0;
        state.times_opened += 1;
        tracing::warn!(
            breaker = %self.name,
            failures = state.failure_count,
            "Circuit breaker opened"
        );
    }
}

/// Admission to one call through a breaker.
///
/// Settle it with `succeeded` or `failed`. A permit dropped unsettled, for
/// example when the caller's future is cancelled by a timeout, records a
/// failure so the half-open trial slot is released.
#[must_use = "an unsettled permit records a failure when dropped"]
pub struct CallPermit<'a, B: CircuitBreaker + ?Sized> {
    breaker: &'a B,
    settled: bool,
}

impl<'a, B: CircuitBreaker + ?Sized> CallPermit<'a, B> {
    /// Ask the breaker for admission. `None` while the circuit is open.
    pub fn acquire(breaker: &'a B) -> Option<Self> {
        breaker.should_allow().then_some(Self {
            breaker,
            settled: false,
        })
    }

    pub fn succeeded(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failed(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl<B: CircuitBreaker + ?Sized> Drop for CallPermit<'_, B> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!("Guarded call abandoned, recording failure");
            self.breaker.record_failure();
        }
    }
}

/// Runs `op` through any breaker, rejecting it while the circuit is open.
pub async fn guarded<B, F, Fut, T, E>(breaker: &B, op: F) -> Result<T, ResilienceError<E>>
where
    B: CircuitBreaker + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let Some(permit) = CallPermit::acquire(breaker) else {
        return Err(ResilienceError::CircuitOpen);
    };

    match op().await {
        Ok(value) => {
            permit.succeeded();
            Ok(value)
        }
        Err(e) => {
            permit.failed();
            Err(ResilienceError::Inner(e))
        }
    }
}

impl CircuitBreaker for InMemoryCircuitBreaker {
    fn state(&self) -> CircuitState {
        let state = self.lock();
        if state.state == CircuitState::Open && self.recovery_elapsed(&state, Instant::now()) {
            return CircuitState::HalfOpen;
        }
        state.state
    }

    fn should_allow(&self) -> bool {
        let mut state = self.lock();
        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.recovery_elapsed(&state, Instant::now()) {
                    state.state = CircuitState::HalfOpen;
                    state.half_open_in_flight = 1;
                    tracing::info!(breaker = %self.name, "Circuit breaker half-open, allowing trial call");
                    true
                } else {
                    state.total_rejections += 1;
                    false
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_in_flight < self.config.half_open_max_requests {
                    state.half_open_in_flight += 1;
                    true
                } else {
                    state.total_rejections += 1;
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.lock();
        state.total_successes += 1;
        if state.state != CircuitState::Closed {
            tracing::info!(breaker = %self.name, "Circuit breaker closed");
        }
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.half_open_in_flight = 0;
    }

    fn record_failure(&self) {
        let mut state = self.lock();
        state.total_failures += 1;
        state.failure_count += 1;
        state.last_failure = Some(Instant::now());

        match state.state {
            CircuitState::HalfOpen => self.open(&mut state),
            CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                self.open(&mut state)
            }
            _ => {}
        }
    }

    fn reset(&self) {
        let mut state = self.lock();
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.last_failure = None;
        state.half_open_in_flight = 0;
    }

    fn metrics(&self) -> CircuitBreakerMetrics {
        let state = self.lock();
        let time_until_half_open = match (state.state, state.last_failure) {
            (CircuitState::Open, Some(at)) => Some(
                self.config
                    .recovery_timeout
                    .saturating_sub(Instant::now().duration_since(at)),
            ),
            _ => None,
        };

        CircuitBreakerMetrics {
            state: Some(state.state),
            total_successes: state.total_successes,
            total_failures: state.total_failures,
            total_rejections: state.total_rejections,
            times_opened: state.times_opened,
            current_failures: state.failure_count,
            time_until_half_open,
        }
    }
}
