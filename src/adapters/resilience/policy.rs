//! Composable resilience chain: timeout → retry → circuit breaker.
//!
//! The timeout bounds each attempt, retry repeats timed attempts, and the
//! breaker sees a single outcome for the whole run. A run cancelled by its
//! caller counts as a failed run.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::ports::CircuitBreaker;

use super::{retry, with_timeout, CallPermit, ResilienceError, RetryPolicy};

/// A chain of resilience wrappers applied to a fallible async operation.
#[derive(Clone, Default)]
pub struct ResiliencePolicy {
    timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    breaker: Option<Arc<dyn CircuitBreaker>>,
}

impl ResiliencePolicy {
    /// An empty chain that just runs the operation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every attempt.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retry failed attempts.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Gate the whole run behind a circuit breaker.
    pub fn with_circuit_breaker(mut self, breaker: Arc<dyn CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Runs `op` through the chain.
    pub async fn run<F, Fut, T, E>(&self, mut op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let permit = match &self.breaker {
            Some(breaker) => match CallPermit::acquire(breaker.as_ref()) {
                Some(permit) => Some(permit),
                None => return Err(ResilienceError::CircuitOpen),
            },
            None => None,
        };

        let timeout = self.timeout;
        let attempt = || {
            let fut = op();
            async move {
                match timeout {
                    Some(bound) => with_timeout(bound, fut).await,
                    None => fut.await.map_err(ResilienceError::Inner),
                }
            }
        };

        let result = match &self.retry {
            Some(policy) => retry(policy, attempt).await,
            None => {
                let mut attempt = attempt;
                attempt().await
            }
        };

        if let Some(permit) = permit {
            match &result {
                Ok(_) => permit.succeeded(),
                Err(_) => permit.failed(),
            }
        }

        result
    }
}

impl std::fmt::Debug for ResiliencePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResiliencePolicy")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("breaker", &self.breaker.as_ref().map(|b| b.state()))
            .finish()
    }
}
