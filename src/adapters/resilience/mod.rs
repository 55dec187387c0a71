//! Resilience adapters - circuit breaker, retry and timeout wrappers.

mod circuit_breaker;
mod error;
mod policy;
mod retry;

pub use circuit_breaker::{guarded, CallPermit, InMemoryCircuitBreaker};
pub use error::ResilienceError;
pub use policy::ResiliencePolicy;
pub use retry::{retry, with_timeout, RetryPolicy};
