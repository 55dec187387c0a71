//! Closure-backed event handlers.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::domain::foundation::{DomainError, Event};
use crate::ports::EventHandler;

/// An [`EventHandler`] backed by a closure.
pub struct FnHandler<F> {
    name: &'static str,
    f: F,
}

/// Wraps a closure as a shareable handler.
///
/// The closure receives an owned copy of the event, so the returned future
/// can be `'static`.
///
/// ```ignore
/// let log = handler_fn("log", |event| async move {
///     tracing::info!(event_type = %event.event_type, "seen");
///     Ok(())
/// });
/// bus.subscribe("account_update", log);
/// ```
pub fn handler_fn<F, Fut>(name: &'static str, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), DomainError>> + Send + 'static,
{
    Arc::new(FnHandler { name, f })
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), DomainError>> + Send + 'static,
{
    async fn handle(&self, event: &Event) -> Result<(), DomainError> {
        (self.f)(event.clone()).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
