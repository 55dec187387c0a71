//! Process-wide access to the service container.
//!
//! Components receive their dependencies explicitly; the global accessor only
//! exists for code at the edges (signal handlers, ad-hoc diagnostics) and
//! fails loudly when asked before `install`.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use thiserror::Error;

use super::container::ServiceContainer;

/// Registry lookup errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("service container is not initialized")]
    NotInitialized,

    #[error("service container is already initialized")]
    AlreadyInitialized,
}

/// A write-once slot holding the container.
pub struct Registry {
    slot: OnceCell<Arc<ServiceContainer>>,
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            slot: OnceCell::new(),
        }
    }

    /// Store the container. Fails if one is already stored.
    pub fn install(&self, container: Arc<ServiceContainer>) -> Result<(), ServiceError> {
        self.slot
            .set(container)
            .map_err(|_| ServiceError::AlreadyInitialized)
    }

    /// Get the stored container.
    pub fn get(&self) -> Result<Arc<ServiceContainer>, ServiceError> {
        self.slot.get().cloned().ok_or(ServiceError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.get().is_some()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: Registry = Registry::new();

/// Install the process-wide container.
pub fn install(container: Arc<ServiceContainer>) -> Result<(), ServiceError> {
    GLOBAL.install(container)?;
    tracing::debug!("Service container installed");
    Ok(())
}

/// The process-wide container, or `NotInitialized`.
pub fn global() -> Result<Arc<ServiceContainer>, ServiceError> {
    GLOBAL.get()
}
