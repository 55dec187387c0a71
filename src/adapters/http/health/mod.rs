//! Health HTTP adapter module.
//!
//! Provides the operational status endpoints.

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::{ErrorResponse, StatusResponse};
pub use handlers::HealthAppState;
pub use routes::health_routes;
