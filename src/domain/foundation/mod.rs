//! Foundation module - Shared domain primitives.
//!
//! Contains value objects, identifiers, the event type and error types
//! shared by every other layer.

mod errors;
mod events;
mod ids;
mod timestamp;

pub use errors::{DomainError, ErrorCode, ValidationError};
pub use events::{event_types, Event};
pub use ids::{ConnectionId, EventId};
pub use timestamp::Timestamp;
