//! Event bus adapters.
//!
//! - `EventBus` - In-process queue with an ordered background dispatch task
//! - `handler_fn` - Closure-backed `EventHandler` for ad-hoc subscribers

mod bus;
mod handler_fn;

pub use bus::{EventBus, EventBusConfig};
pub use handler_fn::{handler_fn, FnHandler};
