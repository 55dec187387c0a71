//! Application layer - Long-running services and their wiring.
//!
//! - `monitor` - Change-detection loop over the account source
//! - `container` - Builds, starts and stops every service
//! - `registry` - Write-once global accessor for the container

pub mod container;
pub mod monitor;
pub mod registry;

pub use container::{HealthStatus, ServiceContainer};
pub use monitor::{
    AccountMonitor, MonitorConfig, MonitorError, MonitorStatus, PollOutcome, MONITOR_SOURCE,
};
pub use registry::{Registry, ServiceError};
