//! External pub/sub adapters.
//!
//! - `bridge` - ExternalBridge: prefixed channels, degraded mode, listeners
//! - `redis` - Redis backend (production)
//! - `in_memory` - broadcast-channel backend (tests, no Redis configured)

mod bridge;
mod in_memory;
mod redis;

pub use bridge::{
    BridgeState, BridgeStats, ExternalBridge, ExternalBridgeConfig, REPUBLISHED_EVENT_TYPES,
};
pub use in_memory::InMemoryPubSub;
pub use self::redis::RedisPubSub;
