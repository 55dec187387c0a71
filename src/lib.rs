//! Account Relay - Real-time trading account fan-out.
//!
//! A monitor polls the trading terminal for account changes and emits them
//! onto an in-process event bus. The bus fans events out to WebSocket clients
//! and republishes them on an external pub/sub bus; inbound external channels
//! are relayed to clients as well.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;
