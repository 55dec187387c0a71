//! Domain layer containing the event model and account types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (event, IDs, timestamps, errors)
//! - `account` - Trading account state and its comparable snapshot

pub mod account;
pub mod foundation;
