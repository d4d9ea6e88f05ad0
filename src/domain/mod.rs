//! Domain layer containing the bridge's value objects and state machine.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, state machine trait, errors)
//! - `bridge` - Addresses, client commands/events, and the session lifecycle

pub mod bridge;
pub mod foundation;
