//! Application layer - orchestration of domain types over the ports.
//!
//! The session bridge is the only use case: it owns the lifecycle of each
//! bridged connection and routes traffic in both directions.

pub mod bridge;

pub use bridge::{
    BridgeSettings, CommandDispatcher, CommandFailurePolicy, DispatchOutcome, EventRelay, RelayEnd,
    HandshakeError, SessionBridge, SessionLifecycleController,
};
