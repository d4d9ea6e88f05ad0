//! Foundation module - Shared domain primitives.
//!
//! Contains identifiers, the state machine trait, and error types
//! that form the vocabulary of the bridge domain.

mod errors;
mod ids;
mod state_machine;

pub use errors::ValidationError;
pub use ids::ConnectionId;
pub use state_machine::StateMachine;
