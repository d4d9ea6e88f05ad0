//! Per-connection session lifecycle.
//!
//! ```text
//! Connecting ──► Authenticating ──► Active ──► Closing ──► Closed
//!      │              │    ▲
//!      │              ▼    │ (retry login once)
//!      │         Provisioning
//!      │              │
//!      └──────────────┴──────────────► Closed   (terminal handshake failure)
//! ```

use crate::domain::foundation::StateMachine;

/// Lifecycle state of one bridged client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Opening the backend connection.
    Connecting,
    /// Logging in with the account credentials.
    Authenticating,
    /// Creating the missing account; entered at most once per connection.
    Provisioning,
    /// Registered in the connection directory; commands are dispatched.
    Active,
    /// Tearing down presence, backend session and directory entry.
    Closing,
    Closed,
}

impl StateMachine for SessionState {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Connecting, Authenticating)
                | (Connecting, Closed)
                | (Authenticating, Active)
                | (Authenticating, Provisioning)
                | (Authenticating, Closed)
                | (Provisioning, Authenticating)
                | (Provisioning, Closed)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SessionState::*;
        match self {
            Connecting => vec![Authenticating, Closed],
            Authenticating => vec![Active, Provisioning, Closed],
            Provisioning => vec![Authenticating, Closed],
            Active => vec![Closing],
            Closing => vec![Closed],
            Closed => vec![],
        }
    }
}

impl SessionState {
    /// Whether commands may be dispatched in this state.
    pub fn accepts_commands(&self) -> bool {
        matches!(self, SessionState::Active)
    }
}
