//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the bridge core and the outside world. Adapters implement these ports.
//!
//! - `MessagingBackend` / `BackendSession` - the XMPP network
//! - `ConnectionDirectory` - connection to session mapping
//! - `ClientConnection` - send/close handle onto one client channel

mod client_connection;
mod connection_directory;
mod messaging_backend;

pub use client_connection::{ClientConnection, ClientSignal};
pub use connection_directory::{ConnectionDirectory, SessionEntry};
pub use messaging_backend::{
    BackendError, BackendSession, IncomingKind, IncomingMessage, MessagingBackend,
};
