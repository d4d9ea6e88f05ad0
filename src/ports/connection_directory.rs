//! ConnectionDirectory port - which client connections are bridged, and to
//! which backend session.
//!
//! The directory is the single source of truth for "is this connection
//! currently active". It is read concurrently by the command dispatcher and
//! written by the lifecycle controller, so implementations must be safe to
//! share across tasks and must never block a reader for long.
//!
//! ## Invariants
//!
//! - At most one entry per connection.
//! - An entry exists only while its connection is `Active`.
//! - The directory holds nothing besides these entries.

use std::fmt;
use std::sync::Arc;

use crate::domain::foundation::ConnectionId;

use super::client_connection::ClientConnection;
use super::messaging_backend::BackendSession;

/// The pairing of a client connection with its backend session.
#[derive(Clone)]
pub struct SessionEntry {
    pub client: ClientConnection,
    pub session: Arc<dyn BackendSession>,
}

impl SessionEntry {
    pub fn new(client: ClientConnection, session: Arc<dyn BackendSession>) -> Self {
        Self { client, session }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.client.id()
    }
}

impl fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEntry")
            .field("connection_id", &self.client.id())
            .field("account", &self.session.account().to_string())
            .finish()
    }
}

/// Concurrent map from connection identity to session entry.
pub trait ConnectionDirectory: Send + Sync {
    /// Insert an entry keyed by its connection id.
    ///
    /// Replaces and returns any prior entry for the same connection.
    fn register(&self, entry: SessionEntry) -> Option<SessionEntry>;

    /// Non-blocking read.
    fn lookup(&self, connection: &ConnectionId) -> Option<SessionEntry>;

    /// Delete and return the entry; `None` if there was none.
    ///
    /// Exactly one caller observes `Some` for a given registration, which
    /// makes teardown idempotent.
    fn remove(&self, connection: &ConnectionId) -> Option<SessionEntry>;

    /// Number of active sessions.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
