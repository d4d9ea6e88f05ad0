//! Session bridge - pairs client connections with backend sessions.
//!
//! - [`SessionLifecycleController`] - handshake and teardown
//! - [`CommandDispatcher`] - client commands to backend operations
//! - [`EventRelay`] - backend messages to clients
//!
//! [`SessionBridge`] wires the three together over one directory and is
//! what transport adapters hold.

mod dispatcher;
mod lifecycle;
mod relay;
mod settings;

pub use dispatcher::{CommandDispatcher, DispatchOutcome};
pub use lifecycle::{HandshakeError, SessionLifecycleController};
pub use relay::{to_client_event, EventRelay, RelayEnd};
pub use settings::{BridgeSettings, CommandFailurePolicy, DEFAULT_HANDSHAKE_TIMEOUT};

use std::sync::Arc;

use crate::domain::bridge::{InboundCommand, Jid};
use crate::domain::foundation::ConnectionId;
use crate::ports::{ClientConnection, ConnectionDirectory, MessagingBackend};

/// Shared entry point for transport adapters.
#[derive(Clone)]
pub struct SessionBridge {
    lifecycle: Arc<SessionLifecycleController>,
    dispatcher: Arc<CommandDispatcher>,
}

impl SessionBridge {
    pub fn new(
        backend: Arc<dyn MessagingBackend>,
        directory: Arc<dyn ConnectionDirectory>,
        settings: BridgeSettings,
    ) -> Self {
        let settings = Arc::new(settings);
        let relay = EventRelay::new();
        let lifecycle = Arc::new(SessionLifecycleController::new(
            backend,
            directory.clone(),
            relay,
            settings.clone(),
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            directory,
            lifecycle.clone(),
            relay,
            settings,
        ));
        Self {
            lifecycle,
            dispatcher,
        }
    }

    pub async fn open(&self, client: &ClientConnection) -> Result<Jid, HandshakeError> {
        self.lifecycle.open(client).await
    }

    pub async fn dispatch(
        &self,
        connection: &ConnectionId,
        command: InboundCommand,
    ) -> DispatchOutcome {
        self.dispatcher.dispatch(connection, command).await
    }

    pub async fn close(&self, connection: &ConnectionId) -> bool {
        self.lifecycle.close(connection).await
    }

    pub fn active_sessions(&self) -> usize {
        self.lifecycle.active_sessions()
    }
}
