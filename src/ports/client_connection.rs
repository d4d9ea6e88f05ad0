//! Client connection handle.
//!
//! The bridge core never touches the transport. It holds a
//! [`ClientConnection`], an addressable endpoint with a send and a close
//! capability; the transport adapter drains the matching receiver.

use tokio::sync::mpsc;

use crate::domain::bridge::{OutboundEvent, Username};
use crate::domain::foundation::ConnectionId;

/// Instruction for the transport writer of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientSignal {
    Event(OutboundEvent),
    /// Close the client channel after flushing earlier events.
    Close,
}

/// Cloneable handle to one client's real-time channel.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    id: ConnectionId,
    username: Username,
    tx: mpsc::UnboundedSender<ClientSignal>,
}

impl ClientConnection {
    /// Creates a handle and the receiver the transport writer drains.
    pub fn new(
        id: ConnectionId,
        username: Username,
    ) -> (Self, mpsc::UnboundedReceiver<ClientSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, username, tx }, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    /// Queue an event for the client. Returns false if the channel is gone.
    pub fn send(&self, event: OutboundEvent) -> bool {
        self.tx.send(ClientSignal::Event(event)).is_ok()
    }

    /// Ask the transport to close the channel.
    pub fn close(&self) {
        let _ = self.tx.send(ClientSignal::Close);
    }

    /// True once the transport writer has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the transport writer has stopped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}
