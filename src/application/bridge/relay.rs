//! Event relay: backend-originated messages to the owning client.
//!
//! Each subscription (one for direct messages per session, one per joined
//! room) gets a single forwarding task, so the order the backend delivers
//! messages in is the order the client sees them in. A task ends when the
//! backend queue ends (room left, session disconnected) or when the client
//! channel closes.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::bridge::{Jid, OutboundEvent};
use crate::ports::{ClientConnection, IncomingKind, IncomingMessage};

/// Why a forwarding task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The backend queue ended: room left, or the session is gone.
    SourceEnded,
    /// The client channel closed first.
    ClientGone,
}

/// Spawns forwarding tasks from backend queues to client connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventRelay;

impl EventRelay {
    pub fn new() -> Self {
        Self
    }

    /// Forward one-to-one messages of a session to `client`.
    pub fn attach_messages(
        &self,
        client: &ClientConnection,
        messages: mpsc::Receiver<IncomingMessage>,
    ) -> JoinHandle<RelayEnd> {
        tracing::debug!(
            connection_id = %client.id(),
            username = %client.username(),
            "Relaying direct messages"
        );
        tokio::spawn(forward(client.clone(), messages))
    }

    /// Forward groupchat messages of `room` to `client`.
    pub fn attach_room(
        &self,
        client: &ClientConnection,
        room: &Jid,
        messages: mpsc::Receiver<IncomingMessage>,
    ) -> JoinHandle<RelayEnd> {
        tracing::debug!(
            connection_id = %client.id(),
            room = %room,
            "Relaying room messages"
        );
        tokio::spawn(forward(client.clone(), messages))
    }
}

async fn forward(
    client: ClientConnection,
    mut messages: mpsc::Receiver<IncomingMessage>,
) -> RelayEnd {
    loop {
        tokio::select! {
            _ = client.closed() => return RelayEnd::ClientGone,
            next = messages.recv() => {
                let Some(message) = next else { return RelayEnd::SourceEnded };
                tracing::info!(
                    connection_id = %client.id(),
                    from = %message.from,
                    to = %message.to,
                    "Relaying incoming message"
                );
                if !client.send(to_client_event(&message)) {
                    return RelayEnd::ClientGone;
                }
            }
        }
    }
}

/// Maps a backend message onto the client event shape.
///
/// Direct messages carry sender and recipient localparts. Room messages
/// carry the sender's nickname in `from` and the room name in `to`.
pub fn to_client_event(message: &IncomingMessage) -> OutboundEvent {
    let local_or_full = |jid: &Jid| {
        jid.local()
            .map(str::to_string)
            .unwrap_or_else(|| jid.to_string())
    };

    match message.kind {
        IncomingKind::Direct => OutboundEvent::PersonalMessage {
            from: local_or_full(&message.from),
            to: local_or_full(&message.to),
            content: message.body.clone(),
        },
        IncomingKind::Room => OutboundEvent::RoomMessage {
            from: message
                .from
                .resource()
                .map(str::to_string)
                .unwrap_or_else(|| local_or_full(&message.from)),
            to: local_or_full(&message.from.to_bare()),
            content: message.body.clone(),
        },
    }
}
