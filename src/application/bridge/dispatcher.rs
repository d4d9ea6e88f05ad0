//! Command dispatcher: client commands to backend operations.
//!
//! Commands of one connection are dispatched one at a time by that
//! connection's task; the dispatcher itself holds no per-connection state
//! beyond what the directory and the backend session already track.

use std::sync::Arc;

use crate::domain::bridge::{InboundCommand, Jid, OutboundEvent, DESTROY_REASON};
use crate::domain::foundation::ConnectionId;
use crate::ports::{BackendError, ConnectionDirectory, SessionEntry};

use super::lifecycle::SessionLifecycleController;
use super::relay::EventRelay;
use super::settings::{BridgeSettings, CommandFailurePolicy};

/// What became of a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The backend accepted the operation.
    Dispatched,
    /// No active session for the connection; the command was ignored.
    Dropped,
    /// The backend refused or failed the operation.
    Failed(BackendError),
    /// The session was torn down and the client channel closed.
    LoggedOut,
}

pub struct CommandDispatcher {
    directory: Arc<dyn ConnectionDirectory>,
    lifecycle: Arc<SessionLifecycleController>,
    relay: EventRelay,
    settings: Arc<BridgeSettings>,
}

impl CommandDispatcher {
    pub fn new(
        directory: Arc<dyn ConnectionDirectory>,
        lifecycle: Arc<SessionLifecycleController>,
        relay: EventRelay,
        settings: Arc<BridgeSettings>,
    ) -> Self {
        Self {
            directory,
            lifecycle,
            relay,
            settings,
        }
    }

    /// Executes `command` against the session of `connection`.
    pub async fn dispatch(
        &self,
        connection: &ConnectionId,
        command: InboundCommand,
    ) -> DispatchOutcome {
        let Some(entry) = self.directory.lookup(connection) else {
            tracing::debug!(
                connection_id = %connection,
                command = command.kind(),
                "Dropping command for connection without active session"
            );
            return DispatchOutcome::Dropped;
        };
        let kind = command.kind();

        if let InboundCommand::Logout = command {
            tracing::info!(connection_id = %connection, "Client logged out");
            self.lifecycle.close(connection).await;
            entry.client.close();
            return DispatchOutcome::LoggedOut;
        }

        match self.execute(&entry, command).await {
            Ok(()) => {
                tracing::debug!(connection_id = %connection, command = kind, "Command dispatched");
                DispatchOutcome::Dispatched
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection,
                    command = kind,
                    error = %e,
                    "Backend operation failed"
                );
                if self.settings.failure_policy == CommandFailurePolicy::Surface {
                    entry.client.send(OutboundEvent::Failure);
                }
                DispatchOutcome::Failed(e)
            }
        }
    }

    async fn execute(
        &self,
        entry: &SessionEntry,
        command: InboundCommand,
    ) -> Result<(), BackendError> {
        let session = &entry.session;
        match command {
            InboundCommand::PersonalMessage { to, content } => {
                let to = self.settings.account_for(&to);
                session.send_message(&to, &content).await?;
                tracing::info!(
                    connection_id = %entry.connection_id(),
                    to = %to,
                    "Message sent"
                );
            }
            InboundCommand::RoomMessage { room, content } => {
                let room = self.settings.room_address(&room);
                session.send_room_message(&room, &content).await?;
                tracing::info!(
                    connection_id = %entry.connection_id(),
                    room = %room,
                    "Room message sent"
                );
            }
            InboundCommand::CreateRoom { room } => {
                let room = self.settings.room_address(&room);
                session.create_room(&room).await?;
                session
                    .configure_room(&room, &self.settings.room_config)
                    .await?;
                session.join_room(&room).await?;
                self.follow_room(entry, &room)?;
                tracing::info!(connection_id = %entry.connection_id(), room = %room, "Room created");
            }
            InboundCommand::JoinRoom { room } => {
                let room = self.settings.room_address(&room);
                session.join_room(&room).await?;
                self.follow_room(entry, &room)?;
                tracing::info!(connection_id = %entry.connection_id(), room = %room, "Room joined");
            }
            InboundCommand::LeaveRoom { room } => {
                let room = self.settings.room_address(&room);
                session.leave_room(&room).await?;
                tracing::info!(connection_id = %entry.connection_id(), room = %room, "Room left");
            }
            InboundCommand::DestroyRoom { room } => {
                let room = self.settings.room_address(&room);
                session.destroy_room(&room, DESTROY_REASON).await?;
                tracing::info!(connection_id = %entry.connection_id(), room = %room, "Room destroyed");
            }
            // Handled before execution.
            InboundCommand::Logout => {}
        }
        Ok(())
    }

    /// Relays groupchat of `room` to the client, once per joined room.
    fn follow_room(&self, entry: &SessionEntry, room: &Jid) -> Result<(), BackendError> {
        match entry.session.subscribe_room(room) {
            Ok(messages) => {
                self.relay.attach_room(&entry.client, room, messages);
                Ok(())
            }
            Err(BackendError::AlreadySubscribed(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
