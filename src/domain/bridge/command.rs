//! Commands a bridged client can issue, and the events it receives back.

use super::address::{RoomName, Username};

/// A parsed inbound client command.
///
/// Only meaningful once the issuing connection has an active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCommand {
    /// One-to-one message to another user on the user domain.
    PersonalMessage { to: Username, content: String },
    /// Message to a room the user has joined.
    RoomMessage { room: RoomName, content: String },
    CreateRoom { room: RoomName },
    JoinRoom { room: RoomName },
    LeaveRoom { room: RoomName },
    DestroyRoom { room: RoomName },
    Logout,
}

impl InboundCommand {
    /// Short, stable name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundCommand::PersonalMessage { .. } => "personal-message",
            InboundCommand::RoomMessage { .. } => "room-message",
            InboundCommand::CreateRoom { .. } => "create-room",
            InboundCommand::JoinRoom { .. } => "join-room",
            InboundCommand::LeaveRoom { .. } => "leave-room",
            InboundCommand::DestroyRoom { .. } => "destroy-room",
            InboundCommand::Logout => "logout",
        }
    }
}

/// An event pushed to a client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// Handshake completed; `to` is the username the session is bound to.
    Success { to: String },
    /// Handshake failed, or (when configured) a command failed.
    Failure,
    PersonalMessage {
        from: String,
        to: String,
        content: String,
    },
    RoomMessage {
        from: String,
        to: String,
        content: String,
    },
}

impl OutboundEvent {
    pub fn success(username: &Username) -> Self {
        OutboundEvent::Success {
            to: username.as_str().to_string(),
        }
    }
}
