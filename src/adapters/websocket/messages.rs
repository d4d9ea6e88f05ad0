//! WebSocket message types for bridged chat connections.
//!
//! Defines the protocol between the bridge and connected browsers:
//! - Client → Server: chat and room commands, logout
//! - Server → Client: handshake outcome, incoming messages
//!
//! Inbound frames are flat JSON objects. The kind is read from `type`
//! (or `kind` / `messageType`), values are kebab-case with the older
//! SCREAMING_SNAKE names accepted too.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::bridge::{InboundCommand, OutboundEvent, RoomName, Username};
use crate::domain::foundation::ValidationError;

// ============================================
// Client → Server Messages
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientFrameType {
    #[serde(alias = "PERSONAL_MESSAGE")]
    PersonalMessage,
    #[serde(alias = "ROOM_MESSAGE")]
    RoomMessage,
    #[serde(alias = "CREATE_ROOM")]
    CreateRoom,
    #[serde(alias = "JOIN_ROOM")]
    JoinRoom,
    #[serde(alias = "LEAVE_ROOM")]
    LeaveRoom,
    #[serde(alias = "DESTROY_ROOM")]
    DestroyRoom,
    #[serde(alias = "LOGOUT")]
    Logout,
}

/// A decoded inbound text frame, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    #[serde(rename = "type", alias = "kind", alias = "messageType")]
    pub kind: ClientFrameType,

    /// Sender as claimed by the client; the connection's username wins.
    #[serde(default)]
    pub from: Option<String>,

    #[serde(default)]
    pub to: Option<String>,

    #[serde(default, alias = "room")]
    pub room_id: Option<String>,

    #[serde(default)]
    pub content: Option<String>,
}

/// Why an inbound frame could not become a command.
#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid `{field}`: {source}")]
    InvalidName {
        field: &'static str,
        source: ValidationError,
    },
}

impl TryFrom<ClientFrame> for InboundCommand {
    type Error = CommandParseError;

    fn try_from(frame: ClientFrame) -> Result<Self, Self::Error> {
        let room = || -> Result<RoomName, CommandParseError> {
            let raw = frame
                .room_id
                .as_deref()
                .ok_or(CommandParseError::MissingField("roomId"))?;
            RoomName::new(raw).map_err(|source| CommandParseError::InvalidName {
                field: "roomId",
                source,
            })
        };
        let content = || frame.content.clone().unwrap_or_default();

        let command = match frame.kind {
            ClientFrameType::PersonalMessage => {
                let raw = frame
                    .to
                    .as_deref()
                    .ok_or(CommandParseError::MissingField("to"))?;
                let to = Username::new(raw)
                    .map_err(|source| CommandParseError::InvalidName { field: "to", source })?;
                InboundCommand::PersonalMessage {
                    to,
                    content: content(),
                }
            }
            ClientFrameType::RoomMessage => InboundCommand::RoomMessage {
                room: room()?,
                content: content(),
            },
            ClientFrameType::CreateRoom => InboundCommand::CreateRoom { room: room()? },
            ClientFrameType::JoinRoom => InboundCommand::JoinRoom { room: room()? },
            ClientFrameType::LeaveRoom => InboundCommand::LeaveRoom { room: room()? },
            ClientFrameType::DestroyRoom => InboundCommand::DestroyRoom { room: room()? },
            ClientFrameType::Logout => InboundCommand::Logout,
        };
        Ok(command)
    }
}

/// Decodes one inbound text frame into a command.
pub fn parse_command(text: &str) -> Result<InboundCommand, CommandParseError> {
    let frame: ClientFrame = serde_json::from_str(text)?;
    InboundCommand::try_from(frame)
}

// ============================================
// Server → Client Messages
// ============================================

/// All message types that can be sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// Handshake complete; `to` is the bridged username.
    Success { to: String },

    /// Handshake (or, when configured, a command) failed.
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

impl From<OutboundEvent> for ServerFrame {
    fn from(event: OutboundEvent) -> Self {
        match event {
            OutboundEvent::Success { to } => ServerFrame::Success { to },
            OutboundEvent::Failure => ServerFrame::Failure,
            OutboundEvent::PersonalMessage { from, to, content } => {
                ServerFrame::PersonalMessage { from, to, content }
            }
            OutboundEvent::RoomMessage { from, to, content } => {
                ServerFrame::RoomMessage { from, to, content }
            }
        }
    }
}
