//! MessagingBackend port - contract toward the XMPP network.
//!
//! The session bridge never talks to the network directly. It opens
//! sessions through a [`MessagingBackend`] and drives each session through
//! the [`BackendSession`] operations. Every fallible call returns a typed
//! [`BackendError`]; implementations never retry internally, all retry
//! policy lives in the lifecycle controller.
//!
//! Backend-originated messages cross this boundary as typed queues: a
//! session hands out an `mpsc::Receiver<IncomingMessage>` per subscription
//! instead of invoking callbacks on its own reader task.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::bridge::{Jid, PresenceType, RoomConfig, Username};

/// Errors surfaced by backend operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// TCP connect or DNS failure.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// An address could not be formed from the given identity.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The server sent something we could not follow.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Login was refused. Usually means the account does not exist yet.
    #[error("authentication failed for {0}")]
    AuthenticationFailed(String),

    #[error("account creation failed for {username}: {reason}")]
    AccountCreationFailed { username: String, reason: String },

    /// The server answered a request with an error condition.
    #[error("request rejected: {condition}")]
    Rejected { condition: String },

    #[error("backend did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("session is not connected")]
    NotConnected,

    #[error("a subscriber is already attached to {0}")]
    AlreadySubscribed(String),
}

impl BackendError {
    /// True for the generic authentication failure that may be recovered
    /// by provisioning the account.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, BackendError::AuthenticationFailed(_))
    }

    pub fn rejected(condition: impl Into<String>) -> Self {
        BackendError::Rejected {
            condition: condition.into(),
        }
    }
}

/// Where an incoming message was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingKind {
    /// One-to-one chat.
    Direct,
    /// Groupchat inside a room.
    Room,
}

/// A message delivered by the backend to a bridged account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub kind: IncomingKind,
    /// Sender. For room messages this is `room@room-domain/nickname`.
    pub from: Jid,
    pub to: Jid,
    pub body: String,
}

/// A live, authenticated (or authenticating) session for one account.
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// Account this session was opened for.
    fn account(&self) -> &Jid;

    /// False once the session was disconnected or the stream dropped.
    fn is_live(&self) -> bool;

    /// Rooms this session currently occupies.
    fn joined_rooms(&self) -> Vec<Jid>;

    /// Authenticate with the credentials given at connect time.
    ///
    /// Returns [`BackendError::AuthenticationFailed`] when the server
    /// refuses the credentials.
    async fn login(&self) -> Result<(), BackendError>;

    async fn send_message(&self, to: &Jid, body: &str) -> Result<(), BackendError>;

    async fn send_room_message(&self, room: &Jid, body: &str) -> Result<(), BackendError>;

    /// Create a room and become its owner. Fails if the room already exists.
    async fn create_room(&self, room: &Jid) -> Result<(), BackendError>;

    /// Apply `config` to a room this session owns.
    async fn configure_room(&self, room: &Jid, config: &RoomConfig) -> Result<(), BackendError>;

    /// Enter a room. Succeeds immediately if already an occupant.
    async fn join_room(&self, room: &Jid) -> Result<(), BackendError>;

    async fn leave_room(&self, room: &Jid) -> Result<(), BackendError>;

    /// Destroy a room; remaining occupants are evicted by the server.
    async fn destroy_room(&self, room: &Jid, reason: &str) -> Result<(), BackendError>;

    async fn send_presence(&self, presence: PresenceType) -> Result<(), BackendError>;

    /// Close the session. Safe to call more than once.
    async fn disconnect(&self);

    /// Queue of one-to-one messages addressed to this account.
    ///
    /// Only one subscriber per session; the queue ends when the session
    /// disconnects.
    fn subscribe_messages(&self) -> Result<mpsc::Receiver<IncomingMessage>, BackendError>;

    /// Queue of groupchat messages for `room`; ends when the room is left
    /// or the session disconnects.
    fn subscribe_room(&self, room: &Jid) -> Result<mpsc::Receiver<IncomingMessage>, BackendError>;
}

/// Factory for backend sessions plus administrative operations.
#[async_trait]
pub trait MessagingBackend: Send + Sync {
    /// Open a connection for `account`. The session is not yet logged in.
    async fn connect(
        &self,
        account: &Jid,
        password: &SecretString,
    ) -> Result<Arc<dyn BackendSession>, BackendError>;

    /// Register a new account through the administrative session.
    async fn create_account(
        &self,
        username: &Username,
        password: &SecretString,
    ) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_authentication_failure_is_recoverable() {
        assert!(BackendError::AuthenticationFailed("alice".into()).is_auth_failure());
        assert!(!BackendError::Unreachable("refused".into()).is_auth_failure());
        assert!(!BackendError::rejected("item-not-found").is_auth_failure());
        assert!(!BackendError::NotConnected.is_auth_failure());
    }

    #[test]
    fn rejected_displays_condition() {
        let err = BackendError::rejected("forbidden");
        assert_eq!(err.to_string(), "request rejected: forbidden");
    }
}
