//! Settings consumed by the session bridge core.

use std::time::Duration;

use secrecy::SecretString;

use crate::config::AppConfig;
use crate::domain::bridge::{Jid, RoomConfig, RoomName, Username};

/// Upper bound for backend connect and each login attempt.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// What the dispatcher does when a backend operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandFailurePolicy {
    /// Log only; the client sees nothing.
    #[default]
    Swallow,
    /// Log and emit one `failure` event per failed command.
    Surface,
}

/// Addressing, credentials and policies for bridged sessions.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Domain of user accounts (`alice@user_domain`).
    pub user_domain: String,
    /// Domain rooms live under (`team@room_domain`).
    pub room_domain: String,
    /// Password used for every bridged, and every provisioned, account.
    pub account_password: SecretString,
    pub handshake_timeout: Duration,
    /// Applied to rooms right after creation.
    pub room_config: RoomConfig,
    pub failure_policy: CommandFailurePolicy,
}

impl BridgeSettings {
    pub fn new(
        user_domain: impl Into<String>,
        room_domain: impl Into<String>,
        account_password: SecretString,
    ) -> Self {
        Self {
            user_domain: user_domain.into(),
            room_domain: room_domain.into(),
            account_password,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            room_config: RoomConfig::default(),
            failure_policy: CommandFailurePolicy::default(),
        }
    }

    /// Builds settings from the loaded application configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            user_domain: config.xmpp.domain.clone(),
            room_domain: config.xmpp.room_domain.clone(),
            account_password: config.xmpp.user_password.clone(),
            handshake_timeout: config.xmpp.connect_timeout(),
            room_config: config.bridge.room_config(),
            failure_policy: config.bridge.failure_policy(),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_room_config(mut self, room_config: RoomConfig) -> Self {
        self.room_config = room_config;
        self
    }

    pub fn with_failure_policy(mut self, policy: CommandFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Account address for a bridged username.
    pub fn account_for(&self, username: &Username) -> Jid {
        username.at(&self.user_domain)
    }

    pub fn room_address(&self, room: &RoomName) -> Jid {
        room.at(&self.room_domain)
    }
}
