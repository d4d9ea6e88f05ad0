//! XMPP server configuration

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;
use crate::domain::bridge::Username;

const MAX_TIMEOUT_SECS: u64 = 300;

/// Connection details for the XMPP server and its administrative account
#[derive(Debug, Clone, Deserialize)]
pub struct XmppConfig {
    /// Server host name or address
    #[serde(default = "default_host")]
    pub host: String,

    /// Client-to-server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Domain of user accounts
    pub domain: String,

    /// Domain of the multi-user chat service
    pub room_domain: String,

    /// Administrative account used for in-band registration
    pub admin_username: String,
    pub admin_password: SecretString,

    /// Password of every bridged account
    pub user_password: SecretString,

    /// Prefix of the resource each session binds; a per-session suffix keeps it unique
    #[serde(default = "default_resource")]
    pub resource: String,

    /// Bound on connecting and on each login attempt
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Bound on each request awaiting a server reply
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_secs: u64,
}

impl XmppConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    /// Validate XMPP configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.trim().is_empty() {
            return Err(ValidationError::MissingRequired("XMPP__HOST"));
        }
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.domain.trim().is_empty() {
            return Err(ValidationError::MissingRequired("XMPP__DOMAIN"));
        }
        if self.room_domain.trim().is_empty() {
            return Err(ValidationError::MissingRequired("XMPP__ROOM_DOMAIN"));
        }
        Username::new(&self.admin_username)
            .map_err(|e| ValidationError::InvalidUsername(e.to_string()))?;
        if self.admin_password.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("XMPP__ADMIN_PASSWORD"));
        }
        if self.user_password.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("XMPP__USER_PASSWORD"));
        }
        if self.resource.trim().is_empty() {
            return Err(ValidationError::MissingRequired("XMPP__RESOURCE"));
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.connect_timeout_secs) {
            return Err(ValidationError::InvalidTimeout("XMPP__CONNECT_TIMEOUT_SECS"));
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.reply_timeout_secs) {
            return Err(ValidationError::InvalidTimeout("XMPP__REPLY_TIMEOUT_SECS"));
        }
        Ok(())
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5222
}

fn default_resource() -> String {
    "bridge".to_string()
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_reply_timeout() -> u64 {
    10
}
