//! [`MessagingBackend`] over real XMPP connections.
//!
//! Holds one administrative session for the lifetime of the process. It is
//! opened by [`XmppBackend::start`] and used for in-band registration of
//! accounts that do not exist yet.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::XmppConfig;
use crate::domain::bridge::{Jid, PresenceType, Username};
use crate::ports::{BackendError, BackendSession, MessagingBackend};

use super::session::{ConnectOptions, XmppSession};
use super::stanza::{ns, Element};

pub struct XmppBackend {
    options: Arc<ConnectOptions>,
    admin: XmppSession,
}

impl XmppBackend {
    /// Connects and logs in the administrative session.
    ///
    /// The bridge cannot provision accounts without it, so callers treat an
    /// error here as fatal.
    pub async fn start(config: &XmppConfig) -> Result<Self, BackendError> {
        let options = Arc::new(ConnectOptions::from_config(config));
        let admin_account = Username::new(&config.admin_username)
            .map_err(|e| BackendError::InvalidAddress(e.to_string()))?
            .at(&config.domain);

        let admin =
            XmppSession::connect(admin_account, config.admin_password.clone(), options.clone())
                .await?;
        admin.login().await?;

        tracing::info!(
            account = %admin.account(),
            server = %format!("{}:{}", options.host, options.port),
            "Administrative XMPP session established"
        );
        Ok(Self { options, admin })
    }

    pub fn admin_is_live(&self) -> bool {
        self.admin.is_live()
    }

    /// Signs the administrative session off.
    pub async fn shutdown(&self) {
        if let Err(e) = self.admin.send_presence(PresenceType::Unavailable).await {
            tracing::debug!(error = %e, "Could not announce admin unavailability");
        }
        self.admin.disconnect().await;
    }
}

#[async_trait]
impl MessagingBackend for XmppBackend {
    async fn connect(
        &self,
        account: &Jid,
        password: &SecretString,
    ) -> Result<Arc<dyn BackendSession>, BackendError> {
        let session =
            XmppSession::connect(account.to_bare(), password.clone(), self.options.clone())
                .await?;
        Ok(Arc::new(session))
    }

    async fn create_account(
        &self,
        username: &Username,
        password: &SecretString,
    ) -> Result<(), BackendError> {
        let registration = Element::new("iq")
            .attr("to", self.options.domain.clone())
            .attr("type", "set")
            .child(
                Element::new("query")
                    .ns(ns::REGISTER)
                    .child(Element::new("username").text(username.as_str()))
                    .child(Element::new("password").text(password.expose_secret().as_str())),
            );

        self.admin
            .request(registration)
            .await
            .map_err(|e| BackendError::AccountCreationFailed {
                username: username.as_str().to_string(),
                reason: e.to_string(),
            })?;
        tracing::info!(username = %username, "Registered XMPP account");
        Ok(())
    }
}
