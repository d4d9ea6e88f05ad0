//! Session lifecycle controller.
//!
//! Drives one client connection from `Connecting` through login (and, at
//! most once, account provisioning) to `Active`, and back down through
//! `Closing` to `Closed`. A connection is `Active` exactly while the
//! connection directory holds an entry for it. When the backend drops a
//! session on its own the entry is removed and the client is told with a
//! `failure` before its channel closes.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::domain::bridge::{Jid, OutboundEvent, PresenceType, SessionState};
use crate::domain::foundation::{ConnectionId, StateMachine};
use crate::ports::{
    BackendError, BackendSession, ClientConnection, ConnectionDirectory, MessagingBackend,
    SessionEntry,
};

use super::relay::{EventRelay, RelayEnd};
use super::settings::BridgeSettings;

/// Why a handshake ended without an active session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("could not open backend connection: {0}")]
    Connect(BackendError),

    #[error("login failed: {0}")]
    Login(BackendError),

    #[error("account provisioning failed: {0}")]
    Provisioning(BackendError),

    #[error("login after provisioning failed: {0}")]
    RetriedLogin(BackendError),

    #[error("could not subscribe to incoming messages: {0}")]
    Subscribe(BackendError),
}

impl HandshakeError {
    pub fn backend_error(&self) -> &BackendError {
        match self {
            HandshakeError::Connect(e)
            | HandshakeError::Login(e)
            | HandshakeError::Provisioning(e)
            | HandshakeError::RetriedLogin(e)
            | HandshakeError::Subscribe(e) => e,
        }
    }
}

/// Opens and tears down bridged sessions.
pub struct SessionLifecycleController {
    backend: Arc<dyn MessagingBackend>,
    directory: Arc<dyn ConnectionDirectory>,
    relay: EventRelay,
    settings: Arc<BridgeSettings>,
}

impl SessionLifecycleController {
    pub fn new(
        backend: Arc<dyn MessagingBackend>,
        directory: Arc<dyn ConnectionDirectory>,
        relay: EventRelay,
        settings: Arc<BridgeSettings>,
    ) -> Self {
        Self {
            backend,
            directory,
            relay,
            settings,
        }
    }

    /// Runs the handshake for a freshly accepted client connection.
    ///
    /// On success the connection is registered, incoming one-to-one messages
    /// are relayed to it and a `success` event is emitted. On failure any
    /// partially opened backend session is disconnected, a `failure` event
    /// is emitted and the client channel is closed; nothing is registered.
    pub async fn open(&self, client: &ClientConnection) -> Result<Jid, HandshakeError> {
        let account = self.settings.account_for(client.username());
        let mut state = SessionState::Connecting;

        tracing::info!(
            connection_id = %client.id(),
            username = %client.username(),
            account = %account,
            "Opening backend session"
        );

        let session = match self
            .bounded(self.backend.connect(&account, &self.settings.account_password))
            .await
        {
            Ok(session) => session,
            Err(e) => {
                return Err(self
                    .abort(client, &mut state, None, HandshakeError::Connect(e))
                    .await)
            }
        };
        advance(client.id(), &mut state, SessionState::Authenticating);

        if let Err(e) = self.authenticate(client, &session, &mut state).await {
            return Err(self.abort(client, &mut state, Some(&session), e).await);
        }

        // Subscribe before registering so no message lands between the two.
        let messages = match session.subscribe_messages() {
            Ok(messages) => messages,
            Err(e) => {
                return Err(self
                    .abort(client, &mut state, Some(&session), HandshakeError::Subscribe(e))
                    .await)
            }
        };

        self.directory
            .register(SessionEntry::new(client.clone(), session));
        advance(client.id(), &mut state, SessionState::Active);
        client.send(OutboundEvent::success(client.username()));
        let relay = self.relay.attach_messages(client, messages);
        tokio::spawn(end_on_backend_loss(
            self.directory.clone(),
            client.id(),
            relay,
        ));

        tracing::info!(
            connection_id = %client.id(),
            username = %client.username(),
            "Session active"
        );
        Ok(account)
    }

    /// Tears down the session of `connection`.
    ///
    /// Returns true when this call performed the teardown, false when there
    /// was no active session (never opened, or already closed).
    pub async fn close(&self, connection: &ConnectionId) -> bool {
        let Some(entry) = self.directory.remove(connection) else {
            tracing::debug!(connection_id = %connection, "No active session to close");
            return false;
        };
        let mut state = SessionState::Active;
        advance(*connection, &mut state, SessionState::Closing);

        if let Err(e) = self
            .bounded(entry.session.send_presence(PresenceType::Unavailable))
            .await
        {
            tracing::warn!(
                connection_id = %connection,
                error = %e,
                "Failed to announce unavailability"
            );
        }
        entry.session.disconnect().await;
        advance(*connection, &mut state, SessionState::Closed);

        tracing::info!(
            connection_id = %connection,
            username = %entry.client.username(),
            "Session closed"
        );
        true
    }

    /// Number of active sessions.
    pub fn active_sessions(&self) -> usize {
        self.directory.len()
    }

    async fn authenticate(
        &self,
        client: &ClientConnection,
        session: &Arc<dyn BackendSession>,
        state: &mut SessionState,
    ) -> Result<(), HandshakeError> {
        match self.bounded(session.login()).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_auth_failure() => {
                tracing::info!(
                    connection_id = %client.id(),
                    username = %client.username(),
                    "Login refused, provisioning account"
                );
            }
            Err(e) => return Err(HandshakeError::Login(e)),
        }

        advance(client.id(), state, SessionState::Provisioning);
        self.bounded(
            self.backend
                .create_account(client.username(), &self.settings.account_password),
        )
        .await
        .map_err(HandshakeError::Provisioning)?;
        tracing::info!(username = %client.username(), "Account created");

        advance(client.id(), state, SessionState::Authenticating);
        self.bounded(session.login())
            .await
            .map_err(HandshakeError::RetriedLogin)
    }

    async fn abort(
        &self,
        client: &ClientConnection,
        state: &mut SessionState,
        session: Option<&Arc<dyn BackendSession>>,
        error: HandshakeError,
    ) -> HandshakeError {
        tracing::warn!(
            connection_id = %client.id(),
            username = %client.username(),
            state = ?state,
            error = %error,
            "Handshake failed"
        );
        if let Some(session) = session {
            session.disconnect().await;
        }
        advance(client.id(), state, SessionState::Closed);
        client.send(OutboundEvent::Failure);
        client.close();
        error
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        let limit = self.settings.handshake_timeout;
        tokio::time::timeout(limit, operation)
            .await
            .unwrap_or(Err(BackendError::Timeout(limit)))
    }
}

/// Tears a session down once its direct-message queue ends while the
/// client is still attached. A regular close removes the entry first, so
/// only a backend-side loss gets past the directory.
async fn end_on_backend_loss(
    directory: Arc<dyn ConnectionDirectory>,
    connection: ConnectionId,
    relay: JoinHandle<RelayEnd>,
) {
    match relay.await {
        Ok(RelayEnd::ClientGone) => return,
        Ok(RelayEnd::SourceEnded) => {}
        Err(e) => {
            tracing::error!(connection_id = %connection, error = %e, "Message relay failed");
        }
    }
    let Some(entry) = directory.remove(&connection) else {
        return;
    };

    let mut state = SessionState::Active;
    advance(connection, &mut state, SessionState::Closing);
    tracing::warn!(
        connection_id = %connection,
        username = %entry.client.username(),
        "Backend session lost"
    );
    entry.session.disconnect().await;
    advance(connection, &mut state, SessionState::Closed);
    entry.client.send(OutboundEvent::Failure);
    entry.client.close();
}

fn advance(connection: ConnectionId, state: &mut SessionState, target: SessionState) {
    match state.transition_to(target) {
        Ok(next) => {
            tracing::debug!(connection_id = %connection, from = ?state, to = ?next, "Session state changed");
            *state = next;
        }
        Err(e) => {
            tracing::error!(connection_id = %connection, error = %e, "Illegal session state change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use secrecy::SecretString;
    use tokio::sync::mpsc;

    use crate::adapters::directory::InMemoryConnectionDirectory;
    use crate::adapters::xmpp::{BackendCall, MockMessagingBackend, MockOp};
    use crate::domain::bridge::Username;
    use crate::ports::ClientSignal;

    struct Fixture {
        backend: MockMessagingBackend,
        directory: Arc<InMemoryConnectionDirectory>,
        controller: SessionLifecycleController,
    }

    fn fixture(backend: MockMessagingBackend) -> Fixture {
        let directory = Arc::new(InMemoryConnectionDirectory::new());
        let settings = BridgeSettings::new(
            "example.com",
            "conference.example.com",
            SecretString::new("pw".to_string()),
        )
        .with_handshake_timeout(Duration::from_millis(200));
        let controller = SessionLifecycleController::new(
            Arc::new(backend.clone()),
            directory.clone(),
            EventRelay::new(),
            Arc::new(settings),
        );
        Fixture {
            backend,
            directory,
            controller,
        }
    }

    fn client(name: &str) -> (ClientConnection, mpsc::UnboundedReceiver<ClientSignal>) {
        ClientConnection::new(ConnectionId::new(), Username::new(name).unwrap())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ClientSignal>) -> Vec<ClientSignal> {
        let mut signals = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            signals.push(signal);
        }
        signals
    }

    #[tokio::test]
    async fn existing_account_becomes_active_without_provisioning() {
        let f = fixture(MockMessagingBackend::new().with_account("alice"));
        let (client, mut rx) = client("alice");

        let account = f.controller.open(&client).await.unwrap();

        assert_eq!(account.to_string(), "alice@example.com");
        assert!(f.directory.lookup(&client.id()).is_some());
        assert_eq!(f.backend.count(|c| matches!(c, BackendCall::CreateAccount(_))), 0);
        assert_eq!(
            drain(&mut rx),
            vec![ClientSignal::Event(OutboundEvent::Success {
                to: "alice".to_string()
            })]
        );
    }

    #[tokio::test]
    async fn missing_account_is_provisioned_exactly_once() {
        let f = fixture(MockMessagingBackend::new());
        let (client, mut rx) = client("carol");

        f.controller.open(&client).await.unwrap();

        assert_eq!(f.backend.count(|c| matches!(c, BackendCall::CreateAccount(_))), 1);
        assert_eq!(f.backend.count(|c| matches!(c, BackendCall::Login(_))), 2);
        assert!(f.backend.has_account("carol"));
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ClientSignal::Event(OutboundEvent::Success { .. })]
        ));
    }

    #[tokio::test]
    async fn provisioning_failure_closes_client_without_registering() {
        let backend = MockMessagingBackend::new();
        backend.fail(MockOp::CreateAccount);
        let f = fixture(backend);
        let (client, mut rx) = client("dave");

        let err = f.controller.open(&client).await.unwrap_err();

        assert!(matches!(err, HandshakeError::Provisioning(_)));
        assert!(f.directory.is_empty());
        assert_eq!(
            drain(&mut rx),
            vec![ClientSignal::Event(OutboundEvent::Failure), ClientSignal::Close]
        );
        assert_eq!(f.backend.count(|c| matches!(c, BackendCall::Disconnect(_))), 1);
    }

    #[tokio::test]
    async fn non_auth_login_error_skips_provisioning() {
        let backend = MockMessagingBackend::new();
        backend.fail(MockOp::Login);
        let f = fixture(backend.clone());
        let (client, _rx) = client("erin");

        let err = f.controller.open(&client).await.unwrap_err();

        assert!(matches!(err, HandshakeError::Login(BackendError::Rejected { .. })));
        assert_eq!(backend.count(|c| matches!(c, BackendCall::CreateAccount(_))), 0);
    }

    #[tokio::test]
    async fn refusal_after_provisioning_ends_handshake() {
        let backend = MockMessagingBackend::new();
        backend.lock_account("ghost");
        let f = fixture(backend.clone());
        let (client, mut rx) = client("ghost");

        let err = f.controller.open(&client).await.unwrap_err();

        assert!(matches!(err, HandshakeError::RetriedLogin(_)));
        assert_eq!(backend.count(|c| matches!(c, BackendCall::CreateAccount(_))), 1);
        assert_eq!(backend.count(|c| matches!(c, BackendCall::Login(_))), 2);
        assert!(f.directory.is_empty());
        assert_eq!(
            drain(&mut rx),
            vec![ClientSignal::Event(OutboundEvent::Failure), ClientSignal::Close]
        );
    }

    #[tokio::test]
    async fn unreachable_backend_fails_handshake() {
        let backend = MockMessagingBackend::new();
        backend.fail(MockOp::Connect);
        let f = fixture(backend);
        let (client, mut rx) = client("alice");

        let err = f.controller.open(&client).await.unwrap_err();

        assert!(matches!(err, HandshakeError::Connect(BackendError::Unreachable(_))));
        assert_eq!(
            drain(&mut rx),
            vec![ClientSignal::Event(OutboundEvent::Failure), ClientSignal::Close]
        );
    }

    #[tokio::test]
    async fn hanging_login_times_out() {
        let backend = MockMessagingBackend::new().with_account("alice");
        backend.hang(MockOp::Login);
        let f = fixture(backend);
        let (client, _rx) = client("alice");

        let err = f.controller.open(&client).await.unwrap_err();

        assert!(matches!(err, HandshakeError::Login(BackendError::Timeout(_))));
        assert!(f.directory.is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_sends_presence_once() {
        let f = fixture(MockMessagingBackend::new().with_account("alice"));
        let (client, _rx) = client("alice");
        f.controller.open(&client).await.unwrap();

        assert!(f.controller.close(&client.id()).await);
        assert!(!f.controller.close(&client.id()).await);

        assert!(f.directory.is_empty());
        assert_eq!(
            f.backend.count(|c| matches!(
                c,
                BackendCall::Presence {
                    presence: PresenceType::Unavailable,
                    ..
                }
            )),
            1
        );
        assert_eq!(f.backend.count(|c| matches!(c, BackendCall::Disconnect(_))), 1);
    }

    #[tokio::test]
    async fn close_without_session_does_nothing() {
        let f = fixture(MockMessagingBackend::new());
        assert!(!f.controller.close(&ConnectionId::new()).await);
        assert!(f.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn presence_failure_does_not_block_disconnect() {
        let backend = MockMessagingBackend::new().with_account("alice");
        let f = fixture(backend.clone());
        let (client, _rx) = client("alice");
        f.controller.open(&client).await.unwrap();
        backend.fail(MockOp::Presence);

        assert!(f.controller.close(&client.id()).await);
        assert_eq!(backend.count(|c| matches!(c, BackendCall::Disconnect(_))), 1);
    }

    #[tokio::test]
    async fn incoming_messages_reach_client_once_active() {
        let backend = MockMessagingBackend::new().with_account("alice");
        let f = fixture(backend.clone());
        let (client, mut rx) = client("alice");
        f.controller.open(&client).await.unwrap();
        drain(&mut rx);

        assert!(backend.deliver(
            &Jid::bare("bob", "example.com"),
            &Jid::bare("alice", "example.com"),
            "hello"
        ));

        let signal = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            signal,
            ClientSignal::Event(OutboundEvent::PersonalMessage {
                from: "bob".to_string(),
                to: "alice".to_string(),
                content: "hello".to_string(),
            })
        );
    }
}
