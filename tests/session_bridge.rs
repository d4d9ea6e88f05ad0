//! Integration tests for the session bridge.
//!
//! Drives `SessionBridge` the way the WebSocket adapter does, against the
//! in-memory messaging backend:
//! 1. Open handshake (connect, login, provision once)
//! 2. Command dispatch while active
//! 3. Relay of backend traffic to the right client
//! 4. Teardown

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::mpsc::UnboundedReceiver;

use xmpp_ws_bridge::adapters::directory::InMemoryConnectionDirectory;
use xmpp_ws_bridge::adapters::xmpp::{BackendCall, MockMessagingBackend, MockOp};
use xmpp_ws_bridge::application::{
    BridgeSettings, CommandFailurePolicy, DispatchOutcome, SessionBridge,
};
use xmpp_ws_bridge::domain::bridge::{
    InboundCommand, Jid, OutboundEvent, RoomConfig, RoomName, Username,
};
use xmpp_ws_bridge::domain::foundation::ConnectionId;
use xmpp_ws_bridge::ports::{BackendError, ClientConnection, ClientSignal, ConnectionDirectory};

// =============================================================================
// Test Infrastructure
// =============================================================================

const USER_DOMAIN: &str = "example.com";
const ROOM_DOMAIN: &str = "conference.example.com";

struct Harness {
    backend: MockMessagingBackend,
    directory: Arc<InMemoryConnectionDirectory>,
    bridge: SessionBridge,
}

impl Harness {
    fn new(backend: MockMessagingBackend) -> Self {
        Self::with_settings(backend, settings())
    }

    fn with_settings(backend: MockMessagingBackend, settings: BridgeSettings) -> Self {
        let directory = Arc::new(InMemoryConnectionDirectory::new());
        let bridge = SessionBridge::new(Arc::new(backend.clone()), directory.clone(), settings);
        Self {
            backend,
            directory,
            bridge,
        }
    }

    /// Opens a connection and consumes its handshake outcome.
    async fn open(&self, name: &str) -> (ClientConnection, UnboundedReceiver<ClientSignal>) {
        let (client, mut rx) = client(name);
        self.bridge.open(&client).await.unwrap();
        assert_eq!(next_event(&mut rx).await, OutboundEvent::success(client.username()));
        (client, rx)
    }

    fn count(&self, predicate: impl Fn(&BackendCall) -> bool) -> usize {
        self.backend.count(predicate)
    }
}

fn settings() -> BridgeSettings {
    BridgeSettings::new(
        USER_DOMAIN,
        ROOM_DOMAIN,
        SecretString::new("placeholder".to_string()),
    )
    .with_handshake_timeout(Duration::from_millis(500))
}

fn client(name: &str) -> (ClientConnection, UnboundedReceiver<ClientSignal>) {
    ClientConnection::new(ConnectionId::new(), Username::new(name).unwrap())
}

fn account(name: &str) -> Jid {
    Username::new(name).unwrap().at(USER_DOMAIN)
}

fn room_jid(name: &str) -> Jid {
    RoomName::new(name).unwrap().at(ROOM_DOMAIN)
}

fn room(name: &str) -> RoomName {
    RoomName::new(name).unwrap()
}

async fn next_signal(rx: &mut UnboundedReceiver<ClientSignal>) -> ClientSignal {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for client signal")
        .expect("client channel ended")
}

async fn next_event(rx: &mut UnboundedReceiver<ClientSignal>) -> OutboundEvent {
    match next_signal(rx).await {
        ClientSignal::Event(event) => event,
        other => panic!("expected event, got {:?}", other),
    }
}

/// Gives relay tasks a moment, then checks nothing arrived.
async fn assert_quiet(rx: &mut UnboundedReceiver<ClientSignal>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "unexpected client signal");
}

// =============================================================================
// Open handshake
// =============================================================================

#[tokio::test]
async fn first_connection_provisions_account_and_succeeds() {
    let harness = Harness::new(MockMessagingBackend::new());
    let (alice, mut rx) = client("alice");

    let jid = harness.bridge.open(&alice).await.unwrap();

    assert_eq!(jid, account("alice"));
    assert_eq!(
        next_event(&mut rx).await,
        OutboundEvent::Success {
            to: "alice".to_string()
        }
    );
    assert_quiet(&mut rx).await;

    assert_eq!(harness.directory.len(), 1);
    let entry = harness.directory.lookup(&alice.id()).unwrap();
    assert_eq!(entry.client.username().as_str(), "alice");

    assert_eq!(harness.count(|c| matches!(c, BackendCall::CreateAccount(_))), 1);
    assert_eq!(harness.count(|c| matches!(c, BackendCall::Login(_))), 2);
    assert!(harness.backend.has_account("alice"));
}

#[tokio::test]
async fn existing_account_is_never_provisioned() {
    let harness = Harness::new(MockMessagingBackend::new().with_account("alice"));

    harness.open("alice").await;

    assert_eq!(harness.count(|c| matches!(c, BackendCall::CreateAccount(_))), 0);
    assert_eq!(harness.count(|c| matches!(c, BackendCall::Login(_))), 1);
}

#[tokio::test]
async fn reconnecting_user_reuses_provisioned_account() {
    let harness = Harness::new(MockMessagingBackend::new());

    let (first, _rx) = harness.open("alice").await;
    harness.bridge.close(&first.id()).await;
    let (second, _rx) = harness.open("alice").await;

    assert_ne!(first.id(), second.id());
    assert_eq!(harness.count(|c| matches!(c, BackendCall::CreateAccount(_))), 1);
    assert_eq!(harness.count(|c| matches!(c, BackendCall::Login(_))), 3);
    assert_eq!(harness.directory.len(), 1);
}

#[tokio::test]
async fn unreachable_backend_fails_and_closes_client() {
    let backend = MockMessagingBackend::new().with_account("alice");
    backend.fail(MockOp::Connect);
    let harness = Harness::new(backend);
    let (alice, mut rx) = client("alice");

    assert!(harness.bridge.open(&alice).await.is_err());

    assert_eq!(next_event(&mut rx).await, OutboundEvent::Failure);
    assert_eq!(next_signal(&mut rx).await, ClientSignal::Close);
    assert!(harness.directory.is_empty());
    assert_eq!(harness.bridge.active_sessions(), 0);
}

#[tokio::test]
async fn provisioning_failure_fails_handshake() {
    let backend = MockMessagingBackend::new();
    backend.fail(MockOp::CreateAccount);
    let harness = Harness::new(backend);
    let (alice, mut rx) = client("alice");

    assert!(harness.bridge.open(&alice).await.is_err());

    assert_eq!(next_event(&mut rx).await, OutboundEvent::Failure);
    assert_eq!(next_signal(&mut rx).await, ClientSignal::Close);
    assert!(harness.directory.is_empty());
    assert_eq!(harness.count(|c| matches!(c, BackendCall::Login(_))), 1);
    assert_eq!(harness.count(|c| matches!(c, BackendCall::Disconnect(_))), 1);
}

#[tokio::test]
async fn mixed_case_username_opens_lowercase_account() {
    let harness = Harness::new(MockMessagingBackend::new().with_account("alice"));
    let (alice, mut rx) = client("Alice");

    let jid = harness.bridge.open(&alice).await.unwrap();

    assert_eq!(jid.to_string(), "alice@example.com");
    assert_eq!(
        next_event(&mut rx).await,
        OutboundEvent::Success {
            to: "alice".to_string()
        }
    );
    assert_eq!(harness.count(|c| matches!(c, BackendCall::CreateAccount(_))), 0);
}

#[tokio::test]
async fn handshake_error_exposes_backend_cause() {
    let backend = MockMessagingBackend::new().with_account("alice");
    backend.fail(MockOp::Connect);
    let harness = Harness::new(backend.clone());
    let (alice, _rx) = client("alice");

    let err = harness.bridge.open(&alice).await.unwrap_err();
    assert!(matches!(err.backend_error(), BackendError::Unreachable(_)));

    backend.succeed(MockOp::Connect);
    harness.open("alice").await;
    assert_eq!(harness.directory.len(), 1);
}

// =============================================================================
// Command dispatch
// =============================================================================

#[tokio::test]
async fn personal_message_is_sent_without_client_echo() {
    let harness = Harness::new(MockMessagingBackend::new().with_account("alice"));
    let (alice, mut rx) = harness.open("alice").await;

    let outcome = harness
        .bridge
        .dispatch(
            &alice.id(),
            InboundCommand::PersonalMessage {
                to: Username::new("bob").unwrap(),
                content: "hi".to_string(),
            },
        )
        .await;

    assert_eq!(outcome, DispatchOutcome::Dispatched);
    assert_eq!(
        harness.count(|c| matches!(
            c,
            BackendCall::SendMessage { to, body, .. } if *to == account("bob") && body == "hi"
        )),
        1
    );
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn incoming_message_reaches_only_its_recipient() {
    let harness = Harness::new(
        MockMessagingBackend::new()
            .with_account("alice")
            .with_account("carol"),
    );
    let (_alice, mut alice_rx) = harness.open("alice").await;
    let (_carol, mut carol_rx) = harness.open("carol").await;

    assert!(harness
        .backend
        .deliver(&account("bob"), &account("alice"), "are you there?"));

    assert_eq!(
        next_event(&mut alice_rx).await,
        OutboundEvent::PersonalMessage {
            from: "bob".to_string(),
            to: "alice".to_string(),
            content: "are you there?".to_string(),
        }
    );
    assert_quiet(&mut carol_rx).await;
}

#[tokio::test]
async fn bridged_users_can_chat_with_each_other() {
    let harness = Harness::new(MockMessagingBackend::new());
    let (alice, mut alice_rx) = harness.open("alice").await;
    let (_bob, mut bob_rx) = harness.open("bob").await;

    harness
        .bridge
        .dispatch(
            &alice.id(),
            InboundCommand::PersonalMessage {
                to: Username::new("bob").unwrap(),
                content: "lunch?".to_string(),
            },
        )
        .await;

    assert_eq!(
        next_event(&mut bob_rx).await,
        OutboundEvent::PersonalMessage {
            from: "alice".to_string(),
            to: "bob".to_string(),
            content: "lunch?".to_string(),
        }
    );
    assert_quiet(&mut alice_rx).await;
}

#[tokio::test]
async fn room_lifecycle_create_talk_destroy() {
    let harness = Harness::new(
        MockMessagingBackend::new()
            .with_account("alice")
            .with_account("bob"),
    );
    let (alice, mut alice_rx) = harness.open("alice").await;
    let (bob, mut bob_rx) = harness.open("bob").await;

    let created = harness
        .bridge
        .dispatch(&alice.id(), InboundCommand::CreateRoom { room: room("team") })
        .await;
    assert_eq!(created, DispatchOutcome::Dispatched);
    assert!(harness.backend.room_exists(&room_jid("team")));

    let joined = harness
        .bridge
        .dispatch(&bob.id(), InboundCommand::JoinRoom { room: room("team") })
        .await;
    assert_eq!(joined, DispatchOutcome::Dispatched);

    harness
        .bridge
        .dispatch(
            &alice.id(),
            InboundCommand::RoomMessage {
                room: room("team"),
                content: "standup".to_string(),
            },
        )
        .await;

    let expected = OutboundEvent::RoomMessage {
        from: "alice".to_string(),
        to: "team".to_string(),
        content: "standup".to_string(),
    };
    assert_eq!(next_event(&mut bob_rx).await, expected);
    assert_eq!(next_event(&mut alice_rx).await, expected);

    let destroyed = harness
        .bridge
        .dispatch(&alice.id(), InboundCommand::DestroyRoom { room: room("team") })
        .await;
    assert_eq!(destroyed, DispatchOutcome::Dispatched);
    assert!(!harness.backend.room_exists(&room_jid("team")));

    let calls: Vec<_> = harness
        .backend
        .calls()
        .into_iter()
        .filter(|c| {
            matches!(
                c,
                BackendCall::CreateRoom { .. }
                    | BackendCall::ConfigureRoom { .. }
                    | BackendCall::JoinRoom { .. }
                    | BackendCall::DestroyRoom { .. }
            )
        })
        .collect();
    assert!(matches!(calls[0], BackendCall::CreateRoom { .. }));
    assert!(matches!(
        &calls[1],
        BackendCall::ConfigureRoom { config, .. } if config.max_occupants == 100
    ));
    assert!(matches!(&calls[2], BackendCall::JoinRoom { by, .. } if *by == account("alice")));
    assert!(matches!(&calls[3], BackendCall::JoinRoom { by, .. } if *by == account("bob")));
    assert!(matches!(
        &calls[4],
        BackendCall::DestroyRoom { reason, .. } if reason == "The owner left"
    ));
}

#[tokio::test]
async fn room_names_match_regardless_of_case() {
    let harness = Harness::new(
        MockMessagingBackend::new()
            .with_account("alice")
            .with_account("bob"),
    );
    let (alice, _alice_rx) = harness.open("alice").await;
    let (bob, mut bob_rx) = harness.open("bob").await;

    harness
        .bridge
        .dispatch(&alice.id(), InboundCommand::CreateRoom { room: room("Team") })
        .await;
    let joined = harness
        .bridge
        .dispatch(&bob.id(), InboundCommand::JoinRoom { room: room("team") })
        .await;
    assert_eq!(joined, DispatchOutcome::Dispatched);
    assert!(harness.backend.room_exists(&room_jid("TEAM")));

    harness
        .bridge
        .dispatch(
            &alice.id(),
            InboundCommand::RoomMessage {
                room: room("TEAM"),
                content: "hi".to_string(),
            },
        )
        .await;

    assert_eq!(
        next_event(&mut bob_rx).await,
        OutboundEvent::RoomMessage {
            from: "alice".to_string(),
            to: "team".to_string(),
            content: "hi".to_string(),
        }
    );
}

#[tokio::test]
async fn created_rooms_use_configured_settings() {
    let config = RoomConfig {
        max_occupants: 25,
        persistent: true,
    };
    let harness = Harness::with_settings(
        MockMessagingBackend::new().with_account("alice"),
        settings().with_room_config(config),
    );
    let (alice, _rx) = harness.open("alice").await;

    harness
        .bridge
        .dispatch(&alice.id(), InboundCommand::CreateRoom { room: room("team") })
        .await;

    assert_eq!(
        harness.count(|c| matches!(c, BackendCall::ConfigureRoom { config: applied, .. } if *applied == config)),
        1
    );
}

#[tokio::test]
async fn joining_destroyed_room_fails_silently() {
    let harness = Harness::new(
        MockMessagingBackend::new()
            .with_account("alice")
            .with_account("bob"),
    );
    let (alice, _alice_rx) = harness.open("alice").await;
    let (bob, mut bob_rx) = harness.open("bob").await;

    harness
        .bridge
        .dispatch(&alice.id(), InboundCommand::CreateRoom { room: room("team") })
        .await;
    harness
        .bridge
        .dispatch(&alice.id(), InboundCommand::DestroyRoom { room: room("team") })
        .await;

    let outcome = harness
        .bridge
        .dispatch(&bob.id(), InboundCommand::JoinRoom { room: room("team") })
        .await;

    assert!(matches!(outcome, DispatchOutcome::Failed(_)));
    assert_quiet(&mut bob_rx).await;
    assert!(harness.directory.lookup(&bob.id()).is_some());
}

#[tokio::test]
async fn surfaced_failures_emit_one_failure_event() {
    let harness = Harness::with_settings(
        MockMessagingBackend::new().with_account("bob"),
        settings().with_failure_policy(CommandFailurePolicy::Surface),
    );
    let (bob, mut bob_rx) = harness.open("bob").await;

    let outcome = harness
        .bridge
        .dispatch(&bob.id(), InboundCommand::JoinRoom { room: room("nowhere") })
        .await;

    assert!(matches!(outcome, DispatchOutcome::Failed(_)));
    assert_eq!(next_event(&mut bob_rx).await, OutboundEvent::Failure);
    assert_quiet(&mut bob_rx).await;
}

#[tokio::test]
async fn commands_without_session_touch_nothing() {
    let harness = Harness::new(MockMessagingBackend::new().with_account("alice"));
    let before = harness.backend.calls().len();

    let commands = vec![
        InboundCommand::PersonalMessage {
            to: Username::new("bob").unwrap(),
            content: "hi".to_string(),
        },
        InboundCommand::CreateRoom { room: room("team") },
        InboundCommand::Logout,
    ];
    for command in commands {
        let outcome = harness.bridge.dispatch(&ConnectionId::new(), command).await;
        assert_eq!(outcome, DispatchOutcome::Dropped);
    }

    assert_eq!(harness.backend.calls().len(), before);
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn logout_tears_down_and_closes_client() {
    let harness = Harness::new(MockMessagingBackend::new().with_account("alice"));
    let (alice, mut rx) = harness.open("alice").await;

    let outcome = harness.bridge.dispatch(&alice.id(), InboundCommand::Logout).await;

    assert_eq!(outcome, DispatchOutcome::LoggedOut);
    assert_eq!(next_signal(&mut rx).await, ClientSignal::Close);
    assert!(harness.directory.is_empty());
    assert_eq!(harness.count(|c| matches!(c, BackendCall::Disconnect(_))), 1);

    // The transport's own close after the socket ends is a no-op.
    assert!(!harness.bridge.close(&alice.id()).await);
    assert_eq!(harness.count(|c| matches!(c, BackendCall::Disconnect(_))), 1);
}

#[tokio::test]
async fn close_is_idempotent_and_announces_unavailability() {
    let harness = Harness::new(MockMessagingBackend::new().with_account("alice"));
    let (alice, _rx) = harness.open("alice").await;

    assert!(harness.bridge.close(&alice.id()).await);
    assert!(!harness.bridge.close(&alice.id()).await);

    assert_eq!(harness.count(|c| matches!(c, BackendCall::Disconnect(_))), 1);
    assert_eq!(harness.count(|c| matches!(c, BackendCall::Presence { .. })), 1);
    assert!(harness.directory.is_empty());
}

#[tokio::test]
async fn concurrent_closes_disconnect_once() {
    let harness = Harness::new(MockMessagingBackend::new().with_account("alice"));
    let (alice, _rx) = harness.open("alice").await;
    let id = alice.id();

    let (first, second) = tokio::join!(harness.bridge.close(&id), harness.bridge.close(&id));

    assert!(first ^ second);
    assert_eq!(harness.count(|c| matches!(c, BackendCall::Disconnect(_))), 1);
}

#[tokio::test]
async fn teardown_completes_when_presence_fails() {
    let backend = MockMessagingBackend::new().with_account("alice");
    let harness = Harness::new(backend.clone());
    let (alice, _rx) = harness.open("alice").await;
    backend.fail(MockOp::Presence);

    assert!(harness.bridge.close(&alice.id()).await);

    assert_eq!(harness.count(|c| matches!(c, BackendCall::Disconnect(_))), 1);
    assert!(harness.directory.is_empty());
}

#[tokio::test]
async fn backend_loss_fails_and_closes_client() {
    let harness = Harness::new(MockMessagingBackend::new().with_account("alice"));
    let (alice, mut rx) = harness.open("alice").await;

    harness.backend.sever("alice");

    assert_eq!(next_event(&mut rx).await, OutboundEvent::Failure);
    assert_eq!(next_signal(&mut rx).await, ClientSignal::Close);
    assert!(harness.directory.is_empty());
    assert_eq!(harness.count(|c| matches!(c, BackendCall::Disconnect(_))), 1);

    // The transport's close once the socket ends finds nothing left.
    assert!(!harness.bridge.close(&alice.id()).await);
    assert_eq!(harness.count(|c| matches!(c, BackendCall::Disconnect(_))), 1);
}

#[tokio::test]
async fn backend_loss_leaves_other_sessions_active() {
    let harness = Harness::new(
        MockMessagingBackend::new()
            .with_account("alice")
            .with_account("bob"),
    );
    let (_alice, mut alice_rx) = harness.open("alice").await;
    let (bob, _bob_rx) = harness.open("bob").await;

    harness.backend.sever("alice");
    assert_eq!(next_event(&mut alice_rx).await, OutboundEvent::Failure);

    assert_eq!(harness.directory.len(), 1);
    assert!(harness.directory.lookup(&bob.id()).is_some());
}

#[tokio::test]
async fn closed_connection_stops_receiving() {
    let harness = Harness::new(MockMessagingBackend::new().with_account("alice"));
    let (alice, mut rx) = harness.open("alice").await;

    harness.bridge.close(&alice.id()).await;

    assert!(!harness
        .backend
        .deliver(&account("bob"), &account("alice"), "late"));
    assert_quiet(&mut rx).await;
}
