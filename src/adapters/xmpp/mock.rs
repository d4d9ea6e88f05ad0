//! In-process messaging backend for tests.
//!
//! Simulates accounts, one-to-one delivery and rooms in memory and records
//! every call so tests can assert exactly which backend operations ran.
//!
//! # Example
//!
//! ```ignore
//! let backend = MockMessagingBackend::new().with_account("bob");
//! backend.fail(MockOp::ConfigureRoom);
//!
//! // ... drive the bridge ...
//!
//! assert_eq!(backend.count(|c| matches!(c, BackendCall::CreateAccount(_))), 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::SecretString;
use tokio::sync::mpsc;

use crate::domain::bridge::{Jid, PresenceType, RoomConfig, Username};
use crate::ports::{BackendError, BackendSession, IncomingKind, IncomingMessage, MessagingBackend};

const SUBSCRIPTION_CAPACITY: usize = 64;

/// Operations whose outcome can be scripted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Connect,
    Login,
    CreateAccount,
    SendMessage,
    SendRoomMessage,
    CreateRoom,
    ConfigureRoom,
    JoinRoom,
    LeaveRoom,
    DestroyRoom,
    Presence,
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Connect(Jid),
    Login(Jid),
    CreateAccount(String),
    SendMessage { from: Jid, to: Jid, body: String },
    SendRoomMessage { from: Jid, room: Jid, body: String },
    CreateRoom { by: Jid, room: Jid },
    ConfigureRoom { by: Jid, room: Jid, config: RoomConfig },
    JoinRoom { by: Jid, room: Jid },
    LeaveRoom { by: Jid, room: Jid },
    DestroyRoom { by: Jid, room: Jid, reason: String },
    Presence { by: Jid, presence: PresenceType },
    Disconnect(Jid),
}

#[derive(Default)]
struct MockState {
    accounts: HashSet<String>,
    locked: HashSet<String>,
    calls: Vec<BackendCall>,
    failing: HashSet<MockOp>,
    hanging: HashSet<MockOp>,
    rooms: HashSet<Jid>,
    occupants: HashMap<Jid, HashSet<Jid>>,
    chat_subscribers: HashMap<Jid, mpsc::Sender<IncomingMessage>>,
    room_subscribers: HashMap<(Jid, Jid), mpsc::Sender<IncomingMessage>>,
    severed: HashSet<String>,
}

impl MockState {
    fn check(&self, op: MockOp) -> Result<(), BackendError> {
        if self.failing.contains(&op) {
            Err(BackendError::rejected(format!("scripted failure: {:?}", op)))
        } else {
            Ok(())
        }
    }

    fn evict(&mut self, room: &Jid, account: &Jid) {
        if let Some(occupants) = self.occupants.get_mut(room) {
            occupants.remove(account);
        }
        self.room_subscribers.remove(&(room.clone(), account.clone()));
    }
}

/// Scriptable in-memory [`MessagingBackend`].
#[derive(Clone, Default)]
pub struct MockMessagingBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockMessagingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an existing account (by localpart).
    pub fn with_account(self, username: &str) -> Self {
        self.state.lock().accounts.insert(username.to_string());
        self
    }

    /// Adds an existing room.
    pub fn with_room(self, room: Jid) -> Self {
        self.state.lock().rooms.insert(room);
        self
    }

    /// Refuses every login of `username` with an authentication failure,
    /// even after the account was created.
    pub fn lock_account(&self, username: &str) {
        self.state.lock().locked.insert(username.to_string());
    }

    /// Makes every future call of `op` fail.
    pub fn fail(&self, op: MockOp) {
        self.state.lock().failing.insert(op);
    }

    /// Restores normal behaviour for `op`.
    pub fn succeed(&self, op: MockOp) {
        self.state.lock().failing.remove(&op);
    }

    /// Drops the server side of every open session of `username`, the way a
    /// lost stream would: its sessions turn dead and their queues end.
    pub fn sever(&self, username: &str) {
        let mut state = self.state.lock();
        state.severed.insert(username.to_string());
        let accounts: Vec<Jid> = state
            .chat_subscribers
            .keys()
            .filter(|account| account.local() == Some(username))
            .cloned()
            .collect();
        for account in accounts {
            state.chat_subscribers.remove(&account);
            let rooms: Vec<Jid> = state.occupants.keys().cloned().collect();
            for room in rooms {
                state.evict(&room, &account);
            }
        }
    }

    /// Makes every future call of `op` wait forever (for timeout tests).
    pub fn hang(&self, op: MockOp) {
        self.state.lock().hanging.insert(op);
    }

    pub fn has_account(&self, username: &str) -> bool {
        self.state.lock().accounts.contains(username)
    }

    pub fn room_exists(&self, room: &Jid) -> bool {
        self.state.lock().rooms.contains(room)
    }

    /// All calls recorded so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&BackendCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Delivers a one-to-one message from outside the bridge.
    ///
    /// Returns false if `to` has no live subscriber.
    pub fn deliver(&self, from: &Jid, to: &Jid, body: &str) -> bool {
        let state = self.state.lock();
        match state.chat_subscribers.get(&to.to_bare()) {
            Some(tx) => tx
                .try_send(IncomingMessage {
                    kind: IncomingKind::Direct,
                    from: from.clone(),
                    to: to.to_bare(),
                    body: body.to_string(),
                })
                .is_ok(),
            None => false,
        }
    }

    async fn gate(&self, op: MockOp) -> Result<(), BackendError> {
        let hang = {
            let state = self.state.lock();
            state.check(op)?;
            state.hanging.contains(&op)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingBackend for MockMessagingBackend {
    async fn connect(
        &self,
        account: &Jid,
        _password: &SecretString,
    ) -> Result<Arc<dyn BackendSession>, BackendError> {
        self.state.lock().calls.push(BackendCall::Connect(account.clone()));
        self.gate(MockOp::Connect)
            .await
            .map_err(|_| BackendError::Unreachable("scripted connect failure".to_string()))?;
        if let Some(local) = account.local() {
            self.state.lock().severed.remove(local);
        }

        Ok(Arc::new(MockSession {
            account: account.to_bare(),
            backend: self.clone(),
            live: AtomicBool::new(true),
        }))
    }

    async fn create_account(
        &self,
        username: &Username,
        _password: &SecretString,
    ) -> Result<(), BackendError> {
        self.state
            .lock()
            .calls
            .push(BackendCall::CreateAccount(username.as_str().to_string()));
        self.gate(MockOp::CreateAccount).await.map_err(|e| {
            BackendError::AccountCreationFailed {
                username: username.as_str().to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut state = self.state.lock();
        if !state.accounts.insert(username.as_str().to_string()) {
            return Err(BackendError::AccountCreationFailed {
                username: username.as_str().to_string(),
                reason: "conflict".to_string(),
            });
        }
        Ok(())
    }
}

/// Session handed out by [`MockMessagingBackend`].
pub struct MockSession {
    account: Jid,
    backend: MockMessagingBackend,
    live: AtomicBool,
}

impl MockSession {
    fn ensure_live(&self) -> Result<(), BackendError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(BackendError::NotConnected)
        }
    }

    fn record(&self, call: BackendCall) {
        self.backend.state.lock().calls.push(call);
    }
}

#[async_trait]
impl BackendSession for MockSession {
    fn account(&self) -> &Jid {
        &self.account
    }

    fn is_live(&self) -> bool {
        let local = self.account.local().unwrap_or_default();
        self.live.load(Ordering::SeqCst) && !self.backend.state.lock().severed.contains(local)
    }

    fn joined_rooms(&self) -> Vec<Jid> {
        let state = self.backend.state.lock();
        state
            .occupants
            .iter()
            .filter(|(_, members)| members.contains(&self.account))
            .map(|(room, _)| room.clone())
            .collect()
    }

    async fn login(&self) -> Result<(), BackendError> {
        self.record(BackendCall::Login(self.account.clone()));
        self.ensure_live()?;
        self.backend.gate(MockOp::Login).await?;

        let state = self.backend.state.lock();
        let local = self.account.local().unwrap_or_default();
        if state.accounts.contains(local) && !state.locked.contains(local) {
            Ok(())
        } else {
            Err(BackendError::AuthenticationFailed(self.account.to_string()))
        }
    }

    async fn send_message(&self, to: &Jid, body: &str) -> Result<(), BackendError> {
        self.record(BackendCall::SendMessage {
            from: self.account.clone(),
            to: to.clone(),
            body: body.to_string(),
        });
        self.ensure_live()?;
        self.backend.gate(MockOp::SendMessage).await?;
        self.backend.deliver(&self.account, to, body);
        Ok(())
    }

    async fn send_room_message(&self, room: &Jid, body: &str) -> Result<(), BackendError> {
        self.record(BackendCall::SendRoomMessage {
            from: self.account.clone(),
            room: room.clone(),
            body: body.to_string(),
        });
        self.ensure_live()?;
        self.backend.gate(MockOp::SendRoomMessage).await?;

        let state = self.backend.state.lock();
        let occupants = state.occupants.get(room).cloned().unwrap_or_default();
        if !occupants.contains(&self.account) {
            return Err(BackendError::rejected("not-acceptable"));
        }
        let nick = self.account.local().unwrap_or_default();
        for occupant in occupants {
            if let Some(tx) = state.room_subscribers.get(&(room.clone(), occupant.clone())) {
                let _ = tx.try_send(IncomingMessage {
                    kind: IncomingKind::Room,
                    from: room.with_resource(nick),
                    to: occupant.clone(),
                    body: body.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn create_room(&self, room: &Jid) -> Result<(), BackendError> {
        self.record(BackendCall::CreateRoom {
            by: self.account.clone(),
            room: room.clone(),
        });
        self.ensure_live()?;
        self.backend.gate(MockOp::CreateRoom).await?;

        let mut state = self.backend.state.lock();
        if !state.rooms.insert(room.clone()) {
            return Err(BackendError::rejected("conflict"));
        }
        state
            .occupants
            .entry(room.clone())
            .or_default()
            .insert(self.account.clone());
        Ok(())
    }

    async fn configure_room(&self, room: &Jid, config: &RoomConfig) -> Result<(), BackendError> {
        self.record(BackendCall::ConfigureRoom {
            by: self.account.clone(),
            room: room.clone(),
            config: *config,
        });
        self.ensure_live()?;
        self.backend.gate(MockOp::ConfigureRoom).await?;

        if self.backend.room_exists(room) {
            Ok(())
        } else {
            Err(BackendError::rejected("item-not-found"))
        }
    }

    async fn join_room(&self, room: &Jid) -> Result<(), BackendError> {
        self.record(BackendCall::JoinRoom {
            by: self.account.clone(),
            room: room.clone(),
        });
        self.ensure_live()?;
        self.backend.gate(MockOp::JoinRoom).await?;

        let mut state = self.backend.state.lock();
        if !state.rooms.contains(room) {
            return Err(BackendError::rejected("item-not-found"));
        }
        state
            .occupants
            .entry(room.clone())
            .or_default()
            .insert(self.account.clone());
        Ok(())
    }

    async fn leave_room(&self, room: &Jid) -> Result<(), BackendError> {
        self.record(BackendCall::LeaveRoom {
            by: self.account.clone(),
            room: room.clone(),
        });
        self.ensure_live()?;
        self.backend.gate(MockOp::LeaveRoom).await?;

        self.backend.state.lock().evict(room, &self.account);
        Ok(())
    }

    async fn destroy_room(&self, room: &Jid, reason: &str) -> Result<(), BackendError> {
        self.record(BackendCall::DestroyRoom {
            by: self.account.clone(),
            room: room.clone(),
            reason: reason.to_string(),
        });
        self.ensure_live()?;
        self.backend.gate(MockOp::DestroyRoom).await?;

        let mut state = self.backend.state.lock();
        if !state.rooms.remove(room) {
            return Err(BackendError::rejected("item-not-found"));
        }
        let occupants = state.occupants.remove(room).unwrap_or_default();
        for occupant in occupants {
            state.room_subscribers.remove(&(room.clone(), occupant));
        }
        Ok(())
    }

    async fn send_presence(&self, presence: PresenceType) -> Result<(), BackendError> {
        self.record(BackendCall::Presence {
            by: self.account.clone(),
            presence,
        });
        self.ensure_live()?;
        self.backend.gate(MockOp::Presence).await
    }

    async fn disconnect(&self) {
        self.record(BackendCall::Disconnect(self.account.clone()));
        if !self.live.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut state = self.backend.state.lock();
        state.chat_subscribers.remove(&self.account);
        let rooms: Vec<Jid> = state.occupants.keys().cloned().collect();
        for room in rooms {
            state.evict(&room, &self.account);
        }
    }

    fn subscribe_messages(&self) -> Result<mpsc::Receiver<IncomingMessage>, BackendError> {
        self.ensure_live()?;
        let mut state = self.backend.state.lock();
        if state.chat_subscribers.contains_key(&self.account) {
            return Err(BackendError::AlreadySubscribed(self.account.to_string()));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        state.chat_subscribers.insert(self.account.clone(), tx);
        Ok(rx)
    }

    fn subscribe_room(&self, room: &Jid) -> Result<mpsc::Receiver<IncomingMessage>, BackendError> {
        self.ensure_live()?;
        let mut state = self.backend.state.lock();
        let key = (room.clone(), self.account.clone());
        if state.room_subscribers.contains_key(&key) {
            return Err(BackendError::AlreadySubscribed(room.to_string()));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        state.room_subscribers.insert(key, tx);
        Ok(rx)
    }
}
