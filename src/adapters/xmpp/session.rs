//! XMPP client session over a plain TCP stream.
//!
//! Each session owns two background tasks:
//!
//! - a writer draining serialized stanzas into the socket, and
//! - a router reading the server stream, which hands `iq` replies to their
//!   pending requests, MUC self-presence to pending joins, messages to
//!   subscribers, and everything else (features, SASL outcome) to the
//!   handshake running in [`XmppSession::connect`] / [`XmppSession::login`].
//!
//! When the server stream ends the session turns dead: pending requests
//! fail with [`BackendError::NotConnected`] and subscriber queues end.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::XmppConfig;
use crate::domain::bridge::{Jid, PresenceType, RoomConfig};
use crate::ports::{BackendError, BackendSession, IncomingKind, IncomingMessage};

use super::stanza::{
    error_condition, form_field, muc_status_codes, ns, stream_header, Element, STREAM_FOOTER,
};
use super::stream::{StreamEvent, XmppReader};

const SUBSCRIPTION_CAPACITY: usize = 256;
const STATUS_SELF: u16 = 110;
const STATUS_CREATED: u16 = 201;

/// Where and how sessions connect.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    /// Domain named in the stream header; the domain of every account.
    pub domain: String,
    /// Prefix of the resource each session binds.
    pub resource: String,
    /// Bound on TCP connect plus stream negotiation.
    pub connect_timeout: Duration,
    /// Bound on every request awaiting a server reply.
    pub reply_timeout: Duration,
}

impl ConnectOptions {
    pub fn from_config(config: &XmppConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            domain: config.domain.clone(),
            resource: config.resource.clone(),
            connect_timeout: config.connect_timeout(),
            reply_timeout: config.reply_timeout(),
        }
    }
}

enum Outgoing {
    Data(String),
    Close,
}

/// Handshake-level input: stream openings and top-level elements that are
/// not stanzas.
enum Control {
    Opened,
    Element(Element),
}

/// State shared between the session handle and its router task.
#[derive(Default)]
struct Shared {
    live: AtomicBool,
    pending: Mutex<HashMap<String, oneshot::Sender<Element>>>,
    pending_joins: Mutex<HashMap<Jid, oneshot::Sender<Element>>>,
    joined: Mutex<HashSet<Jid>>,
    chat: Mutex<Option<mpsc::Sender<IncomingMessage>>>,
    rooms: Mutex<HashMap<Jid, mpsc::Sender<IncomingMessage>>>,
    bound: Mutex<Option<Jid>>,
}

impl Shared {
    fn shut(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.pending.lock().clear();
        self.pending_joins.lock().clear();
        self.joined.lock().clear();
        self.chat.lock().take();
        self.rooms.lock().clear();
    }

    fn forget_room(&self, room: &Jid) {
        self.joined.lock().remove(room);
        self.rooms.lock().remove(room);
    }
}

/// One XMPP client connection for one account.
pub struct XmppSession {
    account: Jid,
    password: SecretString,
    options: Arc<ConnectOptions>,
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    control: tokio::sync::Mutex<mpsc::UnboundedReceiver<Control>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    router: Mutex<Option<JoinHandle<()>>>,
    id_prefix: String,
    next_id: AtomicU64,
}

impl XmppSession {
    /// Opens the TCP connection and negotiates the initial stream.
    ///
    /// The session is not authenticated; call [`BackendSession::login`].
    pub async fn connect(
        account: Jid,
        password: SecretString,
        options: Arc<ConnectOptions>,
    ) -> Result<Self, BackendError> {
        let limit = options.connect_timeout;
        tokio::time::timeout(limit, Self::establish(account, password, options))
            .await
            .unwrap_or(Err(BackendError::Timeout(limit)))
    }

    async fn establish(
        account: Jid,
        password: SecretString,
        options: Arc<ConnectOptions>,
    ) -> Result<Self, BackendError> {
        let address = format!("{}:{}", options.host, options.port);
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|e| BackendError::Unreachable(format!("{}: {}", address, e)))?;
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared::default());
        shared.live.store(true, Ordering::SeqCst);
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(write_loop(write_half, outgoing_rx, shared.clone()));
        let router = tokio::spawn(route_loop(
            XmppReader::new(BufReader::new(read_half)),
            shared.clone(),
            outgoing.clone(),
            control_tx,
            account.clone(),
        ));

        let session = Self {
            account: account.to_bare(),
            password,
            options,
            shared,
            outgoing,
            control: tokio::sync::Mutex::new(control_rx),
            writer: Mutex::new(Some(writer)),
            router: Mutex::new(Some(router)),
            id_prefix: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
            next_id: AtomicU64::new(1),
        };

        let mut control = session.control.lock().await;
        session.send_raw(stream_header(&session.options.domain))?;
        let features = session.expect_features(&mut control).await?;
        drop(control);

        if let Some(tls) = features.get_child("starttls", Some(ns::TLS)) {
            if tls.has_child("required", None) {
                return Err(BackendError::Protocol(
                    "server requires STARTTLS on the client stream".to_string(),
                ));
            }
        }
        let offers_plain = features
            .get_child("mechanisms", Some(ns::SASL))
            .map(|m| m.children().any(|c| c.text_content() == "PLAIN"))
            .unwrap_or(false);
        if !offers_plain {
            return Err(BackendError::Protocol(
                "server does not offer SASL PLAIN".to_string(),
            ));
        }

        tracing::debug!(account = %session.account, server = %address, "XMPP stream opened");
        Ok(session)
    }

    /// Sends an `iq` and waits for its result.
    ///
    /// Replies of type `error` become [`BackendError::Rejected`] carrying the
    /// defined condition.
    pub(crate) async fn request(&self, mut iq: Element) -> Result<Element, BackendError> {
        let id = self.new_id();
        iq.set_attr("id", id.clone());

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id.clone(), tx);
        if let Err(e) = self.send(&iq) {
            self.shared.pending.lock().remove(&id);
            return Err(e);
        }

        let limit = self.options.reply_timeout;
        let reply = match tokio::time::timeout(limit, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(BackendError::NotConnected),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                return Err(BackendError::Timeout(limit));
            }
        };

        if reply.get_attr("type") == Some("error") {
            return Err(BackendError::rejected(error_condition(&reply)));
        }
        Ok(reply)
    }

    /// Full address bound by the server after login.
    pub fn bound_jid(&self) -> Option<Jid> {
        self.shared.bound.lock().clone()
    }

    fn new_id(&self) -> String {
        format!(
            "{}-{}",
            self.id_prefix,
            self.next_id.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn send(&self, stanza: &Element) -> Result<(), BackendError> {
        self.send_raw(stanza.to_xml())
    }

    fn send_raw(&self, data: String) -> Result<(), BackendError> {
        if !self.is_live() {
            return Err(BackendError::NotConnected);
        }
        self.outgoing
            .send(Outgoing::Data(data))
            .map_err(|_| BackendError::NotConnected)
    }

    async fn next_control(
        &self,
        control: &mut mpsc::UnboundedReceiver<Control>,
    ) -> Result<Control, BackendError> {
        let limit = self.options.reply_timeout;
        match tokio::time::timeout(limit, control.recv()).await {
            Ok(Some(next)) => Ok(next),
            Ok(None) => Err(BackendError::Protocol(
                "server closed the stream during negotiation".to_string(),
            )),
            Err(_) => Err(BackendError::Timeout(limit)),
        }
    }

    async fn expect_features(
        &self,
        control: &mut mpsc::UnboundedReceiver<Control>,
    ) -> Result<Element, BackendError> {
        loop {
            match self.next_control(control).await? {
                Control::Opened => continue,
                Control::Element(element) if element.local_name() == "features" => {
                    return Ok(element)
                }
                Control::Element(element) => return Err(unexpected(&element)),
            }
        }
    }

    /// Resource requested at bind time; unique per session so parallel
    /// sessions of one account never conflict.
    fn resource(&self) -> String {
        format!("{}-{}", self.options.resource, self.id_prefix)
    }

    fn nickname(&self) -> &str {
        self.account.local().unwrap_or(self.account.domain_part())
    }

    fn occupant(&self, room: &Jid) -> Jid {
        room.with_resource(self.nickname())
    }

    /// Sends MUC join presence and waits for the self-presence (or error).
    async fn enter_room(&self, room: &Jid) -> Result<Vec<u16>, BackendError> {
        let (tx, rx) = oneshot::channel();
        self.shared.pending_joins.lock().insert(room.clone(), tx);

        let presence = Element::new("presence")
            .attr("to", self.occupant(room).to_string())
            .child(
                Element::new("x")
                    .ns(ns::MUC)
                    .child(Element::new("history").attr("maxstanzas", "0")),
            );
        if let Err(e) = self.send(&presence) {
            self.shared.pending_joins.lock().remove(room);
            return Err(e);
        }

        let limit = self.options.reply_timeout;
        let reply = match tokio::time::timeout(limit, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(BackendError::NotConnected),
            Err(_) => {
                self.shared.pending_joins.lock().remove(room);
                return Err(BackendError::Timeout(limit));
            }
        };

        if reply.get_attr("type") == Some("error") {
            return Err(BackendError::rejected(error_condition(&reply)));
        }
        self.shared.joined.lock().insert(room.clone());
        Ok(muc_status_codes(&reply))
    }

    fn exit_room(&self, room: &Jid) -> Result<(), BackendError> {
        self.shared.forget_room(room);
        self.send(
            &Element::new("presence")
                .attr("to", self.occupant(room).to_string())
                .attr("type", "unavailable"),
        )
    }
}

#[async_trait]
impl BackendSession for XmppSession {
    fn account(&self) -> &Jid {
        &self.account
    }

    fn is_live(&self) -> bool {
        self.shared.live.load(Ordering::SeqCst)
    }

    fn joined_rooms(&self) -> Vec<Jid> {
        self.shared.joined.lock().iter().cloned().collect()
    }

    async fn login(&self) -> Result<(), BackendError> {
        let local = self
            .account
            .local()
            .ok_or_else(|| BackendError::InvalidAddress(self.account.to_string()))?;
        let mut control = self.control.lock().await;

        let credentials = format!("\0{}\0{}", local, self.password.expose_secret());
        self.send(
            &Element::new("auth")
                .ns(ns::SASL)
                .attr("mechanism", "PLAIN")
                .text(base64::engine::general_purpose::STANDARD.encode(credentials)),
        )?;

        match self.next_control(&mut control).await? {
            Control::Element(outcome) if outcome.local_name() == "success" => {}
            Control::Element(outcome) if outcome.local_name() == "failure" => {
                let condition = outcome
                    .children()
                    .find(|c| c.local_name() != "text")
                    .map(|c| c.local_name().to_string())
                    .unwrap_or_else(|| "not-authorized".to_string());
                tracing::debug!(account = %self.account, condition = %condition, "SASL authentication refused");
                return Err(BackendError::AuthenticationFailed(format!(
                    "{} ({})",
                    self.account, condition
                )));
            }
            Control::Element(other) => return Err(unexpected(&other)),
            Control::Opened => {
                return Err(BackendError::Protocol(
                    "stream reopened before SASL outcome".to_string(),
                ))
            }
        }

        self.send_raw(stream_header(&self.options.domain))?;
        let features = self.expect_features(&mut control).await?;
        drop(control);

        if !features.has_child("bind", Some(ns::BIND)) {
            return Err(BackendError::Protocol(
                "server does not offer resource binding".to_string(),
            ));
        }
        let reply = self
            .request(
                Element::new("iq").attr("type", "set").child(
                    Element::new("bind")
                        .ns(ns::BIND)
                        .child(Element::new("resource").text(self.resource())),
                ),
            )
            .await?;
        let bound = reply
            .get_child("bind", Some(ns::BIND))
            .and_then(|bind| bind.get_child("jid", None))
            .map(|jid| jid.text_content())
            .ok_or_else(|| BackendError::Protocol("bind result without jid".to_string()))?
            .parse::<Jid>()
            .map_err(|e| BackendError::InvalidAddress(e.to_string()))?;

        // Legacy session establishment, only when the server insists.
        if let Some(session) = features.get_child("session", Some(ns::SESSION)) {
            if !session.has_child("optional", None) {
                self.request(
                    Element::new("iq")
                        .attr("type", "set")
                        .child(Element::new("session").ns(ns::SESSION)),
                )
                .await?;
            }
        }

        *self.shared.bound.lock() = Some(bound.clone());
        self.send(&Element::new("presence"))?;
        tracing::info!(account = %self.account, bound = %bound, "Logged in to XMPP server");
        Ok(())
    }

    async fn send_message(&self, to: &Jid, body: &str) -> Result<(), BackendError> {
        self.send(
            &Element::new("message")
                .attr("to", to.to_string())
                .attr("type", "chat")
                .attr("id", self.new_id())
                .child(Element::new("body").text(body)),
        )
    }

    async fn send_room_message(&self, room: &Jid, body: &str) -> Result<(), BackendError> {
        if !self.shared.joined.lock().contains(room) {
            return Err(BackendError::rejected("not-acceptable"));
        }
        self.send(
            &Element::new("message")
                .attr("to", room.to_string())
                .attr("type", "groupchat")
                .attr("id", self.new_id())
                .child(Element::new("body").text(body)),
        )
    }

    async fn create_room(&self, room: &Jid) -> Result<(), BackendError> {
        let codes = self.enter_room(room).await?;
        if codes.contains(&STATUS_CREATED) {
            tracing::debug!(account = %self.account, room = %room, "Room created");
            return Ok(());
        }
        // The room already existed and we merely joined it.
        let _ = self.exit_room(room);
        Err(BackendError::rejected("conflict"))
    }

    async fn configure_room(&self, room: &Jid, config: &RoomConfig) -> Result<(), BackendError> {
        let owner_query = || Element::new("query").ns(ns::MUC_OWNER);

        self.request(
            Element::new("iq")
                .attr("to", room.to_string())
                .attr("type", "get")
                .child(owner_query()),
        )
        .await?;

        let form = Element::new("x")
            .ns(ns::DATA_FORMS)
            .attr("type", "submit")
            .child(form_field("FORM_TYPE", ns::MUC_ROOMCONFIG).attr("type", "hidden"))
            .child(form_field(
                "muc#roomconfig_maxusers",
                config.max_occupants.to_string(),
            ))
            .child(form_field(
                "muc#roomconfig_persistentroom",
                if config.persistent { "1" } else { "0" },
            ));
        self.request(
            Element::new("iq")
                .attr("to", room.to_string())
                .attr("type", "set")
                .child(owner_query().child(form)),
        )
        .await?;
        Ok(())
    }

    async fn join_room(&self, room: &Jid) -> Result<(), BackendError> {
        if self.shared.joined.lock().contains(room) {
            return Ok(());
        }
        let codes = self.enter_room(room).await?;
        if codes.contains(&STATUS_CREATED) {
            // Joining must not bring a room into existence.
            let _ = self.exit_room(room);
            return Err(BackendError::rejected("item-not-found"));
        }
        Ok(())
    }

    async fn leave_room(&self, room: &Jid) -> Result<(), BackendError> {
        self.exit_room(room)
    }

    async fn destroy_room(&self, room: &Jid, reason: &str) -> Result<(), BackendError> {
        self.request(
            Element::new("iq")
                .attr("to", room.to_string())
                .attr("type", "set")
                .child(
                    Element::new("query").ns(ns::MUC_OWNER).child(
                        Element::new("destroy").child(Element::new("reason").text(reason)),
                    ),
                ),
        )
        .await?;
        self.shared.forget_room(room);
        Ok(())
    }

    async fn send_presence(&self, presence: PresenceType) -> Result<(), BackendError> {
        let mut stanza = Element::new("presence");
        if let Some(kind) = presence.as_stanza_type() {
            stanza.set_attr("type", kind);
        }
        self.send(&stanza)
    }

    async fn disconnect(&self) {
        if !self.shared.live.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.outgoing.send(Outgoing::Close);

        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if tokio::time::timeout(self.options.reply_timeout, writer)
                .await
                .is_err()
            {
                tracing::warn!(account = %self.account, "Timed out closing XMPP stream");
            }
        }
        if let Some(router) = self.router.lock().take() {
            router.abort();
        }
        self.shared.shut();
        tracing::info!(account = %self.account, "Disconnected from XMPP server");
    }

    fn subscribe_messages(&self) -> Result<mpsc::Receiver<IncomingMessage>, BackendError> {
        if !self.is_live() {
            return Err(BackendError::NotConnected);
        }
        let mut chat = self.shared.chat.lock();
        if chat.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(BackendError::AlreadySubscribed(self.account.to_string()));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        *chat = Some(tx);
        Ok(rx)
    }

    fn subscribe_room(&self, room: &Jid) -> Result<mpsc::Receiver<IncomingMessage>, BackendError> {
        if !self.is_live() {
            return Err(BackendError::NotConnected);
        }
        let mut rooms = self.shared.rooms.lock();
        if rooms.get(room).is_some_and(|tx| !tx.is_closed()) {
            return Err(BackendError::AlreadySubscribed(room.to_string()));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        rooms.insert(room.clone(), tx);
        Ok(rx)
    }
}

impl Drop for XmppSession {
    fn drop(&mut self) {
        if let Some(router) = self.router.get_mut().take() {
            router.abort();
        }
        if let Some(writer) = self.writer.get_mut().take() {
            writer.abort();
        }
    }
}

fn unexpected(element: &Element) -> BackendError {
    if element.local_name() == "error" {
        let condition = element
            .children()
            .next()
            .map(|c| c.local_name().to_string())
            .unwrap_or_else(|| "undefined-condition".to_string());
        return BackendError::Protocol(format!("stream error: {}", condition));
    }
    BackendError::Protocol(format!("unexpected <{}>", element.name()))
}

async fn write_loop(
    mut socket: OwnedWriteHalf,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    shared: Arc<Shared>,
) {
    while let Some(next) = outgoing.recv().await {
        let (data, closing) = match next {
            Outgoing::Data(data) => (data, false),
            Outgoing::Close => (STREAM_FOOTER.to_string(), true),
        };
        let written = async {
            socket.write_all(data.as_bytes()).await?;
            socket.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::warn!(error = %e, "XMPP write failed");
            shared.shut();
            return;
        }
        if closing {
            let _ = socket.shutdown().await;
            return;
        }
    }
}

async fn route_loop(
    mut reader: XmppReader<BufReader<OwnedReadHalf>>,
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    control: mpsc::UnboundedSender<Control>,
    account: Jid,
) {
    loop {
        match reader.next().await {
            Ok(StreamEvent::Opened { .. }) => {
                let _ = control.send(Control::Opened);
            }
            Ok(StreamEvent::Stanza(stanza)) => match stanza.name().to_string().as_str() {
                "message" => route_message(&shared, stanza, &account),
                "presence" => route_presence(&shared, stanza, &account),
                "iq" => {
                    if let Some(answer) = route_iq(&shared, stanza) {
                        let _ = outgoing.send(Outgoing::Data(answer.to_xml()));
                    }
                }
                _ => {
                    if stanza.local_name() == "error" {
                        tracing::warn!(account = %account, error = %stanza, "XMPP stream error");
                    }
                    let _ = control.send(Control::Element(stanza));
                }
            },
            Ok(StreamEvent::Closed) => {
                tracing::info!(account = %account, "XMPP server closed the stream");
                break;
            }
            Err(e) => {
                tracing::warn!(account = %account, error = %e, "XMPP stream failed");
                break;
            }
        }
    }
    shared.shut();
}

fn route_message(shared: &Shared, message: Element, account: &Jid) {
    let Some(from) = message.get_attr("from").and_then(|f| f.parse::<Jid>().ok()) else {
        return;
    };
    let Some(body) = message.get_child("body", None).map(Element::text_content) else {
        return;
    };
    let to = message
        .get_attr("to")
        .and_then(|t| t.parse::<Jid>().ok())
        .unwrap_or_else(|| account.clone());

    let (kind, queue) = match message.get_attr("type") {
        Some("groupchat") => {
            let room = from.to_bare();
            (IncomingKind::Room, shared.rooms.lock().get(&room).cloned())
        }
        Some("error") => {
            tracing::debug!(from = %from, error = %error_condition(&message), "Message bounced");
            return;
        }
        _ => (IncomingKind::Direct, shared.chat.lock().clone()),
    };
    let Some(queue) = queue else {
        tracing::debug!(from = %from, "No subscriber for incoming message");
        return;
    };

    let incoming = IncomingMessage {
        kind,
        from,
        to,
        body,
    };
    if let Err(e) = queue.try_send(incoming) {
        tracing::warn!(account = %account, error = %e, "Dropping incoming message");
    }
}

fn route_presence(shared: &Shared, presence: Element, account: &Jid) {
    let Some(from) = presence.get_attr("from").and_then(|f| f.parse::<Jid>().ok()) else {
        return;
    };
    let room = from.to_bare();
    let nickname = account.local().unwrap_or(account.domain_part());
    let is_error = presence.get_attr("type") == Some("error");
    let is_self =
        muc_status_codes(&presence).contains(&STATUS_SELF) || from.resource() == Some(nickname);
    let destroyed = presence
        .get_child("x", Some(ns::MUC_USER))
        .is_some_and(|x| x.has_child("destroy", None));
    if !is_error && !is_self && !destroyed {
        return;
    }

    let waiter = shared.pending_joins.lock().remove(&room);
    match waiter {
        Some(waiter) => {
            let _ = waiter.send(presence);
        }
        None if presence.get_attr("type") == Some("unavailable") => {
            // Left, kicked, or the room was destroyed.
            shared.forget_room(&room);
        }
        None => {}
    }
}

/// Resolves replies; returns the answer owed for server-initiated requests.
fn route_iq(shared: &Shared, iq: Element) -> Option<Element> {
    let id = iq.get_attr("id")?.to_string();
    match iq.get_attr("type") {
        Some("result") | Some("error") => {
            if let Some(waiter) = shared.pending.lock().remove(&id) {
                let _ = waiter.send(iq);
            }
            None
        }
        _ => {
            let mut answer = Element::new("iq").attr("id", id);
            if let Some(from) = iq.get_attr("from") {
                answer.set_attr("to", from);
            }
            if iq.has_child("ping", Some(ns::PING)) {
                answer.set_attr("type", "result");
            } else {
                answer.set_attr("type", "error");
                answer.push(
                    Element::new("error")
                        .attr("type", "cancel")
                        .child(Element::new("service-unavailable").ns(ns::STANZAS)),
                );
            }
            Some(answer)
        }
    }
}
