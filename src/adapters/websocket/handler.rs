//! WebSocket upgrade handler for bridged chat connections.
//!
//! Handles the HTTP → WebSocket upgrade and manages the connection lifecycle:
//! 1. Upgrade to WebSocket
//! 2. Validate the username from the path; a malformed one gets `failure`
//!    and a close, with no backend session opened
//! 3. Open the backend session (handshake)
//! 4. Dispatch inbound frames, one at a time, until disconnect or logout
//! 5. Tear the backend session down
//!
//! Steps 3 to 5 run on a single task per connection, so a close can never
//! overtake the handshake or a command still being dispatched.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::application::SessionBridge;
use crate::domain::bridge::{OutboundEvent, Username};
use crate::domain::foundation::ConnectionId;
use crate::ports::{ClientConnection, ClientSignal};

use super::messages::{parse_command, ServerFrame};

/// State shared by all WebSocket routes.
#[derive(Clone)]
pub struct WebSocketState {
    pub bridge: SessionBridge,
}

impl WebSocketState {
    pub fn new(bridge: SessionBridge) -> Self {
        Self { bridge }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_sessions: usize,
}

/// Handle WebSocket upgrade requests.
///
/// Route: `GET /chat/:username`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(username): Path<String>,
    State(state): State<WebSocketState>,
) -> Response {
    match Username::new(&username) {
        Ok(username) => ws.on_upgrade(move |socket| handle_socket(socket, username, state)),
        Err(e) => {
            tracing::debug!(error = %e, "Refusing connection with invalid username");
            ws.on_upgrade(reject_socket)
        }
    }
}

/// Route: `GET /health`
pub async fn health(State(state): State<WebSocketState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_sessions: state.bridge.active_sessions(),
    })
}

/// Handle an established WebSocket connection.
async fn handle_socket(socket: WebSocket, username: Username, state: WebSocketState) {
    let (sender, mut receiver) = socket.split();
    let connection_id = ConnectionId::new();
    let (client, signals) = ClientConnection::new(connection_id, username);
    let writer = tokio::spawn(write_signals(sender, signals, connection_id));

    tracing::info!(
        connection_id = %connection_id,
        username = %client.username(),
        "WebSocket connection opened"
    );

    if state.bridge.open(&client).await.is_ok() {
        loop {
            let frame = tokio::select! {
                _ = client.closed() => break,
                frame = receiver.next() => frame,
            };
            match frame {
                Some(Ok(Message::Text(text))) => match parse_command(&text) {
                    Ok(command) => {
                        state.bridge.dispatch(&connection_id, command).await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            connection_id = %connection_id,
                            error = %e,
                            "Ignoring malformed frame"
                        );
                    }
                },
                Some(Ok(Message::Binary(_))) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        "Received unsupported binary message"
                    );
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Protocol-level, answered by axum
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(connection_id = %connection_id, "Client closed connection");
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %connection_id, "Receive error: {}", e);
                    break;
                }
            }
        }
        state.bridge.close(&connection_id).await;
    }

    client.close();
    drop(client);
    let _ = writer.await;
    tracing::info!(connection_id = %connection_id, "WebSocket connection finished");
}

/// Reports `failure` on a socket that never gets a session, then closes it.
async fn reject_socket(mut socket: WebSocket) {
    match serde_json::to_string(&ServerFrame::from(OutboundEvent::Failure)) {
        Ok(json) => {
            if let Err(e) = socket.send(Message::Text(json)).await {
                tracing::debug!("Send error on refused connection: {}", e);
                return;
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode frame"),
    }
    let _ = socket.send(Message::Close(None)).await;
}

/// Drains client signals into the socket until closed.
async fn write_signals(
    mut sender: SplitSink<WebSocket, Message>,
    mut signals: mpsc::UnboundedReceiver<ClientSignal>,
    connection_id: ConnectionId,
) {
    while let Some(signal) = signals.recv().await {
        match signal {
            ClientSignal::Event(event) => {
                let json = match serde_json::to_string(&ServerFrame::from(event)) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(connection_id = %connection_id, error = %e, "Failed to encode frame");
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(json)).await {
                    tracing::debug!(
                        connection_id = %connection_id,
                        "Send error, closing connection: {}",
                        e
                    );
                    return;
                }
            }
            ClientSignal::Close => {
                let _ = sender.send(Message::Close(None)).await;
                return;
            }
        }
    }
}

/// Create the axum router for the bridge endpoints.
///
/// # Example
///
/// ```ignore
/// let app = bridge_router(WebSocketState::new(bridge));
/// axum::serve(listener, app).await?;
/// ```
pub fn bridge_router(state: WebSocketState) -> Router {
    Router::new()
        .route("/chat/:username", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
}
