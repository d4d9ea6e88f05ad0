//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the bridge core to external systems:
//! - `directory` - in-memory connection directory
//! - `xmpp` - XMPP client sessions (and a test double)
//! - `websocket` - browser-facing WebSocket transport

pub mod directory;
pub mod websocket;
pub mod xmpp;

pub use directory::InMemoryConnectionDirectory;
pub use websocket::{bridge_router, WebSocketState};
pub use xmpp::{MockMessagingBackend, XmppBackend};
