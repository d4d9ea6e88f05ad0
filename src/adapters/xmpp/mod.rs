//! XMPP adapter - the messaging backend.
//!
//! - `session` / `backend` - c2s client over TCP (SASL PLAIN, resource
//!   binding, one-to-one chat, multi-user chat rooms)
//! - `stanza` / `stream` - XML element tree and incremental stream reader
//! - `mock` - scriptable in-memory backend for tests

mod backend;
mod mock;
mod session;
pub mod stanza;
pub mod stream;

pub use backend::XmppBackend;
pub use mock::{BackendCall, MockMessagingBackend, MockOp, MockSession};
pub use session::{ConnectOptions, XmppSession};
