//! Bridge domain - the vocabulary shared by the session bridge core.
//!
//! - [`address`] - usernames, room names and XMPP addresses
//! - [`command`] - inbound client commands and outbound client events
//! - [`lifecycle`] - the per-connection session state machine
//! - [`room`] - room configuration and presence types

pub mod address;
pub mod command;
pub mod lifecycle;
pub mod room;

pub use address::{Jid, RoomName, Username, MAX_LOCALPART_BYTES};
pub use command::{InboundCommand, OutboundEvent};
pub use lifecycle::SessionState;
pub use room::{PresenceType, RoomConfig, DEFAULT_MAX_OCCUPANTS, DESTROY_REASON};
