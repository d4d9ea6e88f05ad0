//! Room configuration and presence types.

/// Default occupant cap applied to rooms created through the bridge.
pub const DEFAULT_MAX_OCCUPANTS: u32 = 100;

/// Reason sent to occupants when a room is destroyed.
pub const DESTROY_REASON: &str = "The owner left";

/// Settings applied right after a room is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomConfig {
    pub max_occupants: u32,
    /// Keep the room after the last occupant leaves.
    pub persistent: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_occupants: DEFAULT_MAX_OCCUPANTS,
            persistent: false,
        }
    }
}

/// Presence broadcast to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceType {
    Available,
    Unavailable,
}

impl PresenceType {
    /// Value of the stanza `type` attribute; `None` means available.
    pub fn as_stanza_type(&self) -> Option<&'static str> {
        match self {
            PresenceType::Available => None,
            PresenceType::Unavailable => Some("unavailable"),
        }
    }
}
