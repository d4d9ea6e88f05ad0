//! Session bridge behaviour

use serde::Deserialize;

use super::error::ValidationError;
use crate::application::CommandFailurePolicy;
use crate::domain::bridge::{RoomConfig, DEFAULT_MAX_OCCUPANTS};

/// Room defaults and command failure handling
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Occupant limit applied to newly created rooms
    #[serde(default = "default_max_room_occupants")]
    pub max_room_occupants: u32,

    /// Whether newly created rooms outlive their last occupant
    #[serde(default)]
    pub persistent_rooms: bool,

    /// Emit a `failure` event when a command's backend operation fails
    #[serde(default)]
    pub surface_command_failures: bool,
}

impl BridgeConfig {
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            max_occupants: self.max_room_occupants,
            persistent: self.persistent_rooms,
        }
    }

    pub fn failure_policy(&self) -> CommandFailurePolicy {
        if self.surface_command_failures {
            CommandFailurePolicy::Surface
        } else {
            CommandFailurePolicy::Swallow
        }
    }

    /// Validate bridge configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_room_occupants == 0 {
            return Err(ValidationError::InvalidOccupantLimit);
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_room_occupants: default_max_room_occupants(),
            persistent_rooms: false,
            surface_command_failures: false,
        }
    }
}

fn default_max_room_occupants() -> u32 {
    DEFAULT_MAX_OCCUPANTS
}
