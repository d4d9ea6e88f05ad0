//! Addressing value objects: usernames, room names and JIDs.
//!
//! A client connects with a bare username; the bridge turns it into an
//! account address (`username@user-domain`). Rooms are addressed the same
//! way under the room domain.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::ValidationError;

/// Maximum size of a localpart in bytes.
pub const MAX_LOCALPART_BYTES: usize = 1023;

/// Characters an XMPP localpart may never contain.
const FORBIDDEN_LOCALPART_CHARS: &[char] = &['"', '&', '\'', '/', ':', '<', '>', '@'];

/// Localparts and domains compare case-insensitively; resources do not.
fn fold(part: &str) -> String {
    part.to_lowercase()
}

fn validate_localpart(field: &str, raw: &str) -> Result<String, ValidationError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ValidationError::empty_field(field));
    }
    if value.len() > MAX_LOCALPART_BYTES {
        return Err(ValidationError::too_long(field, MAX_LOCALPART_BYTES, value.len()));
    }
    if let Some(c) = value
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || FORBIDDEN_LOCALPART_CHARS.contains(c))
    {
        return Err(ValidationError::invalid_format(
            field,
            format!("character {:?} is not allowed", c),
        ));
    }
    Ok(fold(value))
}

/// Name a client connects with; becomes the localpart of its account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Validates and wraps a username.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ValidationError> {
        validate_localpart("username", raw.as_ref()).map(Self)
    }

    /// Returns the username as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Account address of this user under `domain`.
    pub fn at(&self, domain: &str) -> Jid {
        Jid::bare(self.0.clone(), domain)
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Username {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

/// Name of a multi-user room, scoped under the configured room domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomName(String);

impl RoomName {
    /// Validates and wraps a room name.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ValidationError> {
        validate_localpart("room", raw.as_ref()).map(Self)
    }

    /// Returns the room name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Room address under `room_domain`.
    pub fn at(&self, room_domain: &str) -> Jid {
        Jid::bare(self.0.clone(), room_domain)
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomName> for String {
    fn from(value: RoomName) -> Self {
        value.0
    }
}

/// An XMPP address: `[local@]domain[/resource]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    local: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    /// Builds a bare `local@domain` address.
    pub fn bare(local: impl AsRef<str>, domain: impl AsRef<str>) -> Self {
        Self {
            local: Some(fold(local.as_ref())),
            domain: fold(domain.as_ref()),
            resource: None,
        }
    }

    /// Builds a domain-only address (for example the server itself).
    pub fn domain(domain: impl AsRef<str>) -> Self {
        Self {
            local: None,
            domain: fold(domain.as_ref()),
            resource: None,
        }
    }

    /// Returns a copy of this address with `resource` attached.
    pub fn with_resource(&self, resource: impl Into<String>) -> Self {
        Self {
            local: self.local.clone(),
            domain: self.domain.clone(),
            resource: Some(resource.into()),
        }
    }

    /// Returns this address without its resource.
    pub fn to_bare(&self) -> Self {
        Self {
            local: self.local.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    pub fn domain_part(&self) -> &str {
        &self.domain
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn is_bare(&self) -> bool {
        self.resource.is_none()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(local) = &self.local {
            write!(f, "{}@", local)?;
        }
        f.write_str(&self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{}", resource)?;
        }
        Ok(())
    }
}

impl FromStr for Jid {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The resource may itself contain '@' or '/', so split it off first.
        let (bare, resource) = match s.split_once('/') {
            Some((bare, resource)) => (bare, Some(resource)),
            None => (s, None),
        };
        let (local, domain) = match bare.split_once('@') {
            Some((local, domain)) => (Some(local), domain),
            None => (None, bare),
        };

        if domain.is_empty() {
            return Err(ValidationError::empty_field("jid.domain"));
        }
        if local.is_some_and(str::is_empty) {
            return Err(ValidationError::empty_field("jid.local"));
        }
        if resource.is_some_and(str::is_empty) {
            return Err(ValidationError::empty_field("jid.resource"));
        }

        Ok(Self {
            local: local.map(fold),
            domain: fold(domain),
            resource: resource.map(str::to_string),
        })
    }
}
