//! Identity types for homesync.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ProtocolError;

/// Identifier of one accessory (device) as assigned by the home.
///
/// Stable for the accessory's lifetime and never reused.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessoryId(String);

impl AccessoryId {
    /// Create an AccessoryId from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccessoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AccessoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessoryId({})", self.0)
    }
}

impl From<&str> for AccessoryId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AccessoryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Composite identity of one controllable or observable property of one
/// accessory, e.g. `("dev1", "power_state")`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeKey {
    /// The accessory owning the attribute.
    pub entity_id: AccessoryId,
    /// The characteristic type (e.g. `power_state`, `brightness`).
    pub attribute: String,
}

impl AttributeKey {
    /// Create a key from an accessory and an attribute name.
    pub fn new(entity_id: impl Into<AccessoryId>, attribute: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            attribute: attribute.into(),
        }
    }

    /// Parse the `entity:attribute` form produced by [`fmt::Display`].
    ///
    /// The split happens at the last colon so accessory ids may contain colons.
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        match s.rsplit_once(':') {
            Some((entity, attribute)) if !entity.is_empty() && !attribute.is_empty() => {
                Ok(Self::new(entity, attribute))
            }
            _ => Err(ProtocolError::InvalidKey(s.to_string())),
        }
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_id, self.attribute)
    }
}

impl fmt::Debug for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeKey({self})")
    }
}

/// Opaque bearer token used to authenticate the push connection.
///
/// The token is never printed; `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Expose the raw token for attaching it to a request.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Check if the token is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential([{} chars REDACTED])", self.0.len())
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(token)
    }
}
