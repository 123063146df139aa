//! # sync-types
//!
//! Wire format types for the homesync push channel.
//!
//! This crate provides the foundational types used across all homesync crates:
//! - [`AccessoryId`], [`AttributeKey`] - Identity of a device and one of its properties
//! - [`PushMessage`], [`ClientMessage`] - Messages exchanged over the push channel
//! - [`Credential`] - Opaque bearer token attached to the push connection
//! - [`ProtocolError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;

pub use error::ProtocolError;
pub use ids::{AccessoryId, AttributeKey, Credential};
pub use messages::{
    ClientMessage, CloseDisposition, PushMessage, CLOSE_ABNORMAL, CLOSE_AUTH_REJECTED,
    CLOSE_MISSING_TOKEN, CLOSE_NORMAL,
};

/// A device property value as reported by the server.
///
/// Values are untyped on the wire (booleans for power state, integers for
/// brightness, strings for modes), so they are carried as JSON.
pub type Value = serde_json::Value;
