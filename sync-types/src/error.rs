//! Error types for homesync wire handling.

use thiserror::Error;

/// Errors that can occur while decoding or encoding push-channel data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON for any known message
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Encoding an outbound message failed
    #[error("encoding failed: {0}")]
    Encoding(#[source] serde_json::Error),

    /// An attribute key string did not have the `entity:attribute` shape
    #[error("invalid attribute key: {0:?}")]
    InvalidKey(String),
}
