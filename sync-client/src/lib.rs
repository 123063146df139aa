//! # homesync-client
//!
//! Client library for homesync real-time optimistic state sync.
//!
//! This is the library the presentation layer holds for a session.
//!
//! ## Features
//!
//! - **Push Channel**: WebSocket connection with keepalive and capped exponential backoff
//! - **Optimistic Writes**: values show immediately and revert on rejection
//! - **Echo Suppression**: a write's own stale notices never clobber it
//! - **Batched Cache Updates**: notice bursts coalesce into one cache pass
//! - **Transport Abstraction**: Pluggable transport layer (websocket, mock)
//!
//! ## Example
//!
//! ```ignore
//! use homesync_client::{HubClient, HubConfig, WsTransport};
//!
//! let config = HubConfig::from_file(path)?;
//! let client = HubClient::new(&config, WsTransport::new(), api, cache, credentials)?;
//! client.connect()?;
//!
//! client.subscribe(|change| println!("{:?}", change));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod scheduler;
pub mod transport;

pub use client::{ClientError, CredentialProvider, HubClient};
pub use config::{ConfigError, HubConfig};
pub use connection::{ConnectionConfig, ConnectionManager, DEFAULT_PING_INTERVAL};
pub use dispatcher::{
    CommandDispatcher, GroupWriteOutcome, GroupWriteResponse, WriteApi, WriteError, WriteGroup,
    WriteOutcome, WriteResponse, DEFAULT_WRITE_TIMEOUT,
};
pub use scheduler::TokioScheduler;
pub use transport::{Frame, MockTransport, Transport, TransportError, WsTransport};
