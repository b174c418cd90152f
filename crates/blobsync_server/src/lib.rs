//! # blobsync Server
//!
//! Connection, authentication and push layer over the blobsync engine.
//!
//! This crate provides:
//! - [`SyncService`] - the transport-agnostic request front: auth frames,
//!   connection lifecycle, and the device-facing sync operations
//! - [`ConnectionHub`] - the registry of live connections and the
//!   per-account broadcast fan-out
//! - [`Authenticator`] implementations (HMAC-SHA256 tokens, a mock table)
//!   plus the grace-period [`Whitelist`]
//! - [`SessionDeviceDirectory`] - server-issued per-connection device ids
//!
//! # Architecture
//!
//! Transports stay thin: a websocket task registers its outbound channel
//! with the service, forwards inbound text frames to
//! [`SyncService::handle_frame`], and calls
//! [`SyncService::close_connection`] when the socket dies. Request/response
//! traffic (status, change listings, blob reads, session writes, commits)
//! goes through the service's methods, which resolve the account's engine
//! and apply a coarse per-account read/write discipline.
//!
//! # Push
//!
//! The push channel carries no document data. Whenever an account's
//! committed state or lock table changes, every connected device of that
//! account receives its own [`blobsync_protocol::Status`] after a short
//! debounce, and decides for itself what to pull.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code must not use panic!/unwrap()/expect().
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod devices;
mod error;
mod hub;
mod service;

pub use auth::{Authenticator, HmacAuthenticator, MockAuthenticator, Whitelist};
pub use config::ServerConfig;
pub use devices::SessionDeviceDirectory;
pub use error::{ServerError, ServerResult};
pub use hub::{ConnectionHub, ConnectionId, Departure, Outbound};
pub use service::SyncService;
