//! # blobsync Protocol
//!
//! Wire and data types shared by the sync engine and the server.
//!
//! This crate defines:
//! - Change-feed entries and their write/delete actions
//! - The per-device account status payload
//! - Lock request/notification payloads
//! - The websocket frame bodies (auth handshake, pushed messages)
//!
//! All types serialize as JSON with camelCase field names; the same shapes
//! appear in the persisted timestamp map, the HTTP responses produced by
//! the (external) router layer, and the frames pushed over the websocket
//! channel.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod frames;
mod status;

pub use change::{ChangeAction, ChangeEntry};
pub use frames::{AuthFrame, AuthResponse, PushedMessage};
pub use status::{LockResponse, Status};
