//! Websocket frame bodies.
//!
//! The websocket channel is a signalling mechanism only. The single frame
//! clients send is the auth handshake:
//!
//! ```json
//! {"auth": "<credential>"}
//! ```
//!
//! to which the server replies:
//!
//! ```json
//! {"authorized": true}
//! ```
//!
//! After that, clients just listen: the server pushes [`Status`] payloads
//! whenever the account's truth store or lock table changes, telling idle
//! devices to initiate a pull.

use crate::Status;
use serde::{Deserialize, Serialize};

/// The inbound authentication frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFrame {
    /// The opaque credential to verify.
    pub auth: String,
}

/// The outbound reply to an [`AuthFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Whether the credential was accepted.
    pub authorized: bool,
}

/// A message pushed to connected devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PushedMessage {
    /// The auth handshake reply.
    Auth(AuthResponse),
    /// A refreshed account status.
    Status(Status),
}
