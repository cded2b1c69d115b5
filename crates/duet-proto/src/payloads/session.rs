//! Control payloads for identity, queue, and session lifecycle.

use serde::{Deserialize, Serialize};

/// Attach a verified identity to the connection.
///
/// Both fields come from the upstream verification step. The server checks
/// only that they are present; it does not re-verify ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    /// Opaque, verified user reference
    pub external_user_id: String,
    /// Anonymous name shown to the partner
    pub display_name: String,
}

/// Report the current partner. The session ends after the report is logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Free-form reason supplied by the reporter
    pub reason: String,
}

/// Queue status sent to a connection after it joins the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueWaiting {
    /// Number of connections waiting, including the recipient
    pub queue_size: u32,
}

/// A partner was found.
///
/// The session id travels in the frame header, not in the CBOR body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matched {
    /// Shared session id (header field)
    #[serde(skip)]
    pub session_id: u128,
    /// The partner's display name
    pub partner_display_name: String,
}
