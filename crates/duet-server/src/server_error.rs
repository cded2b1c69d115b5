//! Coordinator error types.
//!
//! Errors produced while the coordinator processes an event. Most of them
//! never leave the coordinator: validation failures become a `Rejected`
//! notification to the offender, and unknown sessions are logged and dropped.
//! Only [`CoordinatorError::ConnectionNotFound`] is returned to the runtime.

use duet_core::ConnectionError;
use thiserror::Error;

/// Errors that can occur during coordinator operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// Request is malformed or not allowed in the connection's state.
    ///
    /// Reported to the offending connection only.
    #[error("{0}")]
    Validation(String),

    /// Relay or end referencing a session that does not exist.
    ///
    /// Benign: the session usually ended a moment before the message arrived.
    #[error("session not found: {0:032x}")]
    SessionNotFound(u128),

    /// Connection observed in both the queue and the session table.
    ///
    /// Indicates a coordinator bug. Debug builds assert; release builds evict
    /// the connection from both.
    #[error("invariant violation for connection {conn_id}: {detail}")]
    InvariantViolation {
        /// Connection in the inconsistent state
        conn_id: u64,
        /// What was observed
        detail: String,
    },

    /// Event for a connection the coordinator never accepted (or already
    /// removed).
    #[error("connection not found: {0}")]
    ConnectionNotFound(u64),
}

impl From<ConnectionError> for CoordinatorError {
    fn from(err: ConnectionError) -> Self {
        Self::Validation(err.to_string())
    }
}
