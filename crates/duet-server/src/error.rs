//! Server error types.

use std::fmt;

use crate::server_error::CoordinatorError;

/// Errors that can occur in the server runtime.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, unreadable TLS files, etc.).
    ///
    /// Fatal at startup. Fix configuration and restart.
    Config(String),

    /// Transport/network error (handshake failure, stream I/O, etc.).
    ///
    /// Usually scoped to one connection. The server keeps serving others.
    Transport(String),

    /// Protocol error (bad header, oversized frame, encode failure).
    ///
    /// Fatal for the offending stream only.
    Protocol(String),

    /// Internal error (unexpected state, logic bug, etc.).
    Internal(String),

    /// Error returned by the coordinator.
    Coordinator(CoordinatorError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::Coordinator(err) => write!(f, "coordinator error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Coordinator(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CoordinatorError> for ServerError {
    fn from(err: CoordinatorError) -> Self {
        Self::Coordinator(err)
    }
}

impl From<duet_proto::ProtocolError> for ServerError {
    fn from(err: duet_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
