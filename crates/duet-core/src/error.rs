//! Error types for the Duet core.
//!
//! Every variant describes a request the connection is not allowed to make
//! right now, or a malformed value it supplied. None of them affect any other
//! connection; the server reports them back to the offender only.

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors from the per-connection state machine and identity validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation not allowed in the current state
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// State when the operation was attempted
        state: ConnectionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Operation requires an identity and none is attached
    #[error("not identified")]
    NotIdentified,

    /// Queue join attempted while matched or in a session
    #[error("already in session")]
    AlreadyInSession,

    /// Identity fields failed validation
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// Frame payload could not be decoded
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<duet_proto::ProtocolError> for ConnectionError {
    fn from(err: duet_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_client_facing() {
        assert_eq!(ConnectionError::NotIdentified.to_string(), "not identified");
        assert_eq!(ConnectionError::AlreadyInSession.to_string(), "already in session");
        assert_eq!(
            ConnectionError::InvalidState {
                state: ConnectionState::Queued,
                operation: "mark matched twice",
            }
            .to_string(),
            "cannot mark matched twice while queued"
        );
    }

    #[test]
    fn protocol_errors_convert() {
        let err: ConnectionError = duet_proto::ProtocolError::InvalidMagic.into();
        assert_eq!(err, ConnectionError::Protocol("invalid magic number".to_string()));
    }
}
