//! Negotiation relay payloads.
//!
//! The server forwards these between the two members of a session without
//! looking inside. Only the kind (from the opcode) and the session id (from
//! the header) are interpreted.

use std::fmt;

use bytes::Bytes;

use crate::Opcode;

/// Kind of negotiation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Session description offer
    Offer,
    /// Session description answer
    Answer,
    /// ICE candidate
    IceCandidate,
}

impl SignalKind {
    /// Opcode used on the wire for this kind.
    #[must_use]
    pub const fn opcode(self) -> Opcode {
        match self {
            Self::Offer => Opcode::Offer,
            Self::Answer => Opcode::Answer,
            Self::IceCandidate => Opcode::IceCandidate,
        }
    }

    /// Kind for a relay opcode. `None` for any other opcode.
    #[must_use]
    pub const fn from_opcode(opcode: Opcode) -> Option<Self> {
        match opcode {
            Opcode::Offer => Some(Self::Offer),
            Opcode::Answer => Some(Self::Answer),
            Opcode::IceCandidate => Some(Self::IceCandidate),
            _ => None,
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque negotiation message scoped to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// Message kind
    pub kind: SignalKind,
    /// Session the message belongs to (header field)
    pub session_id: u128,
    /// Client bytes, forwarded verbatim
    pub data: Bytes,
}
