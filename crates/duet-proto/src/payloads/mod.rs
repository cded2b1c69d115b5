//! Typed frame payloads.
//!
//! Control payloads are CBOR-encoded structs. The opcode in the frame header
//! identifies the payload type, so only the inner struct is serialized (no
//! variant tag). Negotiation payloads are the exception: the server treats
//! them as opaque bytes and never parses them.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode, except `Signal`, which
//! maps to one opcode per [`SignalKind`]. Session-scoped payloads (`Signal`,
//! `Matched`) carry their session id in the frame header.

pub mod session;
pub mod signal;

use bytes::{BufMut, Bytes};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
pub use signal::SignalKind;

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Client requests
    /// Attach identity to the connection
    Identify(session::Identify),
    /// Enter the matchmaking queue
    QueueJoin,
    /// Leave the matchmaking queue
    QueueLeave,
    /// End the current session
    SessionEnd,
    /// Report the partner and end the session
    SessionReport(session::Report),

    // Relay (both directions)
    /// Opaque negotiation message
    Signal(signal::Signal),

    // Server notifications
    /// Queue status after joining
    QueueWaiting(session::QueueWaiting),
    /// A partner was found
    Matched(session::Matched),
    /// The partner left the session
    PartnerDisconnected,
    /// The queue entry went stale and was removed
    QueueExpired,
    /// The last request was rejected
    Rejected(ErrorPayload),
}

/// Body of a `Rejected` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code identifying the type of error.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorPayload {
    /// Request is not valid in the connection's current state, or its fields
    /// failed validation.
    pub const VALIDATION: u16 = 0x0001;
    /// Frame payload could not be decoded.
    pub const INVALID_PAYLOAD: u16 = 0x0002;

    /// Create a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self { code: Self::VALIDATION, message: reason.into() }
    }

    /// Create an invalid payload error.
    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        Self { code: Self::INVALID_PAYLOAD, message: reason.into() }
    }
}

fn cbor_decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

impl Payload {
    /// Opcode corresponding to this payload.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Identify(_) => Opcode::Identify,
            Self::QueueJoin => Opcode::QueueJoin,
            Self::QueueLeave => Opcode::QueueLeave,
            Self::SessionEnd => Opcode::SessionEnd,
            Self::SessionReport(_) => Opcode::SessionReport,
            Self::Signal(signal) => signal.kind.opcode(),
            Self::QueueWaiting(_) => Opcode::QueueWaiting,
            Self::Matched(_) => Opcode::Matched,
            Self::PartnerDisconnected => Opcode::PartnerDisconnected,
            Self::QueueExpired => Opcode::QueueExpired,
            Self::Rejected(_) => Opcode::Rejected,
        }
    }

    /// Session id carried in the header for session-scoped payloads.
    #[must_use]
    pub const fn session_id(&self) -> Option<u128> {
        match self {
            Self::Signal(signal) => Some(signal.session_id),
            Self::Matched(matched) => Some(matched.session_id),
            _ => None,
        }
    }

    /// Encode the payload body.
    ///
    /// Serializes only the inner struct, not the variant tag. Signal data is
    /// written verbatim. Size limits are enforced later by [`Frame::encode`].
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::Identify(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::SessionReport(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::QueueWaiting(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Matched(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Rejected(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Signal(inner) => {
                writer.get_mut().put_slice(&inner.data);
                Ok(())
            },
            // Zero-byte payloads
            Self::QueueJoin
            | Self::QueueLeave
            | Self::SessionEnd
            | Self::PartnerDisconnected
            | Self::QueueExpired => Ok(()),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode a payload body for the given opcode.
    ///
    /// Session-scoped payloads decoded here carry a zero session id; use
    /// [`Payload::from_frame`] to pick it up from the header.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed `MAX_PAYLOAD_SIZE`
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let payload = match opcode {
            Opcode::Identify => Self::Identify(cbor_decode(bytes)?),
            Opcode::QueueJoin => Self::QueueJoin,
            Opcode::QueueLeave => Self::QueueLeave,
            Opcode::SessionEnd => Self::SessionEnd,
            Opcode::SessionReport => Self::SessionReport(cbor_decode(bytes)?),
            Opcode::Offer | Opcode::Answer | Opcode::IceCandidate => {
                let Some(kind) = SignalKind::from_opcode(opcode) else {
                    return Err(ProtocolError::UnexpectedOpcode(opcode.to_u16()));
                };
                Self::Signal(signal::Signal {
                    kind,
                    session_id: 0,
                    data: Bytes::copy_from_slice(bytes),
                })
            },
            Opcode::QueueWaiting => Self::QueueWaiting(cbor_decode(bytes)?),
            Opcode::Matched => Self::Matched(cbor_decode(bytes)?),
            Opcode::PartnerDisconnected => Self::PartnerDisconnected,
            Opcode::QueueExpired => Self::QueueExpired,
            Opcode::Rejected => Self::Rejected(cbor_decode(bytes)?),
        };

        Ok(payload)
    }

    /// Convert payload into a transport frame.
    ///
    /// Sets the opcode and, for session-scoped payloads, the header session id.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self, mut header: FrameHeader) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        header.opcode = self.opcode().to_u16().to_be_bytes();
        if let Some(session_id) = self.session_id() {
            header.set_session_id(session_id);
        }
        Ok(Frame::new(header, buf))
    }

    /// Parse payload from a transport frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the header opcode is unrecognized
    /// - Any error from [`Payload::decode`]
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or(ProtocolError::UnknownOpcode(frame.header.opcode()))?;

        // Relay data is forwarded as-is, without the copy in decode().
        if opcode.is_signal() {
            let kind = SignalKind::from_opcode(opcode)
                .ok_or(ProtocolError::UnexpectedOpcode(opcode.to_u16()))?;
            return Ok(Self::Signal(signal::Signal {
                kind,
                session_id: frame.header.session_id(),
                data: frame.payload.clone(),
            }));
        }

        let payload = match Self::decode(opcode, &frame.payload)? {
            Self::Matched(mut matched) => {
                matched.session_id = frame.header.session_id();
                Self::Matched(matched)
            },
            other => other,
        };

        Ok(payload)
    }
}
