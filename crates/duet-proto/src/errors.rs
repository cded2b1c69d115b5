//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while parsing or building frames.
///
/// Every variant describes a structural problem with bytes received from (or
/// about to be sent to) the network. None of them are transient: a frame that
/// fails here will fail again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer shorter than a frame header
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required
        expected: usize,
        /// Number of bytes available
        actual: usize,
    },

    /// Header magic number mismatch
    #[error("invalid magic number")]
    InvalidMagic,

    /// Header version not supported by this build
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Payload exceeds the protocol limit
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Claimed or actual payload size
        size: usize,
        /// Protocol maximum
        max: usize,
    },

    /// Fewer payload bytes than the header claims
    #[error("frame truncated: expected {expected} payload bytes, got {actual}")]
    FrameTruncated {
        /// Payload size claimed by the header
        expected: usize,
        /// Payload bytes actually present
        actual: usize,
    },

    /// Opcode not recognized by this protocol version
    #[error("unknown opcode: {0:#06x}")]
    UnknownOpcode(u16),

    /// Opcode is valid but not accepted in this direction
    #[error("unexpected opcode: {0:#06x}")]
    UnexpectedOpcode(u16),

    /// CBOR serialization failed
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed
    #[error("CBOR decode error: {0}")]
    CborDecode(String),
}
