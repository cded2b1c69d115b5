//! Duet wire protocol.
//!
//! Every message between a client and the matchmaking server is a [`Frame`]:
//! a fixed 32-byte binary [`FrameHeader`] followed by a variable payload. The
//! header carries everything the server needs for routing (opcode, session
//! id, payload size), so negotiation frames can be relayed without touching
//! their payload.
//!
//! # Payload encoding
//!
//! - Control messages (identify, queue, session lifecycle, notifications) are
//!   CBOR-encoded [`Payload`] variants without a variant tag. The opcode
//!   identifies the type.
//! - Negotiation messages (offer, answer, ICE candidate) carry the client's
//!   bytes verbatim. The server never decodes them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
mod frame;
mod header;
mod opcode;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcode::Opcode;
pub use payloads::{ErrorPayload, Payload, SignalKind};

/// ALPN protocol identifier negotiated during the QUIC handshake.
pub const ALPN_PROTOCOL: &[u8] = b"duet";
