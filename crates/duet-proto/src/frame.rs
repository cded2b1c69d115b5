//! Frame type combining header and payload.
//!
//! A `Frame` is a pure data holder (header + bytes). For typed access see
//! [`crate::Payload::into_frame`] and [`crate::Payload::from_frame`].

use bytes::{BufMut, Bytes};

use crate::{
    FrameHeader,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame
///
/// Layout on the wire: `[FrameHeader: 32 bytes] + [payload: variable bytes]`
///
/// Holds raw bytes, not the `Payload` enum, so the server can relay
/// negotiation frames without deserializing them.
///
/// # Invariants
///
/// - `payload.len()` matches `header.payload_size()`. Enforced by
///   [`Frame::new`] and verified by [`Frame::decode`].
/// - `payload.len()` never exceeds [`FrameHeader::MAX_PAYLOAD_SIZE`] on the
///   wire. Oversized frames are rejected by [`Frame::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header
    pub header: FrameHeader,

    /// Raw payload bytes
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame, setting `payload_size` from the payload.
    #[must_use]
    pub fn new(mut header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        // Bytes is bounded by isize::MAX; anything past u32::MAX saturates and is
        // rejected by encode() like any other oversized payload.
        let payload_len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        header.payload_size = payload_len.to_be_bytes();

        Self { header, payload }
    }

    /// Total encoded size in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }

    /// Encode frame into buffer.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if payload exceeds
    ///   [`FrameHeader::MAX_PAYLOAD_SIZE`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        debug_assert_eq!(self.payload.len(), self.header.payload_size() as usize);

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Decode frame from wire format.
    ///
    /// Validates the header before touching the payload. Trailing bytes past
    /// the claimed payload size are ignored.
    ///
    /// # Errors
    ///
    /// - Any header error from [`FrameHeader::from_bytes`]
    /// - `ProtocolError::FrameTruncated` if fewer payload bytes than claimed
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::from_bytes(bytes)?;

        let payload_size = header.payload_size() as usize;
        let total_size = FrameHeader::SIZE + payload_size;

        let Some(payload) = bytes.get(FrameHeader::SIZE..total_size) else {
            return Err(ProtocolError::FrameTruncated {
                expected: payload_size,
                actual: bytes.len().saturating_sub(FrameHeader::SIZE),
            });
        };

        Ok(Self { header: *header, payload: Bytes::copy_from_slice(payload) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Opcode;

    #[test]
    fn frame_sets_payload_size() {
        let frame = Frame::new(FrameHeader::new(Opcode::Offer), vec![1, 2, 3, 4]);
        assert_eq!(frame.header.payload_size(), 4);
        assert_eq!(frame.encoded_len(), FrameHeader::SIZE + 4);
    }

    #[test]
    fn frame_with_payload() {
        let mut header = FrameHeader::new(Opcode::IceCandidate);
        header.set_session_id(0xABCD);
        let frame = Frame::new(header, b"candidate:1 1 udp 2122260223".to_vec());

        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("should encode");

        let parsed = Frame::decode(&wire).expect("should decode");
        assert_eq!(parsed, frame);
        assert_eq!(parsed.header.session_id(), 0xABCD);
    }

    #[test]
    fn reject_truncated_frame() {
        let mut header = FrameHeader::new(Opcode::Offer);
        header.set_payload_size(100);

        let result = Frame::decode(&header.to_bytes());
        assert!(matches!(result, Err(ProtocolError::FrameTruncated { expected: 100, actual: 0 })));
    }

    #[test]
    fn reject_oversized_encode() {
        let payload = vec![0u8; FrameHeader::MAX_PAYLOAD_SIZE as usize + 1];
        let frame = Frame::new(FrameHeader::new(Opcode::Offer), payload);

        let mut wire = Vec::new();
        assert!(matches!(frame.encode(&mut wire), Err(ProtocolError::PayloadTooLarge { .. })));
        assert!(wire.is_empty());
    }

    #[test]
    fn trailing_bytes_ignored() {
        let frame = Frame::new(FrameHeader::new(Opcode::Answer), vec![9, 9]);
        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("should encode");
        wire.extend_from_slice(&[0xFF; 7]);

        let parsed = Frame::decode(&wire).expect("should decode");
        assert_eq!(parsed.payload.as_ref(), &[9, 9]);
    }
}
