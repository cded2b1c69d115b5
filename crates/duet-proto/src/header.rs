//! Fixed-size frame header, read in place from the receive buffer.
//!
//! The `FrameHeader` is a fixed 32-byte structure serialized as raw binary
//! (Big Endian). The server routes relay frames by reading only the header;
//! negotiation payloads are never deserialized.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    Opcode,
    errors::{ProtocolError, Result},
};

/// Fixed 32-byte frame header (Big Endian network byte order)
///
/// Fields are stored as raw byte arrays so the struct has alignment 1 and
/// every 32-byte pattern is a valid value. Semantic validation (magic, version,
/// payload limit) happens in [`FrameHeader::from_bytes`].
///
/// # Layout
///
/// ```text
/// 0..4    magic         "DUET"
/// 4       version       0x01
/// 5       flags         reserved, zero
/// 6..8    opcode        u16
/// 8..12   request_id    u32 client nonce
/// 12..16  payload_size  u32
/// 16..32  session_id    u128 (zero when the frame is not session scoped)
/// ```
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    magic: [u8; 4],
    version: u8,
    flags: u8,
    pub(crate) opcode: [u8; 2],
    request_id: [u8; 4],
    pub(crate) payload_size: [u8; 4],
    session_id: [u8; 16],
}

impl FrameHeader {
    /// Size of the serialized header (32 bytes)
    pub const SIZE: usize = 32;

    /// Magic number: "DUET" in ASCII (0x44554554)
    pub const MAGIC: u32 = 0x4455_4554;

    /// Current protocol version
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (64 KiB). Session descriptions are a few KiB.
    pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024;

    /// Header for `opcode` with every other field zeroed.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            flags: 0,
            opcode: opcode.to_u16().to_be_bytes(),
            request_id: [0; 4],
            payload_size: [0; 4],
            session_id: [0; 16],
        }
    }

    /// Borrow a header from the front of `bytes` without copying.
    ///
    /// Only the first [`Self::SIZE`] bytes are looked at. The magic, version
    /// and declared payload size are checked; the opcode is not, so unknown
    /// opcodes can still be skipped by length.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let Ok((header, _)) = Self::ref_from_prefix(bytes) else {
            return Err(ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() });
        };

        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.magic != Self::MAGIC.to_be_bytes() {
            return Err(ProtocolError::InvalidMagic);
        }
        if self.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }

        match self.payload_size() {
            size if size > Self::MAX_PAYLOAD_SIZE => Err(ProtocolError::PayloadTooLarge {
                size: size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            }),
            _ => Ok(()),
        }
    }

    /// Wire form of the header.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Protocol version byte.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Reserved flags byte.
    #[must_use]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Operation code as raw u16.
    #[must_use]
    pub fn opcode(&self) -> u16 {
        u16::from_be_bytes(self.opcode)
    }

    /// Operation code as enum. `None` if unrecognized.
    #[must_use]
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode())
    }

    /// Client-assigned nonce for request/response correlation.
    #[must_use]
    pub fn request_id(&self) -> u32 {
        u32::from_be_bytes(self.request_id)
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// Session this frame belongs to. Zero for frames outside a session.
    #[must_use]
    pub fn session_id(&self) -> u128 {
        u128::from_be_bytes(self.session_id)
    }

    /// Set client request nonce.
    pub fn set_request_id(&mut self, request_id: u32) {
        self.request_id = request_id.to_be_bytes();
    }

    /// Set the session this frame belongs to.
    pub fn set_session_id(&mut self, session_id: u128) {
        self.session_id = session_id.to_be_bytes();
    }

    /// Set payload size. [`crate::Frame::new`] does this automatically.
    pub fn set_payload_size(&mut self, size: u32) {
        self.payload_size = size.to_be_bytes();
    }
}

// Can't derive Debug/PartialEq on a packed struct
impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("version", &self.version())
            .field("opcode", &format!("{:#06x}", self.opcode()))
            .field("request_id", &self.request_id())
            .field("payload_size", &self.payload_size())
            .field("session_id", &format!("{:032x}", self.session_id()))
            .finish_non_exhaustive()
    }
}

impl PartialEq for FrameHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for FrameHeader {}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn header_size() {
        assert_eq!(std::mem::size_of::<FrameHeader>(), FrameHeader::SIZE);
    }

    #[test]
    fn new_header_is_valid() {
        let header = FrameHeader::new(Opcode::QueueJoin);
        assert_eq!(header.version(), FrameHeader::VERSION);
        assert_eq!(header.opcode_enum(), Some(Opcode::QueueJoin));
        assert_eq!(header.session_id(), 0);
        assert_eq!(header.payload_size(), 0);
    }

    #[test]
    fn reject_short_buffer() {
        let result = FrameHeader::from_bytes(&[0u8; 16]);
        assert!(matches!(result, Err(ProtocolError::FrameTooShort { expected: 32, actual: 16 })));
    }

    #[test]
    fn reject_invalid_magic() {
        let mut bytes = FrameHeader::new(Opcode::Identify).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(FrameHeader::from_bytes(&bytes), Err(ProtocolError::InvalidMagic)));
    }

    #[test]
    fn reject_invalid_version() {
        let mut bytes = FrameHeader::new(Opcode::Identify).to_bytes();
        bytes[4] = 0x7F;
        assert!(matches!(
            FrameHeader::from_bytes(&bytes),
            Err(ProtocolError::UnsupportedVersion(0x7F))
        ));
    }

    #[test]
    fn reject_oversized_payload() {
        let mut header = FrameHeader::new(Opcode::Offer);
        header.set_payload_size(FrameHeader::MAX_PAYLOAD_SIZE + 1);
        let bytes = header.to_bytes();
        assert!(matches!(
            FrameHeader::from_bytes(&bytes),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    proptest! {
        #[test]
        fn header_accessors(
            session_id in any::<u128>(),
            request_id in any::<u32>(),
            payload_size in 0u32..=FrameHeader::MAX_PAYLOAD_SIZE,
        ) {
            let mut header = FrameHeader::new(Opcode::Answer);
            header.set_session_id(session_id);
            header.set_request_id(request_id);
            header.set_payload_size(payload_size);

            let bytes = header.to_bytes();
            let parsed = FrameHeader::from_bytes(&bytes)?;

            prop_assert_eq!(parsed.session_id(), session_id);
            prop_assert_eq!(parsed.request_id(), request_id);
            prop_assert_eq!(parsed.payload_size(), payload_size);
            prop_assert_eq!(parsed.opcode_enum(), Some(Opcode::Answer));
        }
    }
}
