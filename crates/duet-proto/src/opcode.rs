//! Operation codes.

/// Frame operation code.
///
/// Opcodes are grouped by direction:
/// - `0x01..=0x0F`: client requests
/// - `0x10..=0x1F`: negotiation relay (both directions, opaque payload)
/// - `0x20..=0x2F`: server notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Attach a verified identity to the connection
    Identify = 0x01,
    /// Enter the matchmaking queue
    QueueJoin = 0x02,
    /// Leave the matchmaking queue
    QueueLeave = 0x03,
    /// End the current session
    SessionEnd = 0x04,
    /// Report the partner and end the session
    SessionReport = 0x05,

    /// Session description offer
    Offer = 0x10,
    /// Session description answer
    Answer = 0x11,
    /// ICE candidate
    IceCandidate = 0x12,

    /// Queue position update
    QueueWaiting = 0x20,
    /// A partner was found
    Matched = 0x21,
    /// The partner left the session
    PartnerDisconnected = 0x22,
    /// The queue entry expired before a match was found
    QueueExpired = 0x23,
    /// The last request was rejected
    Rejected = 0x2F,
}

impl Opcode {
    /// Raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a wire value. `None` if unrecognized.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x01 => Some(Self::Identify),
            0x02 => Some(Self::QueueJoin),
            0x03 => Some(Self::QueueLeave),
            0x04 => Some(Self::SessionEnd),
            0x05 => Some(Self::SessionReport),
            0x10 => Some(Self::Offer),
            0x11 => Some(Self::Answer),
            0x12 => Some(Self::IceCandidate),
            0x20 => Some(Self::QueueWaiting),
            0x21 => Some(Self::Matched),
            0x22 => Some(Self::PartnerDisconnected),
            0x23 => Some(Self::QueueExpired),
            0x2F => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Opcode may be sent by a client.
    #[must_use]
    pub const fn is_client_request(self) -> bool {
        matches!(
            self,
            Self::Identify
                | Self::QueueJoin
                | Self::QueueLeave
                | Self::SessionEnd
                | Self::SessionReport
                | Self::Offer
                | Self::Answer
                | Self::IceCandidate
        )
    }

    /// Opcode carries an opaque negotiation payload.
    #[must_use]
    pub const fn is_signal(self) -> bool {
        matches!(self, Self::Offer | Self::Answer | Self::IceCandidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Opcode; 13] = [
        Opcode::Identify,
        Opcode::QueueJoin,
        Opcode::QueueLeave,
        Opcode::SessionEnd,
        Opcode::SessionReport,
        Opcode::Offer,
        Opcode::Answer,
        Opcode::IceCandidate,
        Opcode::QueueWaiting,
        Opcode::Matched,
        Opcode::PartnerDisconnected,
        Opcode::QueueExpired,
        Opcode::Rejected,
    ];

    #[test]
    fn wire_values_round_trip() {
        for opcode in ALL {
            assert_eq!(Opcode::from_u16(opcode.to_u16()), Some(opcode));
        }
    }

    #[test]
    fn unknown_values_rejected() {
        assert_eq!(Opcode::from_u16(0x0000), None);
        assert_eq!(Opcode::from_u16(0x00FF), None);
        assert_eq!(Opcode::from_u16(0xFFFF), None);
    }

    #[test]
    fn notifications_are_not_client_requests() {
        assert!(!Opcode::Matched.is_client_request());
        assert!(!Opcode::Rejected.is_client_request());
        assert!(Opcode::Offer.is_client_request());
        assert!(Opcode::Offer.is_signal());
        assert!(!Opcode::Identify.is_signal());
    }
}
