//! Signaling relay.
//!
//! Forwards opaque negotiation messages (offer, answer, ICE candidate) to the
//! sender's partner in a session. The payload is never parsed, buffered, or
//! broadcast. Delivery is at most once: there is no retry or acknowledgment.
//!
//! Ordering per sender and direction follows from the coordinator being the
//! single serialization point and each client having exactly one outbound
//! stream.

use std::{ops::Sub, time::Duration};

use duet_proto::{Payload, payloads::signal::Signal};

use crate::{server_error::CoordinatorError, session_table::SessionTable};

/// A negotiation message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forward {
    /// Partner of the sender
    pub recipient: u64,
    /// The sender's message, unchanged
    pub payload: Payload,
    /// First message relayed in this session
    pub opened: bool,
}

/// Route `signal` from `from` to its partner.
///
/// # Errors
///
/// - `CoordinatorError::SessionNotFound` if the session does not exist
/// - `CoordinatorError::Validation` if `from` is not a participant
pub fn forward<I>(
    sessions: &mut SessionTable<I>,
    from: u64,
    signal: Signal,
) -> Result<Forward, CoordinatorError>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    let route = sessions.relay(signal.session_id, from, signal.kind)?;

    Ok(Forward { recipient: route.recipient, payload: Payload::Signal(signal), opened: route.opened })
}
