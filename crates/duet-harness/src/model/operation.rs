//! Operations for model-based testing.
//!
//! Operations are generated from fuzz or proptest bytes through
//! [`arbitrary::Arbitrary`] and applied to both the model and the real
//! coordinator. Client ids wrap around the number of clients in the world, so
//! every generated value names some client.

use arbitrary::Arbitrary;

/// Client identifier (0-indexed, wraps around the world size).
pub type ClientId = u8;

/// Everything a client (or the clock) can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Open a connection. No-op if already connected.
    Connect {
        /// Client connecting
        client: ClientId,
    },

    /// Attach the client's identity.
    Identify {
        /// Client identifying
        client: ClientId,
    },

    /// Enter (or re-enter) the matchmaking queue.
    Join {
        /// Client joining
        client: ClientId,
    },

    /// Leave the matchmaking queue.
    Leave {
        /// Client leaving
        client: ClientId,
    },

    /// Send an offer tagged with the session `via` currently takes part in.
    ///
    /// With `via` equal to the client (or its partner) this is a regular
    /// relay. Any other `via` exercises third-party and stale session ids.
    Relay {
        /// Sending client
        client: ClientId,
        /// Client whose session id is used
        via: ClientId,
    },

    /// End the current session.
    End {
        /// Client ending
        client: ClientId,
    },

    /// Report the partner.
    Report {
        /// Reporting client
        client: ClientId,
    },

    /// Send a frame the server does not accept from clients.
    Garbage {
        /// Client misbehaving
        client: ClientId,
    },

    /// Drop the connection.
    Disconnect {
        /// Client disconnecting
        client: ClientId,
    },

    /// Advance virtual time.
    AdvanceTime {
        /// Seconds to advance
        secs: u8,
    },

    /// Run a housekeeping sweep.
    Tick,
}

impl Operation {
    /// Wrap every client id into `0..num_clients`.
    ///
    /// `num_clients` must be between 1 and 256.
    #[must_use]
    pub fn normalized(self, num_clients: usize) -> Self {
        let wrap = |client: ClientId| (usize::from(client) % num_clients.max(1)) as ClientId;

        match self {
            Self::Connect { client } => Self::Connect { client: wrap(client) },
            Self::Identify { client } => Self::Identify { client: wrap(client) },
            Self::Join { client } => Self::Join { client: wrap(client) },
            Self::Leave { client } => Self::Leave { client: wrap(client) },
            Self::Relay { client, via } => Self::Relay { client: wrap(client), via: wrap(via) },
            Self::End { client } => Self::End { client: wrap(client) },
            Self::Report { client } => Self::Report { client: wrap(client) },
            Self::Garbage { client } => Self::Garbage { client: wrap(client) },
            Self::Disconnect { client } => Self::Disconnect { client: wrap(client) },
            Self::AdvanceTime { .. } | Self::Tick => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_wraps_client_ids() {
        let op = Operation::Relay { client: 7, via: 200 }.normalized(4);
        assert_eq!(op, Operation::Relay { client: 3, via: 0 });
        assert_eq!(Operation::Tick.normalized(4), Operation::Tick);
    }
}
