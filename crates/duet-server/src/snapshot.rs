//! Point-in-time view of coordinator state.
//!
//! Snapshots are plain data with deterministic ordering, so tests and the
//! simulation harness can compare and check them without touching the live
//! structures.

use std::collections::BTreeMap;

use duet_core::ConnectionState;

/// One connection as seen by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Lifecycle state
    pub state: ConnectionState,
    /// Session recorded on the connection itself
    pub session_id: Option<u128>,
    /// External user id, if identified
    pub external_user_id: Option<String>,
    /// Display name, if identified
    pub display_name: Option<String>,
}

/// One live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Participants in match order
    pub participants: [u64; 2],
    /// At least one negotiation message was relayed
    pub negotiating: bool,
}

/// Whole coordinator state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    /// Accepted connections by id
    pub connections: BTreeMap<u64, ConnectionSnapshot>,
    /// Waiting connections, oldest first
    pub queue: Vec<u64>,
    /// Live sessions by id
    pub sessions: BTreeMap<u128, SessionSnapshot>,
}

impl CoordinatorSnapshot {
    /// Session a connection takes part in, according to the session table.
    pub fn session_of(&self, conn_id: u64) -> Option<u128> {
        self.sessions
            .iter()
            .find(|(_, session)| session.participants.contains(&conn_id))
            .map(|(id, _)| *id)
    }

    /// Connection is waiting in the queue.
    pub fn is_queued(&self, conn_id: u64) -> bool {
        self.queue.contains(&conn_id)
    }
}
