//! Connection registry.
//!
//! Owns the per-connection state machines and the identity attached to each.
//! The same external user may be attached to several live connections, e.g.
//! while a dropped connection has not timed out yet.

use std::{collections::HashMap, ops::Sub, time::Duration};

use duet_core::{Connection, ConnectionState, Identity};

use crate::server_error::CoordinatorError;

/// Registry of accepted connections.
#[derive(Debug)]
pub struct ConnectionRegistry<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Connection ID → state machine
    connections: HashMap<u64, Connection<I>>,
}

impl<I> Default for ConnectionRegistry<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self { connections: HashMap::new() }
    }
}

impl<I> ConnectionRegistry<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly accepted connection. Returns `false` if the id is taken.
    pub fn accept(&mut self, conn_id: u64, now: I) -> bool {
        if self.connections.contains_key(&conn_id) {
            return false;
        }

        self.connections.insert(conn_id, Connection::new(now));
        true
    }

    /// Attach an identity to a connection.
    ///
    /// Replaces any identity the same connection already had.
    ///
    /// # Errors
    ///
    /// - `CoordinatorError::ConnectionNotFound` if the connection is unknown
    /// - `CoordinatorError::Validation` if the connection is closed
    pub fn register(&mut self, conn_id: u64, identity: Identity) -> Result<(), CoordinatorError> {
        let conn =
            self.connections.get_mut(&conn_id).ok_or(CoordinatorError::ConnectionNotFound(conn_id))?;

        conn.identify(identity)?;
        Ok(())
    }

    /// Remove a connection and its identity.
    ///
    /// The returned connection is already closed and reports the state it was
    /// in. Queue and session cleanup is the caller's job.
    pub fn unregister(&mut self, conn_id: u64) -> Option<(ConnectionState, Option<Identity>)> {
        let mut conn = self.connections.remove(&conn_id)?;
        let identity = conn.identity().cloned();

        Some((conn.close(), identity))
    }

    /// Connection state machine. `None` if unknown.
    pub fn get(&self, conn_id: u64) -> Option<&Connection<I>> {
        self.connections.get(&conn_id)
    }

    /// Mutable connection state machine. `None` if unknown.
    pub fn get_mut(&mut self, conn_id: u64) -> Option<&mut Connection<I>> {
        self.connections.get_mut(&conn_id)
    }

    /// Display name of a connection. `None` if unknown or not identified.
    pub fn display_name(&self, conn_id: u64) -> Option<&str> {
        self.connections.get(&conn_id)?.identity().map(Identity::display_name)
    }

    /// Connections other than `conn_id` identified as `external_user_id`.
    pub fn other_connections_of(&self, external_user_id: &str, conn_id: u64) -> Vec<u64> {
        let mut others: Vec<u64> = self
            .connections
            .iter()
            .filter(|(id, conn)| {
                **id != conn_id
                    && conn.identity().is_some_and(|i| i.external_user_id() == external_user_id)
            })
            .map(|(id, _)| *id)
            .collect();
        others.sort_unstable();
        others
    }

    /// All connections, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &Connection<I>)> + '_ {
        self.connections.iter().map(|(id, conn)| (*id, conn))
    }

    /// Number of accepted connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// No connections are tracked.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of connections with an identity.
    pub fn identified_count(&self) -> usize {
        self.connections.values().filter(|conn| conn.identity().is_some()).count()
    }
}
