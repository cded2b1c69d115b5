//! Per-connection lifecycle state machine.
//!
//! Tracks where a single connection is in the matchmaking flow. The machine
//! is pure: it never touches the queue or the session table, it only answers
//! "is this transition legal" and records the result. The coordinator keeps
//! it in step with the shared structures.
//!
//! # State Machine
//!
//! ```text
//!                 identify            queue join
//! ┌──────────────┐ ────────> ┌────────────┐ ───────> ┌────────┐
//! │ Disconnected │           │ Identified │          │ Queued │ ── join (reset)
//! └──────────────┘           └────────────┘ <─────── └────────┘
//!        ^                      ^      ^     leave        │
//!        │ close                │      │                  │ matched
//!        │                      │      │ session end      ↓
//!        │                      │      └──────────── ┌─────────┐
//!        │                      │                    │ Matched │
//!        │                      │ session end        └─────────┘
//!        │                      │                         │ first relay
//!        │                 ┌───────────┐                  ↓
//!        └──────────────── │ InSession │ <────────────────┘
//!           (from any)     └───────────┘
//! ```
//!
//! `close` is terminal and reachable from every state.

use std::{fmt, ops::Sub, time::Duration};

use crate::{error::ConnectionError, identity::Identity};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No identity bound (freshly accepted, or closed)
    Disconnected,
    /// Identity bound, not queued, not in a session
    Identified,
    /// Waiting in the matchmaking queue
    Queued,
    /// Paired, no negotiation message relayed yet
    Matched,
    /// Paired, at least one negotiation message relayed
    InSession,
}

impl ConnectionState {
    /// State holds a session.
    #[must_use]
    pub const fn in_session(self) -> bool {
        matches!(self, Self::Matched | Self::InSession)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Identified => "identified",
            Self::Queued => "queued",
            Self::Matched => "matched",
            Self::InSession => "in session",
        })
    }
}

/// Connection state machine
///
/// Generic over `I` (Instant type) so the harness can drive it with virtual
/// time.
///
/// # Invariants
///
/// - `queued_at` is `Some` exactly when the state is `Queued`
/// - `session_id` is `Some` exactly when the state is `Matched` or `InSession`
/// - `identity` is `Some` whenever the state is not `Disconnected`
#[derive(Debug, Clone)]
pub struct Connection<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    state: ConnectionState,
    identity: Option<Identity>,
    session_id: Option<u128>,
    queued_at: Option<I>,
    accepted_at: I,
    closed: bool,
}

impl<I> Connection<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create a new connection in [`ConnectionState::Disconnected`] state
    pub fn new(now: I) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            identity: None,
            session_id: None,
            queued_at: None,
            accepted_at: now,
            closed: false,
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Attached identity. `None` until identified.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Current session. `None` unless matched or in session.
    #[must_use]
    pub fn session_id(&self) -> Option<u128> {
        self.session_id
    }

    /// When the connection last joined the queue. `None` unless queued.
    #[must_use]
    pub fn queued_at(&self) -> Option<I> {
        self.queued_at
    }

    /// When the connection was accepted.
    #[must_use]
    pub fn accepted_at(&self) -> I {
        self.accepted_at
    }

    /// Connection has been closed. No further transitions are accepted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Attach or refresh the identity.
    ///
    /// From `Disconnected` this moves to `Identified`. In any other state the
    /// identity is replaced and the state is unchanged. Returns the previous
    /// identity, if any.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if the connection is closed
    pub fn identify(&mut self, identity: Identity) -> Result<Option<Identity>, ConnectionError> {
        self.ensure_open("identify")?;

        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Identified;
        }

        Ok(self.identity.replace(identity))
    }

    /// Enter the queue, or reset the queue position if already queued.
    ///
    /// Returns `true` if the connection was already queued.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::NotIdentified` if no identity is attached
    /// - `ConnectionError::AlreadyInSession` if matched or in a session
    /// - `ConnectionError::InvalidState` if the connection is closed
    pub fn join_queue(&mut self, now: I) -> Result<bool, ConnectionError> {
        self.ensure_open("join the queue")?;

        match self.state {
            ConnectionState::Disconnected => Err(ConnectionError::NotIdentified),
            ConnectionState::Matched | ConnectionState::InSession => {
                Err(ConnectionError::AlreadyInSession)
            },
            ConnectionState::Identified | ConnectionState::Queued => {
                let was_queued = self.state == ConnectionState::Queued;
                self.state = ConnectionState::Queued;
                self.queued_at = Some(now);
                Ok(was_queued)
            },
        }
    }

    /// Leave the queue. Returns `true` if the connection was queued.
    pub fn leave_queue(&mut self) -> bool {
        if self.state != ConnectionState::Queued {
            return false;
        }

        self.state = ConnectionState::Identified;
        self.queued_at = None;
        true
    }

    /// Record a successful match.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` unless the connection is queued
    pub fn mark_matched(&mut self, session_id: u128) -> Result<(), ConnectionError> {
        if self.closed || self.state != ConnectionState::Queued {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "mark matched",
            });
        }

        self.state = ConnectionState::Matched;
        self.queued_at = None;
        self.session_id = Some(session_id);
        Ok(())
    }

    /// Record a relayed negotiation message in `session_id`.
    ///
    /// Moves `Matched` to `InSession`. Returns `true` if the state changed.
    pub fn mark_relayed(&mut self, session_id: u128) -> bool {
        if self.state != ConnectionState::Matched || self.session_id != Some(session_id) {
            return false;
        }

        self.state = ConnectionState::InSession;
        true
    }

    /// Leave the current session and return to `Identified`.
    ///
    /// Returns the session that was left, or `None` if not in one.
    pub fn end_session(&mut self) -> Option<u128> {
        if !self.state.in_session() {
            return None;
        }

        self.state = ConnectionState::Identified;
        self.session_id.take()
    }

    /// Mark connection as closed. Returns the state it was in.
    pub fn close(&mut self) -> ConnectionState {
        let previous = self.state;

        self.state = ConnectionState::Disconnected;
        self.identity = None;
        self.session_id = None;
        self.queued_at = None;
        self.closed = true;

        previous
    }

    /// Invariants listed on the type hold.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let queue_ok = self.queued_at.is_some() == (self.state == ConnectionState::Queued);
        let session_ok = self.session_id.is_some() == self.state.in_session();
        let identity_ok = self.state == ConnectionState::Disconnected || self.identity.is_some();

        queue_ok && session_ok && identity_ok
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::InvalidState { state: self.state, operation });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn identity(name: &str) -> Identity {
        Identity::new(&format!("{name}-id"), name).expect("valid identity")
    }

    fn identified(now: Instant) -> Connection<Instant> {
        let mut conn = Connection::new(now);
        conn.identify(identity("Otter")).expect("identify");
        conn
    }

    #[test]
    fn starts_disconnected() {
        let conn = Connection::new(Instant::now());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.identity().is_none());
        assert!(conn.is_consistent());
    }

    #[test]
    fn join_requires_identity() {
        let mut conn = Connection::new(Instant::now());
        assert_eq!(conn.join_queue(Instant::now()), Err(ConnectionError::NotIdentified));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn rejoin_resets_position() {
        let t0 = Instant::now();
        let mut conn = identified(t0);

        assert_eq!(conn.join_queue(t0), Ok(false));
        let t1 = t0 + Duration::from_secs(5);
        assert_eq!(conn.join_queue(t1), Ok(true));

        assert_eq!(conn.state(), ConnectionState::Queued);
        assert_eq!(conn.queued_at(), Some(t1));
    }

    #[test]
    fn join_while_matched_is_rejected() {
        let now = Instant::now();
        let mut conn = identified(now);
        conn.join_queue(now).expect("join");
        conn.mark_matched(7).expect("match");

        assert_eq!(conn.join_queue(now), Err(ConnectionError::AlreadyInSession));
        assert_eq!(conn.session_id(), Some(7));
    }

    #[test]
    fn match_requires_queued() {
        let mut conn = identified(Instant::now());
        assert!(matches!(conn.mark_matched(1), Err(ConnectionError::InvalidState { .. })));
    }

    #[test]
    fn first_relay_moves_to_in_session() {
        let now = Instant::now();
        let mut conn = identified(now);
        conn.join_queue(now).expect("join");
        conn.mark_matched(9).expect("match");

        assert!(!conn.mark_relayed(10), "other session is ignored");
        assert!(conn.mark_relayed(9));
        assert!(!conn.mark_relayed(9), "label changes once");
        assert_eq!(conn.state(), ConnectionState::InSession);
        assert!(conn.is_consistent());
    }

    #[test]
    fn end_session_returns_to_identified() {
        let now = Instant::now();
        let mut conn = identified(now);
        conn.join_queue(now).expect("join");
        conn.mark_matched(3).expect("match");

        assert_eq!(conn.end_session(), Some(3));
        assert_eq!(conn.state(), ConnectionState::Identified);
        assert_eq!(conn.end_session(), None);
        assert!(conn.identity().is_some());
    }

    #[test]
    fn identify_refresh_keeps_state() {
        let now = Instant::now();
        let mut conn = identified(now);
        conn.join_queue(now).expect("join");

        let previous = conn.identify(identity("Heron")).expect("refresh");
        assert_eq!(previous.map(|i| i.display_name().to_string()), Some("Otter".to_string()));
        assert_eq!(conn.state(), ConnectionState::Queued);
    }

    #[test]
    fn closed_is_terminal() {
        let now = Instant::now();
        let mut conn = identified(now);
        conn.join_queue(now).expect("join");

        assert_eq!(conn.close(), ConnectionState::Queued);
        assert!(conn.is_closed());
        assert!(conn.identify(identity("Otter")).is_err());
        assert!(conn.join_queue(now).is_err());
        assert!(conn.is_consistent());
    }
}
