//! Session table
//!
//! Live 1:1 sessions keyed by session id, plus a reverse index from
//! connection to session. A session always has exactly two distinct
//! participants. Ending a session removes it; ending it again is a no-op, so
//! each teardown is observed exactly once.

use std::{collections::HashMap, ops::Sub, time::Duration};

use duet_proto::SignalKind;

use crate::server_error::CoordinatorError;

/// An active pairing of two connections.
#[derive(Debug, Clone)]
pub struct Session<I> {
    /// Session id shared with both participants
    pub id: u128,
    /// The two participants, in match order
    pub participants: [u64; 2],
    /// When the match was made
    pub created_at: I,
    /// Cleared when the session ends
    pub active: bool,
    /// Set once the first negotiation message is relayed
    pub negotiating: bool,
    /// Messages relayed from `participants[i]` to the other participant
    pub relayed: [u64; 2],
}

impl<I> Session<I> {
    /// The other participant. `None` if `conn_id` is not a participant.
    pub fn partner_of(&self, conn_id: u64) -> Option<u64> {
        match self.participants {
            [a, b] if a == conn_id => Some(b),
            [a, b] if b == conn_id => Some(a),
            _ => None,
        }
    }

    /// Connection takes part in this session.
    pub fn has_participant(&self, conn_id: u64) -> bool {
        self.participants.contains(&conn_id)
    }
}

/// Where a relayed message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayRoute {
    /// Sole recipient: the sender's partner
    pub recipient: u64,
    /// This was the first message relayed in the session
    pub opened: bool,
}

/// Table of live sessions.
///
/// # Invariants
///
/// - Every session has two distinct participants
/// - `by_connection[c] == s` iff `sessions[s]` has participant `c`
#[derive(Debug)]
pub struct SessionTable<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    sessions: HashMap<u128, Session<I>>,
    by_connection: HashMap<u64, u128>,
}

impl<I> Default for SessionTable<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self { sessions: HashMap::new(), by_connection: HashMap::new() }
    }
}

impl<I> SessionTable<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for two connections.
    ///
    /// # Errors
    ///
    /// - `CoordinatorError::InvariantViolation` if the participants are the
    ///   same connection, either is already in a session, or the id is taken
    pub fn create(
        &mut self,
        session_id: u128,
        a: u64,
        b: u64,
        now: I,
    ) -> Result<&Session<I>, CoordinatorError> {
        if a == b {
            return Err(CoordinatorError::InvariantViolation {
                conn_id: a,
                detail: "paired with itself".to_string(),
            });
        }

        for conn_id in [a, b] {
            if let Some(existing) = self.by_connection.get(&conn_id) {
                return Err(CoordinatorError::InvariantViolation {
                    conn_id,
                    detail: format!("already in session {existing:032x}"),
                });
            }
        }

        if self.sessions.contains_key(&session_id) {
            return Err(CoordinatorError::InvariantViolation {
                conn_id: a,
                detail: format!("session id {session_id:032x} already in use"),
            });
        }

        self.by_connection.insert(a, session_id);
        self.by_connection.insert(b, session_id);

        let session = Session {
            id: session_id,
            participants: [a, b],
            created_at: now,
            active: true,
            negotiating: false,
            relayed: [0, 0],
        };

        Ok(self.sessions.entry(session_id).or_insert(session))
    }

    /// Route a negotiation message from `from` within `session_id`.
    ///
    /// Counts the message and marks the session as negotiating. The kind is
    /// only used for error context; routing does not depend on it.
    ///
    /// # Errors
    ///
    /// - `CoordinatorError::SessionNotFound` if the session does not exist
    /// - `CoordinatorError::Validation` if `from` is not a participant
    pub fn relay(
        &mut self,
        session_id: u128,
        from: u64,
        kind: SignalKind,
    ) -> Result<RelayRoute, CoordinatorError> {
        let session =
            self.sessions.get_mut(&session_id).ok_or(CoordinatorError::SessionNotFound(session_id))?;

        let Some(sender_index) = session.participants.iter().position(|&p| p == from) else {
            return Err(CoordinatorError::Validation(format!(
                "{kind} from non-member {from} in session {session_id:032x}"
            )));
        };

        let recipient = session.participants[1 - sender_index];
        let opened = !session.negotiating;

        session.negotiating = true;
        session.relayed[sender_index] += 1;

        Ok(RelayRoute { recipient, opened })
    }

    /// End and remove a session.
    ///
    /// Returns the ended session, or `None` if it was unknown or already
    /// ended.
    pub fn end(&mut self, session_id: u128) -> Option<Session<I>> {
        let mut session = self.sessions.remove(&session_id)?;

        for conn_id in session.participants {
            self.by_connection.remove(&conn_id);
        }

        session.active = false;
        Some(session)
    }

    /// Session a connection takes part in.
    pub fn session_of(&self, conn_id: u64) -> Option<u128> {
        self.by_connection.get(&conn_id).copied()
    }

    /// Session by id.
    pub fn get(&self, session_id: u128) -> Option<&Session<I>> {
        self.sessions.get(&session_id)
    }

    /// Session id is in use.
    pub fn contains(&self, session_id: u128) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// Sessions created more than `max_age` before `now`.
    pub fn expired(&self, now: I, max_age: Duration) -> Vec<u128> {
        let mut expired: Vec<_> = self
            .sessions
            .values()
            .filter(|s| now - s.created_at > max_age)
            .map(|s| (s.created_at, s.id))
            .collect();

        // Oldest first, so teardown order does not depend on hash order.
        expired.sort_unstable();
        expired.into_iter().map(|(_, id)| id).collect()
    }

    /// All live sessions, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Session<I>> + '_ {
        self.sessions.values()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// No live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn create_and_lookup() {
        let mut table = SessionTable::new();
        let session = table.create(77, 1, 2, Instant::now()).expect("create");

        assert_eq!(session.participants, [1, 2]);
        assert!(session.active);
        assert_eq!(session.partner_of(1), Some(2));
        assert_eq!(session.partner_of(2), Some(1));
        assert_eq!(session.partner_of(3), None);

        assert_eq!(table.session_of(1), Some(77));
        assert_eq!(table.session_of(2), Some(77));
    }

    #[test]
    fn self_pairing_is_an_invariant_violation() {
        let mut table = SessionTable::new();
        assert!(matches!(
            table.create(1, 5, 5, Instant::now()),
            Err(CoordinatorError::InvariantViolation { conn_id: 5, .. })
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn participant_cannot_join_two_sessions() {
        let mut table = SessionTable::new();
        let now = Instant::now();
        table.create(1, 10, 11, now).expect("first");

        assert!(table.create(2, 11, 12, now).is_err());
        assert_eq!(table.session_of(12), None);
    }

    #[test]
    fn relay_goes_to_partner_only() {
        let mut table = SessionTable::new();
        table.create(9, 1, 2, Instant::now()).expect("create");

        let first = table.relay(9, 1, SignalKind::Offer).expect("relay");
        assert_eq!(first, RelayRoute { recipient: 2, opened: true });

        let second = table.relay(9, 2, SignalKind::Answer).expect("relay");
        assert_eq!(second, RelayRoute { recipient: 1, opened: false });

        table.relay(9, 1, SignalKind::IceCandidate).expect("relay");
        assert_eq!(table.get(9).map(|s| s.relayed), Some([2, 1]));
    }

    #[test]
    fn relay_errors() {
        let mut table = SessionTable::new();
        table.create(9, 1, 2, Instant::now()).expect("create");

        assert_eq!(
            table.relay(8, 1, SignalKind::Offer),
            Err(CoordinatorError::SessionNotFound(8))
        );
        assert!(matches!(table.relay(9, 3, SignalKind::Offer), Err(CoordinatorError::Validation(_))));
        assert_eq!(table.get(9).map(|s| s.negotiating), Some(false));
    }

    #[test]
    fn end_is_idempotent() {
        let mut table = SessionTable::new();
        table.create(9, 1, 2, Instant::now()).expect("create");

        let ended = table.end(9).expect("first end");
        assert!(!ended.active);
        assert!(table.end(9).is_none());
        assert_eq!(table.session_of(1), None);
        assert_eq!(table.session_of(2), None);
    }

    #[test]
    fn expired_is_oldest_first() {
        let mut table = SessionTable::new();
        let t0 = Instant::now();

        table.create(3, 5, 6, t0 + Duration::from_secs(10)).expect("create");
        table.create(1, 1, 2, t0).expect("create");
        table.create(2, 3, 4, t0 + Duration::from_secs(350)).expect("create");

        let now = t0 + Duration::from_secs(400);
        assert_eq!(table.expired(now, Duration::from_secs(300)), vec![1, 3]);
    }
}
