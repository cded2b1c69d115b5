//! Coordinator invariants.

use std::collections::{HashMap, HashSet};

use duet_core::ConnectionState;
use duet_server::CoordinatorSnapshot;

use super::{Invariant, InvariantResult, Violation};

/// No connection is both waiting and in a session.
pub struct QueueSessionExclusive;

impl Invariant for QueueSessionExclusive {
    fn name(&self) -> &'static str {
        "queue_session_exclusive"
    }

    fn check(&self, state: &CoordinatorSnapshot) -> InvariantResult {
        for &conn_id in &state.queue {
            if let Some(session_id) = state.session_of(conn_id) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("connection {conn_id} queued while in session {session_id:032x}"),
                });
            }
        }
        Ok(())
    }
}

/// The queue holds exactly the connections in `Queued` state, once each.
pub struct QueueMembersAreQueued;

impl Invariant for QueueMembersAreQueued {
    fn name(&self) -> &'static str {
        "queue_members_are_queued"
    }

    fn check(&self, state: &CoordinatorSnapshot) -> InvariantResult {
        let mut seen = HashSet::new();
        for &conn_id in &state.queue {
            if !seen.insert(conn_id) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("connection {conn_id} queued twice"),
                });
            }

            match state.connections.get(&conn_id) {
                Some(conn) if conn.state == ConnectionState::Queued => {},
                Some(conn) => {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("connection {conn_id} in queue while {}", conn.state),
                    });
                },
                None => {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("unknown connection {conn_id} in queue"),
                    });
                },
            }
        }

        for (conn_id, conn) in &state.connections {
            if conn.state == ConnectionState::Queued && !seen.contains(conn_id) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("connection {conn_id} queued but missing from queue"),
                });
            }
        }
        Ok(())
    }
}

/// Sessions and connections agree on who is paired with whom.
///
/// Every session has two distinct, live participants that record its id,
/// and every connection that records a session is a participant of it.
pub struct SessionMembership;

impl Invariant for SessionMembership {
    fn name(&self) -> &'static str {
        "session_membership"
    }

    fn check(&self, state: &CoordinatorSnapshot) -> InvariantResult {
        let mut owner = HashMap::new();

        for (&session_id, session) in &state.sessions {
            let [a, b] = session.participants;
            if a == b {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("session {session_id:032x} pairs {a} with itself"),
                });
            }

            for conn_id in [a, b] {
                if let Some(other) = owner.insert(conn_id, session_id) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "connection {conn_id} in sessions {other:032x} and {session_id:032x}"
                        ),
                    });
                }

                let recorded = state.connections.get(&conn_id).and_then(|c| c.session_id);
                if recorded != Some(session_id) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "participant {conn_id} of {session_id:032x} records {recorded:?}"
                        ),
                    });
                }
            }
        }

        for (conn_id, conn) in &state.connections {
            if let Some(session_id) = conn.session_id {
                if owner.get(conn_id) != Some(&session_id) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "connection {conn_id} records ended session {session_id:032x}"
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Participants are `InSession` once negotiation started, `Matched` before.
pub struct NegotiationState;

impl Invariant for NegotiationState {
    fn name(&self) -> &'static str {
        "negotiation_state"
    }

    fn check(&self, state: &CoordinatorSnapshot) -> InvariantResult {
        for (session_id, session) in &state.sessions {
            let expected = if session.negotiating {
                ConnectionState::InSession
            } else {
                ConnectionState::Matched
            };

            for conn_id in session.participants {
                let actual = state.connections.get(&conn_id).map(|c| c.state);
                if actual != Some(expected) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "participant {conn_id} of {session_id:032x} is {actual:?}, expected {expected}"
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use duet_server::{ConnectionSnapshot, SessionSnapshot};

    use super::*;

    fn conn(state: ConnectionState, session_id: Option<u128>, user: &str) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state,
            session_id,
            external_user_id: Some(user.to_string()),
            display_name: Some(user.to_string()),
        }
    }

    fn paired() -> CoordinatorSnapshot {
        let mut state = CoordinatorSnapshot::default();
        state.connections.insert(1, conn(ConnectionState::Matched, Some(9), "a"));
        state.connections.insert(2, conn(ConnectionState::Matched, Some(9), "b"));
        state
            .sessions
            .insert(9, SessionSnapshot { participants: [1, 2], negotiating: false });
        state
    }

    #[test]
    fn consistent_pair_passes() {
        let state = paired();
        assert!(SessionMembership.check(&state).is_ok());
        assert!(NegotiationState.check(&state).is_ok());
        assert!(QueueSessionExclusive.check(&state).is_ok());
    }

    #[test]
    fn queued_participant_is_caught() {
        let mut state = paired();
        state.queue.push(1);

        assert!(QueueSessionExclusive.check(&state).is_err());
        assert!(QueueMembersAreQueued.check(&state).is_err());
    }

    #[test]
    fn stale_session_record_is_caught() {
        let mut state = paired();
        state.sessions.clear();

        let violation = SessionMembership.check(&state).unwrap_err();
        assert_eq!(violation.invariant, "session_membership");
    }

    #[test]
    fn negotiating_requires_in_session() {
        let mut state = paired();
        if let Some(session) = state.sessions.get_mut(&9) {
            session.negotiating = true;
        }
        assert!(NegotiationState.check(&state).is_err());
    }
}
