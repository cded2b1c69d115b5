//! Coordinator.
//!
//! Ties together the connection registry, the matchmaking queue, the session
//! table and the housekeeper. Every state change in the server goes through
//! [`Coordinator::process_event`], one event at a time, so queue membership
//! and session membership can never be observed half-updated.
//!
//! The coordinator performs no I/O. It returns [`CoordinatorAction`]s that the
//! runtime (production or simulation) executes.

use std::fmt;

use duet_core::{ConnectionState, Environment, Identity};
use duet_proto::{
    ErrorPayload, Frame, Payload,
    payloads::{
        session::{Matched, QueueWaiting},
        signal::Signal,
    },
};

use crate::{
    housekeeper::{Housekeeper, HousekeeperConfig},
    queue::MatchmakingQueue,
    registry::ConnectionRegistry,
    relay,
    server_error::CoordinatorError,
    session_table::SessionTable,
    snapshot::{ConnectionSnapshot, CoordinatorSnapshot, SessionSnapshot},
};

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Cleanup limits and sweep interval
    pub housekeeper: HousekeeperConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            housekeeper: HousekeeperConfig::default(),
        }
    }
}

/// Events that the coordinator processes.
///
/// These are produced by the external runtime (simulation or production).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// A new connection was accepted
    ConnectionAccepted {
        /// Unique connection ID assigned by the runtime
        conn_id: u64,
    },

    /// Client attached its identity
    Identify {
        /// Sending connection
        conn_id: u64,
        /// Stable user reference from the identity provider
        external_user_id: String,
        /// Name shown to the partner
        display_name: String,
    },

    /// Client wants a partner
    QueueJoin {
        /// Sending connection
        conn_id: u64,
    },

    /// Client no longer wants a partner
    QueueLeave {
        /// Sending connection
        conn_id: u64,
    },

    /// Negotiation message for the sender's partner
    Relay {
        /// Sending connection
        conn_id: u64,
        /// The message, with the session it claims to belong to
        signal: Signal,
    },

    /// Client ends its current session
    SessionEnd {
        /// Sending connection
        conn_id: u64,
    },

    /// Client reports its partner and ends the session
    SessionReport {
        /// Sending connection
        conn_id: u64,
        /// Free-form reason given by the reporter
        reason: String,
    },

    /// Client sent a frame that could not be turned into a request
    MalformedFrame {
        /// Sending connection
        conn_id: u64,
        /// Decode failure
        reason: String,
    },

    /// A connection was closed (by peer or error)
    Disconnect {
        /// Connection that was closed
        conn_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// Periodic tick for housekeeping
    Tick,
}

impl CoordinatorEvent {
    /// Turn a frame received from `conn_id` into an event.
    ///
    /// Frames that do not decode, or that carry a server-only opcode, become
    /// [`CoordinatorEvent::MalformedFrame`].
    pub fn from_frame(conn_id: u64, frame: &Frame) -> Self {
        if let Some(opcode) = frame.header.opcode_enum() {
            if !opcode.is_client_request() {
                return Self::MalformedFrame {
                    conn_id,
                    reason: format!("unexpected opcode {:#06x}", opcode.to_u16()),
                };
            }
        }

        match Payload::from_frame(frame) {
            Ok(Payload::Identify(identify)) => Self::Identify {
                conn_id,
                external_user_id: identify.external_user_id,
                display_name: identify.display_name,
            },
            Ok(Payload::QueueJoin) => Self::QueueJoin { conn_id },
            Ok(Payload::QueueLeave) => Self::QueueLeave { conn_id },
            Ok(Payload::SessionEnd) => Self::SessionEnd { conn_id },
            Ok(Payload::SessionReport(report)) => {
                Self::SessionReport { conn_id, reason: report.reason }
            },
            Ok(Payload::Signal(signal)) => Self::Relay { conn_id, signal },
            Ok(
                other @ (Payload::QueueWaiting(_)
                | Payload::Matched(_)
                | Payload::PartnerDisconnected
                | Payload::QueueExpired
                | Payload::Rejected(_)),
            ) => Self::MalformedFrame {
                conn_id,
                reason: format!("unexpected opcode {:#06x}", other.opcode().to_u16()),
            },
            Err(e) => Self::MalformedFrame { conn_id, reason: e.to_string() },
        }
    }

    /// Connection the event concerns. `None` for `Tick`.
    pub fn conn_id(&self) -> Option<u64> {
        match self {
            Self::ConnectionAccepted { conn_id }
            | Self::Identify { conn_id, .. }
            | Self::QueueJoin { conn_id }
            | Self::QueueLeave { conn_id }
            | Self::Relay { conn_id, .. }
            | Self::SessionEnd { conn_id }
            | Self::SessionReport { conn_id, .. }
            | Self::MalformedFrame { conn_id, .. }
            | Self::Disconnect { conn_id, .. } => Some(*conn_id),
            Self::Tick => None,
        }
    }
}

/// Actions that the coordinator produces.
///
/// These are executed by runtime-specific code (production or simulation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorAction<I> {
    /// Send a payload to one connection
    Notify {
        /// Target connection
        conn_id: u64,
        /// Payload to send
        payload: Payload,
    },

    /// Close a connection
    CloseConnection {
        /// Connection to close
        conn_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// Log a message (for debugging/monitoring)
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
        /// When the event occurred
        timestamp: I,
    },
}

/// Log levels for coordinator actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

type Actions<E> = Vec<CoordinatorAction<<E as Environment>::Instant>>;

/// Action-based matchmaking coordinator.
///
/// # Invariants
///
/// - A connection is never both queued and in a session
/// - Every queued connection is identified and in `Queued` state
/// - Every session participant is in `Matched` or `InSession` state and
///   records that session's id
pub struct Coordinator<E>
where
    E: Environment,
{
    /// Connection state machines and identities
    registry: ConnectionRegistry<E::Instant>,
    /// Connections waiting for a partner
    queue: MatchmakingQueue<E::Instant>,
    /// Live sessions
    sessions: SessionTable<E::Instant>,
    /// Stale entry and over-age session cleanup
    housekeeper: Housekeeper,
    /// Environment (time, RNG)
    env: E,
    /// Coordinator configuration
    config: CoordinatorConfig,
}

impl<E> Coordinator<E>
where
    E: Environment,
{
    /// Create a new coordinator.
    pub fn new(env: E, config: CoordinatorConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            queue: MatchmakingQueue::new(),
            sessions: SessionTable::new(),
            housekeeper: Housekeeper::new(config.housekeeper),
            env,
            config,
        }
    }

    /// Process an event and return actions to execute.
    ///
    /// # Errors
    ///
    /// - `CoordinatorError::ConnectionNotFound` if the event names a
    ///   connection that was never accepted or is already gone. Every other
    ///   failure is reported to the offending client or logged.
    pub fn process_event(&mut self, event: CoordinatorEvent) -> Result<Actions<E>, CoordinatorError> {
        match event {
            CoordinatorEvent::ConnectionAccepted { conn_id } => {
                Ok(self.handle_connection_accepted(conn_id))
            },
            CoordinatorEvent::Identify { conn_id, external_user_id, display_name } => {
                self.handle_identify(conn_id, &external_user_id, &display_name)
            },
            CoordinatorEvent::QueueJoin { conn_id } => self.handle_queue_join(conn_id),
            CoordinatorEvent::QueueLeave { conn_id } => self.handle_queue_leave(conn_id),
            CoordinatorEvent::Relay { conn_id, signal } => self.handle_relay(conn_id, signal),
            CoordinatorEvent::SessionEnd { conn_id } => self.handle_session_end(conn_id),
            CoordinatorEvent::SessionReport { conn_id, reason } => {
                self.handle_session_report(conn_id, &reason)
            },
            CoordinatorEvent::MalformedFrame { conn_id, reason } => {
                self.handle_malformed_frame(conn_id, reason)
            },
            CoordinatorEvent::Disconnect { conn_id, reason } => {
                self.handle_disconnect(conn_id, &reason)
            },
            CoordinatorEvent::Tick => Ok(self.handle_tick()),
        }
    }

    fn handle_connection_accepted(&mut self, conn_id: u64) -> Actions<E> {
        let now = self.env.now();

        if self.registry.len() >= self.config.max_connections {
            return vec![
                CoordinatorAction::CloseConnection {
                    conn_id,
                    reason: "max connections exceeded".to_string(),
                },
                self.log(
                    LogLevel::Warn,
                    format!(
                        "connection {conn_id} refused: {} connections open",
                        self.registry.len()
                    ),
                ),
            ];
        }

        if !self.registry.accept(conn_id, now) {
            return vec![self.log(LogLevel::Warn, format!("connection {conn_id} already accepted"))];
        }

        vec![self.log(LogLevel::Debug, format!("connection {conn_id} accepted"))]
    }

    fn handle_identify(
        &mut self,
        conn_id: u64,
        external_user_id: &str,
        display_name: &str,
    ) -> Result<Actions<E>, CoordinatorError> {
        self.ensure_known(conn_id)?;

        let result = Identity::new(external_user_id, display_name)
            .map_err(CoordinatorError::from)
            .and_then(|identity| self.registry.register(conn_id, identity));

        match result {
            Ok(()) => {
                let name = self.registry.display_name(conn_id).unwrap_or_default();
                let mut actions = vec![
                    self.log(LogLevel::Info, format!("connection {conn_id} identified as '{name}'")),
                ];

                let others = self.registry.other_connections_of(external_user_id.trim(), conn_id);
                if !others.is_empty() {
                    actions.push(self.log(
                        LogLevel::Debug,
                        format!("connection {conn_id} shares its user with {others:?}"),
                    ));
                }

                Ok(actions)
            },
            Err(CoordinatorError::Validation(reason)) => Ok(self.reject(conn_id, "identify", reason)),
            Err(err) => Err(err),
        }
    }

    fn handle_queue_join(&mut self, conn_id: u64) -> Result<Actions<E>, CoordinatorError> {
        self.ensure_known(conn_id)?;
        let now = self.env.now();

        let mut actions = self.repair_exclusivity(conn_id);

        let joined = match self.registry.get_mut(conn_id) {
            Some(conn) => conn.join_queue(now),
            None => return Err(CoordinatorError::ConnectionNotFound(conn_id)),
        };

        if let Err(err) = joined {
            actions.extend(self.reject(conn_id, "queue join", err.to_string()));
            return Ok(actions);
        }

        let size = self.queue.join(conn_id, now);
        actions.push(CoordinatorAction::Notify {
            conn_id,
            payload: Payload::QueueWaiting(QueueWaiting {
                queue_size: u32::try_from(size).unwrap_or(u32::MAX),
            }),
        });
        actions.push(self.log(LogLevel::Debug, format!("connection {conn_id} queued ({size} waiting)")));

        self.try_match(&mut actions);
        Ok(actions)
    }

    fn handle_queue_leave(&mut self, conn_id: u64) -> Result<Actions<E>, CoordinatorError> {
        let conn =
            self.registry.get_mut(conn_id).ok_or(CoordinatorError::ConnectionNotFound(conn_id))?;

        let was_queued = conn.leave_queue();
        self.queue.leave(conn_id);

        if !was_queued {
            return Ok(Vec::new());
        }

        Ok(vec![self.log(LogLevel::Debug, format!("connection {conn_id} left the queue"))])
    }

    fn handle_relay(&mut self, conn_id: u64, signal: Signal) -> Result<Actions<E>, CoordinatorError> {
        self.ensure_known(conn_id)?;

        let session_id = signal.session_id;
        let kind = signal.kind;

        match relay::forward(&mut self.sessions, conn_id, signal) {
            Ok(forward) => {
                let recipient = forward.recipient;
                let mut actions =
                    vec![CoordinatorAction::Notify { conn_id: recipient, payload: forward.payload }];

                if forward.opened {
                    for participant in [conn_id, recipient] {
                        if let Some(conn) = self.registry.get_mut(participant) {
                            conn.mark_relayed(session_id);
                        }
                    }
                    actions.push(self.log(
                        LogLevel::Debug,
                        format!("session {session_id:032x} negotiating ({kind} from {conn_id})"),
                    ));
                }

                Ok(actions)
            },
            Err(CoordinatorError::SessionNotFound(_)) => Ok(vec![self.log(
                LogLevel::Debug,
                format!("dropped {kind} from {conn_id}: session {session_id:032x} not found"),
            )]),
            Err(CoordinatorError::Validation(reason)) => {
                Ok(vec![self.log(LogLevel::Warn, format!("dropped {reason}"))])
            },
            Err(err) => Err(err),
        }
    }

    fn handle_session_end(&mut self, conn_id: u64) -> Result<Actions<E>, CoordinatorError> {
        self.ensure_known(conn_id)?;
        let mut actions = Vec::new();

        match self.sessions.session_of(conn_id) {
            Some(session_id) => {
                self.end_session(session_id, Some(conn_id), "ended by participant", &mut actions);
            },
            None => actions.push(
                self.log(LogLevel::Debug, format!("session end from {conn_id} ignored: no session")),
            ),
        }

        Ok(actions)
    }

    fn handle_session_report(
        &mut self,
        conn_id: u64,
        reason: &str,
    ) -> Result<Actions<E>, CoordinatorError> {
        self.ensure_known(conn_id)?;

        let Some(session_id) = self.sessions.session_of(conn_id) else {
            return Ok(self.reject(conn_id, "report", "not in a session".to_string()));
        };

        let mut actions = Vec::new();
        if let Some(partner) = self.sessions.get(session_id).and_then(|s| s.partner_of(conn_id)) {
            actions.push(self.log(
                LogLevel::Warn,
                format!(
                    "connection {conn_id} reported {partner} in session {session_id:032x}: {reason}"
                ),
            ));
        }

        self.end_session(session_id, Some(conn_id), "reported", &mut actions);
        Ok(actions)
    }

    fn handle_malformed_frame(
        &mut self,
        conn_id: u64,
        reason: String,
    ) -> Result<Actions<E>, CoordinatorError> {
        self.ensure_known(conn_id)?;

        let message = format!("malformed frame from {conn_id}: {reason}");
        Ok(vec![
            CoordinatorAction::Notify {
                conn_id,
                payload: Payload::Rejected(ErrorPayload::invalid_payload(reason)),
            },
            self.log(LogLevel::Debug, message),
        ])
    }

    fn handle_disconnect(&mut self, conn_id: u64, reason: &str) -> Result<Actions<E>, CoordinatorError> {
        let (state, accepted_at) = self
            .registry
            .get(conn_id)
            .map(|conn| (conn.state(), conn.accepted_at()))
            .ok_or(CoordinatorError::ConnectionNotFound(conn_id))?;
        let lifetime = self.env.now() - accepted_at;

        let mut actions = Vec::new();

        self.queue.leave(conn_id);
        if let Some(session_id) = self.sessions.session_of(conn_id) {
            self.end_session(session_id, Some(conn_id), "participant disconnected", &mut actions);
        }
        self.registry.unregister(conn_id);

        actions.push(
            self.log(
                LogLevel::Info,
                format!("connection {conn_id} closed while {state} after {lifetime:?}: {reason}"),
            ),
        );
        Ok(actions)
    }

    fn handle_tick(&mut self) -> Actions<E> {
        let now = self.env.now();
        let mut actions = Vec::new();

        let sweep = self.housekeeper.sweep(now, &mut self.queue, &self.sessions);

        for conn_id in sweep.evicted {
            let waited = self.registry.get_mut(conn_id).and_then(|conn| {
                let queued_at = conn.queued_at();
                conn.leave_queue();
                queued_at
            });
            actions.push(CoordinatorAction::Notify { conn_id, payload: Payload::QueueExpired });
            actions.push(self.log(
                LogLevel::Info,
                format!("connection {conn_id} expired from queue after {:?}", waited.map(|t| now - t)),
            ));
        }

        for session_id in sweep.expired_sessions {
            self.end_session(session_id, None, "max age exceeded", &mut actions);
        }

        actions.push(self.log(
            LogLevel::Debug,
            format!(
                "sweep {}: {} connections ({} identified), {} queued, {} sessions",
                self.housekeeper.sweeps(),
                self.registry.len(),
                self.registry.identified_count(),
                self.queue.len(),
                self.sessions.len()
            ),
        ));

        actions
    }

    /// Pair queued connections until fewer than two are waiting.
    fn try_match(&mut self, actions: &mut Actions<E>) {
        loop {
            let head: Vec<u64> = self.queue.iter().take(2).collect();
            if head.len() < 2 {
                break;
            }

            let mut repaired = false;
            for conn_id in head {
                let repair = self.repair_exclusivity(conn_id);
                repaired |= !repair.is_empty();
                actions.extend(repair);
            }
            if repaired {
                continue;
            }

            let Some((a, b)) = self.queue.pop_pair() else {
                break;
            };
            let now = self.env.now();
            let session_id = self.fresh_session_id();

            let created = self.sessions.create(session_id, a, b, now).map(|_| ());
            if let Err(err) = created {
                // Both are out of the queue already; leave them identified.
                for conn_id in [a, b] {
                    if let Some(conn) = self.registry.get_mut(conn_id) {
                        conn.leave_queue();
                    }
                }
                actions.push(self.log(LogLevel::Error, format!("match of {a} and {b} failed: {err}")));
                continue;
            }

            for conn_id in [a, b] {
                let marked = self
                    .registry
                    .get_mut(conn_id)
                    .map(|conn| conn.mark_matched(session_id));
                if let Some(Err(err)) = marked {
                    actions.push(
                        self.log(LogLevel::Error, format!("connection {conn_id} not matchable: {err}")),
                    );
                }
            }

            let name_a = self.registry.display_name(a).unwrap_or_default().to_owned();
            let name_b = self.registry.display_name(b).unwrap_or_default().to_owned();

            actions.push(CoordinatorAction::Notify {
                conn_id: a,
                payload: Payload::Matched(Matched { session_id, partner_display_name: name_b }),
            });
            actions.push(CoordinatorAction::Notify {
                conn_id: b,
                payload: Payload::Matched(Matched { session_id, partner_display_name: name_a }),
            });
            actions.push(
                self.log(LogLevel::Info, format!("session {session_id:032x} created for {a} and {b}")),
            );
        }
    }

    /// Tear down a session exactly once.
    ///
    /// Every participant except `initiator` is told its partner left. Both
    /// participants return to `Identified`. Unknown or already-ended sessions
    /// are a no-op.
    fn end_session(
        &mut self,
        session_id: u128,
        initiator: Option<u64>,
        reason: &str,
        actions: &mut Actions<E>,
    ) {
        let Some(session) = self.sessions.end(session_id) else {
            return;
        };
        let now = self.env.now();

        for conn_id in session.participants {
            if let Some(conn) = self.registry.get_mut(conn_id) {
                conn.end_session();
            }
            if Some(conn_id) != initiator {
                actions.push(CoordinatorAction::Notify {
                    conn_id,
                    payload: Payload::PartnerDisconnected,
                });
            }
        }

        let [a, b] = session.participants;
        actions.push(self.log(
            LogLevel::Info,
            format!(
                "session {session_id:032x} ended ({reason}) after {:?}, relayed {a}->{b}: {}, {b}->{a}: {}",
                now - session.created_at,
                session.relayed[0],
                session.relayed[1]
            ),
        ));
    }

    /// Evict a connection found both queued and in a session.
    fn repair_exclusivity(&mut self, conn_id: u64) -> Actions<E> {
        let queued = self.queue.contains(conn_id);
        let session = self.sessions.session_of(conn_id);

        debug_assert!(
            !(queued && session.is_some()),
            "connection {conn_id} is both queued and in a session"
        );

        let (true, Some(session_id)) = (queued, session) else {
            return Vec::new();
        };

        let violation = CoordinatorError::InvariantViolation {
            conn_id,
            detail: format!("queued while in session {session_id:032x}"),
        };
        let mut actions = vec![self.log(LogLevel::Error, format!("{violation}, evicting"))];

        self.queue.leave(conn_id);
        if let Some(conn) = self.registry.get_mut(conn_id) {
            conn.leave_queue();
        }
        self.end_session(session_id, Some(conn_id), "invariant repair", &mut actions);

        actions
    }

    /// Draw a session id that is non-zero and not in use.
    fn fresh_session_id(&self) -> u128 {
        loop {
            let candidate = self.env.random_u128();
            if candidate != 0 && !self.sessions.contains(candidate) {
                return candidate;
            }
        }
    }

    fn ensure_known(&self, conn_id: u64) -> Result<(), CoordinatorError> {
        match self.registry.get(conn_id) {
            Some(_) => Ok(()),
            None => Err(CoordinatorError::ConnectionNotFound(conn_id)),
        }
    }

    fn reject(&self, conn_id: u64, operation: &str, reason: String) -> Actions<E> {
        let message = format!("rejected {operation} from {conn_id}: {reason}");
        vec![
            CoordinatorAction::Notify {
                conn_id,
                payload: Payload::Rejected(ErrorPayload::validation(reason)),
            },
            self.log(LogLevel::Debug, message),
        ]
    }

    fn log(&self, level: LogLevel, message: String) -> CoordinatorAction<E::Instant> {
        CoordinatorAction::Log { level, message, timestamp: self.env.now() }
    }

    /// Number of accepted connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of connections waiting for a partner.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Lifecycle state of a connection. `None` if unknown.
    pub fn connection_state(&self, conn_id: u64) -> Option<ConnectionState> {
        self.registry.get(conn_id).map(|conn| conn.state())
    }

    /// Session a connection takes part in.
    pub fn session_of(&self, conn_id: u64) -> Option<u128> {
        self.sessions.session_of(conn_id)
    }

    /// Coordinator configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Copy of the full coordinator state.
    pub fn snapshot(&self) -> CoordinatorSnapshot {
        let connections = self
            .registry
            .iter()
            .map(|(conn_id, conn)| {
                (conn_id, ConnectionSnapshot {
                    state: conn.state(),
                    session_id: conn.session_id(),
                    external_user_id: conn.identity().map(|i| i.external_user_id().to_owned()),
                    display_name: conn.identity().map(|i| i.display_name().to_owned()),
                })
            })
            .collect();

        let sessions = self
            .sessions
            .iter()
            .map(|session| {
                (session.id, SessionSnapshot {
                    participants: session.participants,
                    negotiating: session.negotiating,
                })
            })
            .collect();

        CoordinatorSnapshot { connections, queue: self.queue.iter().collect(), sessions }
    }
}

impl<E> fmt::Debug for Coordinator<E>
where
    E: Environment,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("connections", &self.registry.len())
            .field("queued", &self.queue.len())
            .field("sessions", &self.sessions.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::{Duration, Instant},
    };

    use bytes::Bytes;
    use duet_proto::SignalKind;

    use super::*;

    /// Real clock, counter-based randomness.
    #[derive(Clone, Default)]
    struct TestEnv {
        counter: Arc<AtomicU64>,
    }

    impl Environment for TestEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            Instant::now()
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            let value = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = value.to_le_bytes()[i % 8];
            }
        }
    }

    type Action = CoordinatorAction<Instant>;

    fn coordinator() -> Coordinator<TestEnv> {
        Coordinator::new(TestEnv::default(), CoordinatorConfig::default())
    }

    fn connect(coordinator: &mut Coordinator<TestEnv>, conn_id: u64, user: &str) {
        coordinator.process_event(CoordinatorEvent::ConnectionAccepted { conn_id }).unwrap();
        coordinator
            .process_event(CoordinatorEvent::Identify {
                conn_id,
                external_user_id: user.to_string(),
                display_name: format!("{user}-name"),
            })
            .unwrap();
    }

    fn notifications(actions: &[Action]) -> Vec<(u64, Payload)> {
        actions
            .iter()
            .filter_map(|action| match action {
                CoordinatorAction::Notify { conn_id, payload } => Some((*conn_id, payload.clone())),
                _ => None,
            })
            .collect()
    }

    fn matched_pair(coordinator: &mut Coordinator<TestEnv>) -> u128 {
        connect(coordinator, 1, "u1");
        connect(coordinator, 2, "u2");
        coordinator.process_event(CoordinatorEvent::QueueJoin { conn_id: 1 }).unwrap();
        coordinator.process_event(CoordinatorEvent::QueueJoin { conn_id: 2 }).unwrap();
        coordinator.session_of(1).unwrap()
    }

    fn offer(conn_id: u64, session_id: u128) -> CoordinatorEvent {
        CoordinatorEvent::Relay {
            conn_id,
            signal: Signal { kind: SignalKind::Offer, session_id, data: Bytes::from_static(b"sdp") },
        }
    }

    #[test]
    fn accepts_connection() {
        let mut coordinator = coordinator();
        let actions =
            coordinator.process_event(CoordinatorEvent::ConnectionAccepted { conn_id: 1 }).unwrap();

        assert_eq!(coordinator.connection_count(), 1);
        assert_eq!(coordinator.connection_state(1), Some(ConnectionState::Disconnected));
        assert!(matches!(actions[0], CoordinatorAction::Log { level: LogLevel::Debug, .. }));
    }

    #[test]
    fn refuses_when_max_connections_exceeded() {
        let config = CoordinatorConfig { max_connections: 2, ..Default::default() };
        let mut coordinator = Coordinator::new(TestEnv::default(), config);

        coordinator.process_event(CoordinatorEvent::ConnectionAccepted { conn_id: 1 }).unwrap();
        coordinator.process_event(CoordinatorEvent::ConnectionAccepted { conn_id: 2 }).unwrap();
        let actions =
            coordinator.process_event(CoordinatorEvent::ConnectionAccepted { conn_id: 3 }).unwrap();

        assert_eq!(coordinator.connection_count(), 2);
        assert!(matches!(actions[0], CoordinatorAction::CloseConnection { conn_id: 3, .. }));
    }

    #[test]
    fn unknown_connection_is_an_error() {
        let mut coordinator = coordinator();
        let result = coordinator.process_event(CoordinatorEvent::QueueJoin { conn_id: 9 });
        assert_eq!(result, Err(CoordinatorError::ConnectionNotFound(9)));
    }

    #[test]
    fn join_before_identify_is_rejected() {
        let mut coordinator = coordinator();
        coordinator.process_event(CoordinatorEvent::ConnectionAccepted { conn_id: 1 }).unwrap();

        let actions = coordinator.process_event(CoordinatorEvent::QueueJoin { conn_id: 1 }).unwrap();

        assert_eq!(notifications(&actions), vec![(
            1,
            Payload::Rejected(ErrorPayload::validation("not identified"))
        )]);
        assert_eq!(coordinator.queue_len(), 0);
    }

    #[test]
    fn invalid_identity_is_rejected() {
        let mut coordinator = coordinator();
        coordinator.process_event(CoordinatorEvent::ConnectionAccepted { conn_id: 1 }).unwrap();

        let actions = coordinator
            .process_event(CoordinatorEvent::Identify {
                conn_id: 1,
                external_user_id: "  ".to_string(),
                display_name: "Ana".to_string(),
            })
            .unwrap();

        let sent = notifications(&actions);
        assert!(matches!(
            &sent[..],
            [(1, Payload::Rejected(ErrorPayload { code: ErrorPayload::VALIDATION, .. }))]
        ));
        assert_eq!(coordinator.connection_state(1), Some(ConnectionState::Disconnected));
    }

    #[test]
    fn same_user_on_second_connection_can_queue() {
        let mut coordinator = coordinator();
        connect(&mut coordinator, 1, "u1");
        coordinator.process_event(CoordinatorEvent::ConnectionAccepted { conn_id: 2 }).unwrap();

        let actions = coordinator
            .process_event(CoordinatorEvent::Identify {
                conn_id: 2,
                external_user_id: "u1".to_string(),
                display_name: "again".to_string(),
            })
            .unwrap();

        assert!(notifications(&actions).is_empty());
        assert_eq!(coordinator.connection_state(2), Some(ConnectionState::Identified));

        let actions = coordinator.process_event(CoordinatorEvent::QueueJoin { conn_id: 2 }).unwrap();
        assert_eq!(notifications(&actions), vec![(
            2,
            Payload::QueueWaiting(QueueWaiting { queue_size: 1 })
        )]);
    }

    #[test]
    fn two_joins_make_a_match() {
        let mut coordinator = coordinator();
        connect(&mut coordinator, 1, "u1");
        connect(&mut coordinator, 2, "u2");

        let first = coordinator.process_event(CoordinatorEvent::QueueJoin { conn_id: 1 }).unwrap();
        assert_eq!(notifications(&first), vec![(
            1,
            Payload::QueueWaiting(QueueWaiting { queue_size: 1 })
        )]);

        let second = coordinator.process_event(CoordinatorEvent::QueueJoin { conn_id: 2 }).unwrap();
        let session_id = coordinator.session_of(2).unwrap();

        assert_ne!(session_id, 0);
        assert_eq!(notifications(&second), vec![
            (2, Payload::QueueWaiting(QueueWaiting { queue_size: 2 })),
            (1, Payload::Matched(Matched {
                session_id,
                partner_display_name: "u2-name".to_string()
            })),
            (2, Payload::Matched(Matched {
                session_id,
                partner_display_name: "u1-name".to_string()
            })),
        ]);
        assert_eq!(coordinator.queue_len(), 0);
        assert_eq!(coordinator.connection_state(1), Some(ConnectionState::Matched));
    }

    #[test]
    fn join_while_matched_is_rejected() {
        let mut coordinator = coordinator();
        matched_pair(&mut coordinator);

        let actions = coordinator.process_event(CoordinatorEvent::QueueJoin { conn_id: 1 }).unwrap();

        assert_eq!(notifications(&actions), vec![(
            1,
            Payload::Rejected(ErrorPayload::validation("already in session"))
        )]);
        assert_eq!(coordinator.queue_len(), 0);
    }

    #[test]
    fn relay_reaches_partner_and_opens_session() {
        let mut coordinator = coordinator();
        let session_id = matched_pair(&mut coordinator);

        let actions = coordinator.process_event(offer(1, session_id)).unwrap();

        assert_eq!(notifications(&actions).len(), 1);
        assert_eq!(notifications(&actions)[0].0, 2);
        assert_eq!(coordinator.connection_state(1), Some(ConnectionState::InSession));
        assert_eq!(coordinator.connection_state(2), Some(ConnectionState::InSession));
    }

    #[test]
    fn relay_from_third_party_is_dropped() {
        let mut coordinator = coordinator();
        let session_id = matched_pair(&mut coordinator);
        connect(&mut coordinator, 3, "u3");

        let actions = coordinator.process_event(offer(3, session_id)).unwrap();

        assert!(notifications(&actions).is_empty());
        assert!(matches!(actions[0], CoordinatorAction::Log { level: LogLevel::Warn, .. }));
    }

    #[test]
    fn end_notifies_partner_once() {
        let mut coordinator = coordinator();
        matched_pair(&mut coordinator);

        let first = coordinator.process_event(CoordinatorEvent::SessionEnd { conn_id: 1 }).unwrap();
        let second = coordinator.process_event(CoordinatorEvent::SessionEnd { conn_id: 2 }).unwrap();

        assert_eq!(notifications(&first), vec![(2, Payload::PartnerDisconnected)]);
        assert!(notifications(&second).is_empty());
        assert_eq!(coordinator.session_count(), 0);
        assert_eq!(coordinator.connection_state(1), Some(ConnectionState::Identified));
        assert_eq!(coordinator.connection_state(2), Some(ConnectionState::Identified));
    }

    #[test]
    fn report_ends_session() {
        let mut coordinator = coordinator();
        matched_pair(&mut coordinator);

        let actions = coordinator
            .process_event(CoordinatorEvent::SessionReport { conn_id: 2, reason: "spam".to_string() })
            .unwrap();

        assert_eq!(notifications(&actions), vec![(1, Payload::PartnerDisconnected)]);
        assert!(actions.iter().any(|a| matches!(a, CoordinatorAction::Log { level: LogLevel::Warn, .. })));
    }

    #[test]
    fn report_without_session_is_rejected() {
        let mut coordinator = coordinator();
        connect(&mut coordinator, 1, "u1");

        let actions = coordinator
            .process_event(CoordinatorEvent::SessionReport { conn_id: 1, reason: "x".to_string() })
            .unwrap();

        assert_eq!(notifications(&actions), vec![(
            1,
            Payload::Rejected(ErrorPayload::validation("not in a session"))
        )]);
    }

    #[test]
    fn disconnect_in_session_frees_partner() {
        let mut coordinator = coordinator();
        matched_pair(&mut coordinator);

        let actions = coordinator
            .process_event(CoordinatorEvent::Disconnect { conn_id: 1, reason: "gone".to_string() })
            .unwrap();

        assert_eq!(notifications(&actions), vec![(2, Payload::PartnerDisconnected)]);
        assert_eq!(coordinator.connection_state(1), None);
        assert_eq!(coordinator.connection_state(2), Some(ConnectionState::Identified));
    }

    #[test]
    fn malformed_frame_is_rejected() {
        let mut coordinator = coordinator();
        coordinator.process_event(CoordinatorEvent::ConnectionAccepted { conn_id: 1 }).unwrap();

        let actions = coordinator
            .process_event(CoordinatorEvent::MalformedFrame { conn_id: 1, reason: "bad".to_string() })
            .unwrap();

        assert_eq!(notifications(&actions), vec![(
            1,
            Payload::Rejected(ErrorPayload::invalid_payload("bad"))
        )]);
    }

    #[test]
    fn snapshot_reflects_state() {
        let mut coordinator = coordinator();
        let session_id = matched_pair(&mut coordinator);
        connect(&mut coordinator, 3, "u3");
        coordinator.process_event(CoordinatorEvent::QueueJoin { conn_id: 3 }).unwrap();

        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.queue, vec![3]);
        assert_eq!(snapshot.session_of(1), Some(session_id));
        assert_eq!(snapshot.connections[&2].session_id, Some(session_id));
        assert_eq!(snapshot.connections[&3].state, ConnectionState::Queued);
    }

    #[test]
    fn server_only_opcode_is_malformed() {
        let frame = Payload::QueueExpired
            .into_frame(duet_proto::FrameHeader::new(duet_proto::Opcode::QueueExpired))
            .unwrap();

        assert!(matches!(
            CoordinatorEvent::from_frame(4, &frame),
            CoordinatorEvent::MalformedFrame { conn_id: 4, .. }
        ));
    }

    #[test]
    fn server_only_opcode_is_refused_before_decoding() {
        let frame = Frame::new(
            duet_proto::FrameHeader::new(duet_proto::Opcode::Matched),
            vec![0xFF, 0xFF, 0xFF],
        );

        let CoordinatorEvent::MalformedFrame { reason, .. } = CoordinatorEvent::from_frame(4, &frame)
        else {
            panic!("expected a malformed frame");
        };
        assert_eq!(reason, "unexpected opcode 0x0021");
    }

    /// Put connection 1 back in the queue while it is still in a session.
    fn corrupt_exclusivity(coordinator: &mut Coordinator<TestEnv>) -> u128 {
        let session_id = matched_pair(coordinator);
        let now = coordinator.env.now();
        coordinator.queue.join(1, now);
        session_id
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "both queued and in a session")]
    fn join_over_corrupted_state_asserts() {
        let mut coordinator = coordinator();
        corrupt_exclusivity(&mut coordinator);

        let _ = coordinator.process_event(CoordinatorEvent::QueueJoin { conn_id: 1 });
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "both queued and in a session")]
    fn match_over_corrupted_state_asserts() {
        let mut coordinator = coordinator();
        corrupt_exclusivity(&mut coordinator);
        connect(&mut coordinator, 3, "u3");

        let _ = coordinator.process_event(CoordinatorEvent::QueueJoin { conn_id: 3 });
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn match_over_corrupted_state_evicts() {
        let mut coordinator = coordinator();
        corrupt_exclusivity(&mut coordinator);
        connect(&mut coordinator, 3, "u3");

        let actions = coordinator.process_event(CoordinatorEvent::QueueJoin { conn_id: 3 }).unwrap();

        let partner_notices = notifications(&actions)
            .into_iter()
            .filter(|(_, payload)| *payload == Payload::PartnerDisconnected)
            .collect::<Vec<_>>();
        assert_eq!(partner_notices, vec![(2, Payload::PartnerDisconnected)]);

        let snapshot = coordinator.snapshot();
        assert!(!snapshot.is_queued(1));
        assert_eq!(snapshot.session_of(1), None);
        assert_eq!(snapshot.queue, vec![3]);
        assert_eq!(coordinator.session_count(), 0);
        assert_eq!(coordinator.connection_state(1), Some(ConnectionState::Identified));
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn join_over_corrupted_state_evicts_then_queues() {
        let mut coordinator = coordinator();
        corrupt_exclusivity(&mut coordinator);

        let actions = coordinator.process_event(CoordinatorEvent::QueueJoin { conn_id: 1 }).unwrap();

        assert_eq!(notifications(&actions), vec![
            (2, Payload::PartnerDisconnected),
            (1, Payload::QueueWaiting(QueueWaiting { queue_size: 1 })),
        ]);
        assert_eq!(coordinator.session_count(), 0);
        assert_eq!(coordinator.snapshot().queue, vec![1]);
    }
}
