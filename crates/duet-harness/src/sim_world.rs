//! Real coordinator driven by model operations.
//!
//! Every client operation is turned into a wire frame, encoded, decoded, and
//! fed to the coordinator the same way the production runtime does it. The
//! resulting actions are dispatched into per-client inboxes instead of QUIC
//! streams.

use std::{collections::HashMap, fmt};

use bytes::Bytes;
use duet_core::{ConnectionState, Environment};
use duet_proto::{
    Frame, FrameHeader, Payload, ProtocolError, SignalKind,
    payloads::{
        session::{Identify, Report},
        signal::Signal,
    },
};
use duet_server::{
    Coordinator, CoordinatorAction, CoordinatorConfig, CoordinatorError, CoordinatorEvent,
    CoordinatorSnapshot, LogLevel,
};

use crate::{
    model::{ClientId, ClientPhase, Inbox, ObservableState, Operation},
    sim_env::{SimEnv, SimInstant},
};

/// Failure while driving the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// A frame could not be built or parsed
    Protocol(ProtocolError),
    /// The coordinator refused an event
    Coordinator(CoordinatorError),
    /// A notification did not match what was expected of it
    Unexpected(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
            Self::Coordinator(err) => write!(f, "coordinator error: {err}"),
            Self::Unexpected(msg) => write!(f, "unexpected notification: {msg}"),
        }
    }
}

impl std::error::Error for SimError {}

impl From<ProtocolError> for SimError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<CoordinatorError> for SimError {
    fn from(err: CoordinatorError) -> Self {
        Self::Coordinator(err)
    }
}

/// External user id used by a simulated client.
pub fn user_id(client: ClientId) -> String {
    format!("user-{client}")
}

/// Display name used by a simulated client.
pub fn display_name(client: ClientId) -> String {
    format!("name-{client}")
}

/// A coordinator with simulated clients attached.
pub struct SimWorld {
    coordinator: Coordinator<SimEnv>,
    env: SimEnv,
    /// Live connection of each client
    conns: Vec<Option<u64>>,
    /// Connection → client, for dispatching notifications
    owners: HashMap<u64, ClientId>,
    inboxes: Vec<Inbox>,
    next_conn_id: u64,
}

impl SimWorld {
    /// Create a world of offline clients around a fresh coordinator.
    pub fn new(num_clients: usize, seed: u64, config: CoordinatorConfig) -> Self {
        let env = SimEnv::with_seed(seed);

        Self {
            coordinator: Coordinator::new(env.clone(), config),
            env,
            conns: vec![None; num_clients],
            owners: HashMap::new(),
            inboxes: vec![Inbox::default(); num_clients],
            next_conn_id: 1,
        }
    }

    /// Apply one operation to the real coordinator.
    pub fn apply(&mut self, op: Operation) -> Result<(), SimError> {
        match op.normalized(self.conns.len()) {
            Operation::Connect { client } => {
                if self.conn(client).is_some() {
                    return Ok(());
                }
                let conn_id = self.next_conn_id;
                self.next_conn_id += 1;
                self.conns[usize::from(client)] = Some(conn_id);
                self.owners.insert(conn_id, client);
                self.process(CoordinatorEvent::ConnectionAccepted { conn_id })
            },
            Operation::Identify { client } => self.send(
                client,
                Payload::Identify(Identify {
                    external_user_id: user_id(client),
                    display_name: display_name(client),
                }),
            ),
            Operation::Join { client } => self.send(client, Payload::QueueJoin),
            Operation::Leave { client } => self.send(client, Payload::QueueLeave),
            Operation::Relay { client, via } => {
                let session_id =
                    self.conn(via).and_then(|c| self.coordinator.session_of(c)).unwrap_or(0);
                self.send(
                    client,
                    Payload::Signal(Signal {
                        kind: SignalKind::Offer,
                        session_id,
                        data: Bytes::from_static(b"v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n"),
                    }),
                )
            },
            Operation::End { client } => self.send(client, Payload::SessionEnd),
            Operation::Report { client } => self.send(
                client,
                Payload::SessionReport(Report { reason: "simulated report".to_string() }),
            ),
            Operation::Garbage { client } => self.send(client, Payload::QueueExpired),
            Operation::Disconnect { client } => {
                let Some(conn_id) = self.conns[usize::from(client)].take() else {
                    return Ok(());
                };
                let result = self.process(CoordinatorEvent::Disconnect {
                    conn_id,
                    reason: "simulated disconnect".to_string(),
                });
                self.owners.remove(&conn_id);
                result
            },
            Operation::AdvanceTime { secs } => {
                self.env.advance(std::time::Duration::from_secs(u64::from(secs)));
                Ok(())
            },
            Operation::Tick => self.process(CoordinatorEvent::Tick),
        }
    }

    /// Encode `payload` as a client frame and feed it through the wire path.
    fn send(&mut self, client: ClientId, payload: Payload) -> Result<(), SimError> {
        let Some(conn_id) = self.conn(client) else {
            return Ok(());
        };

        let header = FrameHeader::new(payload.opcode());
        let frame = payload.into_frame(header)?;

        let mut wire = Vec::with_capacity(frame.encoded_len());
        frame.encode(&mut wire)?;
        let frame = Frame::decode(&wire)?;

        self.process(CoordinatorEvent::from_frame(conn_id, &frame))
    }

    fn process(&mut self, event: CoordinatorEvent) -> Result<(), SimError> {
        let actions = self.coordinator.process_event(event)?;
        self.dispatch(actions)
    }

    fn dispatch(&mut self, actions: Vec<CoordinatorAction<SimInstant>>) -> Result<(), SimError> {
        for action in actions {
            match action {
                CoordinatorAction::Notify { conn_id, payload } => {
                    let Some(&client) = self.owners.get(&conn_id) else {
                        return Err(SimError::Unexpected(format!(
                            "{:?} for unknown connection {conn_id}",
                            payload.opcode()
                        )));
                    };
                    self.deliver(client, payload)?;
                },
                CoordinatorAction::CloseConnection { conn_id, reason } => {
                    tracing::debug!("close {}: {}", conn_id, reason);
                },
                CoordinatorAction::Log { level, message, timestamp } => {
                    let at = timestamp.as_millis();
                    match level {
                        LogLevel::Debug => tracing::debug!(at, "{}", message),
                        LogLevel::Info => tracing::info!(at, "{}", message),
                        LogLevel::Warn => tracing::warn!(at, "{}", message),
                        LogLevel::Error => tracing::error!(at, "{}", message),
                    }
                },
            }
        }
        Ok(())
    }

    fn deliver(&mut self, client: ClientId, payload: Payload) -> Result<(), SimError> {
        let inbox = &mut self.inboxes[usize::from(client)];

        match payload {
            Payload::QueueWaiting(_) => inbox.waiting += 1,
            Payload::Matched(matched) => {
                inbox.matched += 1;
                let known_name = self
                    .owners
                    .values()
                    .any(|&c| display_name(c) == matched.partner_display_name);
                if matched.session_id == 0 || !known_name {
                    return Err(SimError::Unexpected(format!("{matched:?} for client {client}")));
                }
            },
            Payload::Signal(_) => inbox.signals += 1,
            Payload::PartnerDisconnected => inbox.partner_disconnected += 1,
            Payload::QueueExpired => inbox.queue_expired += 1,
            Payload::Rejected(_) => inbox.rejected += 1,
            other => {
                return Err(SimError::Unexpected(format!(
                    "client request {:?} sent to client {client}",
                    other.opcode()
                )));
            },
        }
        Ok(())
    }

    fn conn(&self, client: ClientId) -> Option<u64> {
        self.conns.get(usize::from(client)).copied().flatten()
    }

    /// The coordinator under test.
    pub fn coordinator(&self) -> &Coordinator<SimEnv> {
        &self.coordinator
    }

    /// The shared simulated environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Coordinator snapshot.
    pub fn snapshot(&self) -> CoordinatorSnapshot {
        self.coordinator.snapshot()
    }

    /// Observable state for comparison with the model.
    pub fn observable_state(&self) -> ObservableState {
        let snapshot = self.coordinator.snapshot();

        let clients = self
            .conns
            .iter()
            .map(|conn| {
                let Some(conn_id) = *conn else {
                    return (ClientPhase::Offline, None);
                };
                let phase = match snapshot.connections.get(&conn_id).map(|c| c.state) {
                    None | Some(ConnectionState::Disconnected) => ClientPhase::Connected,
                    Some(ConnectionState::Identified) => ClientPhase::Identified,
                    Some(ConnectionState::Queued) => ClientPhase::Queued,
                    Some(ConnectionState::Matched) => ClientPhase::Matched,
                    Some(ConnectionState::InSession) => ClientPhase::InSession,
                };
                let partner = snapshot
                    .session_of(conn_id)
                    .and_then(|sid| snapshot.sessions.get(&sid))
                    .and_then(|s| s.participants.into_iter().find(|&p| p != conn_id))
                    .and_then(|p| self.owners.get(&p).copied());
                (phase, partner)
            })
            .collect();

        let queue = snapshot.queue.iter().filter_map(|c| self.owners.get(c).copied()).collect();

        ObservableState { clients, queue, inboxes: self.inboxes.clone() }
    }

    /// Current virtual time, in milliseconds.
    pub fn now_millis(&self) -> u64 {
        self.env.now().as_millis()
    }
}

impl fmt::Debug for SimWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimWorld")
            .field("coordinator", &self.coordinator)
            .field("conns", &self.conns)
            .finish_non_exhaustive()
    }
}
