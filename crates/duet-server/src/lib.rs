//! Duet matchmaking server.
//!
//! Pairs anonymous users one-to-one and relays their WebRTC negotiation
//! messages until the peers talk directly. Media never passes through here.
//!
//! # Architecture
//!
//! The [`Coordinator`] holds all matchmaking state and follows the Sans-IO
//! pattern: events in, actions out. [`Server`] is the production runtime that
//! feeds it from QUIC connections and executes its actions. One coordinator
//! sits behind one lock, so every event is applied atomically.
//!
//! # Components
//!
//! - [`Coordinator`]: event processing (pure logic, no I/O)
//! - [`ConnectionRegistry`]: per-connection state and identities
//! - [`MatchmakingQueue`]: FIFO of connections waiting for a partner
//! - [`SessionTable`]: live 1:1 sessions
//! - [`relay`]: negotiation message forwarding
//! - [`Housekeeper`]: stale queue and over-age session cleanup
//! - [`Server`]: production runtime over [`QuinnTransport`]
//! - [`SystemEnv`]: production environment (real time, OS entropy)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod error;
pub mod housekeeper;
pub mod queue;
pub mod registry;
pub mod relay;
mod server_error;
pub mod session_table;
pub mod snapshot;
mod system_env;
mod transport;

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
pub use driver::{
    Coordinator, CoordinatorAction, CoordinatorConfig, CoordinatorEvent, LogLevel,
};
use duet_core::Environment;
use duet_proto::{Frame, FrameHeader, Payload};
pub use error::ServerError;
pub use housekeeper::{Housekeeper, HousekeeperConfig, Sweep};
pub use queue::MatchmakingQueue;
pub use registry::ConnectionRegistry;
pub use server_error::CoordinatorError;
pub use session_table::{Session, SessionTable};
pub use snapshot::{ConnectionSnapshot, CoordinatorSnapshot, SessionSnapshot};
pub use system_env::SystemEnv;
use tokio::sync::{
    Mutex, RwLock,
    mpsc::{self, error::TrySendError},
};
pub use transport::{QuinnConnection, QuinnTransport};

type SharedCoordinator = Arc<Mutex<Coordinator<SystemEnv>>>;

/// Frames that may wait for one client's outbound stream.
///
/// A client that lets this fill up is not reading and gets disconnected.
pub const OUTBOUND_CAPACITY: usize = 64;

/// A connected client as seen by the runtime.
struct Peer {
    connection: QuinnConnection,
    /// Encoded frames for the client's outbound stream
    outbound: mpsc::Sender<Bytes>,
}

/// Connections that can currently be written to, by connection id.
#[derive(Default)]
struct SharedState {
    peers: RwLock<HashMap<u64, Peer>>,
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<String>,
    /// Coordinator configuration (limits, housekeeping)
    pub coordinator: CoordinatorConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            coordinator: CoordinatorConfig::default(),
        }
    }
}

/// Production Duet server.
///
/// Wraps [`Coordinator`] with Quinn QUIC transport and [`SystemEnv`].
pub struct Server {
    coordinator: Coordinator<SystemEnv>,
    transport: QuinnTransport,
    env: SystemEnv,
}

impl Server {
    /// Create and bind a new server.
    pub fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let coordinator = Coordinator::new(env.clone(), config.coordinator);

        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;

        Ok(Self { coordinator, transport, env })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Accept connections and process their frames until the endpoint closes.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Like [`Server::run`], but close the endpoint once `shutdown` completes.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), ServerError> {
        tracing::info!("server starting on {}", self.transport.local_addr()?);
        let mut shutdown = std::pin::pin!(shutdown);

        let env = self.env;
        let sweep_interval = self.coordinator.config().housekeeper.sweep_interval;
        let coordinator = Arc::new(Mutex::new(self.coordinator));
        let shared = Arc::new(SharedState::default());

        let housekeeper = tokio::spawn(run_housekeeper(
            Arc::clone(&coordinator),
            Arc::clone(&shared),
            env.clone(),
            sweep_interval,
        ));

        let result = loop {
            let accepted = tokio::select! {
                accepted = self.transport.accept() => accepted,
                () = &mut shutdown => {
                    tracing::info!("shutting down");
                    self.transport.close();
                    break Ok(());
                },
            };

            match accepted {
                Ok(Some(conn)) => {
                    let coordinator = Arc::clone(&coordinator);
                    let shared = Arc::clone(&shared);
                    let env = env.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, coordinator, shared, env).await {
                            tracing::warn!("connection error: {}", e);
                        }
                    });
                },
                Ok(None) => break Ok(()),
                Err(e) => {
                    tracing::debug!("accept error: {}", e);
                },
            }
        };

        housekeeper.abort();
        result
    }
}

/// Send a `Tick` to the coordinator every `interval`.
async fn run_housekeeper(
    coordinator: SharedCoordinator,
    shared: Arc<SharedState>,
    env: SystemEnv,
    interval: Duration,
) {
    loop {
        env.sleep(interval).await;

        let mut coordinator = coordinator.lock().await;
        match coordinator.process_event(CoordinatorEvent::Tick) {
            Ok(actions) => execute_actions(actions, &shared).await,
            Err(e) => tracing::error!("housekeeping failed: {}", e),
        }
    }
}

/// Drive one client connection from handshake to teardown.
async fn handle_connection(
    conn: QuinnConnection,
    coordinator: SharedCoordinator,
    shared: Arc<SharedState>,
    env: SystemEnv,
) -> Result<(), ServerError> {
    let outbound_stream = conn.open_uni().await?;
    let (outbound, pending) = mpsc::channel(OUTBOUND_CAPACITY);

    let conn_id = {
        let mut peers = shared.peers.write().await;
        let conn_id = loop {
            let candidate = env.random_u64();
            if !peers.contains_key(&candidate) {
                break candidate;
            }
        };
        peers.insert(conn_id, Peer { connection: conn.clone(), outbound });
        conn_id
    };

    tracing::debug!("new connection {} from {}", conn_id, conn.remote_addr());
    tokio::spawn(write_outbound(conn_id, outbound_stream, pending));

    let accepted = {
        let mut coordinator = coordinator.lock().await;
        let actions = coordinator.process_event(CoordinatorEvent::ConnectionAccepted { conn_id })?;
        execute_actions(actions, &shared).await;
        coordinator.connection_state(conn_id).is_some()
    };

    if !accepted {
        shared.peers.write().await.remove(&conn_id);
        return Ok(());
    }

    loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                let coordinator = Arc::clone(&coordinator);
                let shared = Arc::clone(&shared);

                tokio::spawn(async move {
                    if let Err(e) = handle_stream(conn_id, send, recv, coordinator, &shared).await {
                        tracing::debug!("stream error on {}: {}", conn_id, e);
                    }
                });
            },
            Err(e) => {
                tracing::debug!("connection {} closed: {}", conn_id, e);
                break;
            },
        }
    }

    // Dropping the sender ends the writer task.
    shared.peers.write().await.remove(&conn_id);

    let mut coordinator = coordinator.lock().await;
    let actions = coordinator.process_event(CoordinatorEvent::Disconnect {
        conn_id,
        reason: "connection closed".to_string(),
    })?;
    execute_actions(actions, &shared).await;

    Ok(())
}

/// Read frames from one client-opened stream.
async fn handle_stream(
    conn_id: u64,
    send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    coordinator: SharedCoordinator,
    shared: &SharedState,
) -> Result<(), ServerError> {
    // Responses go out on the connection's outbound stream.
    drop(send);

    let mut buf = BytesMut::with_capacity(FrameHeader::SIZE);

    loop {
        buf.clear();
        buf.resize(FrameHeader::SIZE, 0);

        if let Err(e) = recv.read_exact(&mut buf[..]).await {
            tracing::debug!("read error on {}: {}", conn_id, e);
            break;
        }

        let event = match FrameHeader::from_bytes(&buf).map(|h| h.payload_size() as usize) {
            Ok(payload_size) => {
                buf.resize(FrameHeader::SIZE + payload_size, 0);
                if let Err(e) = recv.read_exact(&mut buf[FrameHeader::SIZE..]).await {
                    tracing::debug!("payload read error on {}: {}", conn_id, e);
                    break;
                }

                match Frame::decode(&buf) {
                    Ok(frame) => CoordinatorEvent::from_frame(conn_id, &frame),
                    Err(e) => CoordinatorEvent::MalformedFrame { conn_id, reason: e.to_string() },
                }
            },
            Err(e) => {
                // The payload boundary is unknown, so the stream cannot be resynced.
                let mut coordinator = coordinator.lock().await;
                let actions = coordinator
                    .process_event(CoordinatorEvent::MalformedFrame { conn_id, reason: e.to_string() })?;
                execute_actions(actions, shared).await;
                return Err(e.into());
            },
        };

        let mut coordinator = coordinator.lock().await;
        match coordinator.process_event(event) {
            Ok(actions) => execute_actions(actions, shared).await,
            Err(e) => {
                tracing::debug!("event from {} dropped: {}", conn_id, e);
                break;
            },
        }
    }

    Ok(())
}

/// Write queued frames to a client's outbound stream, in order.
async fn write_outbound(
    conn_id: u64,
    mut stream: quinn::SendStream,
    mut pending: mpsc::Receiver<Bytes>,
) {
    while let Some(bytes) = pending.recv().await {
        if let Err(e) = stream.write_all(&bytes).await {
            tracing::debug!("write to {} failed: {}", conn_id, e);
            return;
        }
    }

    if let Err(e) = stream.finish() {
        tracing::debug!("finish of {} failed: {}", conn_id, e);
    }
}

/// Outcome of handing a frame to a client's writer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Queued,
    /// The client is not draining its stream
    Backlogged,
    /// The writer task is gone
    Closed,
}

fn enqueue(outbound: &mpsc::Sender<Bytes>, bytes: Bytes) -> Delivery {
    match outbound.try_send(bytes) {
        Ok(()) => Delivery::Queued,
        Err(TrySendError::Full(_)) => Delivery::Backlogged,
        Err(TrySendError::Closed(_)) => Delivery::Closed,
    }
}

/// Execute coordinator actions.
///
/// Delivery failures are logged and dropped; the coordinator never waits on a
/// client.
async fn execute_actions(actions: Vec<CoordinatorAction<std::time::Instant>>, shared: &SharedState) {
    for action in actions {
        match action {
            CoordinatorAction::Notify { conn_id, payload } => {
                let bytes = match encode(payload) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::error!("failed to encode frame for {}: {}", conn_id, e);
                        continue;
                    },
                };

                let peers = shared.peers.read().await;
                let Some(peer) = peers.get(&conn_id) else {
                    tracing::warn!("notify {}: connection not found", conn_id);
                    continue;
                };

                match enqueue(&peer.outbound, bytes) {
                    Delivery::Queued => {},
                    Delivery::Backlogged => {
                        // Closing ends the connection task, which sends Disconnect.
                        tracing::warn!(
                            "notify {}: {} frames pending, closing",
                            conn_id,
                            OUTBOUND_CAPACITY
                        );
                        peer.connection.close("outbound backlog");
                    },
                    Delivery::Closed => tracing::warn!("notify {}: outbound stream closed", conn_id),
                }
            },

            CoordinatorAction::CloseConnection { conn_id, reason } => {
                tracing::info!("closing connection {}: {}", conn_id, reason);
                if let Some(peer) = shared.peers.write().await.remove(&conn_id) {
                    peer.connection.close(&reason);
                }
            },

            CoordinatorAction::Log { level, message, .. } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}

fn encode(payload: Payload) -> Result<Bytes, ServerError> {
    let header = FrameHeader::new(payload.opcode());
    let frame = payload.into_frame(header)?;

    let mut buf = BytesMut::with_capacity(frame.encoded_len());
    frame.encode(&mut buf)?;
    Ok(buf.freeze())
}
