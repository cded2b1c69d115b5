//! Reference model for the coordinator.
//!
//! [`ModelWorld`] is a deliberately naive re-statement of matchmaking rules:
//! a vector for the queue and a partner pointer per client. Operations are
//! applied to it and to the real coordinator ([`crate::SimWorld`]), and their
//! [`ObservableState`]s must match after every step.

mod operation;
mod world;

pub use operation::{ClientId, Operation};
pub use world::ModelWorld;

/// What a client can observe about itself from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    /// No connection
    Offline,
    /// Connected, no identity yet
    Connected,
    /// Identified and idle
    Identified,
    /// Waiting for a partner
    Queued,
    /// Paired, nothing relayed yet
    Matched,
    /// Paired and negotiating
    InSession,
}

impl ClientPhase {
    /// Client is paired with a partner.
    pub fn in_session(self) -> bool {
        matches!(self, Self::Matched | Self::InSession)
    }
}

/// Notifications a client received, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inbox {
    /// `QueueWaiting` count
    pub waiting: u32,
    /// `Matched` count
    pub matched: u32,
    /// Relayed negotiation messages
    pub signals: u32,
    /// `PartnerDisconnected` count
    pub partner_disconnected: u32,
    /// `QueueExpired` count
    pub queue_expired: u32,
    /// `Rejected` count
    pub rejected: u32,
}

/// Observable state for oracle comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Phase and partner of each client
    pub clients: Vec<(ClientPhase, Option<ClientId>)>,
    /// Waiting clients, oldest first
    pub queue: Vec<ClientId>,
    /// Everything each client has been told
    pub inboxes: Vec<Inbox>,
}
