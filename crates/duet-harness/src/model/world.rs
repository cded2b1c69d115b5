//! Model world.
//!
//! The oracle against which the real coordinator is verified. Time is a
//! millisecond counter; the queue is a vector in join order; a session is two
//! clients pointing at each other.

use std::time::Duration;

use duet_server::HousekeeperConfig;

use super::{ClientId, ClientPhase, Inbox, ObservableState, Operation};

#[derive(Debug, Clone)]
struct ModelClient {
    phase: ClientPhase,
    partner: Option<ClientId>,
    joined_at: u64,
    matched_at: u64,
    inbox: Inbox,
}

impl ModelClient {
    fn new() -> Self {
        Self {
            phase: ClientPhase::Offline,
            partner: None,
            joined_at: 0,
            matched_at: 0,
            inbox: Inbox::default(),
        }
    }
}

/// Reference implementation of matchmaking.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    clients: Vec<ModelClient>,
    queue: Vec<ClientId>,
    now_ms: u64,
    queue_staleness_ms: u64,
    max_session_age_ms: u64,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ModelWorld {
    /// Create a world of offline clients.
    pub fn new(num_clients: usize, housekeeper: HousekeeperConfig) -> Self {
        Self {
            clients: (0..num_clients).map(|_| ModelClient::new()).collect(),
            queue: Vec::new(),
            now_ms: 0,
            queue_staleness_ms: millis(housekeeper.queue_staleness),
            max_session_age_ms: millis(housekeeper.max_session_age),
        }
    }

    /// Number of clients in the world.
    pub fn num_clients(&self) -> usize {
        self.clients.len()
    }

    /// Apply one operation.
    pub fn apply(&mut self, op: Operation) {
        match op.normalized(self.clients.len()) {
            Operation::Connect { client } => {
                let c = self.client_mut(client);
                if c.phase == ClientPhase::Offline {
                    c.phase = ClientPhase::Connected;
                }
            },
            Operation::Identify { client } => {
                let c = self.client_mut(client);
                if c.phase == ClientPhase::Connected {
                    c.phase = ClientPhase::Identified;
                }
            },
            Operation::Join { client } => self.join(client),
            Operation::Leave { client } => {
                if self.client(client).phase == ClientPhase::Queued {
                    self.queue.retain(|&q| q != client);
                    self.client_mut(client).phase = ClientPhase::Identified;
                }
            },
            Operation::Relay { client, via } => self.relay(client, via),
            Operation::End { client } => {
                if self.client(client).phase.in_session() {
                    self.end(client, Some(client));
                }
            },
            Operation::Report { client } => match self.client(client).phase {
                ClientPhase::Offline => {},
                phase if phase.in_session() => self.end(client, Some(client)),
                _ => self.client_mut(client).inbox.rejected += 1,
            },
            Operation::Garbage { client } => {
                if self.client(client).phase != ClientPhase::Offline {
                    self.client_mut(client).inbox.rejected += 1;
                }
            },
            Operation::Disconnect { client } => {
                if self.client(client).phase == ClientPhase::Offline {
                    return;
                }
                self.queue.retain(|&q| q != client);
                if self.client(client).phase.in_session() {
                    self.end(client, Some(client));
                }
                let c = self.client_mut(client);
                c.phase = ClientPhase::Offline;
                c.partner = None;
            },
            Operation::AdvanceTime { secs } => self.now_ms += u64::from(secs) * 1000,
            Operation::Tick => self.sweep(),
        }
    }

    fn join(&mut self, client: ClientId) {
        match self.client(client).phase {
            ClientPhase::Offline => return,
            ClientPhase::Connected | ClientPhase::Matched | ClientPhase::InSession => {
                self.client_mut(client).inbox.rejected += 1;
                return;
            },
            ClientPhase::Identified | ClientPhase::Queued => {},
        }

        let now = self.now_ms;
        self.queue.retain(|&q| q != client);
        self.queue.push(client);

        let c = self.client_mut(client);
        c.phase = ClientPhase::Queued;
        c.joined_at = now;
        c.inbox.waiting += 1;

        while self.queue.len() >= 2 {
            let a = self.queue.remove(0);
            let b = self.queue.remove(0);
            for (me, partner) in [(a, b), (b, a)] {
                let c = self.client_mut(me);
                c.phase = ClientPhase::Matched;
                c.partner = Some(partner);
                c.matched_at = now;
                c.inbox.matched += 1;
            }
        }
    }

    fn relay(&mut self, client: ClientId, via: ClientId) {
        let sender = self.client(client);
        let Some(partner) = sender.partner else {
            return;
        };
        // The offer carries the session `via` is in; only our own session routes.
        if via != client && via != partner {
            return;
        }

        self.client_mut(partner).inbox.signals += 1;
        for id in [client, partner] {
            self.client_mut(id).phase = ClientPhase::InSession;
        }
    }

    fn end(&mut self, client: ClientId, initiator: Option<ClientId>) {
        let Some(partner) = self.client(client).partner else {
            return;
        };

        for id in [client, partner] {
            let c = self.client_mut(id);
            c.phase = ClientPhase::Identified;
            c.partner = None;
            if Some(id) != initiator {
                c.inbox.partner_disconnected += 1;
            }
        }
    }

    fn sweep(&mut self) {
        let now = self.now_ms;

        let (stale, fresh): (Vec<_>, Vec<_>) = self
            .queue
            .iter()
            .copied()
            .partition(|&q| now - self.clients[usize::from(q)].joined_at > self.queue_staleness_ms);
        self.queue = fresh;
        for client in stale {
            let c = self.client_mut(client);
            c.phase = ClientPhase::Identified;
            c.inbox.queue_expired += 1;
        }

        let expired: Vec<ClientId> = (0..self.clients.len())
            .map(|i| i as ClientId)
            .filter(|&id| {
                let c = self.client(id);
                c.phase.in_session()
                    && c.partner.is_some_and(|p| id < p)
                    && now - c.matched_at > self.max_session_age_ms
            })
            .collect();
        for client in expired {
            self.end(client, None);
        }
    }

    fn client(&self, id: ClientId) -> &ModelClient {
        &self.clients[usize::from(id)]
    }

    fn client_mut(&mut self, id: ClientId) -> &mut ModelClient {
        &mut self.clients[usize::from(id)]
    }

    /// Observable state for comparison with the real coordinator.
    pub fn observable_state(&self) -> ObservableState {
        ObservableState {
            clients: self.clients.iter().map(|c| (c.phase, c.partner)).collect(),
            queue: self.queue.clone(),
            inboxes: self.clients.iter().map(|c| c.inbox).collect(),
        }
    }
}
