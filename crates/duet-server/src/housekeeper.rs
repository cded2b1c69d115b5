//! Periodic cleanup of stale queue entries and over-age sessions.
//!
//! The sweep runs inside the coordinator on every `Tick`, so it never races
//! with a join or a match. Queue eviction happens here; session expiry is
//! only planned here and executed by the coordinator through the regular
//! teardown path.

use std::{ops::Sub, time::Duration};

use crate::{queue::MatchmakingQueue, session_table::SessionTable};

/// Time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Oldest a session may get before it is force-ended.
pub const DEFAULT_MAX_SESSION_AGE: Duration = Duration::from_secs(2 * 60 * 60);

/// Longest a connection may wait in the queue.
pub const DEFAULT_QUEUE_STALENESS: Duration = Duration::from_secs(10 * 60);

/// Housekeeper configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HousekeeperConfig {
    /// How often the runtime sends a `Tick`
    pub sweep_interval: Duration,
    /// Maximum session lifetime
    pub max_session_age: Duration,
    /// Maximum queue wait
    pub queue_staleness: Duration,
}

impl Default for HousekeeperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_session_age: DEFAULT_MAX_SESSION_AGE,
            queue_staleness: DEFAULT_QUEUE_STALENESS,
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sweep {
    /// Connections removed from the queue, oldest first
    pub evicted: Vec<u64>,
    /// Sessions to force-end, oldest first
    pub expired_sessions: Vec<u128>,
}

/// Periodic cleanup policy.
#[derive(Debug, Clone, Default)]
pub struct Housekeeper {
    config: HousekeeperConfig,
    sweeps: u64,
}

impl Housekeeper {
    /// Create a housekeeper with the given limits.
    pub fn new(config: HousekeeperConfig) -> Self {
        Self { config, sweeps: 0 }
    }

    /// Number of sweeps run so far.
    pub fn sweeps(&self) -> u64 {
        self.sweeps
    }

    /// Evict stale queue entries and list over-age sessions.
    pub fn sweep<I>(
        &mut self,
        now: I,
        queue: &mut MatchmakingQueue<I>,
        sessions: &SessionTable<I>,
    ) -> Sweep
    where
        I: Copy + Ord + Sub<Output = Duration>,
    {
        self.sweeps += 1;

        Sweep {
            evicted: queue.evict_stale(now, self.config.queue_staleness),
            expired_sessions: sessions.expired(now, self.config.max_session_age),
        }
    }
}
