//! Matchmaking queue.
//!
//! FIFO of connections waiting for a partner. Entries are ordered by join
//! time, with a per-queue sequence number breaking ties between connections
//! that joined at the same instant. Re-joining moves a connection to the
//! back.

use std::{
    collections::{BTreeMap, HashMap},
    ops::Sub,
    time::Duration,
};

/// Ordering key: join time, then insertion sequence.
type EntryKey<I> = (I, u64);

/// Waiting connections, oldest first.
///
/// # Invariants
///
/// - A connection id appears at most once
/// - `entries` and `index` describe the same set of connections
#[derive(Debug)]
pub struct MatchmakingQueue<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// (joined_at, seq) → connection id
    entries: BTreeMap<EntryKey<I>, u64>,
    /// connection id → key in `entries`
    index: HashMap<u64, EntryKey<I>>,
    next_seq: u64,
}

impl<I> Default for MatchmakingQueue<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self { entries: BTreeMap::new(), index: HashMap::new(), next_seq: 0 }
    }
}

impl<I> MatchmakingQueue<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection at the back of the queue.
    ///
    /// A connection that is already queued is moved to the back with a fresh
    /// join time. Returns the queue size after joining.
    pub fn join(&mut self, conn_id: u64, now: I) -> usize {
        self.leave(conn_id);

        let key = (now, self.next_seq);
        self.next_seq += 1;

        self.entries.insert(key, conn_id);
        self.index.insert(conn_id, key);
        self.entries.len()
    }

    /// Remove a connection. Returns `true` if it was queued.
    pub fn leave(&mut self, conn_id: u64) -> bool {
        match self.index.remove(&conn_id) {
            Some(key) => {
                self.entries.remove(&key);
                true
            },
            None => false,
        }
    }

    /// Remove and return the two longest-waiting connections.
    ///
    /// `None` (and the queue untouched) if fewer than two are waiting.
    pub fn pop_pair(&mut self) -> Option<(u64, u64)> {
        if self.entries.len() < 2 {
            return None;
        }

        let (_, first) = self.entries.pop_first()?;
        let (_, second) = self.entries.pop_first()?;
        self.index.remove(&first);
        self.index.remove(&second);

        Some((first, second))
    }

    /// Remove and return connections that have waited longer than `bound`.
    pub fn evict_stale(&mut self, now: I, bound: Duration) -> Vec<u64> {
        let mut evicted = Vec::new();

        // Oldest first, so stop at the first entry still within bound.
        while let Some((&(joined_at, _), _)) = self.entries.first_key_value() {
            if now - joined_at <= bound {
                break;
            }
            if let Some((_, conn_id)) = self.entries.pop_first() {
                self.index.remove(&conn_id);
                evicted.push(conn_id);
            }
        }

        evicted
    }

    /// Connection is waiting.
    pub fn contains(&self, conn_id: u64) -> bool {
        self.index.contains_key(&conn_id)
    }

    /// Waiting connections, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.values().copied()
    }

    /// Number of waiting connections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
