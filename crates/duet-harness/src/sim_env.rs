//! Simulated environment.
//!
//! Virtual clock plus a seeded ChaCha RNG. Time only moves when a test calls
//! [`SimEnv::advance`] or awaits [`Environment::sleep`], so the same seed and
//! the same operations always produce the same session ids and the same
//! housekeeping decisions.

use std::{
    ops::{Add, Sub},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use duet_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Virtual instant, in milliseconds since the simulation started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimInstant(u64);

impl SimInstant {
    /// Milliseconds since the simulation started.
    pub fn as_millis(self) -> u64 {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    /// Saturates at zero, like `Instant::saturating_duration_since`.
    fn sub(self, rhs: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(rhs.0))
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        let millis = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

struct SimState {
    now: SimInstant,
    rng: ChaCha20Rng,
}

/// Deterministic environment shared by every clone.
#[derive(Clone)]
pub struct SimEnv {
    state: Arc<Mutex<SimState>>,
}

impl SimEnv {
    /// Environment at time zero with an RNG seeded from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        let state = SimState { now: SimInstant(0), rng: ChaCha20Rng::seed_from_u64(seed) };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now = state.now + duration;
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("now", &self.now()).finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).now
    }

    /// Advances the virtual clock and returns immediately.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).rng.fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_only_moves_when_advanced() {
        let env = SimEnv::with_seed(1);
        let t0 = env.now();
        assert_eq!(env.now(), t0);

        env.advance(Duration::from_secs(5));
        assert_eq!(env.now() - t0, Duration::from_secs(5));
        assert_eq!(t0 - env.now(), Duration::ZERO);
    }

    #[test]
    fn same_seed_same_bytes() {
        let a = SimEnv::with_seed(42);
        let b = SimEnv::with_seed(42);
        assert_eq!(a.random_u128(), b.random_u128());
        assert_eq!(a.random_u64(), b.random_u64());
    }

    #[test]
    fn clones_share_state() {
        let env = SimEnv::with_seed(7);
        let clone = env.clone();

        clone.advance(Duration::from_millis(250));
        assert_eq!(env.now().as_millis(), 250);
    }
}
