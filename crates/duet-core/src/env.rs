//! Environment abstraction for deterministic testing.
//!
//! Decouples matchmaking logic from system resources (time, randomness).
//! Production uses the wall clock and OS entropy; the simulation harness uses
//! a virtual clock and a seeded RNG so every run is reproducible.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async sleep.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
///   (session ids are unguessable capabilities for relaying)
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type used by this environment.
    ///
    /// Production uses `std::time::Instant`; simulation uses virtual time.
    type Instant: Copy + Ord + Send + Sync + std::fmt::Debug + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only runtime code awaits this. Coordinator logic never sleeps.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// Given the same seed, a simulated environment produces the same bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`. Used for connection ids.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a random `u128`. Used for session ids.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }
}
