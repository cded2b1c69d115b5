//! Production environment backed by the system clock and OS entropy.
//!
//! Session ids are drawn from this RNG and act as the only capability a
//! participant presents when relaying, so they must be unguessable.

use std::time::Duration;

use duet_core::Environment;

/// Production environment using system time and cryptographic RNG.
///
/// Uses `std::time::Instant::now()` for time, `tokio::time::sleep()` for async
/// sleeping, and getrandom for randomness.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails. Without working entropy the
/// server cannot mint safe session ids, so there is nothing sensible to fall
/// back to.
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}
