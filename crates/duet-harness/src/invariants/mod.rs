//! State properties checked after every coordinator step.
//!
//! Invariants are properties of coordinator state that must hold after every
//! event, whatever sequence of events led there. Each check reads a
//! [`CoordinatorSnapshot`], so it sees the same plain data a test would.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! registry.assert_all(&coordinator.snapshot(), "after join");
//! ```

mod checks;

pub use checks::{
    NegotiationState, QueueMembersAreQueued, QueueSessionExclusive, SessionMembership,
};
use std::fmt;

use duet_server::CoordinatorSnapshot;

/// Outcome of a single check.
pub type InvariantResult = Result<(), Violation>;

/// A broken invariant and what broke it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Invariant that failed
    pub invariant: &'static str,
    /// Offending connection or session, in words
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property that must hold for every reachable coordinator state.
pub trait Invariant: Send + Sync {
    /// Short name used in violation reports.
    fn name(&self) -> &'static str;

    /// Check the invariant against a snapshot.
    fn check(&self, state: &CoordinatorSnapshot) -> InvariantResult;
}

/// Ordered set of invariants run together.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every coordinator invariant.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(QueueSessionExclusive);
        registry.add(QueueMembersAreQueued);
        registry.add(SessionMembership);
        registry.add(NegotiationState);
        registry
    }

    /// Append `invariant` to the set.
    pub fn add(&mut self, invariant: impl Invariant + 'static) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants. Returns every violation found.
    pub fn check_all(&self, state: &CoordinatorSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<Violation> = self
            .invariants
            .iter()
            .map(|invariant| invariant.check(state))
            .filter_map(Result::err)
            .collect();

        match violations.as_slice() {
            [] => Ok(()),
            _ => Err(violations),
        }
    }

    /// Check all invariants, panicking with every violation found.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &CoordinatorSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of invariants in the set.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// No invariants registered.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_set_covers_every_check() {
        assert_eq!(InvariantRegistry::standard().len(), 4);
    }

    #[test]
    fn empty_snapshot_passes() {
        let registry = InvariantRegistry::standard();
        assert!(registry.check_all(&CoordinatorSnapshot::default()).is_ok());
    }
}
