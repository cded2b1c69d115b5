//! Deterministic simulation harness for the Duet coordinator.
//!
//! Provides a seeded [`SimEnv`], a reference [`ModelWorld`], a [`SimWorld`]
//! that drives the real coordinator through the wire format, and an
//! [`InvariantRegistry`] of properties checked after every step.
//!
//! # Model-Based Testing
//!
//! Random [`Operation`] sequences are applied to both worlds. After each step
//! their [`ObservableState`]s must be equal and every invariant must hold.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod model;
pub mod sim_env;
pub mod sim_world;

pub use invariants::{
    Invariant, InvariantRegistry, InvariantResult, NegotiationState, QueueMembersAreQueued,
    QueueSessionExclusive, SessionMembership, Violation,
};
pub use model::{ClientId, ClientPhase, Inbox, ModelWorld, ObservableState, Operation};
pub use sim_env::{SimEnv, SimInstant};
pub use sim_world::{SimError, SimWorld};
