//! Fuzz target for the coordinator state machine
//!
//! Drives the real coordinator through the wire path with arbitrary client
//! operations.
//!
//! # Invariants
//!
//! - No connection is both queued and in a session
//! - Every session has two distinct members that point back at it
//! - Every step is accepted by the coordinator

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use duet_harness::{InvariantRegistry, Operation, SimWorld};
use duet_server::{CoordinatorConfig, HousekeeperConfig};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Scenario {
    seed: u64,
    clients: u8,
    ops: Vec<Operation>,
}

fuzz_target!(|scenario: Scenario| {
    let config = CoordinatorConfig {
        housekeeper: HousekeeperConfig {
            sweep_interval: Duration::from_secs(1),
            max_session_age: Duration::from_secs(90),
            queue_staleness: Duration::from_secs(20),
        },
        ..CoordinatorConfig::default()
    };

    let num_clients = usize::from(scenario.clients % 8) + 2;
    let mut world = SimWorld::new(num_clients, scenario.seed, config);
    let invariants = InvariantRegistry::standard();

    for op in scenario.ops {
        if let Err(e) = world.apply(op) {
            panic!("{op:?} failed: {e}");
        }
        invariants.assert_all(&world.snapshot(), &format!("{op:?}"));
    }
});
