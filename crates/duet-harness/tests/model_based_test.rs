//! Model-based property tests.
//!
//! Random operation sequences are applied to the reference model and to the
//! real coordinator. After every step the observable states must match and
//! every coordinator invariant must hold.
//!
//! ```text
//! proptest bytes ─► arbitrary ─► Vec<Operation>
//!                                     │
//!                     ┌───────────────┼───────────────┐
//!                     ▼               ▼               ▼
//!                ModelWorld       SimWorld        Invariants
//!                (reference)      (coordinator)   (snapshot)
//! ```

use std::time::Duration;

use arbitrary::{Arbitrary, Unstructured};
use duet_harness::{ClientPhase, InvariantRegistry, ModelWorld, Operation, SimWorld};
use duet_server::{CoordinatorConfig, HousekeeperConfig};
use proptest::prelude::*;

const NUM_CLIENTS: usize = 5;

fn config() -> CoordinatorConfig {
    CoordinatorConfig {
        housekeeper: HousekeeperConfig {
            sweep_interval: Duration::from_secs(5),
            max_session_age: Duration::from_secs(120),
            queue_staleness: Duration::from_secs(30),
        },
        ..CoordinatorConfig::default()
    }
}

fn operations(bytes: &[u8]) -> Vec<Operation> {
    let mut u = Unstructured::new(bytes);
    Vec::<Operation>::arbitrary(&mut u).unwrap_or_default()
}

fn run(ops: &[Operation], seed: u64) -> Result<(), TestCaseError> {
    let config = config();
    let mut model = ModelWorld::new(NUM_CLIENTS, config.housekeeper);
    let mut real = SimWorld::new(NUM_CLIENTS, seed, config);
    let invariants = InvariantRegistry::standard();

    for (step, op) in ops.iter().enumerate() {
        model.apply(*op);
        real.apply(*op).map_err(|e| TestCaseError::fail(format!("step {step} {op:?}: {e}")))?;

        prop_assert_eq!(
            model.observable_state(),
            real.observable_state(),
            "diverged at step {} ({:?})",
            step,
            op
        );

        if let Err(violations) = invariants.check_all(&real.snapshot()) {
            return Err(TestCaseError::fail(format!(
                "step {step} {op:?}: {}",
                violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
            )));
        }
    }

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn coordinator_matches_model(bytes in prop::collection::vec(any::<u8>(), 0..4096), seed in any::<u64>()) {
        run(&operations(&bytes), seed)?;
    }

    /// Everyone online and identified first, so joins and relays dominate.
    #[test]
    fn busy_lobby_matches_model(bytes in prop::collection::vec(any::<u8>(), 0..4096), seed in any::<u64>()) {
        let mut ops: Vec<Operation> = (0..NUM_CLIENTS as u8)
            .flat_map(|client| [Operation::Connect { client }, Operation::Identify { client }])
            .collect();
        ops.extend(operations(&bytes));
        run(&ops, seed)?;
    }
}

#[test]
fn fifo_pairing_under_leave() {
    let ops = [
        Operation::Connect { client: 0 },
        Operation::Connect { client: 1 },
        Operation::Connect { client: 2 },
        Operation::Connect { client: 3 },
        Operation::Identify { client: 0 },
        Operation::Identify { client: 1 },
        Operation::Identify { client: 2 },
        Operation::Identify { client: 3 },
        Operation::Join { client: 0 },
        Operation::Leave { client: 0 },
        Operation::Join { client: 1 },
        Operation::Join { client: 0 },
        Operation::Join { client: 2 },
        Operation::Join { client: 3 },
    ];

    let mut real = SimWorld::new(NUM_CLIENTS, 9, config());
    for op in ops {
        real.apply(op).unwrap();
    }

    let state = real.observable_state();
    assert_eq!(state.clients[1], (ClientPhase::Matched, Some(0)));
    assert_eq!(state.clients[2], (ClientPhase::Matched, Some(3)));
    run(&ops, 9).unwrap();
}

#[test]
fn expired_session_notifies_both() {
    let ops = [
        Operation::Connect { client: 0 },
        Operation::Connect { client: 1 },
        Operation::Identify { client: 0 },
        Operation::Identify { client: 1 },
        Operation::Join { client: 0 },
        Operation::Join { client: 1 },
        Operation::AdvanceTime { secs: 100 },
        Operation::Tick,
        Operation::AdvanceTime { secs: 21 },
        Operation::Tick,
    ];

    let mut real = SimWorld::new(2, 3, config());
    for op in ops {
        real.apply(op).unwrap();
    }

    let state = real.observable_state();
    assert_eq!(state.inboxes[0].partner_disconnected, 1);
    assert_eq!(state.inboxes[1].partner_disconnected, 1);
    assert_eq!(state.clients[0], (ClientPhase::Identified, None));
}

#[test]
fn same_seed_same_session_ids() {
    let ops = [
        Operation::Connect { client: 0 },
        Operation::Connect { client: 1 },
        Operation::Identify { client: 0 },
        Operation::Identify { client: 1 },
        Operation::Join { client: 0 },
        Operation::Join { client: 1 },
    ];

    let sessions = |seed| {
        let mut world = SimWorld::new(2, seed, config());
        for op in ops {
            world.apply(op).unwrap();
        }
        world.snapshot().sessions.keys().copied().collect::<Vec<_>>()
    };

    assert_eq!(sessions(11), sessions(11));
    assert_ne!(sessions(11), sessions(12));
}
