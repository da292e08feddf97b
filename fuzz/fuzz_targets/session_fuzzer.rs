//! Fuzz target for the [`Session`] state machine
//!
//! Drive several sessions sharing one room registry with arbitrary intents
//! and time jumps, checking that no ordering corrupts pairing state.
//!
//! # Strategy
//!
//! - Intent sequences: every participant intent, in any order
//! - Room collisions: a handful of room codes so creates and joins overlap
//! - Timer races: time advances between intents so delayed joins, deliveries
//!   and discovery retries interleave with disconnects
//! - Probabilities: the discovery success rate is fuzzed too
//!
//! # Invariants
//!
//! - A partner is only ever bound while connected
//! - Discovery is only in flight while connected
//! - Retry count never exceeds `max_retries`
//! - No session is paired with itself
//! - No room is ever empty, over capacity, or lists an occupant twice
//! - Every room occupant names the room as its current room
//! - A disconnected session holds no room
//!
//! [`Session`]: tandem_core::Session

#![no_main]

use std::{collections::HashSet, time::Duration};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tandem_core::{ROOM_CAPACITY, SessionConfig};
use tandem_harness::{Operation, SimWorld};

/// Fuzz input with deterministic seed for the simulated RNG.
#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    /// Seed for the simulated environment.
    seed: u64,
    /// Participant count, wrapped into 1..=4.
    participants: u8,
    /// Discovery success rate in 1/255 steps.
    success: u8,
    /// Retry budget, wrapped into 1..=4.
    max_retries: u8,
    /// Operation sequence to apply.
    ops: Vec<Operation>,
}

fuzz_target!(|input: FuzzInput| {
    let participants = usize::from(input.participants % 4) + 1;
    let max_retries = u32::from(input.max_retries % 4) + 1;
    let config = SessionConfig {
        discovery_success_probability: f64::from(input.success) / 255.0,
        max_retries,
        ..SessionConfig::default()
    };

    let mut world = SimWorld::new(input.seed, config).expect("valid config");
    for _ in 0..participants {
        world.add_session().expect("valid config");
    }

    for op in input.ops {
        let op = op.clamped(participants);

        match (op.participant(), op.to_input()) {
            (Some(p), Some(input)) => world.apply(usize::from(p), input),
            _ => {
                if let Operation::AdvanceTime { millis } = op {
                    world.advance(Duration::from_millis(u64::from(millis)));
                }
            },
        }

        check(&world, max_retries, &op);
    }

    // Whatever is still scheduled must settle without breaking anything
    world.run_until_idle(Duration::from_secs(600));
    for idx in 0..participants {
        assert!(!world.state(idx).connecting, "session {idx} still discovering after idle");
    }
});

fn check(world: &SimWorld, max_retries: u32, op: &Operation) {
    for idx in 0..world.len() {
        let state = world.state(idx);

        assert!(
            state.partner.is_none() || state.connected,
            "session {idx} has a partner while disconnected after {op:?}"
        );
        assert!(
            !state.connecting || state.connected,
            "session {idx} discovering while disconnected after {op:?}"
        );
        assert!(
            state.retry_count <= max_retries,
            "session {idx} retried {} times after {op:?}",
            state.retry_count
        );
        assert_ne!(state.partner, Some(world.identity(idx)), "session {idx} paired with itself");
        assert!(
            state.current_room.is_none() || state.connected,
            "session {idx} holds a room while disconnected after {op:?}"
        );
    }

    for (code, occupants) in world.registry().snapshot() {
        assert!(!occupants.is_empty(), "room {code} is empty after {op:?}");
        assert!(occupants.len() <= ROOM_CAPACITY, "room {code} over capacity after {op:?}");

        let unique: HashSet<_> = occupants.iter().collect();
        assert_eq!(unique.len(), occupants.len(), "room {code} lists an occupant twice");

        for member in occupants {
            let idx = world.index_of(member).expect("occupant is a known session");
            assert_eq!(
                world.state(idx).current_room.as_ref(),
                Some(&code),
                "session {idx} is in room {code} without knowing it"
            );
        }
    }
}
