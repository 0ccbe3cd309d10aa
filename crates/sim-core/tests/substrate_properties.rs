//! Property tests over the substrate invariants.

use proptest::prelude::*;
use serde_json::{Map, Value};

use sim_core::{RngStreams, Simulation, WorldState, MAX_SIGNALS};

fn disk_params(radius: u64) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("radius".to_string(), Value::from(radius));
    params
}

proptest! {
    #[test]
    fn bounded_ledger_keeps_exactly_the_last_cap_records(extra in 0usize..64) {
        let mut world = WorldState::new();
        let total = MAX_SIGNALS + extra;
        for index in 0..total {
            world.append_signal_record(Value::from(index as u64));
        }
        prop_assert_eq!(world.signals.len(), MAX_SIGNALS);
        prop_assert_eq!(world.signals.first(), Some(&Value::from(extra as u64)));
        prop_assert_eq!(world.signals.last(), Some(&Value::from((total - 1) as u64)));
    }

    #[test]
    fn event_ids_execute_in_two_key_order(ticks in proptest::collection::vec(0u64..6, 1..24)) {
        let mut sim = Simulation::new_with_seed_and_topology(3, "hex_disk", disk_params(2))
            .map_err(|err| TestCaseError::fail(err.to_string()))?;
        let mut expected: Vec<(u64, u64)> = Vec::new();
        for tick in &ticks {
            let event_id = sim
                .schedule_event(*tick, "noop", Map::new())
                .map_err(|err| TestCaseError::fail(err.to_string()))?;
            expected.push((*tick, event_id));
        }
        expected.sort();
        sim.advance_ticks(6).map_err(|err| TestCaseError::fail(err.to_string()))?;

        let executed: Vec<u64> = sim.event_execution_log().to_vec();
        let expected_ids: Vec<u64> = expected.iter().map(|(_, id)| *id).collect();
        prop_assert_eq!(executed, expected_ids);
    }

    #[test]
    fn stream_draws_are_independent_of_sibling_streams(
        draws_before in 0usize..16,
        foreign_draws in 0usize..16,
    ) {
        let mut control = RngStreams::new(11);
        let mut probed = RngStreams::new(11);

        for _ in 0..draws_before {
            control.stream("subject").next_f64();
            probed.stream("subject").next_f64();
        }
        for index in 0..foreign_draws {
            probed.stream(&format!("foreign-{index}")).next_f64();
        }
        prop_assert_eq!(
            control.stream("subject").next_f64().to_bits(),
            probed.stream("subject").next_f64().to_bits()
        );
    }

    #[test]
    fn canonical_hash_ignores_object_insertion_order(
        keys in proptest::collection::btree_set("[a-z]{1,6}", 1..10)
    ) {
        let keys: Vec<String> = keys.into_iter().collect();
        let forward = {
            let mut object = Map::new();
            for (index, key) in keys.iter().enumerate() {
                object.insert(key.clone(), Value::from(index as u64));
            }
            Value::Object(object)
        };
        let reverse = {
            let mut object = Map::new();
            for (index, key) in keys.iter().enumerate().rev() {
                object.insert(key.clone(), Value::from(index as u64));
            }
            Value::Object(object)
        };
        prop_assert_eq!(
            sim_core::canonical_hash(&forward).map_err(|err| TestCaseError::fail(err.to_string()))?,
            sim_core::canonical_hash(&reverse).map_err(|err| TestCaseError::fail(err.to_string()))?
        );
    }

    #[test]
    fn payload_round_trip_preserves_hash(seed in 0u64..1_000, ticks in 0u64..40) {
        let mut sim = Simulation::new_with_seed_and_topology(seed, "hex_disk", disk_params(2))
            .map_err(|err| TestCaseError::fail(err.to_string()))?;
        sim.advance_ticks(ticks).map_err(|err| TestCaseError::fail(err.to_string()))?;
        let clone = sim
            .clone_via_payload()
            .map_err(|err| TestCaseError::fail(err.to_string()))?;
        prop_assert_eq!(
            sim.simulation_hash().map_err(|err| TestCaseError::fail(err.to_string()))?,
            clone.simulation_hash().map_err(|err| TestCaseError::fail(err.to_string()))?
        );
    }
}
