//! Periodic task registration, deterministic firing, and rehydration.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{Map, Value};
use tempfile::tempdir;

use contracts::EVT_PERIODIC_TICK;
use sim_core::modules::PeriodicScheduler;
use sim_core::{load_game, save_game, SimError, Simulation};

fn disk_params(radius: u64) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("radius".to_string(), Value::from(radius));
    params
}

fn build_sim(seed: u64) -> Simulation {
    let mut sim =
        Simulation::new_with_seed_and_topology(seed, "hex_disk", disk_params(3)).expect("simulation");
    sim.register_rule_module(Box::new(PeriodicScheduler::new()))
        .expect("periodic");
    sim
}

fn executed_periodic_ticks(sim: &Simulation, task: &str) -> Vec<u64> {
    sim.get_event_trace()
        .iter()
        .filter(|entry| {
            entry.event_type == EVT_PERIODIC_TICK
                && entry.params.get("task").and_then(Value::as_str) == Some(task)
        })
        .map(|entry| entry.tick)
        .collect()
}

#[test]
fn interval_task_fires_on_schedule() {
    let mut sim = build_sim(42);
    sim.register_periodic_task("encounter_check", 20, 0).expect("register");

    let fired: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(Vec::new()));
    let recorder = Rc::clone(&fired);
    sim.set_periodic_task_callback(
        "encounter_check",
        Box::new(move |_sim, tick| {
            recorder.borrow_mut().push(tick);
            Ok(())
        }),
    )
    .expect("callback");

    // Ticks 0..=100 inclusive.
    sim.advance_ticks(101).expect("advance");
    assert_eq!(*fired.borrow(), vec![0, 20, 40, 60, 80, 100]);
    assert_eq!(
        executed_periodic_ticks(&sim, "encounter_check"),
        vec![0, 20, 40, 60, 80, 100]
    );
}

#[test]
fn reregistration_with_matching_metadata_is_idempotent() {
    let mut sim = build_sim(1);
    sim.register_periodic_task("upkeep", 10, 0).expect("first");
    sim.register_periodic_task("upkeep", 10, 0).expect("second");

    let pending: Vec<_> = sim
        .pending_events()
        .into_iter()
        .filter(|event| event.event_type == EVT_PERIODIC_TICK)
        .collect();
    assert_eq!(pending.len(), 1);
}

#[test]
fn conflicting_interval_is_rejected() {
    let mut sim = build_sim(1);
    sim.register_periodic_task("upkeep", 10, 0).expect("first");
    match sim.register_periodic_task("upkeep", 25, 0) {
        Err(SimError::ConflictingTaskRegistration {
            task_name,
            registered_interval,
            requested_interval,
        }) => {
            assert_eq!(task_name, "upkeep");
            assert_eq!((registered_interval, requested_interval), (10, 25));
        }
        other => panic!("expected ConflictingTaskRegistration, got {other:?}"),
    }
}

#[test]
fn late_registration_starts_at_current_tick() {
    let mut sim = build_sim(1);
    sim.advance_ticks(15).expect("advance");
    sim.register_periodic_task("late_task", 10, 0).expect("register");

    let pending_tick = sim
        .pending_events()
        .into_iter()
        .find(|event| {
            event.event_type == EVT_PERIODIC_TICK
                && event.params.get("task").and_then(Value::as_str) == Some("late_task")
        })
        .map(|event| event.tick)
        .expect("pending periodic event");
    assert_eq!(pending_tick, 15);
}

#[test]
fn tasks_sharing_a_start_tick_fire_in_registration_order() {
    let mut sim = build_sim(1);
    sim.register_periodic_task("alpha_task", 30, 0).expect("alpha");
    sim.register_periodic_task("omega_task", 30, 0).expect("omega");
    // Deliberately registered in non-lexicographic order too.
    sim.register_periodic_task("middle_task", 30, 0).expect("middle");

    sim.advance_ticks(1).expect("advance");
    let order: Vec<String> = sim
        .get_event_trace()
        .iter()
        .filter(|entry| entry.event_type == EVT_PERIODIC_TICK)
        .filter_map(|entry| entry.params.get("task").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    assert_eq!(order, vec!["alpha_task", "omega_task", "middle_task"]);
}

#[test]
fn rehydration_does_not_duplicate_pending_chains() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("periodic.json");

    let mut sim = build_sim(9);
    sim.register_periodic_task("encounter_check", 20, 0).expect("register");
    sim.advance_ticks(30).expect("advance");
    save_game(&sim, &path, Map::new()).expect("save");

    let mut resumed = load_game(&path).expect("load");
    resumed
        .register_rule_module(Box::new(PeriodicScheduler::new()))
        .expect("fresh scheduler");
    // Re-registering the same task on the fresh instance must adopt the
    // pending chain instead of duplicating it.
    resumed
        .register_periodic_task("encounter_check", 20, 0)
        .expect("re-register");

    let pending: Vec<_> = resumed
        .pending_events()
        .into_iter()
        .filter(|event| {
            event.event_type == EVT_PERIODIC_TICK
                && event.params.get("task").and_then(Value::as_str) == Some("encounter_check")
        })
        .collect();
    assert_eq!(pending.len(), 1);

    resumed.advance_ticks(31).expect("advance resumed");
    assert_eq!(executed_periodic_ticks(&resumed, "encounter_check"), vec![40, 60]);
}

#[test]
fn rehydrated_interval_conflict_is_detected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("periodic.json");

    let mut sim = build_sim(9);
    sim.register_periodic_task("upkeep", 20, 0).expect("register");
    save_game(&sim, &path, Map::new()).expect("save");

    let mut resumed = load_game(&path).expect("load");
    resumed
        .register_rule_module(Box::new(PeriodicScheduler::new()))
        .expect("fresh scheduler");
    match resumed.register_periodic_task("upkeep", 7, 0) {
        Err(SimError::ConflictingTaskRegistration { .. }) => {}
        other => panic!("expected ConflictingTaskRegistration, got {other:?}"),
    }
}

#[test]
fn callbacks_are_memory_only_and_reattachable() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("periodic.json");

    let mut sim = build_sim(4);
    sim.register_periodic_task("pulse", 5, 0).expect("register");
    save_game(&sim, &path, Map::new()).expect("save");

    let mut resumed = load_game(&path).expect("load");
    resumed
        .register_rule_module(Box::new(PeriodicScheduler::new()))
        .expect("fresh scheduler");

    let fired: Rc<RefCell<u64>> = Rc::new(RefCell::new(0));
    let recorder = Rc::clone(&fired);
    resumed
        .set_periodic_task_callback(
            "pulse",
            Box::new(move |_sim, _tick| {
                *recorder.borrow_mut() += 1;
                Ok(())
            }),
        )
        .expect("reattach");

    resumed.advance_ticks(11).expect("advance");
    assert_eq!(*fired.borrow(), 3); // ticks 0, 5, 10
}
