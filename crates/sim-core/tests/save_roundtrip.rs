//! Canonical save round trips, tamper detection, and rehydration.

use std::fs;

use serde_json::{Map, Value};
use tempfile::tempdir;

use contracts::HexCoord;
use sim_core::modules::{EncounterCheckModule, PeriodicScheduler};
use sim_core::{load_game, load_world_template, save_game, EntityState, SaveError, Simulation};

fn disk_params(radius: u64) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("radius".to_string(), Value::from(radius));
    params
}

fn build_sim(seed: u64) -> Simulation {
    let mut sim =
        Simulation::new_with_seed_and_topology(seed, "hex_disk", disk_params(4)).expect("simulation");
    sim.add_entity(EntityState::from_hex("scout", HexCoord::new(0, 0)))
        .expect("entity");
    sim.register_rule_module(Box::new(PeriodicScheduler::new()))
        .expect("periodic");
    sim.register_rule_module(Box::new(EncounterCheckModule::new()))
        .expect("encounter");
    sim
}

fn register_modules(sim: &mut Simulation) {
    sim.register_rule_module(Box::new(PeriodicScheduler::new()))
        .expect("periodic");
    sim.register_rule_module(Box::new(EncounterCheckModule::new()))
        .expect("encounter");
}

#[test]
fn save_load_save_is_byte_identical() {
    let dir = tempdir().expect("tempdir");
    let path_a = dir.path().join("a.json");
    let path_b = dir.path().join("b.json");

    let mut sim = build_sim(7);
    sim.advance_ticks(25).expect("advance");
    save_game(&sim, &path_a, Map::new()).expect("save a");

    let loaded = load_game(&path_a).expect("load a");
    save_game(&loaded, &path_b, Map::new()).expect("save b");

    let bytes_a = fs::read(&path_a).expect("read a");
    let bytes_b = fs::read(&path_b).expect("read b");
    assert_eq!(bytes_a, bytes_b);
}

#[test]
fn load_preserves_simulation_hash() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("save.json");

    let mut sim = build_sim(11);
    sim.advance_ticks(40).expect("advance");
    let live_hash = sim.simulation_hash().expect("hash");
    save_game(&sim, &path, Map::new()).expect("save");

    let loaded = load_game(&path).expect("load");
    assert_eq!(loaded.simulation_hash().expect("loaded hash"), live_hash);
    assert_eq!(loaded.tick(), sim.tick());
}

#[test]
fn rehydration_is_idempotent_under_continued_advance() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("save.json");

    let mut original = build_sim(21);
    original.advance_ticks(30).expect("advance to 30");
    save_game(&original, &path, Map::new()).expect("save");
    original.advance_ticks(45).expect("advance to 75");

    let mut resumed = load_game(&path).expect("load");
    register_modules(&mut resumed);
    resumed.advance_ticks(45).expect("advance resumed");

    assert_eq!(
        original.simulation_hash().expect("original hash"),
        resumed.simulation_hash().expect("resumed hash")
    );
}

#[test]
fn tampered_world_state_fails_with_hash_mismatch() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("save.json");

    let mut sim = build_sim(5);
    sim.advance_ticks(10).expect("advance");
    save_game(&sim, &path, Map::new()).expect("save");

    let raw = fs::read_to_string(&path).expect("read");
    // Flip one character inside a terrain value without touching save_hash.
    let tampered = raw.replacen("plains", "plaXns", 1);
    assert_ne!(raw, tampered, "fixture must contain a plains cell");
    fs::write(&path, tampered).expect("write tampered");

    match load_game(&path) {
        Err(SaveError::HashMismatch { .. }) => {}
        other => panic!("expected HashMismatch, got {other:?}"),
    }
}

#[test]
fn unknown_schema_version_fails_fast() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("save.json");

    let sim = build_sim(5);
    save_game(&sim, &path, Map::new()).expect("save");
    let raw = fs::read_to_string(&path).expect("read");
    let tampered = raw.replacen("\"schema_version\":1", "\"schema_version\":9", 1);
    fs::write(&path, tampered).expect("write");

    match load_game(&path) {
        Err(SaveError::SchemaVersionUnsupported(9)) => {}
        Err(SaveError::HashMismatch { .. }) => {
            panic!("schema version must be checked before the hash")
        }
        other => panic!("expected SchemaVersionUnsupported, got {other:?}"),
    }
}

#[test]
fn save_failure_leaves_existing_file_intact() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("save.json");

    let sim = build_sim(3);
    save_game(&sim, &path, Map::new()).expect("save");
    let before = fs::read(&path).expect("read");

    // A save that cannot complete must not clobber the previous file.
    let missing_dir = dir.path().join("no-such-dir").join("save.json");
    assert!(save_game(&sim, &missing_dir, Map::new()).is_err());
    let after = fs::read(&path).expect("read again");
    assert_eq!(before, after);
}

#[test]
fn legacy_world_payload_loads_as_template_only() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("world.json");

    let hexes = serde_json::json!([
        {"coord": {"q": 0, "r": 0}, "record": {"terrain_type": "plains"}},
        {"coord": {"q": 1, "r": -1}, "record": {"terrain_type": "hills", "site_type": "town"}},
    ]);
    let world_hash = sim_core::canonical_hash(&serde_json::json!({"hexes": hexes.clone()}))
        .expect("world hash");
    let payload = serde_json::json!({
        "schema_version": 1,
        "world_hash": world_hash,
        "hexes": hexes,
    });
    fs::write(&path, serde_json::to_string(&payload).expect("encode")).expect("write");

    let world = load_world_template(&path).expect("template");
    assert_eq!(world.overworld().expect("overworld").cells.len(), 2);

    match load_game(&path) {
        Err(SaveError::SchemaInvalid(_)) => {}
        other => panic!("expected SchemaInvalid for legacy payload, got {other:?}"),
    }
}

#[test]
fn absent_and_empty_optional_collections_hash_identically() {
    let sim = build_sim(13);
    let payload = sim.to_payload().expect("payload");

    // Strip empty optional collections from the world section entirely.
    let mut stripped = payload.clone();
    let world = stripped
        .get_mut("world_state")
        .and_then(Value::as_object_mut)
        .expect("world object");
    for key in ["signals", "tracks", "rumors", "spawn_descriptors", "occlusion_edges", "sites"] {
        let removed = world.remove(key);
        assert!(removed.is_some(), "expected world_state.{key} to exist");
    }

    let from_full = Simulation::from_payload(&payload).expect("full payload");
    let from_stripped = Simulation::from_payload(&stripped).expect("stripped payload");
    assert_eq!(
        from_full.simulation_hash().expect("full hash"),
        from_stripped.simulation_hash().expect("stripped hash")
    );
}
