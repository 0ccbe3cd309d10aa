//! Behavior of the shipped rule modules: inventory, stats, wounds, signals,
//! encounter checks, and supply consumption.

use serde_json::{Map, Value};

use contracts::{
    HexCoord, ItemDef, ItemRegistry, SupplyConsumeDef, SupplyProfile, SupplyProfileRegistry,
};
use sim_core::modules::{
    EncounterCheckModule, EntityStatsModule, InventoryLedgerModule, PeriodicScheduler,
    SignalPropagationModule, SupplyConsumptionModule, WoundLedgerModule,
};
use sim_core::{EntityState, Simulation, MAX_WOUNDS};

fn disk_params(radius: u64) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("radius".to_string(), Value::from(radius));
    params
}

fn item_registry() -> ItemRegistry {
    ItemRegistry::from_items([ItemDef::new("ration"), ItemDef::new("torch")])
}

fn build_sim(seed: u64) -> Simulation {
    let mut sim =
        Simulation::new_with_seed_and_topology(seed, "hex_disk", disk_params(4)).expect("simulation");
    sim.add_entity(EntityState::from_hex("scout", HexCoord::new(0, 0)))
        .expect("scout");
    sim.add_entity(EntityState::from_hex("porter", HexCoord::new(1, 0)))
        .expect("porter");
    sim
}

fn json_obj(raw: Value) -> Map<String, Value> {
    raw.as_object().cloned().expect("object literal")
}

fn trace_outcomes(sim: &Simulation, event_type: &str) -> Vec<String> {
    sim.get_event_trace()
        .iter()
        .filter(|entry| entry.event_type == event_type)
        .filter_map(|entry| entry.params.get("outcome").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

#[test]
fn inventory_transfer_moves_stacks_between_containers() {
    let mut sim = build_sim(1);
    sim.register_rule_module(Box::new(InventoryLedgerModule::new(item_registry())))
        .expect("module");
    sim.container_mut("inventory:scout")
        .expect("scout inventory")
        .apply_delta("ration", 5);

    sim.append_command(
        0,
        Some("scout"),
        "inventory_intent",
        json_obj(serde_json::json!({
            "reason": "transfer",
            "item_id": "ration",
            "quantity": 2,
            "src_container_id": "inventory:scout",
            "dst_container_id": "inventory:porter",
        })),
    )
    .expect("command");
    sim.advance_ticks(1).expect("advance");

    assert_eq!(
        sim.container("inventory:scout").expect("scout").quantity("ration"),
        3
    );
    assert_eq!(
        sim.container("inventory:porter").expect("porter").quantity("ration"),
        2
    );
    assert_eq!(trace_outcomes(&sim, "inventory_outcome"), vec!["applied"]);
}

#[test]
fn inventory_rejections_mutate_nothing() {
    let mut sim = build_sim(1);
    sim.register_rule_module(Box::new(InventoryLedgerModule::new(item_registry())))
        .expect("module");
    sim.container_mut("inventory:scout")
        .expect("scout inventory")
        .apply_delta("ration", 1);

    for (tick, params) in [
        (
            0,
            serde_json::json!({
                "reason": "transfer",
                "item_id": "ration",
                "quantity": 5,
                "src_container_id": "inventory:scout",
                "dst_container_id": "inventory:porter",
            }),
        ),
        (
            0,
            serde_json::json!({
                "reason": "transfer",
                "item_id": "mystery_orb",
                "quantity": 1,
                "src_container_id": "inventory:scout",
                "dst_container_id": "inventory:porter",
            }),
        ),
        (
            0,
            serde_json::json!({
                "reason": "barter",
                "item_id": "ration",
                "quantity": 1,
                "src_container_id": "inventory:scout",
                "dst_container_id": "inventory:porter",
            }),
        ),
    ] {
        sim.append_command(tick, Some("scout"), "inventory_intent", json_obj(params))
            .expect("command");
    }
    sim.advance_ticks(1).expect("advance");

    assert_eq!(
        sim.container("inventory:scout").expect("scout").quantity("ration"),
        1
    );
    assert_eq!(
        sim.container("inventory:porter").expect("porter").quantity("ration"),
        0
    );
    assert_eq!(
        trace_outcomes(&sim, "inventory_outcome"),
        vec!["insufficient_quantity", "unknown_item", "unsupported_reason"]
    );
}

#[test]
fn inventory_explicit_action_uid_is_idempotent() {
    let mut sim = build_sim(1);
    sim.register_rule_module(Box::new(InventoryLedgerModule::new(item_registry())))
        .expect("module");
    sim.container_mut("inventory:scout")
        .expect("scout inventory")
        .apply_delta("ration", 4);

    let params = serde_json::json!({
        "reason": "consume",
        "item_id": "ration",
        "quantity": 1,
        "src_container_id": "inventory:scout",
        "action_uid": "manual:consume:1",
    });
    sim.append_command(0, Some("scout"), "inventory_intent", json_obj(params.clone()))
        .expect("first");
    sim.append_command(0, Some("scout"), "inventory_intent", json_obj(params))
        .expect("second");
    sim.advance_ticks(1).expect("advance");

    assert_eq!(
        sim.container("inventory:scout").expect("scout").quantity("ration"),
        3
    );
    assert_eq!(
        trace_outcomes(&sim, "inventory_outcome"),
        vec!["applied", "already_applied"]
    );
}

#[test]
fn inventory_drop_provisions_world_drop_container() {
    let mut sim = build_sim(1);
    sim.register_rule_module(Box::new(InventoryLedgerModule::new(item_registry())))
        .expect("module");
    sim.container_mut("inventory:scout")
        .expect("scout inventory")
        .apply_delta("torch", 2);

    sim.append_command(
        0,
        Some("scout"),
        "inventory_intent",
        json_obj(serde_json::json!({
            "reason": "drop",
            "item_id": "torch",
            "quantity": 1,
            "src_container_id": "inventory:scout",
        })),
    )
    .expect("command");
    sim.advance_ticks(1).expect("advance");

    let drop_container = sim.container("world_drop:overworld:0:0").expect("drop container");
    assert_eq!(drop_container.quantity("torch"), 1);
}

#[test]
fn entity_stat_patch_applies_after_duration() {
    let mut sim = build_sim(1);
    sim.register_rule_module(Box::new(EntityStatsModule::new()))
        .expect("module");

    sim.append_command(
        0,
        Some("scout"),
        "entity_stat_intent",
        json_obj(serde_json::json!({
            "op": "set",
            "key": "hearing",
            "value": 60,
            "duration_ticks": 3,
        })),
    )
    .expect("command");

    sim.advance_ticks(3).expect("advance to 3");
    assert!(sim.entity("scout").expect("scout").stats.get("hearing").is_none());
    sim.advance_ticks(1).expect("execute tick");
    assert_eq!(
        sim.entity("scout").expect("scout").stats.get("hearing"),
        Some(&Value::from(60))
    );

    let outcomes: Vec<String> = sim
        .get_event_trace()
        .iter()
        .filter(|entry| entry.event_type == "entity_stat_outcome")
        .filter_map(|entry| entry.params.get("outcome").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    assert_eq!(outcomes, vec!["applied"]);
}

#[test]
fn entity_stat_invalid_op_is_forensic_not_fatal() {
    let mut sim = build_sim(1);
    sim.register_rule_module(Box::new(EntityStatsModule::new()))
        .expect("module");

    sim.append_command(
        0,
        Some("scout"),
        "entity_stat_intent",
        json_obj(serde_json::json!({"op": "merge", "key": "hearing", "duration_ticks": 0})),
    )
    .expect("command");
    sim.advance_ticks(1).expect("advance");

    let outcomes: Vec<String> = sim
        .get_event_trace()
        .iter()
        .filter(|entry| entry.event_type == "entity_stat_outcome")
        .filter_map(|entry| entry.params.get("outcome").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    assert_eq!(outcomes, vec!["invalid_params"]);
    assert!(sim.entity("scout").expect("scout").stats.is_empty());
}

#[test]
fn wounds_apply_and_stay_bounded() {
    let mut sim = build_sim(1);
    sim.register_rule_module(Box::new(WoundLedgerModule::new()))
        .expect("module");

    for index in 0..(MAX_WOUNDS as u64 + 3) {
        sim.append_command(
            index,
            Some("scout"),
            "wound_intent",
            json_obj(serde_json::json!({
                "region": format!("region-{index}"),
                "severity": 2,
                "tags": ["bleeding"],
                "duration_ticks": 0,
                "source": "porter",
            })),
        )
        .expect("command");
    }
    sim.advance_ticks(MAX_WOUNDS as u64 + 4).expect("advance");

    let wounds = &sim.entity("scout").expect("scout").wounds;
    assert_eq!(wounds.len(), MAX_WOUNDS);
    assert_eq!(wounds[0].region, "region-3");
    assert_eq!(wounds[0].tags, vec!["bleeding".to_string()]);
    assert_eq!(wounds[0].source.as_deref(), Some("porter"));
}

#[test]
fn signal_emission_lands_in_world_ledger_and_is_perceivable() {
    let mut sim = build_sim(1);
    sim.register_rule_module(Box::new(SignalPropagationModule::new()))
        .expect("module");
    sim.append_command(
        0,
        Some("porter"),
        "perceive_signal_intent",
        json_obj(serde_json::json!({"channel": "sound", "radius": 6, "duration_ticks": 2})),
    )
    .expect("perceive");
    sim.append_command(
        0,
        Some("scout"),
        "emit_signal_intent",
        json_obj(serde_json::json!({
            "channel": "sound",
            "base_intensity": 8,
            "max_radius": 6,
            "ttl_ticks": 10,
            "duration_ticks": 0,
        })),
    )
    .expect("emit");

    sim.advance_ticks(3).expect("advance");

    assert_eq!(sim.world().signals.len(), 1);
    let perception: Vec<_> = sim
        .get_event_trace()
        .iter()
        .filter(|entry| entry.event_type == "signal_perception_outcome")
        .cloned()
        .collect();
    assert_eq!(perception.len(), 1);
    let hits = perception[0]
        .params
        .get("hits")
        .and_then(Value::as_array)
        .expect("hits");
    assert_eq!(hits.len(), 1);
    assert_eq!(
        hits[0].get("signal_id").and_then(Value::as_str),
        Some("0:1")
    );
    assert_eq!(hits[0].get("computed_strength").and_then(Value::as_i64), Some(7));
}

#[test]
fn encounter_checks_accumulate_in_rules_state() {
    let mut sim = build_sim(1);
    sim.register_rule_module(Box::new(PeriodicScheduler::new()))
        .expect("periodic");
    sim.register_rule_module(Box::new(EncounterCheckModule::new()))
        .expect("encounter");

    // Checks fire at ticks 0,10,20,30 and land one tick later.
    sim.advance_ticks(32).expect("advance");
    let state = sim.get_rules_state("encounter_check");
    assert_eq!(state.get("checks_emitted").and_then(Value::as_i64), Some(4));
    assert_eq!(state.get("last_check_tick").and_then(Value::as_i64), Some(30));
}

#[test]
fn supply_consumption_draws_down_rations_daily() {
    let mut sim =
        Simulation::new_with_seed_and_topology(2, "hex_disk", disk_params(4)).expect("simulation");
    let mut scout = EntityState::from_hex("scout", HexCoord::new(0, 0));
    scout.supply_profile_id = Some("player_default".to_string());
    sim.add_entity(scout).expect("scout");
    sim.container_mut("inventory:scout")
        .expect("inventory")
        .apply_delta("ration", 3);

    let profiles = SupplyProfileRegistry::from_profiles([SupplyProfile {
        profile_id: "player_default".to_string(),
        consumes: vec![SupplyConsumeDef {
            item_id: "ration".to_string(),
            quantity: 1,
            interval_ticks: 240,
        }],
    }]);
    sim.register_rule_module(Box::new(PeriodicScheduler::new()))
        .expect("periodic");
    sim.register_rule_module(Box::new(InventoryLedgerModule::new(item_registry())))
        .expect("inventory");
    sim.register_rule_module(Box::new(SupplyConsumptionModule::new(profiles, item_registry())))
        .expect("supplies");

    // Draws at ticks 0, 240, 480; stock 3 -> 0, then insufficiency at 720.
    sim.advance_days(4).expect("advance");
    assert_eq!(
        sim.container("inventory:scout").expect("inventory").quantity("ration"),
        0
    );
    let outcomes = trace_outcomes(&sim, "supply_outcome");
    assert_eq!(
        outcomes,
        vec!["consumed", "consumed", "consumed", "insufficient_supply"]
    );
    let warnings = sim
        .get_rules_state("supply_consumption")
        .get("warnings")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    assert_eq!(warnings, 1);
}
