//! Supply consumption: per-entity recurring draws funneled through the
//! inventory intent path.
//!
//! Each `(entity, profile, item)` lane is one periodic task. Consumption is
//! idempotent per digest-derived action UID; insufficiency lands in a
//! bounded warnings ledger and every attempt is a `supply_outcome` trace
//! entry.

use std::any::Any;
use std::collections::BTreeSet;

use serde_json::{Map, Value};

use contracts::{ItemRegistry, SimCommand, SupplyConsumeDef, SupplyProfileRegistry};

use crate::canonical::{hex_digest, trace_id_from_tag};
use crate::error::SimError;
use crate::modules::inventory::{apply_inventory_intent, InventoryOutcome};
use crate::rules::RuleModule;
use crate::simulation::{Simulation, TraceEntry};

pub const SUPPLY_CONSUMPTION_MODULE: &str = "supply_consumption";
pub const SUPPLY_OUTCOME_EVENT_TYPE: &str = "supply_outcome";
pub const SUPPLY_CONSUMPTION_TASK_PREFIX: &str = "supply.consume";

const MAX_WARNINGS: usize = 200;

#[derive(Debug)]
pub struct SupplyConsumptionModule {
    profiles: SupplyProfileRegistry,
    items: ItemRegistry,
}

impl SupplyConsumptionModule {
    pub fn new(profiles: SupplyProfileRegistry, items: ItemRegistry) -> Self {
        Self { profiles, items }
    }
}

impl RuleModule for SupplyConsumptionModule {
    fn name(&self) -> &str {
        SUPPLY_CONSUMPTION_MODULE
    }

    fn on_simulation_start(&mut self, sim: &mut Simulation) -> Result<(), SimError> {
        let state = normalized_state(sim);
        sim.set_rules_state(SUPPLY_CONSUMPTION_MODULE, state)?;

        let mut lanes: Vec<(String, String, SupplyConsumeDef)> = Vec::new();
        for entity_id in sim.entity_ids() {
            let Some(profile_id) = sim
                .entity(&entity_id)
                .and_then(|entity| entity.supply_profile_id.clone())
            else {
                continue;
            };
            let Some(profile) = self.profiles.get(&profile_id) else {
                continue;
            };
            for consume in &profile.consumes {
                lanes.push((
                    format!(
                        "{SUPPLY_CONSUMPTION_TASK_PREFIX}:{entity_id}:{profile_id}:{}",
                        consume.item_id
                    ),
                    entity_id.clone(),
                    consume.clone(),
                ));
            }
        }

        for (task_name, entity_id, consume) in lanes {
            sim.register_periodic_task(&task_name, consume.interval_ticks, 0)?;
            let items = self.items.clone();
            let callback_task_name = task_name.clone();
            sim.set_periodic_task_callback(
                &task_name,
                Box::new(move |sim, tick| {
                    apply_consumption(sim, tick, &entity_id, &consume, &callback_task_name, &items)
                }),
            )?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn apply_consumption(
    sim: &mut Simulation,
    tick: u64,
    entity_id: &str,
    consume: &SupplyConsumeDef,
    task_name: &str,
    items: &ItemRegistry,
) -> Result<(), SimError> {
    if sim.entity(entity_id).is_none() {
        return Ok(());
    }

    let mut state = normalized_state(sim);
    let mut applied: BTreeSet<String> = state
        .get("applied_action_uids")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let action_uid = supply_action_uid(tick, task_name);

    if applied.contains(&action_uid) {
        return append_supply_outcome(sim, tick, entity_id, consume, &action_uid, "already_applied", None);
    }

    if !items.contains(&consume.item_id) {
        return append_supply_outcome(sim, tick, entity_id, consume, &action_uid, "unknown_item", None);
    }

    let container_id = sim
        .entity(entity_id)
        .and_then(|entity| entity.inventory_container_id.clone());
    let Some(container_id) = container_id.filter(|id| sim.container(id).is_some()) else {
        return append_supply_outcome(
            sim,
            tick,
            entity_id,
            consume,
            &action_uid,
            "no_inventory_container",
            None,
        );
    };

    let mut params = Map::new();
    params.insert("src_container_id".to_string(), Value::from(container_id.clone()));
    params.insert("dst_container_id".to_string(), Value::Null);
    params.insert("item_id".to_string(), Value::from(consume.item_id.clone()));
    params.insert("quantity".to_string(), Value::from(consume.quantity));
    params.insert("reason".to_string(), Value::from("consume"));
    params.insert("action_uid".to_string(), Value::from(action_uid.clone()));
    let command = SimCommand::new(tick, Some(entity_id.to_string()), "inventory_intent", params);

    let inventory_outcome = apply_inventory_intent(sim, items, &command, 0)?;
    let outcome = match inventory_outcome {
        InventoryOutcome::Applied => {
            applied.insert(action_uid.clone());
            "consumed"
        }
        InventoryOutcome::InsufficientQuantity => {
            let mut warnings: Vec<Value> = state
                .get("warnings")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let mut warning = Map::new();
            warning.insert("tick".to_string(), Value::from(tick));
            warning.insert("entity_id".to_string(), Value::from(entity_id));
            warning.insert("item_id".to_string(), Value::from(consume.item_id.clone()));
            warning.insert("action_uid".to_string(), Value::from(action_uid.clone()));
            warnings.push(Value::Object(warning));
            if warnings.len() > MAX_WARNINGS {
                let overflow = warnings.len() - MAX_WARNINGS;
                warnings.drain(..overflow);
            }
            state.insert("warnings".to_string(), Value::Array(warnings));
            "insufficient_supply"
        }
        other => other.as_str(),
    };

    state.insert(
        "applied_action_uids".to_string(),
        Value::Array(applied.iter().map(|uid| Value::from(uid.as_str())).collect()),
    );
    sim.set_rules_state(SUPPLY_CONSUMPTION_MODULE, state)?;

    let remaining = sim
        .container(&container_id)
        .map(|container| container.quantity(&consume.item_id));
    append_supply_outcome(sim, tick, entity_id, consume, &action_uid, outcome, remaining)
}

fn normalized_state(sim: &Simulation) -> Map<String, Value> {
    let existing = sim.get_rules_state(SUPPLY_CONSUMPTION_MODULE);
    let applied: BTreeSet<String> = existing
        .get("applied_action_uids")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let warnings: Vec<Value> = existing
        .get("warnings")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter(|entry| entry.is_object())
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    let mut state = Map::new();
    state.insert(
        "applied_action_uids".to_string(),
        Value::Array(applied.iter().map(|uid| Value::from(uid.as_str())).collect()),
    );
    state.insert("warnings".to_string(), Value::Array(warnings));
    state
}

fn supply_action_uid(tick: u64, task_name: &str) -> String {
    let digest = hex_digest(format!("supply:{tick}:{task_name}").as_bytes());
    format!("supply:{tick}:{}", &digest[..16])
}

fn append_supply_outcome(
    sim: &mut Simulation,
    tick: u64,
    entity_id: &str,
    consume: &SupplyConsumeDef,
    action_uid: &str,
    outcome: &str,
    remaining: Option<u64>,
) -> Result<(), SimError> {
    let mut params = Map::new();
    params.insert("tick".to_string(), Value::from(tick));
    params.insert("entity_id".to_string(), Value::from(entity_id));
    params.insert("item_id".to_string(), Value::from(consume.item_id.clone()));
    params.insert("quantity".to_string(), Value::from(consume.quantity));
    params.insert("interval_ticks".to_string(), Value::from(consume.interval_ticks));
    params.insert("action_uid".to_string(), Value::from(action_uid));
    params.insert("outcome".to_string(), Value::from(outcome));
    if let Some(remaining) = remaining {
        params.insert("remaining_quantity".to_string(), Value::from(remaining));
    }
    sim.append_trace_entry(TraceEntry {
        tick,
        event_id: trace_id_from_tag(&format!("supply:{action_uid}:{outcome}")),
        event_type: SUPPLY_OUTCOME_EVENT_TYPE.to_string(),
        params,
        module_hooks_called: true,
    })
}
