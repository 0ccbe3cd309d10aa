//! Entity stat execution: delayed, idempotent stat patches.
//!
//! An `entity_stat_intent` command validates its parameters, then schedules
//! an `entity_stat_execute` event `duration_ticks` later. Execution applies
//! the patch at most once per action UID and always lands an
//! `entity_stat_outcome` event.

use std::any::Any;
use std::collections::BTreeSet;

use serde_json::{Map, Value};

use contracts::{SimCommand, SimEvent};

use crate::entity::apply_stat_patch;
use crate::error::SimError;
use crate::rules::RuleModule;
use crate::simulation::Simulation;

pub const ENTITY_STATS_MODULE: &str = "entity_stats";
pub const ENTITY_STAT_INTENT_COMMAND_TYPE: &str = "entity_stat_intent";
pub const ENTITY_STAT_EXECUTE_EVENT_TYPE: &str = "entity_stat_execute";
pub const ENTITY_STAT_OUTCOME_EVENT_TYPE: &str = "entity_stat_outcome";

const STATE_EXECUTED_ACTION_UIDS: &str = "executed_action_uids";

#[derive(Debug, Default)]
pub struct EntityStatsModule;

impl EntityStatsModule {
    pub fn new() -> Self {
        Self
    }
}

impl RuleModule for EntityStatsModule {
    fn name(&self) -> &str {
        ENTITY_STATS_MODULE
    }

    fn on_command(
        &mut self,
        sim: &mut Simulation,
        command: &SimCommand,
        command_index: u64,
    ) -> Result<bool, SimError> {
        if command.command_type != ENTITY_STAT_INTENT_COMMAND_TYPE {
            return Ok(false);
        }

        let action_uid = command.action_uid(command_index);
        let op = command.params.get("op").and_then(Value::as_str).unwrap_or("");
        let key = command.params.get("key").and_then(Value::as_str).unwrap_or("");
        let target_entity_id = command
            .params
            .get("target_entity_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .or(command.entity_id.as_deref())
            .unwrap_or("")
            .to_string();

        if op != "set" && op != "remove" {
            return schedule_outcome(
                sim,
                command.tick,
                &action_uid,
                &target_entity_id,
                op,
                key,
                "invalid_params",
                reason_details("invalid_op"),
            )
            .map(|_| true);
        }
        if key.is_empty() {
            return schedule_outcome(
                sim,
                command.tick,
                &action_uid,
                &target_entity_id,
                op,
                key,
                "invalid_params",
                reason_details("invalid_key"),
            )
            .map(|_| true);
        }
        let duration_ticks = match command.params.get("duration_ticks").and_then(Value::as_u64) {
            Some(duration) => duration,
            None => {
                return schedule_outcome(
                    sim,
                    command.tick,
                    &action_uid,
                    &target_entity_id,
                    op,
                    key,
                    "invalid_params",
                    reason_details("invalid_duration_ticks"),
                )
                .map(|_| true);
            }
        };
        if op == "set" && !command.params.contains_key("value") {
            return schedule_outcome(
                sim,
                command.tick,
                &action_uid,
                &target_entity_id,
                op,
                key,
                "invalid_params",
                reason_details("missing_value"),
            )
            .map(|_| true);
        }

        let mut params = Map::new();
        params.insert("action_uid".to_string(), Value::from(action_uid));
        params.insert("entity_id".to_string(), Value::from(target_entity_id));
        params.insert("op".to_string(), Value::from(op));
        params.insert("key".to_string(), Value::from(key));
        params.insert(
            "value".to_string(),
            command.params.get("value").cloned().unwrap_or(Value::Null),
        );
        sim.schedule_event(
            command.tick + duration_ticks,
            ENTITY_STAT_EXECUTE_EVENT_TYPE,
            params,
        )?;
        Ok(true)
    }

    fn on_event_executed(&mut self, sim: &mut Simulation, event: &SimEvent) -> Result<(), SimError> {
        if event.event_type != ENTITY_STAT_EXECUTE_EVENT_TYPE {
            return Ok(());
        }

        let action_uid = event.param_str("action_uid").unwrap_or("").to_string();
        let entity_id = event.param_str("entity_id").unwrap_or("").to_string();
        let op = event.param_str("op").unwrap_or("").to_string();
        let key = event.param_str("key").unwrap_or("").to_string();

        let mut executed = executed_action_uids(sim)?;
        if executed.contains(&action_uid) {
            return schedule_outcome(
                sim,
                event.tick,
                &action_uid,
                &entity_id,
                &op,
                &key,
                "already_applied",
                Map::new(),
            );
        }

        let structurally_valid = !action_uid.is_empty()
            && (op == "set" || op == "remove")
            && !key.is_empty()
            && (op != "set" || event.params.contains_key("value"));
        if !structurally_valid {
            schedule_outcome(
                sim,
                event.tick,
                &action_uid,
                &entity_id,
                &op,
                &key,
                "invalid_params",
                reason_details("invalid_execute_payload"),
            )?;
            if !action_uid.is_empty() {
                executed.insert(action_uid);
                store_executed_action_uids(sim, &executed)?;
            }
            return Ok(());
        }

        if sim.entity(&entity_id).is_none() {
            schedule_outcome(
                sim,
                event.tick,
                &action_uid,
                &entity_id,
                &op,
                &key,
                "unknown_entity",
                Map::new(),
            )?;
            executed.insert(action_uid);
            return store_executed_action_uids(sim, &executed);
        }

        let mut patch = Map::new();
        patch.insert("op".to_string(), Value::from(op.clone()));
        patch.insert("key".to_string(), Value::from(key.clone()));
        if op == "set" {
            patch.insert(
                "value".to_string(),
                event.params.get("value").cloned().unwrap_or(Value::Null),
            );
        }

        let current_stats = sim
            .entity(&entity_id)
            .map(|entity| entity.stats.clone())
            .unwrap_or_default();
        match apply_stat_patch(&current_stats, &patch) {
            Ok(updated) => {
                if let Some(entity) = sim.entity_mut(&entity_id) {
                    entity.stats = updated;
                }
                executed.insert(action_uid.clone());
                store_executed_action_uids(sim, &executed)?;
                schedule_outcome(
                    sim,
                    event.tick,
                    &action_uid,
                    &entity_id,
                    &op,
                    &key,
                    "applied",
                    Map::new(),
                )
            }
            Err(error) => {
                schedule_outcome(
                    sim,
                    event.tick,
                    &action_uid,
                    &entity_id,
                    &op,
                    &key,
                    "invalid_params",
                    reason_details(&error.to_string()),
                )?;
                executed.insert(action_uid);
                store_executed_action_uids(sim, &executed)
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn reason_details(reason: &str) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert("reason".to_string(), Value::from(reason));
    details
}

fn executed_action_uids(sim: &Simulation) -> Result<BTreeSet<String>, SimError> {
    let state = sim.get_rules_state(ENTITY_STATS_MODULE);
    let mut uids = BTreeSet::new();
    if let Some(executed) = state.get(STATE_EXECUTED_ACTION_UIDS) {
        let entries = executed.as_array().ok_or_else(|| {
            SimError::InvalidArgument(
                "entity_stats.rules_state.executed_action_uids must be a list".to_string(),
            )
        })?;
        for entry in entries {
            if let Some(uid) = entry.as_str() {
                if !uid.is_empty() {
                    uids.insert(uid.to_string());
                }
            }
        }
    }
    Ok(uids)
}

fn store_executed_action_uids(sim: &mut Simulation, uids: &BTreeSet<String>) -> Result<(), SimError> {
    let mut state = sim.get_rules_state(ENTITY_STATS_MODULE);
    state.insert(
        STATE_EXECUTED_ACTION_UIDS.to_string(),
        Value::Array(uids.iter().map(|uid| Value::from(uid.as_str())).collect()),
    );
    sim.set_rules_state(ENTITY_STATS_MODULE, state)
}

#[allow(clippy::too_many_arguments)]
fn schedule_outcome(
    sim: &mut Simulation,
    tick: u64,
    action_uid: &str,
    entity_id: &str,
    op: &str,
    key: &str,
    outcome: &str,
    details: Map<String, Value>,
) -> Result<(), SimError> {
    let mut params = Map::new();
    params.insert("tick".to_string(), Value::from(tick));
    params.insert("action_uid".to_string(), Value::from(action_uid));
    params.insert("entity_id".to_string(), Value::from(entity_id));
    params.insert("op".to_string(), Value::from(op));
    params.insert("key".to_string(), Value::from(key));
    params.insert("outcome".to_string(), Value::from(outcome));
    params.insert("details".to_string(), Value::Object(details));
    sim.schedule_event(tick, ENTITY_STAT_OUTCOME_EVENT_TYPE, params)?;
    Ok(())
}
