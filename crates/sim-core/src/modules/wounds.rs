//! Wound ledger: delayed, idempotent wound application.
//!
//! A `wound_intent` command schedules a `wound_execute` event; execution
//! appends a `WoundRecord` to the target entity (FIFO-bounded) at most once
//! per action UID, and every attempt lands a `wound_outcome` event.

use std::any::Any;
use std::collections::BTreeSet;

use serde_json::{Map, Value};

use contracts::{SimCommand, SimEvent, WoundRecord};

use crate::error::SimError;
use crate::rules::RuleModule;
use crate::simulation::Simulation;

pub const WOUND_LEDGER_MODULE: &str = "wound_ledger";
pub const WOUND_INTENT_COMMAND_TYPE: &str = "wound_intent";
pub const WOUND_EXECUTE_EVENT_TYPE: &str = "wound_execute";
pub const WOUND_OUTCOME_EVENT_TYPE: &str = "wound_outcome";

const STATE_EXECUTED_ACTION_UIDS: &str = "executed_action_uids";

#[derive(Debug, Default)]
pub struct WoundLedgerModule;

impl WoundLedgerModule {
    pub fn new() -> Self {
        Self
    }
}

impl RuleModule for WoundLedgerModule {
    fn name(&self) -> &str {
        WOUND_LEDGER_MODULE
    }

    fn on_command(
        &mut self,
        sim: &mut Simulation,
        command: &SimCommand,
        command_index: u64,
    ) -> Result<bool, SimError> {
        if command.command_type != WOUND_INTENT_COMMAND_TYPE {
            return Ok(false);
        }

        let action_uid = command.action_uid(command_index);
        let target_entity_id = command
            .params
            .get("target_entity_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .or(command.entity_id.as_deref())
            .unwrap_or("")
            .to_string();
        let region = command.params.get("region").and_then(Value::as_str).unwrap_or("");
        let severity = command.params.get("severity").and_then(Value::as_i64);
        let duration_ticks = command
            .params
            .get("duration_ticks")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let severity = match (region.is_empty(), severity) {
            (false, Some(severity)) if severity >= 0 => severity,
            _ => {
                schedule_outcome(
                    sim,
                    command.tick,
                    &action_uid,
                    &target_entity_id,
                    region,
                    "invalid_params",
                )?;
                return Ok(true);
            }
        };

        let mut params = Map::new();
        params.insert("action_uid".to_string(), Value::from(action_uid));
        params.insert("entity_id".to_string(), Value::from(target_entity_id));
        params.insert("region".to_string(), Value::from(region));
        params.insert("severity".to_string(), Value::from(severity));
        params.insert(
            "tags".to_string(),
            command.params.get("tags").cloned().unwrap_or_else(|| Value::Array(Vec::new())),
        );
        params.insert(
            "source".to_string(),
            command.params.get("source").cloned().unwrap_or(Value::Null),
        );
        sim.schedule_event(command.tick + duration_ticks, WOUND_EXECUTE_EVENT_TYPE, params)?;
        Ok(true)
    }

    fn on_event_executed(&mut self, sim: &mut Simulation, event: &SimEvent) -> Result<(), SimError> {
        if event.event_type != WOUND_EXECUTE_EVENT_TYPE {
            return Ok(());
        }

        let action_uid = event.param_str("action_uid").unwrap_or("").to_string();
        let entity_id = event.param_str("entity_id").unwrap_or("").to_string();
        let region = event.param_str("region").unwrap_or("").to_string();

        let mut executed = executed_action_uids(sim)?;
        if executed.contains(&action_uid) {
            return schedule_outcome(sim, event.tick, &action_uid, &entity_id, &region, "already_applied");
        }

        let severity = event.params.get("severity").and_then(Value::as_i64);
        let structurally_valid = !action_uid.is_empty() && !region.is_empty() && severity.is_some();
        if !structurally_valid {
            schedule_outcome(sim, event.tick, &action_uid, &entity_id, &region, "invalid_params")?;
            if !action_uid.is_empty() {
                executed.insert(action_uid);
                store_executed_action_uids(sim, &executed)?;
            }
            return Ok(());
        }

        if sim.entity(&entity_id).is_none() {
            schedule_outcome(sim, event.tick, &action_uid, &entity_id, &region, "unknown_entity")?;
            executed.insert(action_uid);
            return store_executed_action_uids(sim, &executed);
        }

        let tags = event
            .params
            .get("tags")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let source = event.param_str("source").map(str::to_string);
        let wound = WoundRecord {
            region: region.clone(),
            severity: severity.unwrap_or(0),
            tags,
            inflicted_tick: event.tick,
            source,
        };
        if let Some(entity) = sim.entity_mut(&entity_id) {
            entity.push_wound(wound);
        }

        executed.insert(action_uid.clone());
        store_executed_action_uids(sim, &executed)?;
        schedule_outcome(sim, event.tick, &action_uid, &entity_id, &region, "applied")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn executed_action_uids(sim: &Simulation) -> Result<BTreeSet<String>, SimError> {
    let state = sim.get_rules_state(WOUND_LEDGER_MODULE);
    let mut uids = BTreeSet::new();
    if let Some(executed) = state.get(STATE_EXECUTED_ACTION_UIDS) {
        let entries = executed.as_array().ok_or_else(|| {
            SimError::InvalidArgument(
                "wound_ledger.rules_state.executed_action_uids must be a list".to_string(),
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
    let mut state = sim.get_rules_state(WOUND_LEDGER_MODULE);
    state.insert(
        STATE_EXECUTED_ACTION_UIDS.to_string(),
        Value::Array(uids.iter().map(|uid| Value::from(uid.as_str())).collect()),
    );
    sim.set_rules_state(WOUND_LEDGER_MODULE, state)
}

fn schedule_outcome(
    sim: &mut Simulation,
    tick: u64,
    action_uid: &str,
    entity_id: &str,
    region: &str,
    outcome: &str,
) -> Result<(), SimError> {
    let mut params = Map::new();
    params.insert("tick".to_string(), Value::from(tick));
    params.insert("action_uid".to_string(), Value::from(action_uid));
    params.insert("entity_id".to_string(), Value::from(entity_id));
    params.insert("region".to_string(), Value::from(region));
    params.insert("outcome".to_string(), Value::from(outcome));
    sim.schedule_event(tick, WOUND_OUTCOME_EVENT_TYPE, params)?;
    Ok(())
}
