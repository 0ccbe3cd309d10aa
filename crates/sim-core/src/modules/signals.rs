//! Signal emission and perception.
//!
//! Signals are world-ledger records with linear falloff over an
//! occlusion-aware shortest path. Emission and perception are delayed
//! intents: the command validates and schedules an execute event; execution
//! is idempotent per action UID with a FIFO-bounded ledger per phase.

use std::any::Any;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use contracts::{location::TOPOLOGY_SQUARE_GRID, LocationRef, SimCommand, SimEvent};

use crate::error::SimError;
use crate::rules::RuleModule;
use crate::simulation::Simulation;
use crate::world::WorldState;

pub const SIGNAL_PROPAGATION_MODULE: &str = "signal_propagation";
pub const EMIT_SIGNAL_INTENT_COMMAND_TYPE: &str = "emit_signal_intent";
pub const PERCEIVE_SIGNAL_INTENT_COMMAND_TYPE: &str = "perceive_signal_intent";
pub const SIGNAL_EMIT_EXECUTE_EVENT_TYPE: &str = "signal_emit_execute";
pub const SIGNAL_PERCEIVE_EXECUTE_EVENT_TYPE: &str = "perceive_signal_execute";
pub const SIGNAL_EMIT_OUTCOME_EVENT_TYPE: &str = "signal_emit_outcome";
pub const SIGNAL_PERCEIVE_OUTCOME_EVENT_TYPE: &str = "signal_perception_outcome";

pub const MAX_SENSITIVITY: i64 = 100;
pub const SENSITIVITY_BONUS_DIVISOR: i64 = 10;
pub const MAX_EXECUTED_ACTION_UIDS: usize = 2_048;

const ALLOWED_CHANNELS: [&str; 1] = ["sound"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalRecord {
    pub signal_id: String,
    pub tick_emitted: u64,
    pub space_id: String,
    pub origin: LocationRef,
    pub channel: String,
    pub base_intensity: i64,
    pub falloff_model: String,
    pub max_radius: u64,
    pub ttl_ticks: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Path metrics from a signal's origin to a listener over cell adjacency,
/// accumulating per-edge occlusion. `None` when unreachable within
/// `max_steps` or across spaces/topologies.
pub fn compute_signal_path_metrics(
    signal: &SignalRecord,
    listener: &LocationRef,
    world: &WorldState,
    max_steps: u64,
) -> Option<SignalPathMetrics> {
    if signal.origin.space_id != listener.space_id
        || signal.origin.topology_type != listener.topology_type
    {
        return None;
    }

    let topology_type = signal.origin.topology_type.as_str();
    let origin_key = coord_key(topology_type, &signal.origin.coord)?;
    let listener_key = coord_key(topology_type, &listener.coord)?;

    let mut best: BTreeMap<(i64, i64), i64> = BTreeMap::new();
    best.insert(origin_key, 0);
    let mut queue: BinaryHeap<Reverse<(i64, u64, (i64, i64))>> = BinaryHeap::new();
    queue.push(Reverse((0, 0, origin_key)));

    while let Some(Reverse((total_cost, step_count, current))) = queue.pop() {
        if best.get(&current) != Some(&total_cost) {
            continue;
        }
        if current == listener_key {
            return Some(SignalPathMetrics {
                occlusion_cost: total_cost - step_count as i64,
                step_count,
                effective_path_cost: total_cost,
            });
        }
        if step_count >= max_steps {
            continue;
        }

        let current_coord = coord_from_key(topology_type, current);
        for neighbor in neighbor_keys(topology_type, current) {
            let next_step_count = step_count + 1;
            if next_step_count > max_steps {
                continue;
            }
            let neighbor_coord = coord_from_key(topology_type, neighbor);
            let occlusion =
                world.structure_occlusion_value(&signal.space_id, &current_coord, &neighbor_coord);
            let next_total = next_step_count as i64 + occlusion + (total_cost - step_count as i64);
            match best.get(&neighbor) {
                Some(best_total) if next_total >= *best_total => continue,
                _ => {}
            }
            best.insert(neighbor, next_total);
            queue.push(Reverse((next_total, next_step_count, neighbor)));
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalPathMetrics {
    pub occlusion_cost: i64,
    pub step_count: u64,
    pub effective_path_cost: i64,
}

/// Remaining intensity of a signal at a listener: linear falloff over the
/// occlusion-aware path cost, zero past the TTL.
pub fn compute_signal_strength(
    signal: &SignalRecord,
    listener: &LocationRef,
    current_tick: u64,
    world: &WorldState,
) -> i64 {
    if current_tick > signal.tick_emitted + signal.ttl_ticks {
        return 0;
    }
    if signal.falloff_model != "linear" {
        return 0;
    }
    match compute_signal_path_metrics(signal, listener, world, signal.max_radius) {
        Some(metrics) => (signal.base_intensity - metrics.effective_path_cost).max(0),
        None => 0,
    }
}

fn coord_key(topology_type: &str, coord: &Map<String, Value>) -> Option<(i64, i64)> {
    if contracts::location::is_hex_topology(topology_type) {
        return Some((coord.get("q")?.as_i64()?, coord.get("r")?.as_i64()?));
    }
    if topology_type == TOPOLOGY_SQUARE_GRID {
        return Some((coord.get("x")?.as_i64()?, coord.get("y")?.as_i64()?));
    }
    None
}

fn coord_from_key(topology_type: &str, key: (i64, i64)) -> Map<String, Value> {
    let mut coord = Map::new();
    if topology_type == TOPOLOGY_SQUARE_GRID {
        coord.insert("x".to_string(), Value::from(key.0));
        coord.insert("y".to_string(), Value::from(key.1));
    } else {
        coord.insert("q".to_string(), Value::from(key.0));
        coord.insert("r".to_string(), Value::from(key.1));
    }
    coord
}

fn neighbor_keys(topology_type: &str, key: (i64, i64)) -> Vec<(i64, i64)> {
    let (a, b) = key;
    if contracts::location::is_hex_topology(topology_type) {
        return vec![
            (a + 1, b),
            (a + 1, b - 1),
            (a, b - 1),
            (a - 1, b),
            (a - 1, b + 1),
            (a, b + 1),
        ];
    }
    if topology_type == TOPOLOGY_SQUARE_GRID {
        return vec![(a + 1, b), (a - 1, b), (a, b + 1), (a, b - 1)];
    }
    Vec::new()
}

fn parse_numeric_stat(value: &Value) -> Option<f64> {
    if value.is_boolean() {
        return None;
    }
    value.as_f64()
}

#[derive(Debug, Default)]
pub struct SignalPropagationModule;

impl SignalPropagationModule {
    pub fn new() -> Self {
        Self
    }

    /// Hearing sensitivity for a channel: the `hearing` stat for sound, the
    /// `perception` stat otherwise, clamped to `[0, MAX_SENSITIVITY]`.
    fn resolve_sensitivity(
        &self,
        sim: &Simulation,
        entity_id: &str,
        channel: &str,
    ) -> (i64, &'static str, i64) {
        let stats = sim
            .entity(entity_id)
            .map(|entity| entity.stats.clone())
            .unwrap_or_default();

        let (source, raw_value) = if channel == "sound" && stats.contains_key("hearing") {
            ("hearing", stats.get("hearing"))
        } else if stats.contains_key("perception") {
            ("perception", stats.get("perception"))
        } else {
            ("default", None)
        };

        let sensitivity = raw_value
            .and_then(parse_numeric_stat)
            .map(|numeric| (numeric as i64).clamp(0, MAX_SENSITIVITY))
            .unwrap_or(0);
        (sensitivity, source, sensitivity / SENSITIVITY_BONUS_DIVISOR)
    }

    fn handle_emit_command(
        &self,
        sim: &mut Simulation,
        command: &SimCommand,
        command_index: u64,
    ) -> Result<(), SimError> {
        let action_uid = command.action_uid(command_index);
        let channel = command.params.get("channel").and_then(Value::as_str);
        let base_intensity = command.params.get("base_intensity").and_then(Value::as_u64);
        let max_radius = command.params.get("max_radius").and_then(Value::as_u64);
        let ttl_ticks = command.params.get("ttl_ticks").and_then(Value::as_u64);
        let duration_ticks = command.params.get("duration_ticks").and_then(Value::as_u64);

        let Some(channel) = channel.filter(|channel| ALLOWED_CHANNELS.contains(channel)) else {
            return self.schedule_emit_outcome(
                sim,
                command.tick,
                &action_uid,
                command.entity_id.as_deref(),
                channel.unwrap_or(""),
                "invalid_params",
            );
        };
        let (Some(base_intensity), Some(max_radius), Some(ttl_ticks), Some(duration_ticks)) =
            (base_intensity, max_radius, ttl_ticks, duration_ticks)
        else {
            return self.schedule_emit_outcome(
                sim,
                command.tick,
                &action_uid,
                command.entity_id.as_deref(),
                channel,
                "invalid_params",
            );
        };
        let Some(entity_id) = command
            .entity_id
            .as_deref()
            .filter(|entity_id| sim.entity(entity_id).is_some())
        else {
            return self.schedule_emit_outcome(
                sim,
                command.tick,
                &action_uid,
                command.entity_id.as_deref(),
                channel,
                "unknown_entity",
            );
        };

        let origin = sim
            .entity_location_ref(entity_id)
            .unwrap_or_else(|| LocationRef::from_overworld_hex(contracts::HexCoord::new(0, 0)));
        let mut params = Map::new();
        params.insert("action_uid".to_string(), Value::from(action_uid));
        params.insert("entity_id".to_string(), Value::from(entity_id));
        params.insert("channel".to_string(), Value::from(channel));
        params.insert("base_intensity".to_string(), Value::from(base_intensity));
        params.insert("max_radius".to_string(), Value::from(max_radius));
        params.insert("ttl_ticks".to_string(), Value::from(ttl_ticks));
        params.insert("origin".to_string(), origin.to_value());
        params.insert(
            "metadata".to_string(),
            command
                .params
                .get("metadata")
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new())),
        );
        params.insert("falloff_model".to_string(), Value::from("linear"));
        sim.schedule_event(
            command.tick + duration_ticks,
            SIGNAL_EMIT_EXECUTE_EVENT_TYPE,
            params,
        )?;
        Ok(())
    }

    fn handle_perceive_command(
        &self,
        sim: &mut Simulation,
        command: &SimCommand,
        command_index: u64,
    ) -> Result<(), SimError> {
        let action_uid = command.action_uid(command_index);
        let channel = command.params.get("channel").and_then(Value::as_str);
        let radius = command.params.get("radius").and_then(Value::as_u64);
        let duration_ticks = command.params.get("duration_ticks").and_then(Value::as_u64);

        let Some(channel) = channel.filter(|channel| ALLOWED_CHANNELS.contains(channel)) else {
            return self.schedule_perceive_outcome(
                sim,
                command.tick,
                &action_uid,
                command.entity_id.as_deref(),
                channel.unwrap_or(""),
                radius.unwrap_or(0),
                "invalid_params",
                Vec::new(),
                0,
                "default",
                0,
            );
        };
        let (Some(radius), Some(duration_ticks)) = (radius, duration_ticks) else {
            return self.schedule_perceive_outcome(
                sim,
                command.tick,
                &action_uid,
                command.entity_id.as_deref(),
                channel,
                0,
                "invalid_params",
                Vec::new(),
                0,
                "default",
                0,
            );
        };
        let Some(entity_id) = command
            .entity_id
            .as_deref()
            .filter(|entity_id| sim.entity(entity_id).is_some())
        else {
            return self.schedule_perceive_outcome(
                sim,
                command.tick,
                &action_uid,
                command.entity_id.as_deref(),
                channel,
                radius,
                "unknown_entity",
                Vec::new(),
                0,
                "default",
                0,
            );
        };

        let mut params = Map::new();
        params.insert("action_uid".to_string(), Value::from(action_uid));
        params.insert("entity_id".to_string(), Value::from(entity_id));
        params.insert("channel".to_string(), Value::from(channel));
        params.insert("radius".to_string(), Value::from(radius));
        sim.schedule_event(
            command.tick + duration_ticks,
            SIGNAL_PERCEIVE_EXECUTE_EVENT_TYPE,
            params,
        )?;
        Ok(())
    }

    fn handle_emit_execute(&self, sim: &mut Simulation, event: &SimEvent) -> Result<(), SimError> {
        let action_uid = event.param_str("action_uid").unwrap_or("").to_string();
        let entity_id = event.param_str("entity_id").map(str::to_string);
        let channel = event.param_str("channel").unwrap_or("").to_string();

        let mut executed = executed_uid_ledger(sim, "signal_emission")?;
        if executed.contains(&action_uid) {
            return self.schedule_emit_outcome(
                sim,
                event.tick,
                &action_uid,
                entity_id.as_deref(),
                &channel,
                "already_applied",
            );
        }

        let base_intensity = event.param_u64("base_intensity");
        let max_radius = event.param_u64("max_radius");
        let ttl_ticks = event.param_u64("ttl_ticks");
        let origin = event
            .params
            .get("origin")
            .and_then(LocationRef::from_value);

        let structurally_valid = !action_uid.is_empty()
            && ALLOWED_CHANNELS.contains(&channel.as_str())
            && base_intensity.is_some()
            && max_radius.is_some()
            && ttl_ticks.is_some()
            && origin.is_some();
        if !structurally_valid {
            mark_executed(sim, "signal_emission", &action_uid, &mut executed)?;
            return self.schedule_emit_outcome(
                sim,
                event.tick,
                &action_uid,
                entity_id.as_deref(),
                &channel,
                "invalid_params",
            );
        }

        let Some(entity_id) = entity_id.filter(|entity_id| sim.entity(entity_id).is_some()) else {
            mark_executed(sim, "signal_emission", &action_uid, &mut executed)?;
            return self.schedule_emit_outcome(
                sim,
                event.tick,
                &action_uid,
                None,
                &channel,
                "unknown_entity",
            );
        };

        let origin = origin.unwrap_or_else(|| LocationRef::from_overworld_hex(contracts::HexCoord::new(0, 0)));
        let signal = SignalRecord {
            signal_id: action_uid.clone(),
            tick_emitted: event.tick,
            space_id: origin.space_id.clone(),
            origin,
            channel: channel.clone(),
            base_intensity: base_intensity.unwrap_or(0) as i64,
            falloff_model: "linear".to_string(),
            max_radius: max_radius.unwrap_or(0),
            ttl_ticks: ttl_ticks.unwrap_or(0),
            metadata: event
                .params
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        };
        let record = serde_json::to_value(&signal)?;
        sim.world_mut().append_signal_record(record);
        mark_executed(sim, "signal_emission", &action_uid, &mut executed)?;
        self.schedule_emit_outcome(
            sim,
            event.tick,
            &action_uid,
            Some(&entity_id),
            &channel,
            "applied",
        )
    }

    fn handle_perceive_execute(&self, sim: &mut Simulation, event: &SimEvent) -> Result<(), SimError> {
        let action_uid = event.param_str("action_uid").unwrap_or("").to_string();
        let entity_id = event.param_str("entity_id").map(str::to_string);
        let channel = event.param_str("channel").unwrap_or("").to_string();
        let radius = event.param_u64("radius");

        let mut executed = executed_uid_ledger(sim, "signal_perception")?;
        if executed.contains(&action_uid) {
            return self.schedule_perceive_outcome(
                sim,
                event.tick,
                &action_uid,
                entity_id.as_deref(),
                &channel,
                radius.unwrap_or(0),
                "already_applied",
                Vec::new(),
                0,
                "default",
                0,
            );
        }

        let structurally_valid =
            !action_uid.is_empty() && ALLOWED_CHANNELS.contains(&channel.as_str()) && radius.is_some();
        if !structurally_valid {
            mark_executed(sim, "signal_perception", &action_uid, &mut executed)?;
            return self.schedule_perceive_outcome(
                sim,
                event.tick,
                &action_uid,
                entity_id.as_deref(),
                &channel,
                radius.unwrap_or(0),
                "invalid_params",
                Vec::new(),
                0,
                "default",
                0,
            );
        }
        let radius = radius.unwrap_or(0);

        let Some(entity_id) = entity_id.filter(|entity_id| sim.entity(entity_id).is_some()) else {
            mark_executed(sim, "signal_perception", &action_uid, &mut executed)?;
            return self.schedule_perceive_outcome(
                sim,
                event.tick,
                &action_uid,
                None,
                &channel,
                radius,
                "unknown_entity",
                Vec::new(),
                0,
                "default",
                0,
            );
        };

        let listener = sim
            .entity_location_ref(&entity_id)
            .unwrap_or_else(|| LocationRef::from_overworld_hex(contracts::HexCoord::new(0, 0)));
        let (sensitivity, sensitivity_source, bonus) =
            self.resolve_sensitivity(sim, &entity_id, &channel);

        let mut hits: Vec<Map<String, Value>> = Vec::new();
        for record in sim.world().signals.clone() {
            let Ok(signal) = serde_json::from_value::<SignalRecord>(record) else {
                continue;
            };
            if signal.channel != channel || signal.space_id != listener.space_id {
                continue;
            }
            let Some(metrics) = compute_signal_path_metrics(
                &signal,
                &listener,
                sim.world(),
                signal.max_radius.min(radius),
            ) else {
                continue;
            };
            if metrics.effective_path_cost > radius as i64 {
                continue;
            }
            let strength =
                compute_signal_strength(&signal, &listener, event.tick, sim.world()) + bonus;
            if strength <= 0 {
                continue;
            }
            let mut hit = Map::new();
            hit.insert("signal_id".to_string(), Value::from(signal.signal_id.clone()));
            hit.insert("distance".to_string(), Value::from(metrics.step_count));
            hit.insert("step_count".to_string(), Value::from(metrics.step_count));
            hit.insert("occlusion_cost".to_string(), Value::from(metrics.occlusion_cost));
            hit.insert(
                "effective_path_cost".to_string(),
                Value::from(metrics.effective_path_cost),
            );
            hit.insert("computed_strength".to_string(), Value::from(strength));
            hit.insert(
                "age_ticks".to_string(),
                Value::from(event.tick - signal.tick_emitted),
            );
            hits.push(hit);
        }

        hits.sort_by(|a, b| {
            let cost_a = a.get("effective_path_cost").and_then(Value::as_i64).unwrap_or(0);
            let cost_b = b.get("effective_path_cost").and_then(Value::as_i64).unwrap_or(0);
            let steps_a = a.get("step_count").and_then(Value::as_u64).unwrap_or(0);
            let steps_b = b.get("step_count").and_then(Value::as_u64).unwrap_or(0);
            let id_a = a.get("signal_id").and_then(Value::as_str).unwrap_or("");
            let id_b = b.get("signal_id").and_then(Value::as_str).unwrap_or("");
            cost_a
                .cmp(&cost_b)
                .then(steps_a.cmp(&steps_b))
                .then(id_a.cmp(id_b))
        });

        mark_executed(sim, "signal_perception", &action_uid, &mut executed)?;
        self.schedule_perceive_outcome(
            sim,
            event.tick,
            &action_uid,
            Some(&entity_id),
            &channel,
            radius,
            "completed",
            hits,
            sensitivity,
            sensitivity_source,
            bonus,
        )
    }

    fn schedule_emit_outcome(
        &self,
        sim: &mut Simulation,
        tick: u64,
        action_uid: &str,
        entity_id: Option<&str>,
        channel: &str,
        outcome: &str,
    ) -> Result<(), SimError> {
        let mut params = Map::new();
        params.insert("tick".to_string(), Value::from(tick));
        params.insert(
            "entity_id".to_string(),
            entity_id.map(Value::from).unwrap_or(Value::Null),
        );
        params.insert("action_uid".to_string(), Value::from(action_uid));
        params.insert("channel".to_string(), Value::from(channel));
        params.insert("outcome".to_string(), Value::from(outcome));
        sim.schedule_event(tick, SIGNAL_EMIT_OUTCOME_EVENT_TYPE, params)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn schedule_perceive_outcome(
        &self,
        sim: &mut Simulation,
        tick: u64,
        action_uid: &str,
        entity_id: Option<&str>,
        channel: &str,
        radius: u64,
        outcome: &str,
        hits: Vec<Map<String, Value>>,
        sensitivity: i64,
        sensitivity_source: &str,
        bonus: i64,
    ) -> Result<(), SimError> {
        let mut params = Map::new();
        params.insert("tick".to_string(), Value::from(tick));
        params.insert(
            "entity_id".to_string(),
            entity_id.map(Value::from).unwrap_or(Value::Null),
        );
        params.insert("action_uid".to_string(), Value::from(action_uid));
        params.insert("channel".to_string(), Value::from(channel));
        params.insert("radius".to_string(), Value::from(radius));
        params.insert("outcome".to_string(), Value::from(outcome));
        params.insert(
            "hits".to_string(),
            Value::Array(hits.into_iter().map(Value::Object).collect()),
        );
        params.insert("sensitivity".to_string(), Value::from(sensitivity));
        params.insert("sensitivity_source".to_string(), Value::from(sensitivity_source));
        params.insert("bonus".to_string(), Value::from(bonus));
        sim.schedule_event(tick, SIGNAL_PERCEIVE_OUTCOME_EVENT_TYPE, params)?;
        Ok(())
    }
}

impl RuleModule for SignalPropagationModule {
    fn name(&self) -> &str {
        SIGNAL_PROPAGATION_MODULE
    }

    fn on_command(
        &mut self,
        sim: &mut Simulation,
        command: &SimCommand,
        command_index: u64,
    ) -> Result<bool, SimError> {
        match command.command_type.as_str() {
            EMIT_SIGNAL_INTENT_COMMAND_TYPE => {
                self.handle_emit_command(sim, command, command_index)?;
                Ok(true)
            }
            PERCEIVE_SIGNAL_INTENT_COMMAND_TYPE => {
                self.handle_perceive_command(sim, command, command_index)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn on_event_executed(&mut self, sim: &mut Simulation, event: &SimEvent) -> Result<(), SimError> {
        match event.event_type.as_str() {
            SIGNAL_EMIT_EXECUTE_EVENT_TYPE => self.handle_emit_execute(sim, event),
            SIGNAL_PERCEIVE_EXECUTE_EVENT_TYPE => self.handle_perceive_execute(sim, event),
            _ => Ok(()),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// FIFO-ordered executed-UID ledger under
/// `rules_state[signal_propagation][bucket]`, deduplicated and capped.
fn executed_uid_ledger(sim: &Simulation, bucket: &str) -> Result<Vec<String>, SimError> {
    let root = sim.get_rules_state(SIGNAL_PROPAGATION_MODULE);
    let Some(state) = root.get(bucket) else {
        return Ok(Vec::new());
    };
    let state = state.as_object().ok_or_else(|| {
        SimError::InvalidArgument(format!("{SIGNAL_PROPAGATION_MODULE}.{bucket} must be an object"))
    })?;
    let Some(executed) = state.get("executed_action_uids") else {
        return Ok(Vec::new());
    };
    let entries = executed.as_array().ok_or_else(|| {
        SimError::InvalidArgument(format!(
            "{SIGNAL_PROPAGATION_MODULE}.{bucket}.executed_action_uids must be a list"
        ))
    })?;
    Ok(normalize_uid_fifo(entries.iter()))
}

fn mark_executed(
    sim: &mut Simulation,
    bucket: &str,
    action_uid: &str,
    ledger: &mut Vec<String>,
) -> Result<(), SimError> {
    if action_uid.is_empty() {
        return Ok(());
    }
    if !ledger.iter().any(|uid| uid == action_uid) {
        ledger.push(action_uid.to_string());
    }
    if ledger.len() > MAX_EXECUTED_ACTION_UIDS {
        let overflow = ledger.len() - MAX_EXECUTED_ACTION_UIDS;
        ledger.drain(..overflow);
    }

    let mut root = sim.get_rules_state(SIGNAL_PROPAGATION_MODULE);
    let mut state = root
        .get(bucket)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    state.insert(
        "executed_action_uids".to_string(),
        Value::Array(ledger.iter().map(|uid| Value::from(uid.as_str())).collect()),
    );
    root.insert(bucket.to_string(), Value::Object(state));
    sim.set_rules_state(SIGNAL_PROPAGATION_MODULE, root)
}

fn normalize_uid_fifo<'a>(entries: impl Iterator<Item = &'a Value>) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::new();
    for entry in entries {
        let Some(uid) = entry.as_str() else { continue };
        if uid.is_empty() || ordered.iter().any(|existing| existing == uid) {
            continue;
        }
        ordered.push(uid.to_string());
    }
    if ordered.len() > MAX_EXECUTED_ACTION_UIDS {
        let overflow = ordered.len() - MAX_EXECUTED_ACTION_UIDS;
        ordered.drain(..overflow);
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::location::TOPOLOGY_OVERWORLD_HEX;
    use contracts::HexCoord;

    fn hex_location(space_id: &str, q: i64, r: i64) -> LocationRef {
        LocationRef::new(
            space_id,
            TOPOLOGY_OVERWORLD_HEX,
            HexCoord::new(q, r).to_coord_value(),
        )
    }

    fn test_signal(q: i64, r: i64, base_intensity: i64, max_radius: u64) -> SignalRecord {
        SignalRecord {
            signal_id: "0:0".to_string(),
            tick_emitted: 0,
            space_id: "overworld".to_string(),
            origin: hex_location("overworld", q, r),
            channel: "sound".to_string(),
            base_intensity,
            falloff_model: "linear".to_string(),
            max_radius,
            ttl_ticks: 10,
            metadata: Map::new(),
        }
    }

    #[test]
    fn unobstructed_path_cost_equals_distance() {
        let world = WorldState::new();
        let signal = test_signal(0, 0, 10, 6);
        let listener = hex_location("overworld", 3, 0);
        let metrics =
            compute_signal_path_metrics(&signal, &listener, &world, 6).expect("reachable");
        assert_eq!(metrics.step_count, 3);
        assert_eq!(metrics.occlusion_cost, 0);
        assert_eq!(metrics.effective_path_cost, 3);
    }

    #[test]
    fn occlusion_raises_path_cost() {
        let mut world = WorldState::new();
        // Wall the direct edge between (0,0) and (1,0).
        world.append_occlusion_edge(crate::world::OcclusionEdge {
            space_id: "overworld".to_string(),
            cell_a: HexCoord::new(0, 0).to_coord_value(),
            cell_b: HexCoord::new(1, 0).to_coord_value(),
            occlusion: 5,
        });
        let signal = test_signal(0, 0, 10, 6);
        let listener = hex_location("overworld", 1, 0);
        let metrics =
            compute_signal_path_metrics(&signal, &listener, &world, 6).expect("reachable");
        // Cheaper to route around through two unoccluded edges.
        assert_eq!(metrics.step_count, 2);
        assert_eq!(metrics.effective_path_cost, 2);
    }

    #[test]
    fn strength_is_zero_past_ttl() {
        let world = WorldState::new();
        let signal = test_signal(0, 0, 10, 6);
        let listener = hex_location("overworld", 1, 0);
        assert!(compute_signal_strength(&signal, &listener, 5, &world) > 0);
        assert_eq!(compute_signal_strength(&signal, &listener, 11, &world), 0);
    }

    #[test]
    fn cross_space_signals_are_unreachable() {
        let world = WorldState::new();
        let signal = test_signal(0, 0, 10, 6);
        let listener = hex_location("dungeon:1", 1, 0);
        assert!(compute_signal_path_metrics(&signal, &listener, &world, 6).is_none());
    }

    #[test]
    fn uid_fifo_dedupes_and_caps() {
        let values: Vec<Value> = (0..(MAX_EXECUTED_ACTION_UIDS + 8))
            .map(|index| Value::from(format!("uid-{index}")))
            .chain(std::iter::once(Value::from("uid-10")))
            .collect();
        let normalized = normalize_uid_fifo(values.iter());
        assert_eq!(normalized.len(), MAX_EXECUTED_ACTION_UIDS);
        assert_eq!(normalized.last().map(String::as_str), Some("uid-2055"));
    }
}
