//! Canonical payload assembly, rehydration, and hashing.
//!
//! The payload `{schema_version, world_state, simulation_state, input_log}`
//! is both the hash domain of `simulation_hash` and the body of the on-disk
//! save. Absent optional collections decode to their empty values, so absent
//! and empty re-encode to the same canonical form.

use serde_json::{Map, Value};

use contracts::{SimCommand, SimConfig, SimulationTime, SCHEMA_VERSION};

use super::{Simulation, TraceEntry};
use crate::canonical::canonical_hash;
use crate::error::SimError;
use crate::rng::{RngStatePayload, RngStreams};
use crate::world::WorldState;

impl Simulation {
    /// The hash-domain payload: schema version, world state, simulation
    /// state, and the full input log. `save_hash` and save metadata are
    /// deliberately outside.
    pub fn to_payload(&self) -> Result<Value, SimError> {
        let mut payload = Map::new();
        payload.insert("schema_version".to_string(), Value::from(SCHEMA_VERSION));
        payload.insert("world_state".to_string(), serde_json::to_value(&self.world)?);
        payload.insert(
            "simulation_state".to_string(),
            self.simulation_state_value()?,
        );
        payload.insert("input_log".to_string(), serde_json::to_value(&self.input_log)?);
        Ok(Value::Object(payload))
    }

    fn simulation_state_value(&self) -> Result<Value, SimError> {
        let mut state = Map::new();
        state.insert("tick".to_string(), Value::from(self.tick));
        state.insert("time".to_string(), serde_json::to_value(self.time)?);
        state.insert("config".to_string(), serde_json::to_value(&self.config)?);
        state.insert(
            "rng_state".to_string(),
            serde_json::to_value(self.rng.state_payload())?,
        );
        state.insert(
            "next_event_id".to_string(),
            Value::from(self.event_queue.next_event_id()),
        );
        state.insert(
            "rules_state".to_string(),
            serde_json::to_value(&self.rules_state)?,
        );
        state.insert(
            "pending_events".to_string(),
            serde_json::to_value(self.event_queue.pending_events())?,
        );
        state.insert(
            "event_trace".to_string(),
            serde_json::to_value(self.get_event_trace())?,
        );
        state.insert(
            "selected_entity_id".to_string(),
            self.selected_entity_id
                .as_deref()
                .map(Value::from)
                .unwrap_or(Value::Null),
        );
        Ok(Value::Object(state))
    }

    /// `sha256(canonical_encode(payload))`, lowercase hex. Equal hashes mean
    /// equal canonical state.
    pub fn simulation_hash(&self) -> Result<String, SimError> {
        canonical_hash(&self.to_payload()?)
    }

    /// Rehydrates a simulation from a payload produced by [`to_payload`].
    /// Rule modules are not part of the payload; callers re-register them
    /// (and reattach periodic callbacks) after load.
    pub fn from_payload(payload: &Value) -> Result<Self, SimError> {
        let root = payload
            .as_object()
            .ok_or_else(|| SimError::InvalidArgument("payload must be an object".to_string()))?;
        let schema_version = root
            .get("schema_version")
            .and_then(Value::as_u64)
            .ok_or_else(|| SimError::InvalidArgument("payload missing schema_version".to_string()))?;
        if schema_version != SCHEMA_VERSION {
            return Err(SimError::InvalidArgument(format!(
                "unsupported schema_version: {schema_version}"
            )));
        }

        let world: WorldState = match root.get("world_state") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => WorldState::new(),
        };

        let state = root
            .get("simulation_state")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let rng = match state.get("rng_state") {
            Some(value) => {
                let payload: RngStatePayload = serde_json::from_value(value.clone())?;
                RngStreams::restore(&payload)?
            }
            None => RngStreams::new(0),
        };

        let config: SimConfig = match state.get("config") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => SimConfig::default(),
        };
        let time: SimulationTime = match state.get("time") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => SimulationTime::default(),
        };

        let mut sim = Self::assemble(world, config, rng)?;
        sim.time = time;
        sim.tick = state.get("tick").and_then(Value::as_u64).unwrap_or(0);
        sim.event_queue
            .set_next_event_id(state.get("next_event_id").and_then(Value::as_u64).unwrap_or(1));

        if let Some(rules_state) = state.get("rules_state") {
            let entries = rules_state.as_object().ok_or_else(|| {
                SimError::InvalidArgument("rules_state must be an object".to_string())
            })?;
            for (module_name, module_state) in entries {
                let module_state = module_state.as_object().ok_or_else(|| {
                    SimError::InvalidArgument("rules_state entries must be objects".to_string())
                })?;
                sim.set_rules_state(module_name, module_state.clone())?;
            }
        }

        if let Some(pending) = state.get("pending_events") {
            let events: Vec<contracts::SimEvent> = serde_json::from_value(pending.clone())?;
            for event in events {
                sim.event_queue.schedule_existing(event)?;
            }
        }

        if let Some(trace) = state.get("event_trace") {
            let entries: Vec<TraceEntry> = serde_json::from_value(trace.clone())?;
            for entry in entries {
                sim.append_trace_entry(entry)?;
            }
        }

        sim.selected_entity_id = state
            .get("selected_entity_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(input_log) = root.get("input_log") {
            let commands: Vec<SimCommand> = serde_json::from_value(input_log.clone())?;
            for command in commands {
                sim.append_command_record(command)?;
            }
        }

        Ok(sim)
    }

    /// Payload round trip: a fresh simulation equal to this one in every
    /// hash-participating respect, with no modules registered.
    pub fn clone_via_payload(&self) -> Result<Self, SimError> {
        Self::from_payload(&self.to_payload()?)
    }
}

/// Replays a command log against a cloned initial state using the very same
/// phase machine as live execution.
pub fn run_replay(
    initial: &Simulation,
    commands: &[SimCommand],
    ticks_to_run: u64,
) -> Result<Simulation, SimError> {
    let mut replayed = initial.clone_via_payload()?;
    for command in commands {
        replayed.append_command_record(command.clone())?;
    }
    replayed.advance_ticks(ticks_to_run)?;
    Ok(replayed)
}

/// Replays a command log against a bare world template.
pub fn run_replay_from_world(
    world: WorldState,
    master_seed: u64,
    commands: &[SimCommand],
    ticks_to_run: u64,
) -> Result<Simulation, SimError> {
    let mut simulation = Simulation::new_with_world(world, master_seed)?;
    for command in commands {
        simulation.append_command_record(command.clone())?;
    }
    simulation.advance_ticks(ticks_to_run)?;
    Ok(simulation)
}
