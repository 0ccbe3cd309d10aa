//! The authoritative tick phase machine.
//!
//! Per tick, exactly: module tick-start hooks, command application, event
//! drain-until-empty, entity updates in sorted id order, module tick-end
//! hooks, tick increment. A fatal error rolls the simulation back to the
//! state at the start of the failed tick.

use std::collections::{BTreeMap, VecDeque};

use serde_json::{Map, Value};

use contracts::{SimCommand, SimEvent, SimulationTime, EVT_TRAVEL_STEP};

use super::events::MAX_EVENTS_PER_TICK;
use super::{Simulation, TraceEntry};
use crate::error::SimError;
use crate::rng::RngStreams;
use crate::world::WorldState;

const TARGET_REACHED_THRESHOLD: f64 = 0.05;

/// Deterministic state captured at the start of a tick, for rollback on a
/// fatal mid-tick error. Module instances are not captured: modules are
/// ephemeral by contract and keep authoritative facts only in rules-state
/// and queued events, both of which are covered here.
pub(crate) struct Checkpoint {
    tick: u64,
    time: SimulationTime,
    world: WorldState,
    rules_state: BTreeMap<String, Map<String, Value>>,
    event_trace: VecDeque<TraceEntry>,
    selected_entity_id: Option<String>,
    input_log: Vec<SimCommand>,
    pending_commands: BTreeMap<u64, Vec<SimCommand>>,
    event_queue: super::EventQueue,
    rng: RngStreams,
    event_execution_log: Vec<u64>,
}

impl Simulation {
    pub fn advance_ticks(&mut self, ticks: u64) -> Result<(), SimError> {
        for _ in 0..ticks {
            let checkpoint = self.checkpoint();
            if let Err(error) = self.tick_once() {
                self.restore_checkpoint(checkpoint);
                return Err(error);
            }
        }
        Ok(())
    }

    pub fn advance_days(&mut self, days: u64) -> Result<(), SimError> {
        self.advance_ticks(days * self.time.ticks_per_day)
    }

    fn tick_once(&mut self) -> Result<(), SimError> {
        let tick = self.tick;
        self.dispatch_modules(|module, sim| module.on_tick_start(sim, tick))?;
        self.apply_commands_for_tick(tick)?;
        self.execute_events_for_tick(tick)?;
        self.advance_entities(tick)?;
        self.dispatch_modules(|module, sim| module.on_tick_end(sim, tick))?;
        self.tick = tick + 1;
        Ok(())
    }

    fn apply_commands_for_tick(&mut self, tick: u64) -> Result<(), SimError> {
        let mut command_index = 0_u64;
        loop {
            let Some(command) = self
                .pending_commands
                .get(&tick)
                .and_then(|bucket| bucket.get(command_index as usize))
                .cloned()
            else {
                return Ok(());
            };
            self.execute_command(&command, command_index)?;
            command_index += 1;
        }
    }

    /// Drain-until-empty: events scheduled for `tick` during execution join
    /// the same drain, FIFO, until the bucket stays empty or the runaway
    /// guard trips.
    fn execute_events_for_tick(&mut self, tick: u64) -> Result<(), SimError> {
        let mut executed = 0_u64;
        loop {
            let Some(events) = self.event_queue.take_bucket(tick) else {
                return Ok(());
            };
            for event in events {
                executed += 1;
                if executed > MAX_EVENTS_PER_TICK {
                    return Err(SimError::RunawayEventFanout {
                        tick,
                        limit: MAX_EVENTS_PER_TICK,
                    });
                }
                self.execute_builtin_event(&event);
                self.dispatch_modules(|module, sim| module.on_event_executed(sim, &event))?;
                let module_hooks_called = !self.modules.is_empty();
                self.append_trace_entry(TraceEntry {
                    tick,
                    event_id: event.event_id,
                    event_type: event.event_type.clone(),
                    params: event.params.clone(),
                    module_hooks_called,
                })?;
            }
        }
    }

    fn execute_builtin_event(&mut self, event: &SimEvent) {
        if event.event_type == "noop" || event.event_type == "debug_marker" {
            self.event_execution_log.push(event.event_id);
        }
    }

    fn advance_entities(&mut self, tick: u64) -> Result<(), SimError> {
        let entity_ids = self.entity_ids();
        for entity_id in entity_ids {
            self.advance_entity(&entity_id, tick)?;
        }
        Ok(())
    }

    fn advance_entity(&mut self, entity_id: &str, tick: u64) -> Result<(), SimError> {
        let Some(entity) = self.world.entities.get(entity_id) else {
            return Ok(());
        };
        let prior_location = self.location_ref_of(entity);
        let space_id = entity.space_id.clone();
        let position = (entity.position_x, entity.position_y);
        let input = (entity.move_input_x, entity.move_input_y);
        let target = entity.target_position;
        let speed = entity.speed_per_tick;

        let mut move_x = input.0;
        let mut move_y = input.1;

        if move_x == 0.0 && move_y == 0.0 {
            if let Some((target_x, target_y)) = target {
                let delta_x = target_x - position.0;
                let delta_y = target_y - position.1;
                let distance_sq = delta_x * delta_x + delta_y * delta_y;
                if distance_sq <= TARGET_REACHED_THRESHOLD * TARGET_REACHED_THRESHOLD {
                    if let Some(entity) = self.world.entities.get_mut(entity_id) {
                        entity.target_position = None;
                    }
                    return Ok(());
                }
                let distance = distance_sq.sqrt();
                move_x = delta_x / distance;
                move_y = delta_y / distance;
            }
        }

        if move_x == 0.0 && move_y == 0.0 {
            return Ok(());
        }

        let mut step_size = speed;
        let target_seeking = input.0 == 0.0 && input.1 == 0.0;
        if target_seeking {
            if let Some((target_x, target_y)) = target {
                let delta_x = target_x - position.0;
                let delta_y = target_y - position.1;
                let distance = (delta_x * delta_x + delta_y * delta_y).sqrt();
                if distance < step_size {
                    step_size = distance;
                }
            }
        }

        let next_x = position.0 + move_x * step_size;
        let next_y = position.1 + move_y * step_size;

        if self.position_is_within_world(next_x, next_y, &space_id) {
            if let Some(entity) = self.world.entities.get_mut(entity_id) {
                entity.position_x = next_x;
                entity.position_y = next_y;
            }
            let next_location = self.location_ref_for_position(&space_id, next_x, next_y);
            if next_location.coord != prior_location.coord
                || next_location.space_id != prior_location.space_id
            {
                let mut params = Map::new();
                params.insert("tick".to_string(), Value::from(tick));
                params.insert("entity_id".to_string(), Value::from(entity_id));
                params.insert("location_from".to_string(), prior_location.to_value());
                params.insert("location_to".to_string(), next_location.to_value());
                self.schedule_event(tick + 1, EVT_TRAVEL_STEP, params)?;
            }
        } else if target_seeking && target.is_some() {
            if let Some(entity) = self.world.entities.get_mut(entity_id) {
                entity.target_position = None;
            }
        }
        Ok(())
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            tick: self.tick,
            time: self.time,
            world: self.world.clone(),
            rules_state: self.rules_state.clone(),
            event_trace: self.event_trace.clone(),
            selected_entity_id: self.selected_entity_id.clone(),
            input_log: self.input_log.clone(),
            pending_commands: self.pending_commands.clone(),
            event_queue: self.event_queue.clone(),
            rng: self.rng.clone(),
            event_execution_log: self.event_execution_log.clone(),
        }
    }

    pub(crate) fn restore_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.tick = checkpoint.tick;
        self.time = checkpoint.time;
        self.world = checkpoint.world;
        self.rules_state = checkpoint.rules_state;
        self.event_trace = checkpoint.event_trace;
        self.selected_entity_id = checkpoint.selected_entity_id;
        self.input_log = checkpoint.input_log;
        self.pending_commands = checkpoint.pending_commands;
        self.event_queue = checkpoint.event_queue;
        self.rng = checkpoint.rng;
        self.event_execution_log = checkpoint.event_execution_log;
    }
}
