//! The simulation aggregate: world ownership, module registry, RNG streams,
//! event queue, command log, rules-state store, and event trace.

mod commands;
mod events;
mod snapshot;
mod step;

pub use events::{EventQueue, MAX_EVENTS_PER_TICK};
pub use snapshot::{run_replay, run_replay_from_world};

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use contracts::{
    location::{TOPOLOGY_HEX_DISK, TOPOLOGY_HEX_RECTANGLE, TOPOLOGY_SQUARE_GRID},
    ContainerState, HexCoord, HexRecord, LocationRef, SimCommand, SimConfig, SimEvent,
    SimulationTime, SpaceState, DEFAULT_OVERWORLD_SPACE_ID,
};

use crate::canonical::validate_json_value;
use crate::entity::EntityState;
use crate::error::SimError;
use crate::modules::periodic::{PeriodicCallback, PeriodicScheduler, PERIODIC_SCHEDULER_NAME};
use crate::rng::RngStreams;
use crate::rules::{ModuleSlot, RuleModule};
use crate::spatial::{normalized_vector, world_xy_to_axial, world_xy_to_square_grid_cell};
use crate::world::WorldState;

pub const MAX_EVENT_TRACE: usize = 256;

const TERRAIN_TYPES: [&str; 5] = ["plains", "forest", "hills", "marsh", "water"];

/// One executed-event record in the bounded forensic trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEntry {
    pub tick: u64,
    pub event_id: u64,
    pub event_type: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub module_hooks_called: bool,
}

#[derive(Debug)]
pub struct Simulation {
    pub(crate) config: SimConfig,
    pub(crate) tick: u64,
    pub(crate) time: SimulationTime,
    pub(crate) world: WorldState,
    pub(crate) rules_state: BTreeMap<String, Map<String, Value>>,
    pub(crate) event_trace: VecDeque<TraceEntry>,
    pub(crate) selected_entity_id: Option<String>,
    pub(crate) input_log: Vec<SimCommand>,
    pub(crate) pending_commands: BTreeMap<u64, Vec<SimCommand>>,
    pub(crate) event_queue: EventQueue,
    pub(crate) rng: RngStreams,
    pub(crate) modules: Vec<ModuleSlot>,
    pub(crate) save_metadata: Map<String, Value>,
    pub(crate) event_execution_log: Vec<u64>,
}

impl Simulation {
    /// Builds a simulation around an existing world.
    pub fn new_with_world(world: WorldState, master_seed: u64) -> Result<Self, SimError> {
        Self::assemble(world, SimConfig::default(), RngStreams::new(master_seed))
    }

    /// Builds a simulation with a freshly generated overworld space of the
    /// given topology. Terrain is drawn from the worldgen stream, so the
    /// generated world is a pure function of `(master_seed, topology)`.
    pub fn new_with_seed_and_topology(
        master_seed: u64,
        topology_type: &str,
        topology_params: Map<String, Value>,
    ) -> Result<Self, SimError> {
        let mut rng = RngStreams::new(master_seed);
        let world = generate_world(&mut rng, topology_type, topology_params)?;
        Self::assemble(world, SimConfig::default(), rng)
    }

    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.time = SimulationTime {
            ticks_per_day: config.ticks_per_day.max(1),
            epoch_tick: config.epoch_tick,
        };
        self.config = config;
        self
    }

    fn assemble(world: WorldState, config: SimConfig, rng: RngStreams) -> Result<Self, SimError> {
        world.validate()?;
        let time = SimulationTime {
            ticks_per_day: config.ticks_per_day.max(1),
            epoch_tick: config.epoch_tick,
        };
        Ok(Self {
            config,
            tick: 0,
            time,
            world,
            rules_state: BTreeMap::new(),
            event_trace: VecDeque::new(),
            selected_entity_id: None,
            input_log: Vec::new(),
            pending_commands: BTreeMap::new(),
            event_queue: EventQueue::new(),
            rng,
            modules: Vec::new(),
            save_metadata: Map::new(),
            event_execution_log: Vec::new(),
        })
    }

    // ---- time ----

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn time(&self) -> SimulationTime {
        self.time
    }

    pub fn ticks_per_day(&self) -> u64 {
        self.time.ticks_per_day
    }

    pub fn day_index(&self) -> u64 {
        self.time.day_index(self.tick)
    }

    pub fn tick_in_day(&self) -> u64 {
        self.time.tick_in_day(self.tick)
    }

    pub fn time_of_day_fraction(&self) -> f64 {
        self.time.time_of_day_fraction(self.tick)
    }

    pub fn master_seed(&self) -> u64 {
        self.rng.master_seed()
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    // ---- world & entities ----

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub(crate) fn world_mut(&mut self) -> &mut WorldState {
        &mut self.world
    }

    pub fn entity(&self, entity_id: &str) -> Option<&EntityState> {
        self.world.entities.get(entity_id)
    }

    pub(crate) fn entity_mut(&mut self, entity_id: &str) -> Option<&mut EntityState> {
        self.world.entities.get_mut(entity_id)
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.world.entities.keys().cloned().collect()
    }

    /// Registers an entity. A missing inventory container reference is an
    /// error; an absent one provisions `inventory:{entity_id}`.
    pub fn add_entity(&mut self, mut entity: EntityState) -> Result<(), SimError> {
        let numeric_fields = [
            entity.position_x,
            entity.position_y,
            entity.facing,
            entity.speed_per_tick,
            entity.move_input_x,
            entity.move_input_y,
        ];
        if numeric_fields.iter().any(|value| !value.is_finite()) {
            return Err(SimError::InvalidArgument(format!(
                "entity '{}' has non-finite numeric state",
                entity.entity_id
            )));
        }
        validate_json_value(&Value::Object(entity.stats.clone()), "entity.stats")?;
        match &entity.inventory_container_id {
            None => {
                let container_id = format!("inventory:{}", entity.entity_id);
                self.world
                    .containers
                    .entry(container_id.clone())
                    .or_insert_with(|| {
                        let mut container = ContainerState::new(&container_id);
                        container.owner_entity_id = Some(entity.entity_id.clone());
                        container
                    });
                entity.inventory_container_id = Some(container_id);
            }
            Some(container_id) => {
                if !self.world.containers.contains_key(container_id) {
                    return Err(SimError::InvalidArgument(format!(
                        "entity '{}' references missing inventory container '{container_id}'",
                        entity.entity_id
                    )));
                }
            }
        }
        self.world.entities.insert(entity.entity_id.clone(), entity);
        Ok(())
    }

    pub fn container(&self, container_id: &str) -> Option<&ContainerState> {
        self.world.containers.get(container_id)
    }

    pub fn container_mut(&mut self, container_id: &str) -> Option<&mut ContainerState> {
        self.world.containers.get_mut(container_id)
    }

    pub fn ensure_container(&mut self, container_id: &str) -> &mut ContainerState {
        self.world
            .containers
            .entry(container_id.to_string())
            .or_insert_with(|| ContainerState::new(container_id))
    }

    // ---- movement intents ----

    pub fn set_entity_move_vector(&mut self, entity_id: &str, x: f64, y: f64) -> Result<(), SimError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(SimError::InvalidArgument(
                "move vector components must be finite".to_string(),
            ));
        }
        let (move_x, move_y) = normalized_vector(x, y);
        let entity = self
            .world
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| SimError::UnknownEntity(entity_id.to_string()))?;
        entity.move_input_x = move_x;
        entity.move_input_y = move_y;
        Ok(())
    }

    /// Sets a target-seek position. Positions outside the entity's space are
    /// ignored; intent validation failures never mutate.
    pub fn set_entity_target_position(&mut self, entity_id: &str, x: f64, y: f64) -> Result<(), SimError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(SimError::InvalidArgument(
                "target position components must be finite".to_string(),
            ));
        }
        let space_id = self
            .world
            .entities
            .get(entity_id)
            .map(|entity| entity.space_id.clone())
            .ok_or_else(|| SimError::UnknownEntity(entity_id.to_string()))?;
        if !self.position_is_within_world(x, y, &space_id) {
            return Ok(());
        }
        if let Some(entity) = self.world.entities.get_mut(entity_id) {
            entity.target_position = Some((x, y));
        }
        Ok(())
    }

    pub fn set_entity_destination(&mut self, entity_id: &str, destination: HexCoord) -> Result<(), SimError> {
        let entity = self
            .world
            .entities
            .get(entity_id)
            .ok_or_else(|| SimError::UnknownEntity(entity_id.to_string()))?;
        if entity.space_id != DEFAULT_OVERWORLD_SPACE_ID {
            return Ok(());
        }
        if self
            .world
            .get_hex_record(DEFAULT_OVERWORLD_SPACE_ID, destination)
            .is_none()
        {
            return Ok(());
        }
        let (x, y) = crate::spatial::axial_to_world_xy(destination);
        self.set_entity_target_position(entity_id, x, y)
    }

    /// Sets an entity's facing (radians, caller-defined convention). Facing
    /// is presentation-adjacent state: the substrate serializes it but never
    /// derives it.
    pub fn set_entity_facing(&mut self, entity_id: &str, facing: f64) -> Result<(), SimError> {
        if !facing.is_finite() {
            return Err(SimError::InvalidArgument("facing must be finite".to_string()));
        }
        let entity = self
            .world
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| SimError::UnknownEntity(entity_id.to_string()))?;
        entity.facing = facing;
        Ok(())
    }

    pub fn stop_entity(&mut self, entity_id: &str) -> Result<(), SimError> {
        let entity = self
            .world
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| SimError::UnknownEntity(entity_id.to_string()))?;
        entity.move_input_x = 0.0;
        entity.move_input_y = 0.0;
        entity.target_position = None;
        Ok(())
    }

    pub(crate) fn position_is_within_world(&self, x: f64, y: f64, space_id: &str) -> bool {
        let Some(space) = self.world.spaces.get(space_id) else {
            return false;
        };
        if space.is_hex() {
            return space.is_valid_cell(&world_xy_to_axial(x, y).to_coord_value());
        }
        if space.is_square_grid() {
            let (cell_x, cell_y) = world_xy_to_square_grid_cell(x, y);
            let mut coord = Map::new();
            coord.insert("x".to_string(), Value::from(cell_x));
            coord.insert("y".to_string(), Value::from(cell_y));
            return space.is_valid_cell(&coord);
        }
        false
    }

    pub fn entity_location_ref(&self, entity_id: &str) -> Option<LocationRef> {
        let entity = self.world.entities.get(entity_id)?;
        Some(self.location_ref_of(entity))
    }

    pub(crate) fn location_ref_of(&self, entity: &EntityState) -> LocationRef {
        self.location_ref_for_position(&entity.space_id, entity.position_x, entity.position_y)
    }

    pub(crate) fn location_ref_for_position(&self, space_id: &str, x: f64, y: f64) -> LocationRef {
        match self.world.spaces.get(space_id) {
            Some(space) if space.is_square_grid() => {
                let (cell_x, cell_y) = world_xy_to_square_grid_cell(x, y);
                let mut coord = Map::new();
                coord.insert("x".to_string(), Value::from(cell_x));
                coord.insert("y".to_string(), Value::from(cell_y));
                LocationRef::new(space_id.to_string(), TOPOLOGY_SQUARE_GRID, coord)
            }
            Some(space) => LocationRef::new(
                space_id.to_string(),
                space.topology_type.clone(),
                world_xy_to_axial(x, y).to_coord_value(),
            ),
            None => LocationRef::from_overworld_hex(world_xy_to_axial(x, y)),
        }
    }

    // ---- selection ----

    pub fn set_selected_entity(&mut self, selected_entity_id: Option<&str>, owner_entity_id: Option<&str>) {
        let normalized = selected_entity_id.map(str::to_string);
        if let Some(owner) = owner_entity_id {
            if let Some(entity) = self.world.entities.get_mut(owner) {
                entity.selected_entity_id = normalized;
                return;
            }
        }
        self.selected_entity_id = normalized;
    }

    pub fn clear_selected_entity(&mut self, owner_entity_id: Option<&str>) {
        self.set_selected_entity(None, owner_entity_id);
    }

    pub fn selected_entity_id(&self, owner_entity_id: Option<&str>) -> Option<&str> {
        if let Some(owner) = owner_entity_id {
            if let Some(entity) = self.world.entities.get(owner) {
                return entity.selected_entity_id.as_deref();
            }
        }
        self.selected_entity_id.as_deref()
    }

    // ---- rng ----

    pub fn rng_stream(&mut self, name: &str) -> &mut crate::rng::StreamRng {
        self.rng.stream(name)
    }

    // ---- rules state ----

    /// Deep copy of a module's persisted state; empty object when absent.
    pub fn get_rules_state(&self, module_name: &str) -> Map<String, Value> {
        self.rules_state.get(module_name).cloned().unwrap_or_default()
    }

    pub fn set_rules_state(&mut self, module_name: &str, state: Map<String, Value>) -> Result<(), SimError> {
        if module_name.is_empty() {
            return Err(SimError::InvalidArgument(
                "module_name must be a non-empty string".to_string(),
            ));
        }
        validate_json_value(&Value::Object(state.clone()), "rules_state")?;
        self.rules_state.insert(module_name.to_string(), state);
        Ok(())
    }

    // ---- event trace ----

    pub fn get_event_trace(&self) -> Vec<TraceEntry> {
        self.event_trace.iter().cloned().collect()
    }

    pub fn append_trace_entry(&mut self, entry: TraceEntry) -> Result<(), SimError> {
        if entry.event_type.is_empty() {
            return Err(SimError::InvalidEvent(
                "event_trace event_type must be a non-empty string".to_string(),
            ));
        }
        validate_json_value(&Value::Object(entry.params.clone()), "event_trace.params")?;
        self.event_trace.push_back(entry);
        while self.event_trace.len() > MAX_EVENT_TRACE {
            self.event_trace.pop_front();
        }
        Ok(())
    }

    /// Ids of executed `noop` / `debug_marker` events, in execution order.
    /// In-memory only; used by ordering tests.
    pub fn event_execution_log(&self) -> &[u64] {
        &self.event_execution_log
    }

    // ---- event queue ----

    pub fn schedule_event(
        &mut self,
        tick: u64,
        event_type: &str,
        params: Map<String, Value>,
    ) -> Result<u64, SimError> {
        self.event_queue.schedule(tick, self.tick, event_type, params)
    }

    pub fn cancel_event(&mut self, event_id: u64) -> bool {
        self.event_queue.cancel(event_id)
    }

    pub fn pending_events(&self) -> Vec<SimEvent> {
        self.event_queue.pending_events()
    }

    // ---- command log ----

    /// Appends a command to the input log and its tick bucket, returning the
    /// assigned `command_index` (bucket length before append).
    pub fn append_command(
        &mut self,
        tick: u64,
        entity_id: Option<&str>,
        command_type: &str,
        params: Map<String, Value>,
    ) -> Result<u64, SimError> {
        let command = SimCommand::new(tick, entity_id.map(str::to_string), command_type, params);
        self.append_command_record(command)
    }

    pub fn append_command_record(&mut self, command: SimCommand) -> Result<u64, SimError> {
        if command.command_type.is_empty() {
            return Err(SimError::InvalidCommand(
                "command_type must be a non-empty string".to_string(),
            ));
        }
        validate_json_value(&Value::Object(command.params.clone()), "command.params")?;
        let bucket = self.pending_commands.entry(command.tick).or_default();
        let command_index = bucket.len() as u64;
        bucket.push(command.clone());
        self.input_log.push(command);
        Ok(command_index)
    }

    pub fn input_log(&self) -> &[SimCommand] {
        &self.input_log
    }

    pub fn save_metadata(&self) -> &Map<String, Value> {
        &self.save_metadata
    }

    // ---- rule modules ----

    /// Registers a module at the end of the dispatch order and invokes its
    /// `on_simulation_start` hook.
    pub fn register_rule_module(&mut self, module: Box<dyn RuleModule>) -> Result<(), SimError> {
        let name = module.name().to_string();
        if name.is_empty() {
            return Err(SimError::InvalidArgument(
                "rule module name must be a non-empty string".to_string(),
            ));
        }
        if self.modules.iter().any(|slot| slot.name == name) {
            return Err(SimError::DuplicateModule(name));
        }
        debug!(module = %name, "registering rule module");
        self.modules.push(ModuleSlot {
            name: name.clone(),
            module: Some(module),
        });
        let index = self.modules.len() - 1;
        let Some(mut module) = self.modules[index].module.take() else {
            return Ok(());
        };
        let result = module.on_simulation_start(self);
        self.modules[index].module = Some(module);
        result
    }

    pub fn get_rule_module(&self, name: &str) -> Option<&dyn RuleModule> {
        self.modules
            .iter()
            .find(|slot| slot.name == name)
            .and_then(|slot| slot.module.as_deref())
    }

    pub fn has_rule_module(&self, name: &str) -> bool {
        self.modules.iter().any(|slot| slot.name == name)
    }

    pub fn rule_module_names(&self) -> Vec<String> {
        self.modules.iter().map(|slot| slot.name.clone()).collect()
    }

    /// Runs a closure with the named module taken out of its slot, so the
    /// closure can hold `&mut Simulation` alongside the module.
    pub(crate) fn with_module_taken<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut dyn RuleModule, &mut Simulation) -> Result<T, SimError>,
    ) -> Result<T, SimError> {
        let index = self
            .modules
            .iter()
            .position(|slot| slot.name == name)
            .ok_or_else(|| SimError::InvalidArgument(format!("unknown rule module: {name}")))?;
        let Some(mut module) = self.modules[index].module.take() else {
            return Err(SimError::InvalidArgument(format!(
                "rule module '{name}' is executing a hook"
            )));
        };
        let result = f(module.as_mut(), self);
        self.modules[index].module = Some(module);
        result
    }

    pub(crate) fn dispatch_modules(
        &mut self,
        mut f: impl FnMut(&mut dyn RuleModule, &mut Simulation) -> Result<(), SimError>,
    ) -> Result<(), SimError> {
        let count = self.modules.len();
        for index in 0..count {
            let Some(mut module) = self.modules[index].module.take() else {
                continue;
            };
            let result = f(module.as_mut(), self);
            self.modules[index].module = Some(module);
            result?;
        }
        Ok(())
    }

    /// Dispatches a command through module `on_command` hooks in
    /// registration order; stops at the first module that consumes it.
    pub(crate) fn dispatch_command(
        &mut self,
        command: &SimCommand,
        command_index: u64,
    ) -> Result<bool, SimError> {
        let count = self.modules.len();
        for index in 0..count {
            let Some(mut module) = self.modules[index].module.take() else {
                continue;
            };
            let result = module.on_command(self, command, command_index);
            self.modules[index].module = Some(module);
            if result? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ---- periodic scheduler surface ----

    pub fn ensure_periodic_scheduler(&mut self) -> Result<(), SimError> {
        if self.has_rule_module(PERIODIC_SCHEDULER_NAME) {
            return Ok(());
        }
        self.register_rule_module(Box::new(PeriodicScheduler::new()))
    }

    /// Registers a fixed-interval task on the periodic scheduler,
    /// auto-registering the scheduler module when absent.
    pub fn register_periodic_task(
        &mut self,
        task_name: &str,
        interval_ticks: u64,
        start_tick: u64,
    ) -> Result<(), SimError> {
        self.ensure_periodic_scheduler()?;
        self.with_module_taken(PERIODIC_SCHEDULER_NAME, |module, sim| {
            let scheduler = module
                .as_any_mut()
                .downcast_mut::<PeriodicScheduler>()
                .ok_or_else(|| {
                    SimError::InvalidArgument(
                        "periodic_scheduler module has an unexpected type".to_string(),
                    )
                })?;
            scheduler.register_task_live(sim, task_name, interval_ticks, start_tick)
        })
    }

    /// Attaches an in-memory callback to a periodic task. Callbacks do not
    /// survive a save/load cycle and must be reattached explicitly.
    pub fn set_periodic_task_callback(
        &mut self,
        task_name: &str,
        callback: PeriodicCallback,
    ) -> Result<(), SimError> {
        self.ensure_periodic_scheduler()?;
        self.with_module_taken(PERIODIC_SCHEDULER_NAME, |module, _sim| {
            let scheduler = module
                .as_any_mut()
                .downcast_mut::<PeriodicScheduler>()
                .ok_or_else(|| {
                    SimError::InvalidArgument(
                        "periodic_scheduler module has an unexpected type".to_string(),
                    )
                })?;
            scheduler.set_task_callback(task_name, callback)
        })
    }
}

/// Generates a world space from a topology descriptor, drawing terrain from
/// the worldgen stream in a fixed coordinate order.
fn generate_world(
    rng: &mut RngStreams,
    topology_type: &str,
    topology_params: Map<String, Value>,
) -> Result<WorldState, SimError> {
    let mut space = SpaceState::new(DEFAULT_OVERWORLD_SPACE_ID, topology_type);
    space.topology_params = topology_params.clone();

    let param_u64 = |key: &str| -> Result<u64, SimError> {
        topology_params
            .get(key)
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                SimError::InvalidArgument(format!(
                    "topology '{topology_type}' requires integer param '{key}'"
                ))
            })
    };

    let mut coords: Vec<(i64, i64)> = Vec::new();
    match topology_type {
        TOPOLOGY_HEX_DISK => {
            let radius = param_u64("radius")? as i64;
            let origin = HexCoord::new(0, 0);
            for q in -radius..=radius {
                for r in -radius..=radius {
                    if origin.axial_distance(&HexCoord::new(q, r)) <= radius as u64 {
                        coords.push((q, r));
                    }
                }
            }
        }
        TOPOLOGY_HEX_RECTANGLE => {
            let width = param_u64("width")? as i64;
            let height = param_u64("height")? as i64;
            for q in 0..width {
                for r in 0..height {
                    coords.push((q, r));
                }
            }
        }
        TOPOLOGY_SQUARE_GRID => {
            let width = param_u64("width")? as i64;
            let height = param_u64("height")? as i64;
            for x in 0..width {
                for y in 0..height {
                    coords.push((x, y));
                }
            }
        }
        other => {
            return Err(SimError::InvalidArgument(format!(
                "unsupported topology_type: {other}"
            )));
        }
    }

    let worldgen = rng.stream(crate::rng::RNG_WORLDGEN_STREAM_NAME);
    for (a, b) in coords {
        let terrain = TERRAIN_TYPES[worldgen.next_below(TERRAIN_TYPES.len() as u64) as usize];
        if topology_type == TOPOLOGY_SQUARE_GRID {
            space
                .cells
                .insert(format!("{a},{b}"), HexRecord::new(terrain));
        } else {
            space.set_hex_record(HexCoord::new(a, b), HexRecord::new(terrain));
        }
    }

    let mut world = WorldState::new();
    world.spaces.insert(space.space_id.clone(), space);
    Ok(world)
}
