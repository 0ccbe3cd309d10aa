//! Command application: the only ingestion path into authoritative state.

use serde_json::{Map, Value};

use contracts::{
    location::is_hex_topology, LocationRef, SimCommand, CMD_CLEAR_SELECTED_ENTITY, CMD_ENTER_SITE,
    CMD_SET_ENTITY_MOVE_VECTOR, CMD_SET_ENTITY_TARGET_POSITION, CMD_SET_SELECTED_ENTITY,
    CMD_TRANSITION_SPACE, EVT_SITE_ENTER_OUTCOME, EVT_SPACE_TRANSITION,
};

use super::{Simulation, TraceEntry};
use crate::canonical::{canonical_hash, trace_id_from_tag};
use crate::error::SimError;
use crate::spatial::{axial_to_world_xy, square_grid_cell_to_world_xy};

impl Simulation {
    pub(super) fn execute_command(
        &mut self,
        command: &SimCommand,
        command_index: u64,
    ) -> Result<(), SimError> {
        match command.command_type.as_str() {
            CMD_SET_SELECTED_ENTITY => {
                let selected = command
                    .params
                    .get("selected_entity_id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let Some(candidate) = &selected {
                    if !self.world.entities.contains_key(candidate) {
                        return Ok(());
                    }
                }
                self.set_selected_entity(selected.as_deref(), command.entity_id.as_deref());
                return Ok(());
            }
            CMD_CLEAR_SELECTED_ENTITY => {
                self.clear_selected_entity(command.entity_id.as_deref());
                return Ok(());
            }
            _ => {}
        }

        if self.dispatch_command(command, command_index)? {
            return Ok(());
        }

        let Some(entity_id) = command.entity_id.clone() else {
            return Ok(());
        };
        if !self.world.entities.contains_key(&entity_id) {
            return Ok(());
        }

        match command.command_type.as_str() {
            CMD_SET_ENTITY_MOVE_VECTOR => {
                let x = command.params.get("x").and_then(Value::as_f64).unwrap_or(0.0);
                let y = command.params.get("y").and_then(Value::as_f64).unwrap_or(0.0);
                self.set_entity_move_vector(&entity_id, x, y)?;
            }
            CMD_SET_ENTITY_TARGET_POSITION => {
                let x = command.params.get("x").and_then(Value::as_f64).unwrap_or(0.0);
                let y = command.params.get("y").and_then(Value::as_f64).unwrap_or(0.0);
                self.set_entity_target_position(&entity_id, x, y)?;
            }
            "stop" => {
                self.stop_entity(&entity_id)?;
            }
            CMD_TRANSITION_SPACE => {
                let Some(to_location) = command
                    .params
                    .get("to_location")
                    .and_then(LocationRef::from_value)
                else {
                    return Ok(());
                };
                self.execute_transition_command(&entity_id, command.tick, command, &to_location)?;
            }
            CMD_ENTER_SITE => {
                self.execute_enter_site_command(&entity_id, command.tick, command)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Applies a space transition. Rejections are forensic trace entries,
    /// never errors; an applied transition moves the entity and clears its
    /// movement intents.
    fn execute_transition_command(
        &mut self,
        entity_id: &str,
        tick: u64,
        command: &SimCommand,
        to_location: &LocationRef,
    ) -> Result<(), SimError> {
        let Some(entity) = self.world.entities.get(entity_id) else {
            return Ok(());
        };
        let from_location = self.location_ref_of(entity);
        let transition_uid = transition_uid(entity_id, tick, command, to_location)?;

        // Resolve the target space read-only first; the entity mutation below
        // needs the world borrow back.
        let resolution = match self.world.spaces.get(&to_location.space_id) {
            None => Err("rejected_unknown_space"),
            Some(space) => {
                if !topology_compatible(&space.topology_type, &to_location.topology_type) {
                    Err("rejected_topology_mismatch")
                } else if !space.is_valid_cell(&to_location.coord) {
                    Err("rejected_invalid_coord")
                } else if space.is_square_grid() {
                    let (x, y) = to_location.square_cell().unwrap_or((0, 0));
                    Ok(square_grid_cell_to_world_xy(x, y))
                } else {
                    match to_location.hex_coord() {
                        Some(coord) => Ok(axial_to_world_xy(coord)),
                        None => Err("rejected_invalid_coord"),
                    }
                }
            }
        };

        let status = match resolution {
            Err(rejection) => rejection,
            Ok((next_x, next_y)) => {
                if let Some(entity) = self.world.entities.get_mut(entity_id) {
                    entity.position_x = next_x;
                    entity.position_y = next_y;
                    entity.space_id = to_location.space_id.clone();
                    entity.target_position = None;
                    entity.move_input_x = 0.0;
                    entity.move_input_y = 0.0;
                }
                "applied"
            }
        };

        let mut params = Map::new();
        params.insert("entity_id".to_string(), Value::from(entity_id));
        params.insert("from_location".to_string(), from_location.to_value());
        params.insert("to_location".to_string(), to_location.to_value());
        params.insert("transition_uid".to_string(), Value::from(transition_uid.clone()));
        params.insert("status".to_string(), Value::from(status));
        params.insert(
            "reason".to_string(),
            command.params.get("reason").cloned().unwrap_or(Value::Null),
        );
        params.insert(
            "site_id".to_string(),
            command.params.get("site_id").cloned().unwrap_or(Value::Null),
        );
        self.append_trace_entry(TraceEntry {
            tick,
            event_id: trace_id_from_tag(&format!("space-transition:{transition_uid}")),
            event_type: EVT_SPACE_TRANSITION.to_string(),
            params,
            module_hooks_called: false,
        })
    }

    /// Resolves a site's entrance into a space transition.
    fn execute_enter_site_command(
        &mut self,
        entity_id: &str,
        tick: u64,
        command: &SimCommand,
    ) -> Result<(), SimError> {
        let site_id = command
            .params
            .get("site_id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let Some(site) = self.world.sites.get(&site_id).cloned() else {
            return self.append_site_enter_outcome(tick, entity_id, &site_id, None, "unknown_site");
        };
        let Some(entrance) = site.entrance else {
            return self.append_site_enter_outcome(tick, entity_id, &site_id, None, "no_entrance");
        };

        let target_space_id = entrance.target_space_id.clone();
        let Some(target_space) = self.world.spaces.get(&target_space_id) else {
            return self.append_site_enter_outcome(
                tick,
                entity_id,
                &site_id,
                Some(&target_space_id),
                "unknown_target_space",
            );
        };

        let target_coord = match entrance.spawn {
            Some(spawn) => spawn,
            None => match target_space.default_spawn_coord() {
                Some(coord) => coord,
                None => {
                    return self.append_site_enter_outcome(
                        tick,
                        entity_id,
                        &site_id,
                        Some(&target_space_id),
                        "no_entrance",
                    )
                }
            },
        };

        let to_location = LocationRef::new(
            target_space_id.clone(),
            target_space.topology_type.clone(),
            target_coord,
        );
        let mut params = Map::new();
        params.insert("to_location".to_string(), to_location.to_value());
        params.insert("reason".to_string(), Value::from("enter_site"));
        params.insert("site_id".to_string(), Value::from(site_id.clone()));
        let transition_command = SimCommand::new(
            tick,
            Some(entity_id.to_string()),
            CMD_TRANSITION_SPACE,
            params,
        );
        self.execute_transition_command(entity_id, tick, &transition_command, &to_location)?;
        self.append_site_enter_outcome(tick, entity_id, &site_id, Some(&target_space_id), "applied")
    }

    fn append_site_enter_outcome(
        &mut self,
        tick: u64,
        entity_id: &str,
        site_id: &str,
        target_space_id: Option<&str>,
        outcome: &str,
    ) -> Result<(), SimError> {
        let mut params = Map::new();
        params.insert("tick".to_string(), Value::from(tick));
        params.insert("entity_id".to_string(), Value::from(entity_id));
        params.insert("site_id".to_string(), Value::from(site_id));
        params.insert(
            "target_space_id".to_string(),
            target_space_id.map(Value::from).unwrap_or(Value::Null),
        );
        params.insert("outcome".to_string(), Value::from(outcome));
        self.append_trace_entry(TraceEntry {
            tick,
            event_id: trace_id_from_tag(&format!(
                "site-enter:{tick}:{entity_id}:{site_id}:{outcome}"
            )),
            event_type: EVT_SITE_ENTER_OUTCOME.to_string(),
            params,
            module_hooks_called: false,
        })
    }
}

fn topology_compatible(space_topology: &str, location_topology: &str) -> bool {
    if space_topology == location_topology {
        return true;
    }
    is_hex_topology(space_topology) && is_hex_topology(location_topology)
}

/// Deterministic identifier for a transition intent, stable across replays.
fn transition_uid(
    entity_id: &str,
    tick: u64,
    command: &SimCommand,
    to_location: &LocationRef,
) -> Result<String, SimError> {
    let mut payload = Map::new();
    payload.insert("entity_id".to_string(), Value::from(entity_id));
    payload.insert("tick".to_string(), Value::from(tick));
    payload.insert(
        "command_type".to_string(),
        Value::from(command.command_type.clone()),
    );
    payload.insert("to_location".to_string(), to_location.to_value());
    payload.insert(
        "reason".to_string(),
        command.params.get("reason").cloned().unwrap_or(Value::Null),
    );
    payload.insert(
        "site_id".to_string(),
        command.params.get("site_id").cloned().unwrap_or(Value::Null),
    );
    let digest = canonical_hash(&Value::Object(payload))?;
    Ok(format!("transition-{}", &digest[..16]))
}
