//! Entity runtime state and stat patching.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use contracts::{HexCoord, SpaceState, WoundRecord, DEFAULT_OVERWORLD_SPACE_ID};

use crate::canonical::validate_json_value;
use crate::error::SimError;
use crate::spatial::{axial_to_world_xy, world_xy_to_axial, world_xy_to_square_grid_cell};

pub const MAX_WOUNDS: usize = 16;
pub const DEFAULT_SPEED_PER_TICK: f64 = 0.15;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityState {
    pub entity_id: String,
    #[serde(default = "default_space_id")]
    pub space_id: String,
    pub position_x: f64,
    pub position_y: f64,
    #[serde(default)]
    pub facing: f64,
    #[serde(default = "default_speed_per_tick")]
    pub speed_per_tick: f64,
    #[serde(default)]
    pub move_input_x: f64,
    #[serde(default)]
    pub move_input_y: f64,
    #[serde(default)]
    pub target_position: Option<(f64, f64)>,
    #[serde(default)]
    pub cooldown_until_tick: u64,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub source_action_uid: Option<String>,
    #[serde(default)]
    pub selected_entity_id: Option<String>,
    #[serde(default)]
    pub inventory_container_id: Option<String>,
    #[serde(default)]
    pub supply_profile_id: Option<String>,
    #[serde(default)]
    pub stats: Map<String, Value>,
    #[serde(default)]
    pub wounds: Vec<WoundRecord>,
}

fn default_space_id() -> String {
    DEFAULT_OVERWORLD_SPACE_ID.to_string()
}

fn default_speed_per_tick() -> f64 {
    DEFAULT_SPEED_PER_TICK
}

impl EntityState {
    pub fn new(entity_id: impl Into<String>, position_x: f64, position_y: f64) -> Self {
        Self {
            entity_id: entity_id.into(),
            space_id: default_space_id(),
            position_x,
            position_y,
            facing: 0.0,
            speed_per_tick: DEFAULT_SPEED_PER_TICK,
            move_input_x: 0.0,
            move_input_y: 0.0,
            target_position: None,
            cooldown_until_tick: 0,
            template_id: None,
            source_action_uid: None,
            selected_entity_id: None,
            inventory_container_id: None,
            supply_profile_id: None,
            stats: Map::new(),
            wounds: Vec::new(),
        }
    }

    pub fn from_hex(entity_id: impl Into<String>, hex_coord: HexCoord) -> Self {
        let (x, y) = axial_to_world_xy(hex_coord);
        Self::new(entity_id, x, y)
    }

    /// Derived hex coordinate of the current position.
    pub fn hex_coord(&self) -> HexCoord {
        world_xy_to_axial(self.position_x, self.position_y)
    }

    /// Coordinate payload of the containing cell in the given space's
    /// topology.
    pub fn cell_coord(&self, space: &SpaceState) -> Map<String, Value> {
        if space.is_square_grid() {
            let (x, y) = world_xy_to_square_grid_cell(self.position_x, self.position_y);
            let mut coord = Map::new();
            coord.insert("x".to_string(), Value::from(x));
            coord.insert("y".to_string(), Value::from(y));
            coord
        } else {
            self.hex_coord().to_coord_value()
        }
    }

    pub fn on_cooldown(&self, tick: u64) -> bool {
        tick < self.cooldown_until_tick
    }

    /// Appends a wound, evicting the oldest record once `MAX_WOUNDS` is
    /// exceeded.
    pub fn push_wound(&mut self, wound: WoundRecord) {
        self.wounds.push(wound);
        if self.wounds.len() > MAX_WOUNDS {
            let overflow = self.wounds.len() - MAX_WOUNDS;
            self.wounds.drain(..overflow);
        }
    }
}

/// Applies a `{op, key, value?}` patch to a stats map and returns the updated
/// map. `op` is `set` or `remove`; values must be JSON-safe.
pub fn apply_stat_patch(
    stats: &Map<String, Value>,
    patch: &Map<String, Value>,
) -> Result<Map<String, Value>, SimError> {
    let op = patch
        .get("op")
        .and_then(Value::as_str)
        .ok_or_else(|| SimError::InvalidArgument("stat patch op must be one of: set, remove".to_string()))?;
    let key = patch
        .get("key")
        .and_then(Value::as_str)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| SimError::InvalidArgument("stat patch key must be a non-empty string".to_string()))?;

    let mut updated = stats.clone();
    match op {
        "remove" => {
            updated.remove(key);
        }
        "set" => {
            let value = patch
                .get("value")
                .ok_or_else(|| SimError::InvalidArgument("stat patch set operation requires value".to_string()))?;
            validate_json_value(value, &format!("entity.stats[{key}]"))?;
            updated.insert(key.to_string(), value.clone());
        }
        _ => {
            return Err(SimError::InvalidArgument(
                "stat patch op must be one of: set, remove".to_string(),
            ))
        }
    }
    Ok(updated)
}
