//! v1 cross-boundary contracts for the simulation kernel, CLI, and viewers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod items;
pub mod location;
pub mod serde_int_string;
pub mod space;

pub use items::{ItemDef, ItemRegistry, SupplyConsumeDef, SupplyProfile, SupplyProfileRegistry};
pub use location::{HexCoord, LocationRef};
pub use space::{ContainerState, HexRecord, SiteRecord, SpaceRole, SpaceState, WoundRecord};

pub const SCHEMA_VERSION: u64 = 1;
pub const TICKS_PER_DAY: u64 = 240;
pub const DEFAULT_OVERWORLD_SPACE_ID: &str = "overworld";

/// Command types owned by the substrate itself. Every other command type is
/// owned by whichever rule module consumes it.
pub const CMD_SET_ENTITY_MOVE_VECTOR: &str = "set_entity_move_vector";
pub const CMD_SET_ENTITY_TARGET_POSITION: &str = "set_entity_target_position";
pub const CMD_TRANSITION_SPACE: &str = "transition_space";
pub const CMD_ENTER_SITE: &str = "enter_site";
pub const CMD_SET_SELECTED_ENTITY: &str = "set_selected_entity";
pub const CMD_CLEAR_SELECTED_ENTITY: &str = "clear_selected_entity";

/// Event types owned by the substrate.
pub const EVT_PERIODIC_TICK: &str = "periodic_tick";
pub const EVT_TRAVEL_STEP: &str = "travel_step";
pub const EVT_SPACE_TRANSITION: &str = "space_transition";
pub const EVT_SITE_ENTER_OUTCOME: &str = "site_enter_outcome";

/// An ordered input-log entry. `command_index` is assigned by the simulation
/// at append time (bucket length before append) and is the tiebreaker for
/// commands sharing a tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimCommand {
    pub tick: u64,
    #[serde(default)]
    pub entity_id: Option<String>,
    pub command_type: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(flatten)]
    pub unknown_fields: Map<String, Value>,
}

impl SimCommand {
    pub fn new(
        tick: u64,
        entity_id: Option<String>,
        command_type: impl Into<String>,
        params: Map<String, Value>,
    ) -> Self {
        Self {
            tick,
            entity_id,
            command_type: command_type.into(),
            params,
            unknown_fields: Map::new(),
        }
    }

    /// Deterministic idempotence key for rule modules: `"{tick}:{index}"`.
    pub fn action_uid(&self, command_index: u64) -> String {
        format!("{}:{}", self.tick, command_index)
    }
}

/// A queued simulation event. `event_id` is assigned monotonically by the
/// event queue; `(tick, event_id)` is the total execution order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimEvent {
    pub tick: u64,
    pub event_id: u64,
    pub event_type: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(flatten)]
    pub unknown_fields: Map<String, Value>,
}

impl SimEvent {
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(Value::as_u64)
    }
}

/// Authoritative calendar state. Wall clock never participates; a day is a
/// fixed number of ticks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulationTime {
    #[serde(default = "default_ticks_per_day")]
    pub ticks_per_day: u64,
    #[serde(default)]
    pub epoch_tick: u64,
}

fn default_ticks_per_day() -> u64 {
    TICKS_PER_DAY
}

impl Default for SimulationTime {
    fn default() -> Self {
        Self {
            ticks_per_day: TICKS_PER_DAY,
            epoch_tick: 0,
        }
    }
}

impl SimulationTime {
    pub fn day_index(&self, tick: u64) -> u64 {
        tick.saturating_sub(self.epoch_tick) / self.ticks_per_day
    }

    pub fn tick_in_day(&self, tick: u64) -> u64 {
        tick.saturating_sub(self.epoch_tick) % self.ticks_per_day
    }

    pub fn time_of_day_fraction(&self, tick: u64) -> f64 {
        self.tick_in_day(tick) as f64 / self.ticks_per_day as f64
    }
}

impl fmt::Display for SimulationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ticks_per_day={} epoch_tick={}",
            self.ticks_per_day, self.epoch_tick
        )
    }
}

/// Construction-time configuration. Every field has a serde default so
/// partial payloads from older tools keep loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimConfig {
    #[serde(default = "default_ticks_per_day")]
    pub ticks_per_day: u64,
    #[serde(default)]
    pub epoch_tick: u64,
    #[serde(default = "default_speed_per_tick")]
    pub speed_per_tick: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_speed_per_tick() -> f64 {
    0.15
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            ticks_per_day: TICKS_PER_DAY,
            epoch_tick: 0,
            speed_per_tick: default_speed_per_tick(),
            notes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sim_command_round_trips_unknown_fields() {
        let raw = json!({
            "tick": 5,
            "entity_id": "scout",
            "command_type": "set_entity_move_vector",
            "params": {"x": 1.0, "y": 0.0},
            "future_field": {"kept": true},
        });
        let command: SimCommand = serde_json::from_value(raw.clone()).expect("decode");
        assert_eq!(command.tick, 5);
        assert_eq!(command.unknown_fields.get("future_field"), raw.get("future_field"));
        let encoded = serde_json::to_value(&command).expect("encode");
        assert_eq!(encoded.get("future_field"), raw.get("future_field"));
    }

    #[test]
    fn simulation_time_derives_day_and_fraction() {
        let time = SimulationTime {
            ticks_per_day: 240,
            epoch_tick: 0,
        };
        assert_eq!(time.day_index(0), 0);
        assert_eq!(time.day_index(240), 1);
        assert_eq!(time.tick_in_day(245), 5);
        assert!((time.time_of_day_fraction(120) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn action_uid_is_tick_and_index() {
        let command = SimCommand::new(7, None, "inventory_intent", Map::new());
        assert_eq!(command.action_uid(2), "7:2");
    }
}
