//! Spaces, cells, sites, containers, and wound records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::location::{is_hex_topology, HexCoord, TOPOLOGY_SQUARE_GRID};

pub const SITE_TYPE_NONE: &str = "none";
pub const SITE_TYPE_TOWN: &str = "town";
pub const SITE_TYPE_DUNGEON: &str = "dungeon";

/// Per-space classification, independent of topology. A square-grid space can
/// be a campaign map and a hex space can be a tactical arena; role is what
/// gates tactical-only behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpaceRole {
    Campaign,
    Local,
}

impl Default for SpaceRole {
    fn default() -> Self {
        Self::Campaign
    }
}

/// One cell of a space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HexRecord {
    pub terrain_type: String,
    #[serde(default = "default_site_type")]
    pub site_type: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_site_type() -> String {
    SITE_TYPE_NONE.to_string()
}

impl HexRecord {
    pub fn new(terrain_type: impl Into<String>) -> Self {
        Self {
            terrain_type: terrain_type.into(),
            site_type: default_site_type(),
            metadata: Map::new(),
        }
    }
}

/// A named topological region with its own cell set.
///
/// Cell membership is the single validity rule: a coordinate is a valid cell
/// of the space iff its canonical key is present in `cells`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpaceState {
    pub space_id: String,
    #[serde(default)]
    pub role: SpaceRole,
    pub topology_type: String,
    #[serde(default)]
    pub topology_params: Map<String, Value>,
    #[serde(default)]
    pub cells: BTreeMap<String, HexRecord>,
    #[serde(default)]
    pub doors: Vec<Value>,
    #[serde(default)]
    pub anchors: BTreeMap<String, Value>,
    #[serde(default)]
    pub interactables: Vec<Value>,
}

impl SpaceState {
    pub fn new(space_id: impl Into<String>, topology_type: impl Into<String>) -> Self {
        Self {
            space_id: space_id.into(),
            role: SpaceRole::Campaign,
            topology_type: topology_type.into(),
            topology_params: Map::new(),
            cells: BTreeMap::new(),
            doors: Vec::new(),
            anchors: BTreeMap::new(),
            interactables: Vec::new(),
        }
    }

    pub fn is_hex(&self) -> bool {
        is_hex_topology(&self.topology_type)
    }

    pub fn is_square_grid(&self) -> bool {
        self.topology_type == TOPOLOGY_SQUARE_GRID
    }

    /// Canonical key for a coordinate payload in this space's topology, or
    /// `None` when the payload does not fit the topology.
    pub fn coord_cell_key(&self, coord: &Map<String, Value>) -> Option<String> {
        if self.is_hex() {
            return HexCoord::from_coord_value(coord).map(|hex| hex.cell_key());
        }
        if self.is_square_grid() {
            let x = coord.get("x")?.as_i64()?;
            let y = coord.get("y")?.as_i64()?;
            return Some(format!("{},{}", x, y));
        }
        None
    }

    pub fn is_valid_cell(&self, coord: &Map<String, Value>) -> bool {
        match self.coord_cell_key(coord) {
            Some(key) => self.cells.contains_key(&key),
            None => false,
        }
    }

    pub fn get_cell(&self, coord: &Map<String, Value>) -> Option<&HexRecord> {
        self.cells.get(&self.coord_cell_key(coord)?)
    }

    pub fn set_hex_record(&mut self, coord: HexCoord, record: HexRecord) {
        self.cells.insert(coord.cell_key(), record);
    }

    /// Spawn coordinate for entities entering this space: the `"spawn"`
    /// anchor when present, otherwise the lowest-keyed cell.
    pub fn default_spawn_coord(&self) -> Option<Map<String, Value>> {
        if let Some(anchor) = self.anchors.get("spawn") {
            if let Value::Object(coord) = anchor {
                return Some(coord.clone());
            }
        }
        let key = self.cells.keys().next()?;
        let mut parts = key.splitn(2, ',');
        let a: i64 = parts.next()?.parse().ok()?;
        let b: i64 = parts.next()?.parse().ok()?;
        let mut coord = Map::new();
        if self.is_square_grid() {
            coord.insert("x".to_string(), Value::from(a));
            coord.insert("y".to_string(), Value::from(b));
        } else {
            coord.insert("q".to_string(), Value::from(a));
            coord.insert("r".to_string(), Value::from(b));
        }
        Some(coord)
    }
}

/// Entrance of a world site into another space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteEntrance {
    pub target_space_id: String,
    #[serde(default)]
    pub spawn: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteRecord {
    pub site_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub entrance: Option<SiteEntrance>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A flat, identity-keyed item container. Stacks are non-negative; a stack
/// reaching zero is removed from the map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerState {
    pub container_id: String,
    #[serde(default)]
    pub owner_entity_id: Option<String>,
    #[serde(default)]
    pub location: Option<Value>,
    #[serde(default)]
    pub items: BTreeMap<String, u64>,
}

impl ContainerState {
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            owner_entity_id: None,
            location: None,
            items: BTreeMap::new(),
        }
    }

    pub fn quantity(&self, item_id: &str) -> u64 {
        self.items.get(item_id).copied().unwrap_or(0)
    }

    /// Applies a signed stack delta. Returns `false` (without mutating) when
    /// the delta would drive the stack negative.
    pub fn apply_delta(&mut self, item_id: &str, delta: i64) -> bool {
        let before = self.quantity(item_id) as i64;
        let after = before + delta;
        if after < 0 {
            return false;
        }
        if after == 0 {
            self.items.remove(item_id);
        } else {
            self.items.insert(item_id.to_string(), after as u64);
        }
        true
    }
}

/// One wound on an entity. Entities carry at most `MAX_WOUNDS` records;
/// older wounds are evicted FIFO.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WoundRecord {
    pub region: String,
    pub severity: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub inflicted_tick: u64,
    #[serde(default)]
    pub source: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn disk_space(radius: i64) -> SpaceState {
        let mut space = SpaceState::new("overworld", "hex_disk");
        let origin = HexCoord::new(0, 0);
        for q in -radius..=radius {
            for r in -radius..=radius {
                let coord = HexCoord::new(q, r);
                if origin.axial_distance(&coord) <= radius as u64 {
                    space.set_hex_record(coord, HexRecord::new("plains"));
                }
            }
        }
        space
    }

    #[test]
    fn cell_validity_is_membership() {
        let space = disk_space(2);
        let inside = HexCoord::new(1, -1).to_coord_value();
        let outside = HexCoord::new(3, 0).to_coord_value();
        assert!(space.is_valid_cell(&inside));
        assert!(!space.is_valid_cell(&outside));
    }

    #[test]
    fn malformed_coord_is_never_valid() {
        let space = disk_space(1);
        let mut coord = Map::new();
        coord.insert("x".to_string(), Value::from(0));
        assert!(!space.is_valid_cell(&coord));
    }

    #[test]
    fn spawn_anchor_wins_over_first_cell() {
        let mut space = disk_space(1);
        space
            .anchors
            .insert("spawn".to_string(), json!({"q": 1, "r": 0}));
        let spawn = space.default_spawn_coord().expect("spawn coord");
        assert_eq!(spawn.get("q"), Some(&Value::from(1)));
    }

    #[test]
    fn container_delta_rejects_negative_stacks() {
        let mut container = ContainerState::new("inventory:scout");
        assert!(container.apply_delta("ration", 3));
        assert!(!container.apply_delta("ration", -4));
        assert_eq!(container.quantity("ration"), 3);
        assert!(container.apply_delta("ration", -3));
        assert!(container.items.is_empty());
    }

    #[test]
    fn space_role_serializes_snake_case() {
        let encoded = serde_json::to_value(SpaceRole::Local).expect("encode");
        assert_eq!(encoded, json!("local"));
    }
}
