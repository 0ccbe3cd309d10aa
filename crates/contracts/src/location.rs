//! Coordinates and serializable location references.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::DEFAULT_OVERWORLD_SPACE_ID;

pub const TOPOLOGY_HEX_AXIAL: &str = "hex_axial";
pub const TOPOLOGY_SQUARE_GRID: &str = "square_grid";
pub const TOPOLOGY_OVERWORLD_HEX: &str = "overworld_hex";
pub const TOPOLOGY_HEX_DISK: &str = "hex_disk";
pub const TOPOLOGY_HEX_RECTANGLE: &str = "hex_rectangle";

/// Topology names that share axial hex coordinates and validity rules.
pub const HEX_TOPOLOGY_TYPES: [&str; 5] = [
    TOPOLOGY_OVERWORLD_HEX,
    TOPOLOGY_HEX_DISK,
    TOPOLOGY_HEX_RECTANGLE,
    TOPOLOGY_HEX_AXIAL,
    "custom",
];

pub fn is_hex_topology(topology_type: &str) -> bool {
    HEX_TOPOLOGY_TYPES.contains(&topology_type)
}

/// Axial hex coordinate `(q, r)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HexCoord {
    pub q: i64,
    pub r: i64,
}

impl HexCoord {
    pub const fn new(q: i64, r: i64) -> Self {
        Self { q, r }
    }

    /// Canonical string form used as a stable map key.
    pub fn cell_key(&self) -> String {
        format!("{},{}", self.q, self.r)
    }

    pub fn to_coord_value(&self) -> Map<String, Value> {
        let mut coord = Map::new();
        coord.insert("q".to_string(), Value::from(self.q));
        coord.insert("r".to_string(), Value::from(self.r));
        coord
    }

    pub fn from_coord_value(coord: &Map<String, Value>) -> Option<Self> {
        Some(Self {
            q: coord.get("q")?.as_i64()?,
            r: coord.get("r")?.as_i64()?,
        })
    }

    pub fn axial_distance(&self, other: &HexCoord) -> u64 {
        let dq = self.q - other.q;
        let dr = self.r - other.r;
        let ds = (-self.q - self.r) - (-other.q - other.r);
        ((dq.abs() + dr.abs() + ds.abs()) / 2) as u64
    }
}

impl fmt::Display for HexCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.q, self.r)
    }
}

/// Opaque, serializable location reference for event contracts. The shape of
/// `coord` is governed by `topology_type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationRef {
    #[serde(default = "default_space_id")]
    pub space_id: String,
    pub topology_type: String,
    pub coord: Map<String, Value>,
}

fn default_space_id() -> String {
    DEFAULT_OVERWORLD_SPACE_ID.to_string()
}

impl LocationRef {
    pub fn new(space_id: impl Into<String>, topology_type: impl Into<String>, coord: Map<String, Value>) -> Self {
        Self {
            space_id: space_id.into(),
            topology_type: topology_type.into(),
            coord,
        }
    }

    pub fn from_overworld_hex(hex_coord: HexCoord) -> Self {
        Self {
            space_id: default_space_id(),
            topology_type: TOPOLOGY_OVERWORLD_HEX.to_string(),
            coord: hex_coord.to_coord_value(),
        }
    }

    pub fn hex_coord(&self) -> Option<HexCoord> {
        if !is_hex_topology(&self.topology_type) {
            return None;
        }
        HexCoord::from_coord_value(&self.coord)
    }

    pub fn square_cell(&self) -> Option<(i64, i64)> {
        if self.topology_type != TOPOLOGY_SQUARE_GRID {
            return None;
        }
        Some((
            self.coord.get("x")?.as_i64()?,
            self.coord.get("y")?.as_i64()?,
        ))
    }

    /// Canonical string form of `coord` used as a stable map key.
    pub fn cell_key(&self) -> String {
        if let Some(hex) = self.hex_coord() {
            return hex.cell_key();
        }
        if let Some((x, y)) = self.square_cell() {
            return format!("{},{}", x, y);
        }
        let mut parts = Vec::new();
        for (key, value) in &self.coord {
            parts.push(format!("{key}={value}"));
        }
        parts.join(":")
    }

    /// Step distance between two locations, when comparable: hex axial
    /// distance or square-grid Manhattan distance. `None` across spaces or
    /// topologies.
    pub fn step_distance(&self, other: &LocationRef) -> Option<u64> {
        if self.space_id != other.space_id || self.topology_type != other.topology_type {
            return None;
        }
        if let (Some(a), Some(b)) = (self.hex_coord(), other.hex_coord()) {
            return Some(a.axial_distance(&b));
        }
        if let (Some((ax, ay)), Some((bx, by))) = (self.square_cell(), other.square_cell()) {
            return Some(((ax - bx).unsigned_abs()) + ((ay - by).unsigned_abs()));
        }
        None
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}
