//! Authoritative world state: spaces, entities, containers, sites, and the
//! bounded world-owned ledgers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use contracts::{
    location::TOPOLOGY_OVERWORLD_HEX, ContainerState, HexCoord, HexRecord, SiteRecord, SpaceState,
    DEFAULT_OVERWORLD_SPACE_ID,
};

use crate::entity::EntityState;
use crate::error::SimError;

pub const MAX_SIGNALS: usize = 256;
pub const MAX_TRACKS: usize = 256;
pub const MAX_RUMORS: usize = 256;
pub const MAX_SPAWN_DESCRIPTORS: usize = 256;
pub const MAX_OCCLUSION_EDGES: usize = 2_048;

/// One occlusion edge between two adjacent cells of a space. Later records
/// for the same edge override earlier ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OcclusionEdge {
    pub space_id: String,
    pub cell_a: Map<String, Value>,
    pub cell_b: Map<String, Value>,
    pub occlusion: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorldState {
    #[serde(default)]
    pub spaces: BTreeMap<String, SpaceState>,
    #[serde(default)]
    pub entities: BTreeMap<String, EntityState>,
    #[serde(default)]
    pub containers: BTreeMap<String, ContainerState>,
    #[serde(default)]
    pub sites: BTreeMap<String, SiteRecord>,
    #[serde(default)]
    pub signals: Vec<Value>,
    #[serde(default)]
    pub tracks: Vec<Value>,
    #[serde(default)]
    pub rumors: Vec<Value>,
    #[serde(default)]
    pub spawn_descriptors: Vec<Value>,
    #[serde(default)]
    pub occlusion_edges: Vec<OcclusionEdge>,
}

fn push_bounded(ledger: &mut Vec<Value>, record: Value, cap: usize) {
    ledger.push(record);
    if ledger.len() > cap {
        let overflow = ledger.len() - cap;
        ledger.drain(..overflow);
    }
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a world from a legacy world-only payload
    /// (`{schema_version, world_hash, hexes: [{coord, record}]}`), populating
    /// the default overworld space.
    pub fn from_legacy_payload(payload: &Value) -> Result<Self, SimError> {
        let rows = payload
            .get("hexes")
            .and_then(Value::as_array)
            .ok_or_else(|| SimError::InvalidArgument("legacy payload missing hexes".to_string()))?;

        let mut space = SpaceState::new(DEFAULT_OVERWORLD_SPACE_ID, TOPOLOGY_OVERWORLD_HEX);
        for row in rows {
            let coord = row
                .get("coord")
                .and_then(Value::as_object)
                .and_then(HexCoord::from_coord_value)
                .ok_or_else(|| {
                    SimError::InvalidArgument("legacy hex row has malformed coord".to_string())
                })?;
            let record: HexRecord = serde_json::from_value(
                row.get("record")
                    .cloned()
                    .ok_or_else(|| SimError::InvalidArgument("legacy hex row missing record".to_string()))?,
            )?;
            space.set_hex_record(coord, record);
        }

        let mut world = Self::new();
        world.spaces.insert(space.space_id.clone(), space);
        Ok(world)
    }

    pub fn space(&self, space_id: &str) -> Option<&SpaceState> {
        self.spaces.get(space_id)
    }

    pub fn overworld(&self) -> Option<&SpaceState> {
        self.spaces.get(DEFAULT_OVERWORLD_SPACE_ID)
    }

    pub fn get_hex_record(&self, space_id: &str, coord: HexCoord) -> Option<&HexRecord> {
        self.spaces.get(space_id)?.cells.get(&coord.cell_key())
    }

    pub fn append_signal_record(&mut self, record: Value) {
        push_bounded(&mut self.signals, record, MAX_SIGNALS);
    }

    pub fn append_track_record(&mut self, record: Value) {
        push_bounded(&mut self.tracks, record, MAX_TRACKS);
    }

    pub fn append_rumor_record(&mut self, record: Value) {
        push_bounded(&mut self.rumors, record, MAX_RUMORS);
    }

    pub fn append_spawn_descriptor(&mut self, record: Value) {
        push_bounded(&mut self.spawn_descriptors, record, MAX_SPAWN_DESCRIPTORS);
    }

    pub fn append_occlusion_edge(&mut self, edge: OcclusionEdge) {
        self.occlusion_edges.push(edge);
        if self.occlusion_edges.len() > MAX_OCCLUSION_EDGES {
            let overflow = self.occlusion_edges.len() - MAX_OCCLUSION_EDGES;
            self.occlusion_edges.drain(..overflow);
        }
    }

    /// Occlusion cost of crossing between two adjacent cells. Edges are
    /// undirected; the most recently appended matching record wins; absent
    /// edges cost zero.
    pub fn structure_occlusion_value(
        &self,
        space_id: &str,
        cell_a: &Map<String, Value>,
        cell_b: &Map<String, Value>,
    ) -> i64 {
        let mut value = 0;
        for edge in &self.occlusion_edges {
            if edge.space_id != space_id {
                continue;
            }
            let forward = edge.cell_a == *cell_a && edge.cell_b == *cell_b;
            let reverse = edge.cell_a == *cell_b && edge.cell_b == *cell_a;
            if forward || reverse {
                value = edge.occlusion;
            }
        }
        value
    }

    /// Structural invariants that must hold before the world is accepted as
    /// authoritative: entity spaces exist, entity positions map to valid
    /// cells, and referenced inventory containers exist.
    pub fn validate(&self) -> Result<(), SimError> {
        for entity in self.entities.values() {
            let space = self
                .spaces
                .get(&entity.space_id)
                .ok_or_else(|| SimError::UnknownSpace(entity.space_id.clone()))?;
            let coord = entity.cell_coord(space);
            if !space.is_valid_cell(&coord) {
                return Err(SimError::InvalidCell {
                    space_id: entity.space_id.clone(),
                    cell_key: space.coord_cell_key(&coord).unwrap_or_default(),
                });
            }
            if let Some(container_id) = &entity.inventory_container_id {
                if !self.containers.contains_key(container_id) {
                    return Err(SimError::InvalidArgument(format!(
                        "entity '{}' references missing inventory container '{container_id}'",
                        entity.entity_id
                    )));
                }
            }
        }
        Ok(())
    }
}
