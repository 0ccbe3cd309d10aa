//! Canonical save files: atomic write, fail-fast verified load.
//!
//! Payload schema version 1:
//! `{schema_version, save_hash, world_state, simulation_state, input_log,
//! metadata}`; `save_hash` covers everything except itself and `metadata`.
//! Legacy world-only payloads (`{schema_version, world_hash, hexes}`) remain
//! loadable as world templates but produce no simulation.

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::info;

use contracts::SCHEMA_VERSION;

use crate::canonical::{canonical_encode, canonical_hash};
use crate::error::SimError;
use crate::simulation::Simulation;
use crate::world::WorldState;

#[derive(Debug)]
pub enum SaveError {
    Io(std::io::Error),
    Serde(serde_json::Error),
    Sim(SimError),
    HashMismatch { expected: String, actual: String },
    SchemaVersionUnsupported(u64),
    SchemaInvalid(String),
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "save io error: {err}"),
            Self::Serde(err) => write!(f, "save serde error: {err}"),
            Self::Sim(err) => write!(f, "save simulation error: {err}"),
            Self::HashMismatch { expected, actual } => {
                write!(f, "save_hash mismatch: stored {expected}, computed {actual}")
            }
            Self::SchemaVersionUnsupported(version) => {
                write!(f, "unsupported save schema_version: {version}")
            }
            Self::SchemaInvalid(message) => write!(f, "invalid save payload: {message}"),
        }
    }
}

impl std::error::Error for SaveError {}

impl From<std::io::Error> for SaveError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for SaveError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

impl From<SimError> for SaveError {
    fn from(value: SimError) -> Self {
        Self::Sim(value)
    }
}

/// Hash domain: the payload with `save_hash` and `metadata` removed and the
/// optional sections normalized to their empty forms.
fn hash_domain(root: &Map<String, Value>) -> Value {
    let mut domain = Map::new();
    domain.insert(
        "schema_version".to_string(),
        root.get("schema_version").cloned().unwrap_or(Value::Null),
    );
    domain.insert(
        "world_state".to_string(),
        root.get("world_state")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new())),
    );
    domain.insert(
        "simulation_state".to_string(),
        root.get("simulation_state")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new())),
    );
    domain.insert(
        "input_log".to_string(),
        root.get("input_log")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new())),
    );
    Value::Object(domain)
}

/// Writes the canonical save for a simulation: sibling temp file, fsync,
/// atomic rename. A failed write leaves any existing file intact.
pub fn save_game(
    simulation: &Simulation,
    path: impl AsRef<Path>,
    metadata: Map<String, Value>,
) -> Result<(), SaveError> {
    let path = path.as_ref();
    let payload = simulation.to_payload()?;
    let Value::Object(mut root) = payload else {
        return Err(SaveError::SchemaInvalid("payload must be an object".to_string()));
    };
    let save_hash = canonical_hash(&hash_domain(&root))?;
    root.insert("save_hash".to_string(), Value::from(save_hash));
    root.insert("metadata".to_string(), Value::Object(metadata));

    let encoded = canonical_encode(&Value::Object(root))?;
    write_atomic(path, encoded.as_bytes())?;
    info!(path = %path.display(), bytes = encoded.len(), "wrote canonical save");
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SaveError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| SaveError::SchemaInvalid("save path has no file name".to_string()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Loads and verifies a canonical save. Fails fast on hash mismatch, unknown
/// schema version, or structural invalidity; no simulation is produced on
/// failure.
pub fn load_game(path: impl AsRef<Path>) -> Result<Simulation, SaveError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)?;
    let payload: Value = serde_json::from_str(&raw)?;
    let root = payload
        .as_object()
        .ok_or_else(|| SaveError::SchemaInvalid("save payload must be an object".to_string()))?;

    if root.contains_key("world_hash") && root.contains_key("hexes") {
        return Err(SaveError::SchemaInvalid(
            "legacy world-only payload; load it with load_world_template".to_string(),
        ));
    }

    let schema_version = root
        .get("schema_version")
        .and_then(Value::as_u64)
        .ok_or_else(|| SaveError::SchemaInvalid("missing schema_version".to_string()))?;
    if schema_version != SCHEMA_VERSION {
        return Err(SaveError::SchemaVersionUnsupported(schema_version));
    }

    let stored_hash = root
        .get("save_hash")
        .and_then(Value::as_str)
        .ok_or_else(|| SaveError::SchemaInvalid("missing save_hash".to_string()))?
        .to_string();
    let computed_hash = canonical_hash(&hash_domain(root))?;
    if stored_hash != computed_hash {
        return Err(SaveError::HashMismatch {
            expected: stored_hash,
            actual: computed_hash,
        });
    }

    let mut simulation = Simulation::from_payload(&payload).map_err(|err| match err {
        SimError::InvalidArgument(message) => SaveError::SchemaInvalid(message),
        other => SaveError::Sim(other),
    })?;
    if let Some(metadata) = root.get("metadata").and_then(Value::as_object) {
        simulation.save_metadata = metadata.clone();
    }
    info!(path = %path.display(), tick = simulation.tick(), "loaded canonical save");
    Ok(simulation)
}

/// Loads a legacy world-only payload (`{schema_version, world_hash, hexes}`)
/// as a world template. When `world_hash` is present it is verified over the
/// canonical encoding of `{hexes}`.
pub fn load_world_template(path: impl AsRef<Path>) -> Result<WorldState, SaveError> {
    let raw = fs::read_to_string(path.as_ref())?;
    let payload: Value = serde_json::from_str(&raw)?;
    let root = payload
        .as_object()
        .ok_or_else(|| SaveError::SchemaInvalid("world payload must be an object".to_string()))?;

    if let Some(stored_hash) = root.get("world_hash").and_then(Value::as_str) {
        let mut domain = Map::new();
        domain.insert(
            "hexes".to_string(),
            root.get("hexes").cloned().unwrap_or_else(|| Value::Array(Vec::new())),
        );
        let computed = canonical_hash(&Value::Object(domain))?;
        if stored_hash != computed {
            return Err(SaveError::HashMismatch {
                expected: stored_hash.to_string(),
                actual: computed,
            });
        }
    }

    WorldState::from_legacy_payload(&payload).map_err(SaveError::from)
}
