//! Deterministic tick-based simulation substrate for a persistent hexcrawl
//! world.
//!
//! The substrate guarantees that, given an initial world snapshot, a master
//! seed, and an ordered input log, the same canonical state hash results on
//! any machine, after any number of save/load cycles, for any number of
//! ticks. Gameplay is layered on top as rule modules that communicate
//! exclusively through commands, events, and the rules-state store.

pub mod canonical;
pub mod entity;
pub mod error;
pub mod modules;
pub mod rng;
pub mod rules;
pub mod save;
pub mod simulation;
pub mod spatial;
pub mod world;

pub use canonical::{canonical_encode, canonical_hash, validate_json_value};
pub use entity::{EntityState, DEFAULT_SPEED_PER_TICK, MAX_WOUNDS};
pub use error::SimError;
pub use rng::{derive_stream_seed, RngStreams, StreamRng};
pub use rules::RuleModule;
pub use save::{load_game, load_world_template, save_game, SaveError};
pub use simulation::{
    run_replay, run_replay_from_world, Simulation, TraceEntry, MAX_EVENTS_PER_TICK, MAX_EVENT_TRACE,
};
pub use world::{OcclusionEdge, WorldState, MAX_OCCLUSION_EDGES, MAX_SIGNALS};
