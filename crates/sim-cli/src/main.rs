use std::env;
use std::process::ExitCode;

use serde_json::{Map, Value};
use tracing::info;

use contracts::{HexCoord, ItemDef, ItemRegistry, SupplyConsumeDef, SupplyProfile, SupplyProfileRegistry};
use sim_core::modules::{
    EncounterCheckModule, EntityStatsModule, InventoryLedgerModule, PeriodicScheduler,
    SignalPropagationModule, SupplyConsumptionModule, WoundLedgerModule,
};
use sim_core::{load_game, save_game, EntityState, Simulation};

const DEFAULT_SEED: u64 = 7;
const DEFAULT_RADIUS: u64 = 4;
const DEFAULT_PLAYER_ENTITY_ID: &str = "scout";
const DEFAULT_PLAYER_SUPPLY_PROFILE_ID: &str = "player_default";

fn print_usage() {
    println!("sim-cli <command>");
    println!("commands:");
    println!("  new <path> [seed] [radius]   create a canonical save");
    println!("    defaults: seed {DEFAULT_SEED}, hex_disk radius {DEFAULT_RADIUS}");
    println!("  run <path> <ticks> [out]     load, advance, save (out defaults to <path>)");
    println!("  replay <path> <ticks>        load and advance without writing; print hash");
    println!("  hash <path>                  print the simulation hash of a save");
    println!("  trace <path>                 print the executed-event trace of a save");
}

fn parse_u64(value: Option<&String>, label: &str) -> Result<u64, String> {
    let raw = value.ok_or_else(|| format!("missing {label}"))?;
    raw.parse::<u64>().map_err(|_| format!("invalid {label}: {raw}"))
}

fn default_item_registry() -> ItemRegistry {
    ItemRegistry::from_items([
        ItemDef::new("ration"),
        ItemDef::new("torch"),
        ItemDef::new("waterskin"),
    ])
}

fn default_supply_profiles() -> SupplyProfileRegistry {
    SupplyProfileRegistry::from_profiles([SupplyProfile {
        profile_id: DEFAULT_PLAYER_SUPPLY_PROFILE_ID.to_string(),
        consumes: vec![SupplyConsumeDef {
            item_id: "ration".to_string(),
            quantity: 1,
            interval_ticks: contracts::TICKS_PER_DAY,
        }],
    }])
}

/// The default module roster. Modules are ephemeral: they are re-registered
/// on every load and read everything they need from rules-state and the
/// pending queue.
fn register_default_modules(sim: &mut Simulation) -> Result<(), sim_core::SimError> {
    sim.register_rule_module(Box::new(PeriodicScheduler::new()))?;
    sim.register_rule_module(Box::new(InventoryLedgerModule::new(default_item_registry())))?;
    sim.register_rule_module(Box::new(EntityStatsModule::new()))?;
    sim.register_rule_module(Box::new(WoundLedgerModule::new()))?;
    sim.register_rule_module(Box::new(SignalPropagationModule::new()))?;
    sim.register_rule_module(Box::new(EncounterCheckModule::new()))?;
    sim.register_rule_module(Box::new(SupplyConsumptionModule::new(
        default_supply_profiles(),
        default_item_registry(),
    )))
}

fn cmd_new(path: &str, seed: u64, radius: u64) -> Result<(), String> {
    let mut params = Map::new();
    params.insert("radius".to_string(), Value::from(radius));
    let mut sim = Simulation::new_with_seed_and_topology(seed, "hex_disk", params)
        .map_err(|err| err.to_string())?;

    let mut player = EntityState::from_hex(DEFAULT_PLAYER_ENTITY_ID, HexCoord::new(0, 0));
    player.supply_profile_id = Some(DEFAULT_PLAYER_SUPPLY_PROFILE_ID.to_string());
    sim.add_entity(player).map_err(|err| err.to_string())?;
    if let Some(container) = sim.container_mut(&format!("inventory:{DEFAULT_PLAYER_ENTITY_ID}")) {
        container.apply_delta("ration", 10);
        container.apply_delta("torch", 3);
    }

    register_default_modules(&mut sim).map_err(|err| err.to_string())?;

    let mut metadata = Map::new();
    metadata.insert("created_by".to_string(), Value::from("sim-cli new"));
    save_game(&sim, path, metadata).map_err(|err| err.to_string())?;
    println!(
        "created {path} (seed {seed}, radius {radius}, hash {})",
        sim.simulation_hash().map_err(|err| err.to_string())?
    );
    Ok(())
}

fn cmd_run(path: &str, ticks: u64, out: &str) -> Result<(), String> {
    let mut sim = load_game(path).map_err(|err| err.to_string())?;
    register_default_modules(&mut sim).map_err(|err| err.to_string())?;
    sim.advance_ticks(ticks).map_err(|err| err.to_string())?;
    let mut metadata = sim.save_metadata().clone();
    metadata.insert("last_run_ticks".to_string(), Value::from(ticks));
    save_game(&sim, out, metadata).map_err(|err| err.to_string())?;
    info!(ticks, out, "run complete");
    println!(
        "tick {} day {} hash {}",
        sim.tick(),
        sim.day_index(),
        sim.simulation_hash().map_err(|err| err.to_string())?
    );
    Ok(())
}

fn cmd_replay(path: &str, ticks: u64) -> Result<(), String> {
    let mut sim = load_game(path).map_err(|err| err.to_string())?;
    register_default_modules(&mut sim).map_err(|err| err.to_string())?;
    sim.advance_ticks(ticks).map_err(|err| err.to_string())?;
    println!(
        "tick {} hash {}",
        sim.tick(),
        sim.simulation_hash().map_err(|err| err.to_string())?
    );
    Ok(())
}

fn cmd_hash(path: &str) -> Result<(), String> {
    let sim = load_game(path).map_err(|err| err.to_string())?;
    println!("{}", sim.simulation_hash().map_err(|err| err.to_string())?);
    Ok(())
}

fn cmd_trace(path: &str) -> Result<(), String> {
    let sim = load_game(path).map_err(|err| err.to_string())?;
    for entry in sim.get_event_trace() {
        println!(
            "tick={} event_id={} type={} params={}",
            entry.tick,
            entry.event_id,
            entry.event_type,
            Value::Object(entry.params)
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    let outcome = match command {
        Some("new") => match args.get(2) {
            Some(path) => {
                let seed = args.get(3).and_then(|raw| raw.parse().ok()).unwrap_or(DEFAULT_SEED);
                let radius = args
                    .get(4)
                    .and_then(|raw| raw.parse().ok())
                    .unwrap_or(DEFAULT_RADIUS);
                cmd_new(path, seed, radius)
            }
            None => Err("missing path".to_string()),
        },
        Some("run") => match (args.get(2), parse_u64(args.get(3), "ticks")) {
            (Some(path), Ok(ticks)) => {
                let out = args.get(4).map(String::as_str).unwrap_or(path.as_str());
                cmd_run(path, ticks, out)
            }
            (None, _) => Err("missing path".to_string()),
            (_, Err(err)) => Err(err),
        },
        Some("replay") => match (args.get(2), parse_u64(args.get(3), "ticks")) {
            (Some(path), Ok(ticks)) => cmd_replay(path, ticks),
            (None, _) => Err("missing path".to_string()),
            (_, Err(err)) => Err(err),
        },
        Some("hash") => match args.get(2) {
            Some(path) => cmd_hash(path),
            None => Err("missing path".to_string()),
        },
        Some("trace") => match args.get(2) {
            Some(path) => cmd_trace(path),
            None => Err("missing path".to_string()),
        },
        _ => {
            print_usage();
            return ExitCode::SUCCESS;
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            print_usage();
            ExitCode::from(2)
        }
    }
}
