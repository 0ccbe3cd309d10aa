//! Inventory intent handling.
//!
//! `inventory_intent` commands carry a reason (`transfer`, `drop`, `pickup`,
//! `consume`, `spawn`), an item, a quantity, and source/destination
//! containers. Application is idempotent per action UID; every attempt lands
//! a forensic `inventory_outcome` trace entry and rejections mutate nothing.

use std::any::Any;
use std::collections::BTreeSet;

use serde_json::{Map, Value};

use contracts::{ContainerState, ItemRegistry, SimCommand};

use crate::canonical::trace_id_from_tag;
use crate::error::SimError;
use crate::rules::RuleModule;
use crate::simulation::{Simulation, TraceEntry};

pub const INVENTORY_LEDGER_MODULE: &str = "inventory_ledger";
pub const INVENTORY_INTENT_COMMAND_TYPE: &str = "inventory_intent";
pub const INVENTORY_OUTCOME_EVENT_TYPE: &str = "inventory_outcome";

const ALLOWED_REASONS: [&str; 5] = ["transfer", "drop", "pickup", "consume", "spawn"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryOutcome {
    Applied,
    AlreadyApplied,
    UnsupportedReason,
    InvalidQuantity,
    UnknownItem,
    UnknownContainer,
    InsufficientQuantity,
}

impl InventoryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyApplied => "already_applied",
            Self::UnsupportedReason => "unsupported_reason",
            Self::InvalidQuantity => "invalid_quantity",
            Self::UnknownItem => "unknown_item",
            Self::UnknownContainer => "unknown_container",
            Self::InsufficientQuantity => "insufficient_quantity",
        }
    }
}

#[derive(Debug)]
pub struct InventoryLedgerModule {
    registry: ItemRegistry,
}

impl InventoryLedgerModule {
    pub fn new(registry: ItemRegistry) -> Self {
        Self { registry }
    }
}

impl RuleModule for InventoryLedgerModule {
    fn name(&self) -> &str {
        INVENTORY_LEDGER_MODULE
    }

    fn on_command(
        &mut self,
        sim: &mut Simulation,
        command: &SimCommand,
        command_index: u64,
    ) -> Result<bool, SimError> {
        if command.command_type != INVENTORY_INTENT_COMMAND_TYPE {
            return Ok(false);
        }
        apply_inventory_intent(sim, &self.registry, command, command_index)?;
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Applies one inventory intent and records its outcome. Shared with the
/// supply-consumption module, which funnels its draws through the same path.
pub(crate) fn apply_inventory_intent(
    sim: &mut Simulation,
    registry: &ItemRegistry,
    command: &SimCommand,
    command_index: u64,
) -> Result<InventoryOutcome, SimError> {
    let explicit_uid = command
        .params
        .get("action_uid")
        .and_then(Value::as_str)
        .filter(|uid| !uid.is_empty())
        .map(str::to_string);
    let action_uid = explicit_uid.unwrap_or_else(|| command.action_uid(command_index));

    let mut applied_uids = applied_action_uids(sim)?;

    let reason = command
        .params
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let item_id = command
        .params
        .get("item_id")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let quantity_raw = command.params.get("quantity").cloned().unwrap_or(Value::Null);
    let src_container_id = command
        .params
        .get("src_container_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let mut dst_container_id = command
        .params
        .get("dst_container_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut details = Map::new();
    details.insert("reason".to_string(), Value::from(reason.clone()));
    details.insert("item_id".to_string(), Value::from(item_id.clone()));
    details.insert(
        "src_container_id".to_string(),
        src_container_id.as_deref().map(Value::from).unwrap_or(Value::Null),
    );
    details.insert(
        "dst_container_id".to_string(),
        dst_container_id.as_deref().map(Value::from).unwrap_or(Value::Null),
    );
    details.insert("quantity".to_string(), quantity_raw.clone());

    let finish = |sim: &mut Simulation,
                      outcome: InventoryOutcome,
                      details: Map<String, Value>|
     -> Result<InventoryOutcome, SimError> {
        append_inventory_outcome(sim, command.tick, &action_uid, outcome, details)?;
        Ok(outcome)
    };

    if applied_uids.contains(&action_uid) {
        return finish(sim, InventoryOutcome::AlreadyApplied, details);
    }
    if !ALLOWED_REASONS.contains(&reason.as_str()) {
        return finish(sim, InventoryOutcome::UnsupportedReason, details);
    }
    let quantity = match quantity_raw.as_u64() {
        Some(quantity) if quantity > 0 => quantity,
        _ => return finish(sim, InventoryOutcome::InvalidQuantity, details),
    };
    if !registry.contains(&item_id) {
        return finish(sim, InventoryOutcome::UnknownItem, details);
    }

    if reason == "drop" && dst_container_id.is_none() {
        dst_container_id = resolve_drop_container_id(sim, command);
        details.insert(
            "dst_container_id".to_string(),
            dst_container_id.as_deref().map(Value::from).unwrap_or(Value::Null),
        );
        if let Some(container_id) = &dst_container_id {
            if sim.container(container_id).is_none() {
                let location = command
                    .entity_id
                    .as_deref()
                    .and_then(|entity_id| sim.entity_location_ref(entity_id))
                    .map(|location| location.to_value());
                let container = sim.ensure_container(container_id);
                container.location = location;
            }
        }
    }

    let consumes_source = matches!(reason.as_str(), "transfer" | "drop" | "pickup" | "consume");
    let fills_destination = matches!(reason.as_str(), "transfer" | "drop" | "pickup" | "spawn");

    if consumes_source {
        match &src_container_id {
            Some(container_id) if sim.container(container_id).is_some() => {}
            _ => return finish(sim, InventoryOutcome::UnknownContainer, details),
        }
    }
    if fills_destination {
        match &dst_container_id {
            Some(container_id) if sim.container(container_id).is_some() => {}
            _ => return finish(sim, InventoryOutcome::UnknownContainer, details),
        }
    }

    if consumes_source {
        let container_id = src_container_id.clone().unwrap_or_default();
        let debited = sim
            .container_mut(&container_id)
            .map(|container| container.apply_delta(&item_id, -(quantity as i64)))
            .unwrap_or(false);
        if !debited {
            return finish(sim, InventoryOutcome::InsufficientQuantity, details);
        }
    }
    if fills_destination {
        if let Some(container_id) = &dst_container_id {
            if let Some(container) = sim.container_mut(container_id) {
                container.apply_delta(&item_id, quantity as i64);
            }
        }
    }

    applied_uids.insert(action_uid.clone());
    store_applied_action_uids(sim, &applied_uids)?;
    finish(sim, InventoryOutcome::Applied, details)
}

fn applied_action_uids(sim: &Simulation) -> Result<BTreeSet<String>, SimError> {
    let state = sim.get_rules_state(INVENTORY_LEDGER_MODULE);
    let mut uids = BTreeSet::new();
    if let Some(applied) = state.get("applied_action_uids") {
        let entries = applied.as_array().ok_or_else(|| {
            SimError::InvalidArgument("inventory_ledger.applied_action_uids must be a list".to_string())
        })?;
        for entry in entries {
            if let Some(uid) = entry.as_str() {
                uids.insert(uid.to_string());
            }
        }
    }
    Ok(uids)
}

fn store_applied_action_uids(sim: &mut Simulation, uids: &BTreeSet<String>) -> Result<(), SimError> {
    let mut state = sim.get_rules_state(INVENTORY_LEDGER_MODULE);
    state.insert(
        "applied_action_uids".to_string(),
        Value::Array(uids.iter().map(|uid| Value::from(uid.as_str())).collect()),
    );
    sim.set_rules_state(INVENTORY_LEDGER_MODULE, state)
}

/// Deterministic world-drop container for the commanding entity's cell.
fn resolve_drop_container_id(sim: &Simulation, command: &SimCommand) -> Option<String> {
    let entity_id = command.entity_id.as_deref()?;
    let entity = sim.entity(entity_id)?;
    let location = sim.entity_location_ref(entity_id)?;
    if let Some(hex) = location.hex_coord() {
        return Some(format!("world_drop:{}:{}:{}", entity.space_id, hex.q, hex.r));
    }
    let coord_parts: Vec<String> = location
        .coord
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    Some(format!(
        "world_drop:{}:{}:{}",
        entity.space_id,
        location.topology_type,
        coord_parts.join(":")
    ))
}

fn append_inventory_outcome(
    sim: &mut Simulation,
    tick: u64,
    action_uid: &str,
    outcome: InventoryOutcome,
    details: Map<String, Value>,
) -> Result<(), SimError> {
    let mut params = Map::new();
    params.insert("tick".to_string(), Value::from(tick));
    params.insert("action_uid".to_string(), Value::from(action_uid));
    params.insert("outcome".to_string(), Value::from(outcome.as_str()));
    params.insert("details".to_string(), Value::Object(details));
    sim.append_trace_entry(TraceEntry {
        tick,
        event_id: trace_id_from_tag(&format!("inventory:{action_uid}:{}", outcome.as_str())),
        event_type: INVENTORY_OUTCOME_EVENT_TYPE.to_string(),
        params,
        module_hooks_called: false,
    })
}

/// Convenience: a `ContainerState` pre-filled with stacks, for scenario and
/// test setup.
pub fn container_with_items(
    container_id: &str,
    items: impl IntoIterator<Item = (&'static str, u64)>,
) -> ContainerState {
    let mut container = ContainerState::new(container_id);
    for (item_id, quantity) in items {
        container.apply_delta(item_id, quantity as i64);
    }
    container
}
