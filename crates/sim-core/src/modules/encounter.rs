//! Encounter checks: a periodic, content-free probe that downstream
//! encounter-selection tooling consumes.

use std::any::Any;

use serde_json::{Map, Value};

use contracts::SimEvent;

use crate::error::SimError;
use crate::rules::RuleModule;
use crate::simulation::Simulation;

pub const ENCOUNTER_CHECK_MODULE: &str = "encounter_check";
pub const ENCOUNTER_CHECK_EVENT_TYPE: &str = "encounter_check";
pub const ENCOUNTER_CHECK_INTERVAL: u64 = 10;
pub const ENCOUNTER_CONTEXT_GLOBAL: &str = "global";

const TASK_NAME: &str = "encounter_check:global";
const RNG_STREAM_NAME: &str = "encounter_check";
const STATE_LAST_CHECK_TICK: &str = "last_check_tick";
const STATE_CHECKS_EMITTED: &str = "checks_emitted";

#[derive(Debug, Default)]
pub struct EncounterCheckModule;

impl EncounterCheckModule {
    pub fn new() -> Self {
        Self
    }

    fn normalized_state(sim: &Simulation) -> Result<Map<String, Value>, SimError> {
        let existing = sim.get_rules_state(ENCOUNTER_CHECK_MODULE);
        let last_check_tick = existing
            .get(STATE_LAST_CHECK_TICK)
            .and_then(Value::as_i64)
            .unwrap_or(-1);
        let checks_emitted = existing
            .get(STATE_CHECKS_EMITTED)
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if checks_emitted < 0 {
            return Err(SimError::InvalidArgument(
                "encounter_check.checks_emitted must be non-negative".to_string(),
            ));
        }
        let mut state = Map::new();
        state.insert(STATE_LAST_CHECK_TICK.to_string(), Value::from(last_check_tick));
        state.insert(STATE_CHECKS_EMITTED.to_string(), Value::from(checks_emitted));
        Ok(state)
    }
}

impl RuleModule for EncounterCheckModule {
    fn name(&self) -> &str {
        ENCOUNTER_CHECK_MODULE
    }

    fn on_simulation_start(&mut self, sim: &mut Simulation) -> Result<(), SimError> {
        let state = Self::normalized_state(sim)?;
        sim.set_rules_state(ENCOUNTER_CHECK_MODULE, state)?;

        sim.register_periodic_task(TASK_NAME, ENCOUNTER_CHECK_INTERVAL, 0)?;
        sim.set_periodic_task_callback(
            TASK_NAME,
            Box::new(|sim, tick| {
                let mut params = Map::new();
                params.insert("tick".to_string(), Value::from(tick));
                params.insert("context".to_string(), Value::from(ENCOUNTER_CONTEXT_GLOBAL));
                // Next tick, so the check never starves same-tick drains.
                sim.schedule_event(tick + 1, ENCOUNTER_CHECK_EVENT_TYPE, params)?;
                Ok(())
            }),
        )
    }

    fn on_event_executed(&mut self, sim: &mut Simulation, event: &SimEvent) -> Result<(), SimError> {
        if event.event_type != ENCOUNTER_CHECK_EVENT_TYPE {
            return Ok(());
        }

        let check_tick = event
            .params
            .get("tick")
            .and_then(Value::as_u64)
            .unwrap_or(event.tick);

        // Stream continuity: one draw per check keeps the encounter stream
        // position in lockstep with the check count across save/load.
        sim.rng_stream(RNG_STREAM_NAME).next_f64();

        let mut state = Self::normalized_state(sim)?;
        let checks_emitted = state
            .get(STATE_CHECKS_EMITTED)
            .and_then(Value::as_i64)
            .unwrap_or(0);
        state.insert(STATE_LAST_CHECK_TICK.to_string(), Value::from(check_tick));
        state.insert(STATE_CHECKS_EMITTED.to_string(), Value::from(checks_emitted + 1));
        sim.set_rules_state(ENCOUNTER_CHECK_MODULE, state)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
