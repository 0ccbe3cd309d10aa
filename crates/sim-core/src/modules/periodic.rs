//! The periodic scheduler: fixed-interval tasks expressed as ordinary
//! `periodic_tick` events.
//!
//! The serialized pending queue is the single source of truth. On simulation
//! start the module reconstructs task metadata by scanning pending
//! `periodic_tick` events, so a load never duplicates a task's chain.
//! Callbacks are in-memory only and are reattached explicitly after load.

use std::any::Any;
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use contracts::{SimEvent, EVT_PERIODIC_TICK};

use crate::error::SimError;
use crate::rules::RuleModule;
use crate::simulation::Simulation;

pub const PERIODIC_SCHEDULER_NAME: &str = "periodic_scheduler";

pub type PeriodicCallback = Box<dyn FnMut(&mut Simulation, u64) -> Result<(), SimError>>;

pub struct PeriodicScheduler {
    task_intervals: BTreeMap<String, u64>,
    task_start_ticks: BTreeMap<String, u64>,
    registration_order: Vec<String>,
    callbacks: BTreeMap<String, PeriodicCallback>,
    attached: bool,
}

impl std::fmt::Debug for PeriodicScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicScheduler")
            .field("tasks", &self.registration_order)
            .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
            .field("attached", &self.attached)
            .finish()
    }
}

impl Default for PeriodicScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PeriodicScheduler {
    pub fn new() -> Self {
        Self {
            task_intervals: BTreeMap::new(),
            task_start_ticks: BTreeMap::new(),
            registration_order: Vec::new(),
            callbacks: BTreeMap::new(),
            attached: false,
        }
    }

    pub fn task_names(&self) -> &[String] {
        &self.registration_order
    }

    pub fn task_interval(&self, task_name: &str) -> Option<u64> {
        self.task_intervals.get(task_name).copied()
    }

    /// Pre-registration task declaration (before the module is attached to a
    /// simulation). Idempotent when the metadata matches exactly.
    pub fn register_task(
        &mut self,
        task_name: &str,
        interval_ticks: u64,
        start_tick: u64,
    ) -> Result<(), SimError> {
        validate_task_args(task_name, interval_ticks)?;
        if let Some(existing_interval) = self.task_intervals.get(task_name).copied() {
            if existing_interval != interval_ticks {
                return Err(SimError::ConflictingTaskRegistration {
                    task_name: task_name.to_string(),
                    registered_interval: existing_interval,
                    requested_interval: interval_ticks,
                });
            }
            let existing_start = self.task_start_ticks.get(task_name).copied().unwrap_or(0);
            if !self.attached && existing_start != start_tick {
                return Err(SimError::InvalidArgument(format!(
                    "periodic task '{task_name}' already registered with start_tick {existing_start}; got {start_tick}"
                )));
            }
            return Ok(());
        }
        self.insert_task(task_name, interval_ticks, start_tick);
        Ok(())
    }

    /// Post-registration task declaration: records metadata and ensures a
    /// pending `periodic_tick` exists, without ever duplicating a chain.
    pub fn register_task_live(
        &mut self,
        sim: &mut Simulation,
        task_name: &str,
        interval_ticks: u64,
        start_tick: u64,
    ) -> Result<(), SimError> {
        validate_task_args(task_name, interval_ticks)?;
        if let Some(existing_interval) = self.task_intervals.get(task_name).copied() {
            if existing_interval != interval_ticks {
                return Err(SimError::ConflictingTaskRegistration {
                    task_name: task_name.to_string(),
                    registered_interval: existing_interval,
                    requested_interval: interval_ticks,
                });
            }
            return self.schedule_task_if_absent(sim, task_name, interval_ticks, start_tick);
        }
        self.insert_task(task_name, interval_ticks, start_tick);
        self.schedule_task_if_absent(sim, task_name, interval_ticks, start_tick)
    }

    pub fn set_task_callback(
        &mut self,
        task_name: &str,
        callback: PeriodicCallback,
    ) -> Result<(), SimError> {
        if !self.task_intervals.contains_key(task_name) {
            return Err(SimError::InvalidArgument(format!(
                "cannot set callback for unknown periodic task: {task_name}"
            )));
        }
        self.callbacks.insert(task_name.to_string(), callback);
        Ok(())
    }

    fn insert_task(&mut self, task_name: &str, interval_ticks: u64, start_tick: u64) {
        self.task_intervals.insert(task_name.to_string(), interval_ticks);
        self.task_start_ticks.insert(task_name.to_string(), start_tick);
        self.registration_order.push(task_name.to_string());
    }

    fn schedule_task_if_absent(
        &self,
        sim: &mut Simulation,
        task_name: &str,
        interval_ticks: u64,
        start_tick: u64,
    ) -> Result<(), SimError> {
        for event in sim.pending_events() {
            if event.event_type != EVT_PERIODIC_TICK {
                continue;
            }
            let (pending_task, pending_interval) = task_params(&event)?;
            if pending_task == task_name {
                if pending_interval != interval_ticks {
                    return Err(SimError::ConflictingTaskRegistration {
                        task_name: task_name.to_string(),
                        registered_interval: pending_interval,
                        requested_interval: interval_ticks,
                    });
                }
                return Ok(());
            }
        }
        let fire_tick = start_tick.max(sim.tick());
        sim.schedule_event(fire_tick, EVT_PERIODIC_TICK, task_event_params(task_name, interval_ticks))?;
        Ok(())
    }
}

impl RuleModule for PeriodicScheduler {
    fn name(&self) -> &str {
        PERIODIC_SCHEDULER_NAME
    }

    fn on_simulation_start(&mut self, sim: &mut Simulation) -> Result<(), SimError> {
        self.attached = true;

        // The queue is authoritative: adopt task metadata from pending
        // periodic events before scheduling anything new.
        let mut pending: Vec<(u64, String, u64)> = Vec::new();
        for event in sim.pending_events() {
            if event.event_type != EVT_PERIODIC_TICK {
                continue;
            }
            let (task_name, interval_ticks) = task_params(&event)?;
            pending.push((event.tick, task_name, interval_ticks));
        }
        pending.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        for (event_tick, task_name, interval_ticks) in pending {
            match self.task_intervals.get(&task_name).copied() {
                Some(existing) if existing != interval_ticks => {
                    return Err(SimError::ConflictingTaskRegistration {
                        task_name,
                        registered_interval: existing,
                        requested_interval: interval_ticks,
                    });
                }
                Some(_) => {}
                None => self.insert_task(&task_name, interval_ticks, event_tick),
            }
        }

        for task_name in self.registration_order.clone() {
            let Some(interval_ticks) = self.task_intervals.get(&task_name).copied() else {
                continue;
            };
            let start_tick = self.task_start_ticks.get(&task_name).copied().unwrap_or(0);
            self.schedule_task_if_absent(sim, &task_name, interval_ticks, start_tick)?;
        }
        Ok(())
    }

    fn on_event_executed(&mut self, sim: &mut Simulation, event: &SimEvent) -> Result<(), SimError> {
        if event.event_type != EVT_PERIODIC_TICK {
            return Ok(());
        }
        let (task_name, interval_ticks) = task_params(event)?;
        if !self.task_intervals.contains_key(&task_name) {
            self.insert_task(&task_name, interval_ticks, event.tick);
        }

        if let Some(callback) = self.callbacks.get_mut(&task_name) {
            callback(sim, event.tick)?;
        }

        sim.schedule_event(
            event.tick + interval_ticks,
            EVT_PERIODIC_TICK,
            task_event_params(&task_name, interval_ticks),
        )?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn validate_task_args(task_name: &str, interval_ticks: u64) -> Result<(), SimError> {
    if task_name.is_empty() {
        return Err(SimError::InvalidArgument(
            "task_name must be a non-empty string".to_string(),
        ));
    }
    if interval_ticks == 0 {
        return Err(SimError::InvalidArgument(
            "interval_ticks must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

fn task_event_params(task_name: &str, interval_ticks: u64) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("task".to_string(), Value::from(task_name));
    params.insert("interval".to_string(), Value::from(interval_ticks));
    params
}

fn task_params(event: &SimEvent) -> Result<(String, u64), SimError> {
    let task_name = event
        .param_str("task")
        .filter(|task| !task.is_empty())
        .ok_or_else(|| SimError::InvalidEvent("periodic_tick event missing task".to_string()))?;
    let interval_ticks = event
        .param_u64("interval")
        .filter(|interval| *interval > 0)
        .ok_or_else(|| SimError::InvalidEvent("periodic_tick interval must be positive".to_string()))?;
    Ok((task_name.to_string(), interval_ticks))
}
