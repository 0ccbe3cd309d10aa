//! The rule-module seam.
//!
//! Rule modules are ephemeral behavior: they may keep configuration in
//! memory, but every fact that must survive a save, restart, or replay lives
//! in the rules-state store or in queued events. Modules act on the world
//! only through `append_command`, `schedule_event`, `set_rules_state`, and
//! the entity/world accessors the simulation exposes; randomness only through
//! `rng_stream`.

use std::any::Any;

use contracts::{SimCommand, SimEvent};

use crate::error::SimError;
use crate::simulation::Simulation;

pub trait RuleModule: Any {
    fn name(&self) -> &str;

    /// Called once, immediately when the module is registered.
    fn on_simulation_start(&mut self, _sim: &mut Simulation) -> Result<(), SimError> {
        Ok(())
    }

    /// Called at the start of each authoritative tick.
    fn on_tick_start(&mut self, _sim: &mut Simulation, _tick: u64) -> Result<(), SimError> {
        Ok(())
    }

    /// Called for each command at its scheduled tick, in registration order,
    /// until some module returns `true` to mark the command consumed.
    fn on_command(
        &mut self,
        _sim: &mut Simulation,
        _command: &SimCommand,
        _command_index: u64,
    ) -> Result<bool, SimError> {
        Ok(false)
    }

    /// Called after each event executes on its scheduled tick.
    fn on_event_executed(&mut self, _sim: &mut Simulation, _event: &SimEvent) -> Result<(), SimError> {
        Ok(())
    }

    /// Called at the end of each authoritative tick.
    fn on_tick_end(&mut self, _sim: &mut Simulation, _tick: u64) -> Result<(), SimError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Registry slot. The module is taken out of its slot for the duration of a
/// hook so the hook can receive `&mut Simulation` without aliasing.
pub(crate) struct ModuleSlot {
    pub(crate) name: String,
    pub(crate) module: Option<Box<dyn RuleModule>>,
}

impl std::fmt::Debug for ModuleSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSlot")
            .field("name", &self.name)
            .field("taken", &self.module.is_none())
            .finish()
    }
}
