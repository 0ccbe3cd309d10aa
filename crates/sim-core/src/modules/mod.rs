//! Built-in and reference rule modules.

pub mod encounter;
pub mod inventory;
pub mod periodic;
pub mod signals;
pub mod stats;
pub mod supplies;
pub mod wounds;

pub use encounter::EncounterCheckModule;
pub use inventory::InventoryLedgerModule;
pub use periodic::{PeriodicCallback, PeriodicScheduler, PERIODIC_SCHEDULER_NAME};
pub use signals::SignalPropagationModule;
pub use stats::EntityStatsModule;
pub use supplies::SupplyConsumptionModule;
pub use wounds::WoundLedgerModule;
