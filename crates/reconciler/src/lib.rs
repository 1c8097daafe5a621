pub mod capacity;
pub mod completion;
pub mod driver;
pub mod engine;
pub mod inventory;
pub mod pruning;
pub mod resources;
pub mod services;

pub use capacity::{assess_capacity, is_excess_capacity, CapacityAssessment};
pub use engine::{PassSource, ReconciliationEngine};
pub use pruning::{PruneStats, Pruner, PruningSweep};
