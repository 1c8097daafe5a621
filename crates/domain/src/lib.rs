pub mod entities;
pub mod process;
pub mod reports;
pub mod repositories;
pub mod state_machine;
pub mod value_objects;
pub mod work_map;

pub use entities::*;
pub use process::*;
pub use reports::*;
pub use repositories::*;
pub use state_machine::*;
pub use value_objects::*;
pub use work_map::{WorkMap, WorkMapState};
pub use orchestrator_core::{OrchestratorError, OrchestratorResult};
