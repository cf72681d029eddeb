//! Schema module - Configuration and data-model types for design optimization.

mod config;
mod evolution;
pub(crate) mod float;
mod objective;
mod parameter;
mod simulation;

pub use config::*;
pub use evolution::*;
pub use objective::*;
pub use parameter::*;
pub use simulation::*;
