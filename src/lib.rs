//! Daylight optimizer - Generative design search for daylighting performance.
//!
//! This crate searches a space of shading-design parameters (louver depth,
//! spacing, glazing options and the like) for designs that perform well in an
//! external daylight simulation. A single objective such as spatial daylight
//! autonomy is optimized with a generational genetic algorithm; competing
//! objectives such as daylight versus glare are traded off with NSGA-II.
//!
//! # Architecture
//!
//! - `schema`: Configuration, parameter space and result types
//! - `compute::evolution`: Genetic operators, fitness cache, both optimizers
//! - `compute::pipeline`: Simulation-backed fitness evaluation
//! - `compute::analysis`: Range suggestions and sensitivity over cached results
//!
//! # Example
//!
//! ```rust,no_run
//! use daylight_optimizer::{
//!     compute::{analysis::ResultAnalyzer, evolution::GeneticAlgorithm, pipeline::SimulationPipeline},
//!     schema::{OptimizerConfig, SimulationConfig},
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = SimulationPipeline::local(SimulationConfig::default());
//! let mut engine = GeneticAlgorithm::new(OptimizerConfig::default())?;
//!
//! let result = engine.run(&pipeline, |_| {}).await?;
//! if let Some(best) = result.best {
//!     println!("Best sDA: {:?}", best.metric("sda"));
//! }
//!
//! let analyzer = ResultAnalyzer::from_cache(engine.cache());
//! println!("{} designs evaluated", analyzer.len());
//! # Ok(())
//! # }
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::evolution::{FitnessCache, GeneticAlgorithm, Nsga2Optimizer, OptimizerError};
pub use schema::{OptimizerConfig, ParamVector, ParameterConstraint, SimulationConfig};
