//! Evolutionary optimization of daylighting designs.
//!
//! # Overview
//!
//! - **Genetic operators** (`genome`): step snapping, random initialization,
//!   crossover and mutation over a parameter space
//! - **Fitness cache** (`cache`): memoized results keyed by parameter vector
//! - **Evaluation** (`fitness`): the [`FitnessFunction`] contract and the
//!   [`FitnessEvaluator`] that scores, caches and absorbs failures
//! - **Genetic algorithm** (`search`): single-objective generational search
//! - **NSGA-II** (`nsga2`): multi-objective Pareto search
//! - **Checkpoints** (`checkpoint`): per-generation state on disk
//!
//! # Example
//!
//! ```rust,no_run
//! use daylight_optimizer::compute::evolution::{GeneticAlgorithm, fitness_fn};
//! use daylight_optimizer::schema::{Metrics, OptimizerConfig, ParamVector};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let function = fitness_fn(|params: ParamVector| async move {
//!     let depth = params["louver_depth"].as_f64().unwrap_or_default();
//!     let metrics: Metrics = [("sda".to_string(), 60.0 - 10.0 * depth)].into_iter().collect();
//!     Ok(metrics)
//! });
//!
//! let mut engine = GeneticAlgorithm::new(OptimizerConfig::default())?;
//! let result = engine
//!     .run(&function, |progress| {
//!         println!("Generation {}: best = {:.1}", progress.generation, progress.best_fitness);
//!     })
//!     .await?;
//! println!("Best: {:?}", result.best.map(|b| b.params));
//! # Ok(())
//! # }
//! ```

mod cache;
mod checkpoint;
mod fitness;
mod genome;
mod nsga2;
mod search;

pub use cache::{CacheEntry, CacheKey, FitnessCache};
pub use checkpoint::CheckpointStore;
pub use fitness::{
    CancelToken, Evaluation, EvaluationError, FitnessEvaluator, FitnessFunction, FnFitness,
    OptimizerError, Scorer, fitness_fn,
};
pub use genome::{GenomeRng, parameter_distance, snap_to_step};
pub use nsga2::{
    Nsga2Optimizer, binary_tournament, calculate_crowding_distance, dominates,
    fast_non_dominated_sort, select_survivors,
};
pub use search::GeneticAlgorithm;
