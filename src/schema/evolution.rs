//! Population, checkpoint, progress and result types shared by both optimizers.

use serde::{Deserialize, Serialize};

use super::{Metrics, Objective, ParamVector};

fn neg_infinity() -> f64 {
    f64::NEG_INFINITY
}

/// One candidate design: a parameter vector plus its evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    /// Parameter vector.
    pub params: ParamVector,
    /// Raw metrics; absent until evaluated, and for failed evaluations.
    #[serde(default)]
    pub metrics: Option<Metrics>,
    /// Signed scalar fitness of the primary objective (higher is better).
    /// Negative infinity marks an invalid design.
    #[serde(with = "super::float", default = "neg_infinity")]
    pub fitness: f64,
    /// Non-domination rank (1 = Pareto front). NSGA-II only.
    #[serde(default)]
    pub rank: usize,
    /// Crowding distance within its front (higher is better). NSGA-II only.
    #[serde(with = "super::float", default)]
    pub crowding_distance: f64,
    /// The evaluation itself failed (process, I/O or parse error).
    #[serde(default)]
    pub failed: bool,
    /// Generation this individual was created in.
    #[serde(default)]
    pub generation: usize,
}

impl Individual {
    /// Create an unevaluated individual.
    pub fn new(params: ParamVector, generation: usize) -> Self {
        Self {
            params,
            metrics: None,
            fitness: f64::NEG_INFINITY,
            rank: 0,
            crowding_distance: 0.0,
            failed: false,
            generation,
        }
    }

    /// Whether the design evaluated successfully and satisfied the constraint.
    pub fn is_valid(&self) -> bool {
        self.metrics.is_some() && self.fitness.is_finite()
    }

    /// Raw objective values. Invalid designs get the worst value of every
    /// objective so they are dominated by any valid design.
    pub fn objective_values(&self, objectives: &[Objective]) -> Vec<f64> {
        match &self.metrics {
            Some(metrics) if self.fitness.is_finite() => {
                objectives.iter().map(|o| o.value_of(metrics)).collect()
            }
            _ => objectives.iter().map(|o| o.goal.worst_value()).collect(),
        }
    }

    /// Value of a single metric, if evaluated.
    pub fn metric(&self, id: &str) -> Option<f64> {
        self.metrics.as_ref().and_then(|m| m.get(id).copied())
    }
}

/// Serializable checkpoint of an optimizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    /// Number of completed generations.
    pub current_generation: usize,
    /// Current population.
    pub population: Vec<Individual>,
    /// Current Pareto front (NSGA-II).
    #[serde(default)]
    pub pareto_front: Vec<Individual>,
    /// Best individual found so far (genetic algorithm).
    #[serde(default)]
    pub best: Option<Individual>,
}

/// Lifecycle of an optimizer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OptimizerPhase {
    /// Constructed, nothing evaluated yet.
    #[default]
    Uninitialized,
    /// Creating and evaluating the initial population.
    Initializing,
    /// Evolving; the value is the generation in progress.
    Running(usize),
    /// Finished normally.
    Completed,
    /// Stopped by a cancellation request.
    Cancelled,
}

/// Running counters of the evaluation layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct EvaluationStats {
    /// Evaluations actually dispatched to the fitness function.
    pub evaluations: u64,
    /// Dispatched evaluations that failed.
    pub failures: u64,
    /// Individuals served from the fitness cache.
    pub cache_hits: u64,
    /// Successful evaluations that violated the metric constraint.
    pub constraint_violations: u64,
}

/// Per-generation progress of the genetic algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProgress {
    /// Completed generations.
    pub generation: usize,
    /// Total generations planned.
    pub total_generations: usize,
    /// Best fitness seen so far.
    #[serde(with = "super::float")]
    pub best_fitness: f64,
    /// Average fitness of valid individuals in the current population.
    #[serde(with = "super::float")]
    pub avg_fitness: f64,
    /// Generations since last improvement.
    pub stagnation_count: usize,
    /// Best individual so far.
    pub best: Option<Individual>,
    /// Evaluation counters.
    pub stats: EvaluationStats,
}

/// Per-generation progress of NSGA-II.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParetoProgress {
    /// Completed generations.
    pub generation: usize,
    /// Total generations planned.
    pub total_generations: usize,
    /// Current Pareto front.
    pub front: Vec<Individual>,
    /// Evaluation counters.
    pub stats: EvaluationStats,
}

/// Evolution history for plotting.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvolutionHistory {
    /// Best fitness so far, per generation.
    #[serde(with = "super::float::seq")]
    pub best_fitness: Vec<f64>,
    /// Average valid fitness per generation.
    #[serde(with = "super::float::seq")]
    pub avg_fitness: Vec<f64>,
    /// Standard deviation of valid fitness per generation.
    #[serde(with = "super::float::seq")]
    pub fitness_std: Vec<f64>,
    /// Mean normalized parameter distance per generation.
    pub diversity: Vec<f64>,
}

/// Reason a run stopped normally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Reached maximum generations.
    MaxGenerations,
    /// Reached target fitness.
    TargetReached,
    /// Stagnation limit hit.
    Stagnation,
}

/// Statistics from a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    /// Total generations run.
    pub generations: usize,
    /// Evaluation counters.
    pub evaluations: EvaluationStats,
    /// Time taken (in seconds).
    pub elapsed_seconds: f64,
    /// Reason for stopping.
    pub stop_reason: StopReason,
}

/// Final result of a genetic algorithm run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Best valid individual, if any design evaluated successfully.
    pub best: Option<Individual>,
    /// Final population.
    pub population: Vec<Individual>,
    /// Statistics from the run.
    pub stats: RunStats,
    /// Full history for analysis.
    pub history: EvolutionHistory,
}

/// Final result of an NSGA-II run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParetoResult {
    /// Non-dominated individuals of the final population.
    pub front: Vec<Individual>,
    /// Final population.
    pub population: Vec<Individual>,
    /// Statistics from the run.
    pub stats: RunStats,
}
