//! Configuration types for an optimization run.

use serde::{Deserialize, Serialize};

use super::{ConstraintParseError, MetricConstraint, Objective, ParameterConstraint};

/// Top-level configuration for a generative-design optimization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Tunable design variables.
    pub parameters: Vec<ParameterConstraint>,
    /// Objectives. Exactly one for the genetic algorithm, two or more for NSGA-II.
    pub objectives: Vec<Objective>,
    /// Search algorithm to use.
    #[serde(default)]
    pub algorithm: SearchAlgorithm,
    /// Population and generation settings.
    #[serde(default)]
    pub population: PopulationConfig,
    /// Evaluation settings (concurrency).
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    /// Optional inequality on one metric, e.g. `"ase <= 10"`.
    /// Designs violating it receive worst-case fitness.
    #[serde(default)]
    pub constraint: Option<String>,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            parameters: vec![
                ParameterConstraint::continuous("louver_depth", 0.1, 1.0, 0.05),
                ParameterConstraint::continuous("louver_spacing", 0.2, 1.5, 0.1),
            ],
            objectives: vec![Objective::maximize("sda").with_unit("%")],
            algorithm: SearchAlgorithm::default(),
            population: PopulationConfig::default(),
            evaluation: EvaluationConfig::default(),
            constraint: None,
            random_seed: None,
        }
    }
}

/// Search algorithm selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SearchAlgorithm {
    /// Single-objective generational genetic algorithm.
    GeneticAlgorithm(GeneticAlgorithmConfig),
    /// NSGA-II multi-objective Pareto search.
    Nsga2(Nsga2Config),
}

impl Default for SearchAlgorithm {
    fn default() -> Self {
        Self::GeneticAlgorithm(GeneticAlgorithmConfig::default())
    }
}

/// Genetic Algorithm configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticAlgorithmConfig {
    /// Tournament size for parent selection.
    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,
    /// Crossover probability (0.0-1.0).
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    /// Mutation probability per parameter (0.0-1.0).
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Elitism: number of best individuals carried over unchanged.
    #[serde(default = "default_elitism")]
    pub elitism: usize,
}

impl Default for GeneticAlgorithmConfig {
    fn default() -> Self {
        Self {
            tournament_size: default_tournament_size(),
            crossover_rate: default_crossover_rate(),
            mutation_rate: default_mutation_rate(),
            elitism: default_elitism(),
        }
    }
}

fn default_tournament_size() -> usize {
    3
}
fn default_crossover_rate() -> f64 {
    0.8
}
fn default_mutation_rate() -> f64 {
    0.1
}
fn default_elitism() -> usize {
    1
}

/// NSGA-II configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nsga2Config {
    /// Mutation probability per parameter (0.0-1.0).
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
}

impl Default for Nsga2Config {
    fn default() -> Self {
        Self {
            mutation_rate: default_mutation_rate(),
        }
    }
}

/// Population and generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Number of individuals in population.
    #[serde(default = "default_population_size")]
    pub size: usize,
    /// Maximum number of generations.
    #[serde(default = "default_max_generations")]
    pub max_generations: usize,
    /// Target fitness to stop early (genetic algorithm only).
    #[serde(default)]
    pub target_fitness: Option<f64>,
    /// Stagnation limit: stop if no improvement for N generations
    /// (genetic algorithm only).
    #[serde(default)]
    pub stagnation_limit: Option<usize>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: default_population_size(),
            max_generations: default_max_generations(),
            target_fitness: None,
            stagnation_limit: None,
        }
    }
}

fn default_population_size() -> usize {
    12
}
fn default_max_generations() -> usize {
    10
}

/// Evaluation settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvaluationConfig {
    /// Maximum simultaneous evaluations (0 = cpu count - 1, at least 1).
    /// Set to 1 to queue evaluations strictly one after another.
    #[serde(default)]
    pub max_concurrent: usize,
}

impl EvaluationConfig {
    /// Resolved concurrency bound.
    pub fn concurrency(&self) -> usize {
        if self.max_concurrent == 0 {
            num_cpus::get().saturating_sub(1).max(1)
        } else {
            self.max_concurrent
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No parameters specified")]
    NoParameters,
    #[error("No objectives specified")]
    NoObjectives,
    #[error("Genetic algorithm requires exactly one objective, got {0}")]
    SingleObjectiveRequired(usize),
    #[error("NSGA-II requires at least two objectives, got {0}")]
    MultipleObjectivesRequired(usize),
    #[error("Duplicate parameter name: {0}")]
    DuplicateParameter(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Population size must be at least 2")]
    PopulationTooSmall,
    #[error("Invalid rate {name}: {value} (expected 0.0-1.0)")]
    InvalidRate { name: &'static str, value: f64 },
    #[error("Tournament size must be at least 1")]
    InvalidTournamentSize,
    #[error("Configuration selects a different search algorithm than {0}")]
    AlgorithmMismatch(&'static str),
    #[error("Malformed constraint expression: {0}")]
    Constraint(#[from] ConstraintParseError),
}

impl OptimizerConfig {
    /// Validate the configuration, independent of algorithm.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parameters.is_empty() {
            return Err(ConfigError::NoParameters);
        }
        if self.objectives.is_empty() {
            return Err(ConfigError::NoObjectives);
        }

        let mut seen = std::collections::BTreeSet::new();
        for parameter in &self.parameters {
            parameter.validate().map_err(ConfigError::InvalidParameter)?;
            if !seen.insert(parameter.name()) {
                return Err(ConfigError::DuplicateParameter(parameter.name().to_string()));
            }
        }

        if self.population.size < 2 {
            return Err(ConfigError::PopulationTooSmall);
        }

        let check_rate = |name: &'static str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::InvalidRate { name, value })
            }
        };

        match &self.algorithm {
            SearchAlgorithm::GeneticAlgorithm(ga) => {
                if self.objectives.len() != 1 {
                    return Err(ConfigError::SingleObjectiveRequired(self.objectives.len()));
                }
                if ga.tournament_size == 0 {
                    return Err(ConfigError::InvalidTournamentSize);
                }
                check_rate("crossover_rate", ga.crossover_rate)?;
                check_rate("mutation_rate", ga.mutation_rate)?;
            }
            SearchAlgorithm::Nsga2(nsga) => {
                if self.objectives.len() < 2 {
                    return Err(ConfigError::MultipleObjectivesRequired(
                        self.objectives.len(),
                    ));
                }
                check_rate("mutation_rate", nsga.mutation_rate)?;
            }
        }

        self.parsed_constraint()?;
        Ok(())
    }

    /// Parse the optional constraint expression.
    pub fn parsed_constraint(&self) -> Result<Option<MetricConstraint>, ConfigError> {
        self.constraint
            .as_deref()
            .map(MetricConstraint::parse)
            .transpose()
            .map_err(ConfigError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nsga_config() -> OptimizerConfig {
        OptimizerConfig {
            objectives: vec![Objective::maximize("sda"), Objective::minimize("ase")],
            algorithm: SearchAlgorithm::Nsga2(Nsga2Config::default()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_valid() {
        assert!(OptimizerConfig::default().validate().is_ok());
        assert!(nsga_config().validate().is_ok());
    }

    #[test]
    fn test_objective_counts() {
        let mut config = OptimizerConfig::default();
        config.objectives.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoObjectives)));

        config.objectives = nsga_config().objectives;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SingleObjectiveRequired(2))
        ));

        let mut config = nsga_config();
        config.objectives.truncate(1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MultipleObjectivesRequired(1))
        ));
    }

    #[test]
    fn test_parameter_errors() {
        let mut config = OptimizerConfig::default();
        config.parameters.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoParameters)));

        config.parameters = vec![
            ParameterConstraint::continuous("x", 0.0, 1.0, 0.0),
            ParameterConstraint::continuous("x", 0.0, 2.0, 0.0),
        ];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateParameter(_))
        ));

        config.parameters = vec![ParameterConstraint::continuous("x", 3.0, 1.0, 0.0)];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_malformed_constraint_is_fatal() {
        let config = OptimizerConfig {
            constraint: Some("sda about 50".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Constraint(_))));

        let config = OptimizerConfig {
            constraint: Some("ase <= 10".to_string()),
            ..Default::default()
        };
        assert!(config.parsed_constraint().unwrap().is_some());
    }

    #[test]
    fn test_concurrency_resolution() {
        assert!(EvaluationConfig::default().concurrency() >= 1);
        assert_eq!(EvaluationConfig { max_concurrent: 3 }.concurrency(), 3);
    }

    #[test]
    fn test_serialization() {
        let config = nsga_config();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: OptimizerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.population.size, config.population.size);
        assert!(matches!(parsed.algorithm, SearchAlgorithm::Nsga2(_)));
    }
}
