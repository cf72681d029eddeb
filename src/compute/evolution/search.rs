//! Single-objective generational genetic algorithm.

use std::cmp::Ordering;
use std::time::Instant;

use log::info;

use crate::schema::{
    ConfigError, EvaluationStats, EvolutionHistory, GeneticAlgorithmConfig, Individual,
    OptimizerConfig, OptimizerPhase, OptimizerState, RunStats, SearchAlgorithm, SearchProgress,
    SearchResult, StopReason,
};

use super::cache::FitnessCache;
use super::fitness::{CancelToken, FitnessEvaluator, FitnessFunction, OptimizerError, Scorer};
use super::genome::{GenomeRng, parameter_distance};

/// Descending fitness order; invalid designs sort last.
fn by_fitness_desc(a: &Individual, b: &Individual) -> Ordering {
    b.fitness.total_cmp(&a.fitness)
}

/// Genetic algorithm over one scalar objective.
pub struct GeneticAlgorithm {
    config: OptimizerConfig,
    ga: GeneticAlgorithmConfig,
    rng: GenomeRng,
    evaluator: FitnessEvaluator,
    population: Vec<Individual>,
    history: EvolutionHistory,
    generation: usize,
    best: Option<Individual>,
    stagnation_count: usize,
    phase: OptimizerPhase,
    cancel: CancelToken,
}

impl GeneticAlgorithm {
    /// Create a new engine. Fails if the configuration is invalid or selects
    /// another algorithm.
    pub fn new(config: OptimizerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let ga = match &config.algorithm {
            SearchAlgorithm::GeneticAlgorithm(ga) => ga.clone(),
            SearchAlgorithm::Nsga2(_) => {
                return Err(ConfigError::AlgorithmMismatch("the genetic algorithm"));
            }
        };

        let seed = config.random_seed.unwrap_or_else(rand::random);
        let scorer = Scorer::new(config.objectives.clone(), config.parsed_constraint()?);
        let evaluator = FitnessEvaluator::new(scorer, config.evaluation.concurrency());

        Ok(Self {
            config,
            ga,
            rng: GenomeRng::new(seed),
            evaluator,
            population: Vec::new(),
            history: EvolutionHistory::default(),
            generation: 0,
            best: None,
            stagnation_count: 0,
            phase: OptimizerPhase::Uninitialized,
            cancel: CancelToken::new(),
        })
    }

    /// Reuse results from an earlier session.
    pub fn with_cache(mut self, cache: FitnessCache) -> Self {
        self.evaluator = self.evaluator.with_cache(cache);
        self
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request cooperative cancellation.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn phase(&self) -> OptimizerPhase {
        self.phase
    }

    pub fn cache(&self) -> &FitnessCache {
        self.evaluator.cache()
    }

    pub fn stats(&self) -> EvaluationStats {
        self.evaluator.stats()
    }

    pub fn population(&self) -> &[Individual] {
        &self.population
    }

    /// Snapshot of the run for pause/resume.
    pub fn get_state(&self) -> OptimizerState {
        OptimizerState {
            current_generation: self.generation,
            population: self.population.clone(),
            pareto_front: Vec::new(),
            best: self.best.clone(),
        }
    }

    /// Restore a snapshot taken by [`GeneticAlgorithm::get_state`].
    ///
    /// History and stagnation tracking restart from the restored point.
    pub fn load_state(&mut self, state: OptimizerState) {
        self.generation = state.current_generation;
        self.population = state.population;
        self.best = state.best;
        self.stagnation_count = 0;
        self.history = EvolutionHistory::default();
        self.phase = if self.population.is_empty() {
            OptimizerPhase::Uninitialized
        } else {
            OptimizerPhase::Running(self.generation)
        };
    }

    fn initialize(&mut self) {
        self.generation = 0;
        self.population = (0..self.config.population.size)
            .map(|_| Individual::new(self.rng.random_params(&self.config.parameters), 0))
            .collect();
    }

    fn check_cancelled(&mut self) -> Result<(), OptimizerError> {
        if self.cancel.is_cancelled() {
            self.phase = OptimizerPhase::Cancelled;
            info!("Genetic algorithm cancelled at generation {}", self.generation);
            return Err(OptimizerError::Cancelled);
        }
        Ok(())
    }

    /// Evaluate a candidate population. On cancellation the batch is
    /// discarded so the committed state stays consistent.
    async fn evaluate<F>(
        &mut self,
        function: &F,
        mut candidates: Vec<Individual>,
    ) -> Result<Vec<Individual>, OptimizerError>
    where
        F: FitnessFunction + ?Sized,
    {
        let cancel = self.cancel.clone();
        self.evaluator
            .evaluate_individuals(function, &mut candidates, &cancel)
            .await;
        self.check_cancelled()?;
        Ok(candidates)
    }

    /// Pick a parent index by tournament.
    fn tournament(&mut self) -> usize {
        let mut best_idx = self.rng.index(self.population.len());
        for _ in 1..self.ga.tournament_size {
            let idx = self.rng.index(self.population.len());
            if self.population[idx].fitness > self.population[best_idx].fitness {
                best_idx = idx;
            }
        }
        best_idx
    }

    /// Produce the next generation's (unevaluated) population.
    fn breed(&mut self) -> Vec<Individual> {
        let size = self.config.population.size;
        let next_generation = self.generation + 1;

        self.population.sort_by(by_fitness_desc);

        let mut next: Vec<Individual> = self
            .population
            .iter()
            .take(self.ga.elitism.min(size))
            .cloned()
            .collect();

        while next.len() < size {
            let idx1 = self.tournament();
            let idx2 = self.tournament();

            let mut child = if self.rng.chance(self.ga.crossover_rate) {
                self.rng.crossover(
                    &self.population[idx1].params,
                    &self.population[idx2].params,
                    &self.config.parameters,
                )
            } else {
                self.population[idx1].params.clone()
            };
            self.rng
                .mutate(&mut child, self.ga.mutation_rate, &self.config.parameters);

            next.push(Individual::new(child, next_generation));
        }

        next
    }

    /// Update best individual, stagnation and history after an evaluation.
    fn record_generation(&mut self) {
        let generation_best = self
            .population
            .iter()
            .filter(|ind| ind.is_valid())
            .max_by(|a, b| a.fitness.total_cmp(&b.fitness));

        let improved = match (generation_best, &self.best) {
            (Some(candidate), Some(best)) => candidate.fitness > best.fitness,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if improved {
            self.best = generation_best.cloned();
            self.stagnation_count = 0;
        } else if self.generation > 0 {
            self.stagnation_count += 1;
        }

        let valid: Vec<f64> = self
            .population
            .iter()
            .filter(|ind| ind.is_valid())
            .map(|ind| ind.fitness)
            .collect();
        let (avg, std) = mean_and_std(&valid);
        let best = self.best_fitness();
        let diversity = self.compute_diversity();

        self.history.best_fitness.push(best);
        self.history.avg_fitness.push(avg);
        self.history.fitness_std.push(std);
        self.history.diversity.push(diversity);
    }

    fn best_fitness(&self) -> f64 {
        self.best
            .as_ref()
            .map(|b| b.fitness)
            .unwrap_or(f64::NEG_INFINITY)
    }

    /// Mean pairwise parameter distance.
    fn compute_diversity(&self) -> f64 {
        let n = self.population.len();
        if n < 2 {
            return 0.0;
        }

        let mut total = 0.0;
        let mut count = 0usize;
        for i in 0..n {
            for j in (i + 1)..n {
                total += parameter_distance(
                    &self.population[i].params,
                    &self.population[j].params,
                    &self.config.parameters,
                );
                count += 1;
            }
        }
        total / count as f64
    }

    /// Get current progress.
    pub fn progress(&self) -> SearchProgress {
        let valid: Vec<f64> = self
            .population
            .iter()
            .filter(|ind| ind.is_valid())
            .map(|ind| ind.fitness)
            .collect();

        SearchProgress {
            generation: self.generation,
            total_generations: self.config.population.max_generations,
            best_fitness: self.best_fitness(),
            avg_fitness: mean_and_std(&valid).0,
            stagnation_count: self.stagnation_count,
            best: self.best.clone(),
            stats: self.evaluator.stats(),
        }
    }

    fn should_stop(&self) -> Option<StopReason> {
        if let Some(target) = self.config.population.target_fitness
            && self.best_fitness() >= target
        {
            return Some(StopReason::TargetReached);
        }

        if let Some(limit) = self.config.population.stagnation_limit
            && self.stagnation_count >= limit
        {
            return Some(StopReason::Stagnation);
        }

        if self.generation >= self.config.population.max_generations {
            return Some(StopReason::MaxGenerations);
        }

        None
    }

    /// Run the search to completion.
    ///
    /// Resumes from a loaded state when a population is present. Returns
    /// [`OptimizerError::Cancelled`] if [`GeneticAlgorithm::stop`] was called.
    pub async fn run<F, P>(
        &mut self,
        function: &F,
        mut on_progress: P,
    ) -> Result<SearchResult, OptimizerError>
    where
        F: FitnessFunction + ?Sized,
        P: FnMut(&SearchProgress),
    {
        let start_time = Instant::now();
        self.check_cancelled()?;

        if self.population.is_empty() {
            self.phase = OptimizerPhase::Initializing;
            self.initialize();
            let initial = std::mem::take(&mut self.population);
            self.population = match self.evaluate(function, initial).await {
                Ok(population) => population,
                Err(e) => {
                    self.generation = 0;
                    return Err(e);
                }
            };
            self.record_generation();
            on_progress(&self.progress());
        } else {
            // A loaded population may contain unevaluated individuals.
            let loaded = self.population.clone();
            self.population = self.evaluate(function, loaded).await?;
            self.record_generation();
        }

        let stop_reason = loop {
            if let Some(reason) = self.should_stop() {
                break reason;
            }
            self.check_cancelled()?;
            self.phase = OptimizerPhase::Running(self.generation + 1);

            let children = self.breed();
            self.population = self.evaluate(function, children).await?;
            self.generation += 1;
            self.record_generation();

            info!(
                "Generation {}/{}: best {:.3}, stagnation {}",
                self.generation,
                self.config.population.max_generations,
                self.best_fitness(),
                self.stagnation_count
            );
            on_progress(&self.progress());
        };

        self.phase = OptimizerPhase::Completed;
        self.population.sort_by(by_fitness_desc);

        Ok(SearchResult {
            best: self.best.clone(),
            population: self.population.clone(),
            stats: RunStats {
                generations: self.generation,
                evaluations: self.evaluator.stats(),
                elapsed_seconds: start_time.elapsed().as_secs_f64(),
                stop_reason,
            },
            history: self.history.clone(),
        })
    }
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evolution::fitness::{EvaluationError, fitness_fn};
    use crate::schema::{
        Metrics, Objective, ParamValue, ParamVector, ParameterConstraint, PopulationConfig,
    };

    fn x_of(params: &ParamVector) -> f64 {
        params.get("x").and_then(ParamValue::as_f64).unwrap_or_default()
    }

    fn identity_metrics(params: ParamVector) -> Result<Metrics, EvaluationError> {
        Ok([("f".to_string(), x_of(&params))].into_iter().collect())
    }

    fn config(size: usize, generations: usize, seed: u64) -> OptimizerConfig {
        OptimizerConfig {
            parameters: vec![ParameterConstraint::continuous("x", 0.0, 10.0, 1.0)],
            objectives: vec![Objective::maximize("f")],
            algorithm: SearchAlgorithm::GeneticAlgorithm(GeneticAlgorithmConfig::default()),
            population: PopulationConfig {
                size,
                max_generations: generations,
                ..Default::default()
            },
            random_seed: Some(seed),
            ..Default::default()
        }
    }

    #[test]
    fn test_rejects_nsga_config() {
        let mut config = config(4, 3, 0);
        config.objectives.push(Objective::minimize("g"));
        config.algorithm = SearchAlgorithm::Nsga2(Default::default());
        assert!(matches!(
            GeneticAlgorithm::new(config),
            Err(ConfigError::AlgorithmMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_small_run_keeps_best_and_bounds() {
        let function = fitness_fn(|p: ParamVector| async move { identity_metrics(p) });
        let mut engine = GeneticAlgorithm::new(config(4, 3, 42)).unwrap();

        let mut reported = Vec::new();
        let result = engine
            .run(&function, |progress| reported.push(progress.best_fitness))
            .await
            .unwrap();

        assert_eq!(result.stats.generations, 3);
        assert_eq!(result.stats.stop_reason, StopReason::MaxGenerations);
        assert_eq!(result.population.len(), 4);
        assert_eq!(reported.len(), 4);
        assert!(reported.windows(2).all(|w| w[1] >= w[0]));

        let best = result.best.unwrap();
        let x = x_of(&best.params);
        assert!((0.0..=10.0).contains(&x));
        assert_eq!(x, x.round());
        assert_eq!(best.fitness, x);
        assert_eq!(engine.phase(), OptimizerPhase::Completed);
    }

    #[tokio::test]
    async fn test_converges_to_upper_bound() {
        let mut reached = 0;
        for seed in 0..10 {
            let function = fitness_fn(|p: ParamVector| async move { identity_metrics(p) });
            let mut config = config(20, 15, seed);
            config.algorithm = SearchAlgorithm::GeneticAlgorithm(GeneticAlgorithmConfig {
                mutation_rate: 0.5,
                ..Default::default()
            });
            let mut engine = GeneticAlgorithm::new(config).unwrap();
            let result = engine.run(&function, |_| {}).await.unwrap();
            if x_of(&result.best.unwrap().params) == 10.0 {
                reached += 1;
            }
        }
        assert!(reached >= 8, "only {reached} of 10 runs reached the bound");
    }

    #[tokio::test]
    async fn test_tiny_default_run_reach_rate() {
        // Four designs over three generations rarely hit the exact bound:
        // blending stays between parents and default mutation moves one step.
        let (mut reached, mut total) = (0, 0.0);
        for seed in 0..100 {
            let function = fitness_fn(|p: ParamVector| async move { identity_metrics(p) });
            let mut engine = GeneticAlgorithm::new(config(4, 3, seed)).unwrap();
            let result = engine.run(&function, |_| {}).await.unwrap();

            let x = x_of(&result.best.unwrap().params);
            assert!((0.0..=10.0).contains(&x) && x == x.round());
            if x == 10.0 {
                reached += 1;
            }
            total += x;
        }
        assert!(reached >= 5, "only {reached} of 100 runs reached the bound");
        assert!(total / 100.0 >= 7.0, "mean best {}", total / 100.0);
    }

    #[tokio::test]
    async fn test_constraint_violations_never_best() {
        let function = fitness_fn(|p: ParamVector| async move { identity_metrics(p) });
        let mut config = config(12, 8, 9);
        config.constraint = Some("f <= 5".to_string());
        let mut engine = GeneticAlgorithm::new(config).unwrap();

        let result = engine.run(&function, |_| {}).await.unwrap();
        let best = result.best.unwrap();
        assert!(best.metric("f").unwrap() <= 5.0);
        assert!(result.stats.evaluations.constraint_violations > 0);
    }

    #[tokio::test]
    async fn test_target_and_stagnation_stop() {
        let function = fitness_fn(|p: ParamVector| async move { identity_metrics(p) });
        let mut cfg = config(10, 50, 3);
        cfg.population.target_fitness = Some(0.0);
        let mut engine = GeneticAlgorithm::new(cfg).unwrap();
        let result = engine.run(&function, |_| {}).await.unwrap();
        assert_eq!(result.stats.stop_reason, StopReason::TargetReached);
        assert_eq!(result.stats.generations, 0);

        let flat = fitness_fn(|_p: ParamVector| async move {
            Ok::<Metrics, EvaluationError>([("f".to_string(), 1.0)].into_iter().collect())
        });
        let mut cfg = config(6, 50, 3);
        cfg.population.stagnation_limit = Some(2);
        let mut engine = GeneticAlgorithm::new(cfg).unwrap();
        let result = engine.run(&flat, |_| {}).await.unwrap();
        assert_eq!(result.stats.stop_reason, StopReason::Stagnation);
        assert_eq!(result.stats.generations, 2);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort() {
        let function = fitness_fn(|p: ParamVector| async move {
            if x_of(&p) > 7.0 {
                Err(EvaluationError::Other("mesh generation failed".to_string()))
            } else {
                identity_metrics(p)
            }
        });
        let mut engine = GeneticAlgorithm::new(config(8, 4, 11)).unwrap();
        let result = engine.run(&function, |_| {}).await.unwrap();

        let best = result.best.unwrap();
        assert!(x_of(&best.params) <= 7.0);
        assert!(!best.failed);
    }

    #[tokio::test]
    async fn test_stop_before_run_is_cancelled() {
        let function = fitness_fn(|p: ParamVector| async move { identity_metrics(p) });
        let mut engine = GeneticAlgorithm::new(config(4, 3, 1)).unwrap();
        engine.stop();

        let result = engine.run(&function, |_| {}).await;
        assert!(matches!(result, Err(OptimizerError::Cancelled)));
        assert_eq!(engine.phase(), OptimizerPhase::Cancelled);
        assert_eq!(engine.stats().evaluations, 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_then_resume() {
        let function = fitness_fn(|p: ParamVector| async move { identity_metrics(p) });
        let mut engine = GeneticAlgorithm::new(config(6, 5, 21)).unwrap();
        let cancel = engine.cancel_handle();

        let result = engine
            .run(&function, |progress| {
                if progress.generation == 2 {
                    cancel.cancel();
                }
            })
            .await;
        assert!(matches!(result, Err(OptimizerError::Cancelled)));
        assert_eq!(engine.phase(), OptimizerPhase::Cancelled);

        let state = engine.get_state();
        assert_eq!(state.current_generation, 2);
        assert_eq!(state.population.len(), 6);
        assert!(state.population.iter().all(|ind| ind.metrics.is_some()));

        let json = serde_json::to_string(&state).unwrap();
        let restored: OptimizerState = serde_json::from_str(&json).unwrap();

        let mut resumed = GeneticAlgorithm::new(config(6, 5, 22))
            .unwrap()
            .with_cache(engine.cache().clone());
        resumed.load_state(restored);
        let result = resumed.run(&function, |_| {}).await.unwrap();
        assert_eq!(result.stats.generations, 5);
        assert!(result.best.unwrap().fitness >= state.best.unwrap().fitness);
    }
}
