//! NSGA-II multi-objective optimizer.
//!
//! Each generation breeds `N` children by binary tournament, evaluates them,
//! sorts parents and children into non-dominated fronts and keeps the best
//! `N` by rank, breaking the cutoff front by crowding distance.

use std::cmp::Ordering;
use std::time::Instant;

use log::{info, warn};

use crate::schema::{
    ConfigError, EvaluationStats, Individual, Objective, OptimizerConfig, OptimizerPhase,
    OptimizerState, ParetoProgress, ParetoResult, RunStats, SearchAlgorithm, StopReason,
};

use super::cache::FitnessCache;
use super::checkpoint::CheckpointStore;
use super::fitness::{CancelToken, FitnessEvaluator, FitnessFunction, OptimizerError, Scorer};
use super::genome::GenomeRng;

/// Whether objective vector `p` Pareto-dominates `q`: no worse in every
/// objective and strictly better in at least one.
pub fn dominates(p: &[f64], q: &[f64], objectives: &[Objective]) -> bool {
    if p.len() != q.len() || p.len() != objectives.len() {
        return false;
    }
    let mut better_in_any = false;
    for ((a, b), objective) in p.iter().zip(q).zip(objectives) {
        match objective.goal.compare(*a, *b) {
            Ordering::Less => return false,
            Ordering::Greater => better_in_any = true,
            Ordering::Equal => {}
        }
    }
    better_in_any
}

/// Sort objective vectors into fronts of indices. Front 0 is non-dominated.
pub fn fast_non_dominated_sort(values: &[Vec<f64>], objectives: &[Objective]) -> Vec<Vec<usize>> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }

    let mut fronts = vec![vec![]];
    let mut domination_count = vec![0usize; n];
    let mut dominated_indices = vec![vec![]; n];

    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            if dominates(&values[i], &values[j], objectives) {
                dominated_indices[i].push(j);
            } else if dominates(&values[j], &values[i], objectives) {
                domination_count[i] += 1;
            }
        }
        if domination_count[i] == 0 {
            fronts[0].push(i);
        }
    }

    let mut curr = 0;
    while curr < fronts.len() {
        let mut next_front = vec![];
        for &i in &fronts[curr] {
            for &j in &dominated_indices[i] {
                domination_count[j] -= 1;
                if domination_count[j] == 0 {
                    next_front.push(j);
                }
            }
        }
        if next_front.is_empty() {
            break;
        }
        fronts.push(next_front);
        curr += 1;
    }
    fronts
}

/// Crowding distance of each member of one front, in input order.
///
/// Boundary members of every objective get infinity. Objectives with a zero
/// or non-finite range contribute nothing to interior members.
pub fn calculate_crowding_distance(front: &[Vec<f64>]) -> Vec<f64> {
    let n = front.len();
    if n <= 2 {
        return vec![f64::INFINITY; n];
    }

    let obj_count = front[0].len();
    let mut distances = vec![0.0; n];
    let mut order: Vec<usize> = (0..n).collect();

    for m in 0..obj_count {
        order.sort_by(|&a, &b| front[a][m].total_cmp(&front[b][m]));

        let first = order[0];
        let last = order[n - 1];
        distances[first] = f64::INFINITY;
        distances[last] = f64::INFINITY;

        let range = front[last][m] - front[first][m];
        if !range.is_finite() || range <= 0.0 {
            continue;
        }
        for k in 1..(n - 1) {
            let i = order[k];
            if distances[i] != f64::INFINITY {
                distances[i] += (front[order[k + 1]][m] - front[order[k - 1]][m]) / range;
            }
        }
    }
    distances
}

/// Binary tournament: draw two individuals, prefer the lower rank, then the
/// larger crowding distance.
pub fn binary_tournament(population: &[Individual], rng: &mut GenomeRng) -> usize {
    let n = population.len();
    let i = rng.index(n);
    let j = rng.index(n);

    match population[i].rank.cmp(&population[j].rank) {
        Ordering::Less => i,
        Ordering::Greater => j,
        Ordering::Equal => {
            if population[i].crowding_distance >= population[j].crowding_distance {
                i
            } else {
                j
            }
        }
    }
}

/// Rank `combined`, then keep exactly `size` individuals: whole fronts while
/// they fit, and the most isolated members of the first front that does not.
///
/// Every returned individual carries its 1-based rank and crowding distance.
pub fn select_survivors(
    combined: Vec<Individual>,
    objectives: &[Objective],
    size: usize,
) -> Vec<Individual> {
    let values: Vec<Vec<f64>> = combined
        .iter()
        .map(|ind| ind.objective_values(objectives))
        .collect();
    let fronts = fast_non_dominated_sort(&values, objectives);
    let mut pool: Vec<Option<Individual>> = combined.into_iter().map(Some).collect();

    let mut next_gen = Vec::with_capacity(size);
    for (front_idx, indices) in fronts.iter().enumerate() {
        if next_gen.len() >= size {
            break;
        }

        let front_values: Vec<Vec<f64>> = indices.iter().map(|&i| values[i].clone()).collect();
        let distances = calculate_crowding_distance(&front_values);

        let mut current_front: Vec<Individual> = indices
            .iter()
            .zip(distances)
            .filter_map(|(&i, distance)| {
                pool[i].take().map(|mut ind| {
                    ind.rank = front_idx + 1;
                    ind.crowding_distance = distance;
                    ind
                })
            })
            .collect();

        if next_gen.len() + current_front.len() <= size {
            next_gen.extend(current_front);
        } else {
            current_front.sort_by(|a, b| b.crowding_distance.total_cmp(&a.crowding_distance));
            let remaining = size - next_gen.len();
            next_gen.extend(current_front.into_iter().take(remaining));
            break;
        }
    }
    next_gen
}

/// Rank-1 members of a ranked population.
fn first_front(population: &[Individual]) -> Vec<Individual> {
    population
        .iter()
        .filter(|ind| ind.rank == 1)
        .cloned()
        .collect()
}

/// NSGA-II optimizer over two or more objectives.
pub struct Nsga2Optimizer {
    config: OptimizerConfig,
    mutation_rate: f64,
    rng: GenomeRng,
    evaluator: FitnessEvaluator,
    population: Vec<Individual>,
    pareto_front: Vec<Individual>,
    generation: usize,
    phase: OptimizerPhase,
    cancel: CancelToken,
    checkpoints: Option<CheckpointStore>,
}

impl Nsga2Optimizer {
    /// Create a new optimizer. Fails if the configuration is invalid or
    /// selects another algorithm.
    pub fn new(config: OptimizerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mutation_rate = match &config.algorithm {
            SearchAlgorithm::Nsga2(nsga) => nsga.mutation_rate,
            SearchAlgorithm::GeneticAlgorithm(_) => {
                return Err(ConfigError::AlgorithmMismatch("NSGA-II"));
            }
        };

        let seed = config.random_seed.unwrap_or_else(rand::random);
        let scorer = Scorer::new(config.objectives.clone(), config.parsed_constraint()?);
        let evaluator = FitnessEvaluator::new(scorer, config.evaluation.concurrency());

        Ok(Self {
            config,
            mutation_rate,
            rng: GenomeRng::new(seed),
            evaluator,
            population: Vec::new(),
            pareto_front: Vec::new(),
            generation: 0,
            phase: OptimizerPhase::Uninitialized,
            cancel: CancelToken::new(),
            checkpoints: None,
        })
    }

    /// Reuse results from an earlier session.
    pub fn with_cache(mut self, cache: FitnessCache) -> Self {
        self.evaluator = self.evaluator.with_cache(cache);
        self
    }

    /// Write the state to `store` after every generation.
    pub fn with_checkpoints(mut self, store: CheckpointStore) -> Self {
        self.checkpoints = Some(store);
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

    pub fn pareto_front(&self) -> &[Individual] {
        &self.pareto_front
    }

    /// Snapshot of the run for pause/resume.
    pub fn get_state(&self) -> OptimizerState {
        OptimizerState {
            current_generation: self.generation,
            population: self.population.clone(),
            pareto_front: self.pareto_front.clone(),
            best: None,
        }
    }

    /// Restore a snapshot taken by [`Nsga2Optimizer::get_state`].
    pub fn load_state(&mut self, state: OptimizerState) {
        self.generation = state.current_generation;
        self.population = state.population;
        self.pareto_front = state.pareto_front;
        self.phase = if self.population.is_empty() {
            OptimizerPhase::Uninitialized
        } else {
            OptimizerPhase::Running(self.generation)
        };
    }

    fn check_cancelled(&mut self) -> Result<(), OptimizerError> {
        if self.cancel.is_cancelled() {
            self.phase = OptimizerPhase::Cancelled;
            info!("NSGA-II cancelled at generation {}", self.generation);
            return Err(OptimizerError::Cancelled);
        }
        Ok(())
    }

    /// Evaluate candidates; on cancellation the batch is discarded.
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

    fn initialize(&mut self) -> Vec<Individual> {
        self.generation = 0;
        (0..self.config.population.size)
            .map(|_| Individual::new(self.rng.random_params(&self.config.parameters), 0))
            .collect()
    }

    /// Breed `N` children from the current population.
    fn make_children(&mut self) -> Vec<Individual> {
        let next_generation = self.generation + 1;
        let mut offspring = Vec::with_capacity(self.config.population.size);

        while offspring.len() < self.config.population.size {
            let idx1 = binary_tournament(&self.population, &mut self.rng);
            let idx2 = binary_tournament(&self.population, &mut self.rng);
            let mut child = self.rng.crossover(
                &self.population[idx1].params,
                &self.population[idx2].params,
                &self.config.parameters,
            );
            self.rng
                .mutate(&mut child, self.mutation_rate, &self.config.parameters);
            offspring.push(Individual::new(child, next_generation));
        }
        offspring
    }

    /// One generation: breed, evaluate, merge and select survivors.
    async fn step<F>(&mut self, function: &F) -> Result<(), OptimizerError>
    where
        F: FitnessFunction + ?Sized,
    {
        let children = self.make_children();
        let children = self.evaluate(function, children).await?;

        let mut combined = self.population.clone();
        combined.extend(children);

        self.population = select_survivors(
            combined,
            &self.config.objectives,
            self.config.population.size,
        );
        self.pareto_front = first_front(&self.population);
        self.generation += 1;
        Ok(())
    }

    fn save_checkpoint(&self) {
        if let Some(store) = &self.checkpoints
            && let Err(e) = store.save(&self.get_state())
        {
            warn!(
                "Failed to write checkpoint for generation {}: {e}",
                self.generation
            );
        }
    }

    fn progress(&self) -> ParetoProgress {
        ParetoProgress {
            generation: self.generation,
            total_generations: self.config.population.max_generations,
            front: self.pareto_front.clone(),
            stats: self.evaluator.stats(),
        }
    }

    /// Run the optimizer to `max_generations`.
    ///
    /// Resumes from a loaded state when a population is present. Returns
    /// [`OptimizerError::Cancelled`] if [`Nsga2Optimizer::stop`] was called.
    pub async fn run<F, P>(
        &mut self,
        function: &F,
        mut on_progress: P,
    ) -> Result<ParetoResult, OptimizerError>
    where
        F: FitnessFunction + ?Sized,
        P: FnMut(&ParetoProgress),
    {
        let start_time = Instant::now();
        self.check_cancelled()?;

        let fresh = self.population.is_empty();
        let candidates = if fresh {
            self.phase = OptimizerPhase::Initializing;
            self.initialize()
        } else {
            self.population.clone()
        };
        let evaluated = self.evaluate(function, candidates).await?;
        let size = evaluated.len();
        self.population = select_survivors(evaluated, &self.config.objectives, size);
        self.pareto_front = first_front(&self.population);

        if fresh {
            self.save_checkpoint();
            on_progress(&self.progress());
        }

        while self.generation < self.config.population.max_generations {
            self.check_cancelled()?;
            self.phase = OptimizerPhase::Running(self.generation + 1);

            self.step(function).await?;

            let stats = self.evaluator.stats();
            info!(
                "Generation {}/{}: front size {}, {} evaluations, {} failures",
                self.generation,
                self.config.population.max_generations,
                self.pareto_front.len(),
                stats.evaluations,
                stats.failures
            );
            self.save_checkpoint();
            on_progress(&self.progress());
        }

        self.phase = OptimizerPhase::Completed;

        Ok(ParetoResult {
            front: self.pareto_front.clone(),
            population: self.population.clone(),
            stats: RunStats {
                generations: self.generation,
                evaluations: self.evaluator.stats(),
                elapsed_seconds: start_time.elapsed().as_secs_f64(),
                stop_reason: StopReason::MaxGenerations,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evolution::fitness::{EvaluationError, fitness_fn};
    use crate::schema::{
        Metrics, Nsga2Config, ParamValue, ParamVector, ParameterConstraint, PopulationConfig,
    };
    use proptest::prelude::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn objectives() -> Vec<Objective> {
        vec![Objective::maximize("sda"), Objective::minimize("ase")]
    }

    fn with_values(a: f64, b: f64) -> Individual {
        let params: ParamVector = [
            ("a".to_string(), ParamValue::Number(a)),
            ("b".to_string(), ParamValue::Number(b)),
        ]
        .into();
        let mut ind = Individual::new(params, 0);
        ind.metrics = Some([("a".to_string(), a), ("b".to_string(), b)].into_iter().collect());
        ind.fitness = a;
        ind
    }

    fn daylight_metrics(params: &ParamVector) -> Metrics {
        let depth = params["depth"].as_f64().unwrap_or_default();
        let spacing = params["spacing"].as_f64().unwrap_or_default();
        [
            ("sda".to_string(), 40.0 + 50.0 * spacing - 20.0 * depth),
            ("ase".to_string(), 20.0 * spacing - 10.0 * depth + 10.0),
        ]
        .into_iter()
        .collect()
    }

    fn config(seed: u64) -> OptimizerConfig {
        OptimizerConfig {
            parameters: vec![
                ParameterConstraint::continuous("depth", 0.0, 1.0, 0.05),
                ParameterConstraint::continuous("spacing", 0.0, 1.0, 0.05),
            ],
            objectives: objectives(),
            algorithm: SearchAlgorithm::Nsga2(Nsga2Config { mutation_rate: 0.2 }),
            population: PopulationConfig {
                size: 8,
                max_generations: 4,
                ..Default::default()
            },
            random_seed: Some(seed),
            ..Default::default()
        }
    }

    #[test]
    fn test_dominance() {
        let objectives = objectives();
        let a = [80.0, 5.0];
        let b = [70.0, 6.0];
        assert!(dominates(&a, &b, &objectives));
        assert!(!dominates(&b, &a, &objectives));
        assert!(!dominates(&a, &a, &objectives));
        // Trade-off: neither dominates.
        assert!(!dominates(&[80.0, 7.0], &b, &objectives));
        assert!(!dominates(&b, &[80.0, 7.0], &objectives));
    }

    #[test]
    fn test_crowding_distance_single_objective() {
        let d = calculate_crowding_distance(&[vec![0.0], vec![5.0], vec![10.0]]);
        assert_eq!(d, vec![f64::INFINITY, 1.0, f64::INFINITY]);

        // Input order does not matter.
        let d = calculate_crowding_distance(&[vec![5.0], vec![10.0], vec![0.0]]);
        assert_eq!(d, vec![1.0, f64::INFINITY, f64::INFINITY]);
    }

    #[test]
    fn test_crowding_distance_zero_range() {
        let d = calculate_crowding_distance(&[
            vec![1.0, 0.0],
            vec![1.0, 4.0],
            vec![1.0, 5.0],
            vec![1.0, 10.0],
        ]);
        assert!(d[0].is_infinite() && d[3].is_infinite());
        assert!((d[1] - 0.5).abs() < 1e-12);
        assert!((d[2] - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_sort_assigns_fronts() {
        let objectives = objectives();
        let values = vec![
            vec![70.0, 6.0],
            vec![80.0, 5.0],
            vec![60.0, 9.0],
            vec![90.0, 8.0],
        ];
        let fronts = fast_non_dominated_sort(&values, &objectives);
        assert_eq!(fronts.len(), 3);
        let mut first = fronts[0].clone();
        first.sort();
        assert_eq!(first, vec![1, 3]);
        assert_eq!(fronts[1], vec![0]);
        assert_eq!(fronts[2], vec![2]);
        assert!(fast_non_dominated_sort(&[], &objectives).is_empty());
    }

    #[test]
    fn test_survivors_cut_by_crowding() {
        let objectives = vec![Objective::maximize("a"), Objective::maximize("b")];
        let combined = vec![
            with_values(0.0, 10.0),
            with_values(5.0, 5.0),
            with_values(10.0, 0.0),
            with_values(0.0, 9.0),
            with_values(3.0, 4.0),
            with_values(4.0, 3.0),
            with_values(9.0, 0.0),
            with_values(1.0, 1.0),
        ];

        let survivors = select_survivors(combined, &objectives, 5);
        assert_eq!(survivors.len(), 5);
        assert_eq!(survivors.iter().filter(|s| s.rank == 1).count(), 3);

        let second: Vec<(f64, f64)> = survivors
            .iter()
            .filter(|s| s.rank == 2)
            .map(|s| (s.metric("a").unwrap(), s.metric("b").unwrap()))
            .collect();
        assert_eq!(second.len(), 2);
        assert!(second.contains(&(0.0, 9.0)));
        assert!(second.contains(&(9.0, 0.0)));
    }

    #[test]
    fn test_invalid_designs_rank_last() {
        let objectives = vec![Objective::maximize("a"), Objective::maximize("b")];
        let mut failed = with_values(100.0, 100.0);
        failed.fitness = f64::NEG_INFINITY;

        let survivors = select_survivors(vec![failed, with_values(1.0, 1.0)], &objectives, 1);
        assert_eq!(survivors[0].metric("a"), Some(1.0));
    }

    proptest! {
        #[test]
        fn prop_fronts_are_mutually_non_dominated(
            values in prop::collection::vec(prop::collection::vec(0.0f64..10.0, 2), 1..30)
        ) {
            let objectives = objectives();
            let fronts = fast_non_dominated_sort(&values, &objectives);

            let total: usize = fronts.iter().map(Vec::len).sum();
            prop_assert_eq!(total, values.len());

            for (k, front) in fronts.iter().enumerate() {
                for &p in front {
                    for &q in front {
                        prop_assert!(!dominates(&values[p], &values[q], &objectives));
                    }
                    if k > 0 {
                        prop_assert!(fronts[k - 1]
                            .iter()
                            .any(|&d| dominates(&values[d], &values[p], &objectives)));
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn test_run_produces_exact_population_and_front() {
        let function = fitness_fn(|p: ParamVector| async move {
            Ok::<Metrics, EvaluationError>(daylight_metrics(&p))
        });
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let mut optimizer = Nsga2Optimizer::new(config(5))
            .unwrap()
            .with_checkpoints(store.clone());

        let mut generations = Vec::new();
        let result = optimizer
            .run(&function, |progress| generations.push(progress.generation))
            .await
            .unwrap();

        assert_eq!(generations, vec![0, 1, 2, 3, 4]);
        assert_eq!(result.population.len(), 8);
        assert!(!result.front.is_empty());
        assert!(result.front.iter().all(|ind| ind.rank == 1));

        let objectives = objectives();
        for p in &result.front {
            for q in &result.front {
                let (pv, qv) = (p.objective_values(&objectives), q.objective_values(&objectives));
                assert!(!dominates(&pv, &qv, &objectives));
            }
        }

        let stats = result.stats.evaluations;
        assert_eq!(stats.evaluations + stats.cache_hits, 8 * 5);
        assert_eq!(optimizer.phase(), OptimizerPhase::Completed);
        assert_eq!(store.list().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_resume_from_checkpoint() {
        let function = fitness_fn(|p: ParamVector| async move {
            Ok::<Metrics, EvaluationError>(daylight_metrics(&p))
        });
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();

        let mut first = Nsga2Optimizer::new(config(8))
            .unwrap()
            .with_checkpoints(store.clone());
        let cancel = first.cancel_handle();
        let result = first
            .run(&function, |progress| {
                if progress.generation == 2 {
                    cancel.cancel();
                }
            })
            .await;
        assert!(matches!(result, Err(OptimizerError::Cancelled)));
        assert_eq!(first.phase(), OptimizerPhase::Cancelled);

        let state = store.load_latest().unwrap().unwrap();
        assert_eq!(state.current_generation, 2);
        assert_eq!(state.population.len(), 8);
        assert_eq!(state.pareto_front.len(), first.pareto_front().len());

        let mut second = Nsga2Optimizer::new(config(9))
            .unwrap()
            .with_cache(first.cache().clone());
        second.load_state(state);
        let mut seen = Vec::new();
        let result = second
            .run(&function, |progress| seen.push(progress.generation))
            .await
            .unwrap();
        assert_eq!(seen, vec![3, 4]);
        assert_eq!(result.stats.generations, 4);
        assert_eq!(result.population.len(), 8);
    }

    #[tokio::test]
    async fn test_stop_before_run() {
        let function = fitness_fn(|p: ParamVector| async move {
            Ok::<Metrics, EvaluationError>(daylight_metrics(&p))
        });
        let mut optimizer = Nsga2Optimizer::new(config(1)).unwrap();
        optimizer.stop();
        assert!(matches!(
            optimizer.run(&function, |_| {}).await,
            Err(OptimizerError::Cancelled)
        ));
        assert!(optimizer.population().is_empty());
    }

    #[tokio::test]
    async fn test_failed_evaluations_are_dominated() {
        let function = fitness_fn(|p: ParamVector| async move {
            if p["depth"].as_f64().unwrap_or_default() > 0.8 {
                return Err(EvaluationError::Timeout(Duration::from_secs(30)));
            }
            Ok(daylight_metrics(&p))
        });
        let mut optimizer = Nsga2Optimizer::new(config(13)).unwrap();
        let result = optimizer.run(&function, |_| {}).await.unwrap();

        assert!(result.front.iter().all(|ind| !ind.failed));
        assert_eq!(result.population.len(), 8);
    }

    #[test]
    fn test_rejects_single_objective_config() {
        let mut cfg = config(0);
        cfg.algorithm = SearchAlgorithm::GeneticAlgorithm(Default::default());
        cfg.objectives.truncate(1);
        assert!(matches!(
            Nsga2Optimizer::new(cfg),
            Err(ConfigError::AlgorithmMismatch(_))
        ));
    }
}
