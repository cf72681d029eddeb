//! Fitness evaluation contract between the optimizers and the expensive,
//! fallible external evaluation.
//!
//! Optimizers never see an evaluation error: every failure is logged,
//! counted, and turned into worst-case fitness so one bad design cannot
//! abort a run.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, warn};

use crate::schema::{
    ConfigError, EvaluationStats, Individual, MetricConstraint, Metrics, Objective, ParamVector,
};

use super::cache::{CacheEntry, CacheKey, FitnessCache};

/// Cooperative cancellation flag shared between a run and its controller.
///
/// Checked at generation boundaries and at every suspension point of an
/// evaluation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Fail with [`EvaluationError::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result<(), EvaluationError> {
        if self.is_cancelled() {
            Err(EvaluationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Failure of a single design evaluation.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Evaluation cancelled")]
    Cancelled,
    #[error("Failed to apply design parameters: {0}")]
    Design(String),
    #[error("Failed to launch simulation: {0}")]
    Spawn(#[source] io::Error),
    #[error("Simulation exited with code {code:?}: {stderr}")]
    ProcessFailed { code: Option<i32>, stderr: String },
    #[error("Failed to read simulation output: {0}")]
    Output(#[source] io::Error),
    #[error("Simulation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Failed to read result file {path}: {source}")]
    ResultFile {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse metric '{metric}' from {file}: {reason}")]
    Parse {
        metric: String,
        file: String,
        reason: String,
    },
    #[error("Evaluation returned no value for metric '{0}'")]
    MissingMetric(String),
    #[error("{0}")]
    Other(String),
}

/// Abnormal termination of an optimization run.
#[derive(Debug, thiserror::Error)]
pub enum OptimizerError {
    /// The run was stopped on request. Distinct from any failure.
    #[error("Optimization cancelled")]
    Cancelled,
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// The expensive black-box evaluation of one parameter vector.
#[async_trait]
pub trait FitnessFunction: Send + Sync {
    /// Evaluate a design and return its raw metrics.
    async fn evaluate(
        &self,
        params: &ParamVector,
        cancel: &CancelToken,
    ) -> Result<Metrics, EvaluationError>;
}

/// Adapter turning an async closure into a [`FitnessFunction`].
pub struct FnFitness<F>(F);

/// Wrap an async closure `Fn(ParamVector) -> Future<Result<Metrics, _>>`.
pub fn fitness_fn<F, Fut>(f: F) -> FnFitness<F>
where
    F: Fn(ParamVector) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Metrics, EvaluationError>> + Send,
{
    FnFitness(f)
}

#[async_trait]
impl<F, Fut> FitnessFunction for FnFitness<F>
where
    F: Fn(ParamVector) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Metrics, EvaluationError>> + Send,
{
    async fn evaluate(
        &self,
        params: &ParamVector,
        cancel: &CancelToken,
    ) -> Result<Metrics, EvaluationError> {
        cancel.check()?;
        (self.0)(params.clone()).await
    }
}

/// Outcome of evaluating one parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Signed primary fitness; negative infinity for invalid designs.
    pub fitness: f64,
    /// Raw primary metric value (zero on failure).
    pub metric_value: f64,
    /// Unit of the primary metric.
    pub unit: Option<String>,
    /// Raw metrics; `None` when the evaluation failed.
    pub metrics: Option<Metrics>,
    /// The evaluation failed.
    pub failed: bool,
    /// The design evaluated but violated the metric constraint.
    pub violated: bool,
    /// Served from the cache.
    pub cached: bool,
}

impl Evaluation {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            fitness: entry.fitness,
            metric_value: entry.metric_value,
            unit: entry.unit.clone(),
            metrics: entry.raw_metrics.clone(),
            failed: entry.raw_metrics.is_none(),
            violated: entry.raw_metrics.is_some() && !entry.fitness.is_finite(),
            cached: true,
        }
    }

    fn to_entry(&self) -> CacheEntry {
        CacheEntry {
            fitness: self.fitness,
            metric_value: self.metric_value,
            unit: self.unit.clone(),
            raw_metrics: self.metrics.clone(),
        }
    }

    /// Copy the outcome onto an individual.
    pub fn apply_to(&self, individual: &mut Individual) {
        individual.fitness = self.fitness;
        individual.metrics = self.metrics.clone();
        individual.failed = self.failed;
    }
}

/// Turns raw metrics into fitness according to the objectives and the
/// optional metric constraint.
#[derive(Debug, Clone)]
pub struct Scorer {
    objectives: Vec<Objective>,
    constraint: Option<MetricConstraint>,
}

impl Scorer {
    /// `objectives` must be non-empty; the first one is the primary objective.
    pub fn new(objectives: Vec<Objective>, constraint: Option<MetricConstraint>) -> Self {
        Self {
            objectives,
            constraint,
        }
    }

    pub fn objectives(&self) -> &[Objective] {
        &self.objectives
    }

    fn primary(&self) -> Option<&Objective> {
        self.objectives.first()
    }

    /// Score successfully parsed metrics.
    pub fn score(&self, metrics: Metrics) -> Result<Evaluation, EvaluationError> {
        for objective in &self.objectives {
            if !metrics.get(&objective.id).is_some_and(|v| v.is_finite()) {
                return Err(EvaluationError::MissingMetric(objective.id.clone()));
            }
        }

        let (metric_value, fitness, unit) = match self.primary() {
            Some(primary) => {
                let value = primary.value_of(&metrics);
                (value, primary.goal.signed(value), primary.unit.clone())
            }
            None => (0.0, 0.0, None),
        };

        let primary_id = self.primary().map(|o| o.id.as_str()).unwrap_or_default();
        let violated = self
            .constraint
            .as_ref()
            .is_some_and(|c| !c.is_satisfied(&metrics, primary_id));

        Ok(Evaluation {
            fitness: if violated { f64::NEG_INFINITY } else { fitness },
            metric_value,
            unit,
            metrics: Some(metrics),
            failed: false,
            violated,
            cached: false,
        })
    }

    /// Worst-case outcome of a failed evaluation.
    pub fn failure(&self) -> Evaluation {
        Evaluation {
            fitness: f64::NEG_INFINITY,
            metric_value: 0.0,
            unit: self.primary().and_then(|o| o.unit.clone()),
            metrics: None,
            failed: true,
            violated: false,
            cached: false,
        }
    }
}

/// Evaluation layer owned by an optimizer: scoring, caching, bounded
/// concurrency and failure accounting.
pub struct FitnessEvaluator {
    scorer: Scorer,
    cache: FitnessCache,
    concurrency: usize,
    stats: EvaluationStats,
}

impl FitnessEvaluator {
    /// Create an evaluator running at most `concurrency` evaluations at once.
    pub fn new(scorer: Scorer, concurrency: usize) -> Self {
        Self {
            scorer,
            cache: FitnessCache::new(),
            concurrency: concurrency.max(1),
            stats: EvaluationStats::default(),
        }
    }

    /// Start from an existing cache (e.g. loaded from a previous session).
    pub fn with_cache(mut self, cache: FitnessCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn cache(&self) -> &FitnessCache {
        &self.cache
    }

    pub fn stats(&self) -> EvaluationStats {
        self.stats
    }

    /// Evaluate a batch of parameter vectors.
    ///
    /// Cached vectors are not re-evaluated, and duplicates inside the batch
    /// are evaluated once. The rest run concurrently up to the configured
    /// bound. The returned outcomes are in input order. Cancelled evaluations
    /// are reported as failures but never cached.
    pub async fn evaluate_all<F>(
        &mut self,
        function: &F,
        params: &[ParamVector],
        cancel: &CancelToken,
    ) -> Vec<Evaluation>
    where
        F: FitnessFunction + ?Sized,
    {
        let mut results: Vec<Option<Evaluation>> = vec![None; params.len()];
        let mut pending: Vec<(CacheKey, &ParamVector)> = Vec::new();
        let mut waiting: HashMap<CacheKey, Vec<usize>> = HashMap::new();

        for (i, p) in params.iter().enumerate() {
            let key = CacheKey::from_params(p);
            if let Some(entry) = self.cache.get_by_key(&key) {
                self.stats.cache_hits += 1;
                results[i] = Some(Evaluation::from_entry(entry));
                continue;
            }
            match waiting.get_mut(&key) {
                Some(indices) => {
                    self.stats.cache_hits += 1;
                    indices.push(i);
                }
                None => {
                    waiting.insert(key.clone(), vec![i]);
                    pending.push((key, p));
                }
            }
        }

        if !pending.is_empty() {
            debug!(
                "Evaluating {} designs ({} cached, concurrency {})",
                pending.len(),
                params.len() - pending.len(),
                self.concurrency
            );
        }

        let outcomes: Vec<Result<Metrics, EvaluationError>> = stream::iter(pending.iter())
            .map(|(_, p)| async move {
                cancel.check()?;
                function.evaluate(p, cancel).await
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        for ((key, _), outcome) in pending.iter().zip(outcomes) {
            let evaluation = match outcome.and_then(|metrics| self.scorer.score(metrics)) {
                Ok(evaluation) => {
                    self.stats.evaluations += 1;
                    if evaluation.violated {
                        self.stats.constraint_violations += 1;
                    }
                    self.cache.insert_key(key.clone(), evaluation.to_entry());
                    evaluation
                }
                Err(EvaluationError::Cancelled) => self.scorer.failure(),
                Err(e) => {
                    warn!("Design evaluation failed for {key}: {e}");
                    self.stats.evaluations += 1;
                    self.stats.failures += 1;
                    let failure = self.scorer.failure();
                    self.cache.insert_key(key.clone(), failure.to_entry());
                    failure
                }
            };

            for &i in &waiting[key] {
                results[i] = Some(evaluation.clone());
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| self.scorer.failure()))
            .collect()
    }

    /// Evaluate every individual that has not been evaluated yet, in place.
    pub async fn evaluate_individuals<F>(
        &mut self,
        function: &F,
        individuals: &mut [Individual],
        cancel: &CancelToken,
    ) where
        F: FitnessFunction + ?Sized,
    {
        let indices: Vec<usize> = individuals
            .iter()
            .enumerate()
            .filter(|(_, ind)| ind.metrics.is_none() && !ind.failed)
            .map(|(i, _)| i)
            .collect();
        let params: Vec<ParamVector> = indices
            .iter()
            .map(|&i| individuals[i].params.clone())
            .collect();

        let evaluations = self.evaluate_all(function, &params, cancel).await;
        for (i, evaluation) in indices.into_iter().zip(evaluations) {
            evaluation.apply_to(&mut individuals[i]);
        }
    }
}
