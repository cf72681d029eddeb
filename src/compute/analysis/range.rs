//! Effective parameter range suggestion from a sweep of cached evaluations.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::compute::evolution::FitnessCache;
use crate::schema::{Goal, ParamValue, ParameterConstraint};

/// Below this many samples the observed range is returned untrimmed.
pub const MIN_SAMPLES: usize = 5;
/// Share of the metric range trimmed from the poor end of the sweep.
const LOW_TRIM: f64 = 0.15;
/// Tolerance from the best metric that counts as diminishing returns.
const HIGH_TOLERANCE: f64 = 0.05;

/// One cached evaluation projected onto a single parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSample {
    pub value: f64,
    pub fitness: f64,
    pub metric_value: f64,
    pub unit: Option<String>,
}

/// Suggested sub-range of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSuggestion {
    pub parameter: String,
    pub suggested_min: f64,
    pub suggested_max: f64,
    /// Sample with the best metric value.
    pub best_solution: RangeSample,
    /// Number of samples the suggestion is based on.
    pub samples: usize,
}

fn collect_samples(cache: &FitnessCache, parameter: &str) -> Vec<RangeSample> {
    let mut samples = Vec::new();
    for (key, entry) in cache.iter() {
        let params = match key.parse() {
            Ok(params) => params,
            Err(e) => {
                warn!("Skipping unparseable cache key {key}: {e}");
                continue;
            }
        };
        let Some(value) = params.get(parameter).and_then(ParamValue::as_f64) else {
            continue;
        };
        if !entry.fitness.is_finite() {
            continue;
        }
        samples.push(RangeSample {
            value,
            fitness: entry.fitness,
            metric_value: entry.metric_value,
            unit: entry.unit.clone(),
        });
    }
    samples.sort_by(|a, b| a.value.total_cmp(&b.value));
    samples
}

/// Suggest the effective range of `parameter` from every cached evaluation
/// that varied it.
///
/// The low end drops the leading part of the sweep whose metric stays in the
/// worst 15% of the observed metric range. The high end drops the trailing
/// part that is already within 5% of the best value, where further increase
/// buys little. Failed and constraint-violating designs are ignored. Returns
/// `None` if no usable sample exists.
pub fn suggest_range(cache: &FitnessCache, parameter: &str, goal: Goal) -> Option<RangeSuggestion> {
    let samples = collect_samples(cache, parameter);
    let first = samples.first()?;
    let last = samples.last()?;

    let best_solution = samples
        .iter()
        .max_by(|a, b| goal.compare(a.metric_value, b.metric_value))?
        .clone();
    let worst = samples
        .iter()
        .min_by(|a, b| goal.compare(a.metric_value, b.metric_value))?
        .metric_value;
    let best = best_solution.metric_value;

    let suggestion = |suggested_min: f64, suggested_max: f64| RangeSuggestion {
        parameter: parameter.to_string(),
        suggested_min,
        suggested_max,
        best_solution: best_solution.clone(),
        samples: samples.len(),
    };

    let range = (best - worst).abs();
    if samples.len() < MIN_SAMPLES || range == 0.0 {
        return Some(suggestion(first.value, last.value));
    }

    // Thresholds move from the worst (resp. best) value towards the other end.
    let (low_threshold, high_threshold) = match goal {
        Goal::Maximize => (worst + LOW_TRIM * range, best - HIGH_TOLERANCE * range),
        Goal::Minimize => (worst - LOW_TRIM * range, best + HIGH_TOLERANCE * range),
    };
    let at_least = |metric: f64, threshold: f64| goal.compare(metric, threshold).is_ge();

    let suggested_min = samples
        .iter()
        .find(|s| at_least(s.metric_value, low_threshold))
        .map_or(first.value, |s| s.value);

    let mut suggested_max = last.value;
    let mut inside = false;
    for sample in samples.iter().rev() {
        if at_least(sample.metric_value, high_threshold) {
            inside = true;
            suggested_max = sample.value;
        } else if inside {
            break;
        }
    }

    let (suggested_min, suggested_max) = if suggested_min > suggested_max {
        (suggested_max, suggested_min)
    } else {
        (suggested_min, suggested_max)
    };
    Some(suggestion(suggested_min, suggested_max))
}

/// [`suggest_range`] for every continuous parameter with usable samples.
pub fn suggest_ranges(
    cache: &FitnessCache,
    parameters: &[ParameterConstraint],
    goal: Goal,
) -> Vec<RangeSuggestion> {
    parameters
        .iter()
        .filter(|p| matches!(p, ParameterConstraint::Continuous { .. }))
        .filter_map(|p| suggest_range(cache, p.name(), goal))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evolution::{CacheEntry, CacheKey};
    use crate::schema::ParamVector;

    fn cache_from(points: &[(f64, f64)], goal: Goal) -> FitnessCache {
        let mut cache = FitnessCache::new();
        for &(depth, metric) in points {
            let params: ParamVector = [("depth".to_string(), ParamValue::Number(depth))].into();
            cache.insert(
                &params,
                CacheEntry {
                    fitness: goal.signed(metric),
                    metric_value: metric,
                    unit: Some("%".to_string()),
                    raw_metrics: Some([("sda".to_string(), metric)].into_iter().collect()),
                },
            );
        }
        cache
    }

    #[test]
    fn test_few_samples_returns_observed_range() {
        let cache = cache_from(&[(0.4, 50.0), (0.1, 10.0), (0.9, 30.0)], Goal::Maximize);
        let s = suggest_range(&cache, "depth", Goal::Maximize).unwrap();
        assert_eq!((s.suggested_min, s.suggested_max), (0.1, 0.9));
        assert_eq!(s.best_solution.value, 0.4);
        assert_eq!(s.samples, 3);
    }

    #[test]
    fn test_flat_metric_returns_full_range() {
        let points: Vec<(f64, f64)> = (0..8).map(|i| (i as f64 * 0.1, 42.0)).collect();
        let cache = cache_from(&points, Goal::Maximize);
        let s = suggest_range(&cache, "depth", Goal::Maximize).unwrap();
        assert_eq!(s.suggested_min, 0.0);
        assert!((s.suggested_max - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_trims_poor_start_and_plateau() {
        // Metric range 0..100: low threshold 15, high threshold 95.
        let cache = cache_from(
            &[
                (1.0, 0.0),
                (2.0, 10.0),
                (3.0, 40.0),
                (4.0, 80.0),
                (5.0, 96.0),
                (6.0, 100.0),
                (7.0, 99.0),
            ],
            Goal::Maximize,
        );
        let s = suggest_range(&cache, "depth", Goal::Maximize).unwrap();
        assert_eq!(s.suggested_min, 3.0);
        assert_eq!(s.suggested_max, 5.0);
        assert_eq!(s.best_solution.value, 6.0);
    }

    #[test]
    fn test_minimize_mirrors_thresholds() {
        // Glare hours fall with depth, then level off.
        let cache = cache_from(
            &[
                (0.1, 100.0),
                (0.2, 90.0),
                (0.3, 50.0),
                (0.4, 20.0),
                (0.5, 4.0),
                (0.6, 0.0),
            ],
            Goal::Minimize,
        );
        let s = suggest_range(&cache, "depth", Goal::Minimize).unwrap();
        assert_eq!(s.suggested_min, 0.3);
        assert_eq!(s.suggested_max, 0.5);
        assert_eq!(s.best_solution.metric_value, 0.0);
    }

    #[test]
    fn test_ignores_failures_and_corrupt_keys() {
        let mut cache = cache_from(&[(0.2, 30.0), (0.3, 35.0)], Goal::Maximize);
        let failed: ParamVector = [("depth".to_string(), ParamValue::Number(0.8))].into();
        cache.insert(
            &failed,
            CacheEntry {
                fitness: f64::NEG_INFINITY,
                metric_value: 0.0,
                unit: None,
                raw_metrics: None,
            },
        );
        let mut cache: FitnessCache = cache
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .chain(std::iter::once((
                CacheKey::from("{corrupt".to_string()),
                CacheEntry {
                    fitness: 1.0,
                    metric_value: 1.0,
                    unit: None,
                    raw_metrics: None,
                },
            )))
            .collect();
        cache.insert(
            &ParamVector::new(),
            CacheEntry {
                fitness: 5.0,
                metric_value: 5.0,
                unit: None,
                raw_metrics: None,
            },
        );

        let s = suggest_range(&cache, "depth", Goal::Maximize).unwrap();
        assert_eq!(s.samples, 2);
        assert_eq!((s.suggested_min, s.suggested_max), (0.2, 0.3));
        assert!(suggest_range(&cache, "spacing", Goal::Maximize).is_none());
    }

    #[test]
    fn test_suggest_ranges_skips_discrete() {
        let cache = cache_from(&[(0.2, 30.0)], Goal::Maximize);
        let parameters = vec![
            ParameterConstraint::continuous("depth", 0.0, 1.0, 0.1),
            ParameterConstraint::discrete("glazing", vec!["clear".into()]),
        ];
        let ranges = suggest_ranges(&cache, &parameters, Goal::Maximize);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].parameter, "depth");
    }
}
