//! Flat dataset of every successful evaluation, plus a sensitivity summary.

use std::collections::BTreeSet;
use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::compute::evolution::FitnessCache;
use crate::schema::{Metrics, ParamValue, ParamVector};

/// Correlations weaker than this are reported as flat.
const FLAT_CORRELATION: f64 = 0.3;

/// One evaluated design with its raw metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub params: ParamVector,
    pub metrics: Metrics,
}

/// Direction of a metric's response to a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Flat,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::Flat => "flat",
        })
    }
}

/// Linear response of one metric to one numeric parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensitivity {
    pub parameter: String,
    pub metric: String,
    /// Records where both the parameter and the metric are numeric.
    pub samples: usize,
    /// Pearson correlation; `None` when either side does not vary.
    pub correlation: Option<f64>,
    /// Least-squares slope of metric over parameter.
    pub slope: Option<f64>,
    pub trend: Trend,
}

/// Everything evaluated during a run, reconstructed from the fitness cache.
///
/// Only designs whose metrics were parsed are included; constraint
/// violations are kept since their metrics are real.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultAnalyzer {
    parameter_names: BTreeSet<String>,
    metric_names: BTreeSet<String>,
    records: Vec<EvaluationRecord>,
    skipped: usize,
}

impl ResultAnalyzer {
    /// Build the dataset. Unparseable keys are skipped with a warning.
    pub fn from_cache(cache: &FitnessCache) -> Self {
        let mut entries: Vec<_> = cache.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut analyzer = Self::default();
        for (key, entry) in entries {
            let Some(metrics) = &entry.raw_metrics else {
                continue;
            };
            let params = match key.parse() {
                Ok(params) => params,
                Err(e) => {
                    warn!("Skipping unparseable cache key {key}: {e}");
                    analyzer.skipped += 1;
                    continue;
                }
            };

            analyzer.parameter_names.extend(params.keys().cloned());
            analyzer.metric_names.extend(metrics.keys().cloned());
            analyzer.records.push(EvaluationRecord {
                params,
                metrics: metrics.clone(),
            });
        }
        analyzer
    }

    /// Union of parameter names over all records.
    pub fn parameter_names(&self) -> &BTreeSet<String> {
        &self.parameter_names
    }

    pub fn metric_names(&self) -> &BTreeSet<String> {
        &self.metric_names
    }

    pub fn records(&self) -> &[EvaluationRecord] {
        &self.records
    }

    /// Number of cache entries dropped because their key was corrupt.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sensitivity of every metric to every numeric parameter.
    pub fn sensitivity(&self) -> Vec<Sensitivity> {
        let mut result = Vec::new();
        for parameter in &self.parameter_names {
            for metric in &self.metric_names {
                let pairs: Vec<(f64, f64)> = self
                    .records
                    .iter()
                    .filter_map(|r| {
                        let x = r.params.get(parameter).and_then(ParamValue::as_f64)?;
                        let y = *r.metrics.get(metric)?;
                        Some((x, y)).filter(|_| y.is_finite())
                    })
                    .collect();
                if pairs.is_empty() {
                    continue;
                }
                result.push(linear_response(parameter, metric, &pairs));
            }
        }
        result
    }
}

fn linear_response(parameter: &str, metric: &str, pairs: &[(f64, f64)]) -> Sensitivity {
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for &(x, y) in pairs {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }

    let slope = (var_x > 0.0).then(|| cov / var_x);
    let correlation = (pairs.len() >= 3 && var_x > 0.0 && var_y > 0.0)
        .then(|| cov / (var_x.sqrt() * var_y.sqrt()));

    let trend = match correlation {
        Some(r) if r >= FLAT_CORRELATION => Trend::Increasing,
        Some(r) if r <= -FLAT_CORRELATION => Trend::Decreasing,
        _ => Trend::Flat,
    };

    Sensitivity {
        parameter: parameter.to_string(),
        metric: metric.to_string(),
        samples: pairs.len(),
        correlation,
        slope,
        trend,
    }
}
