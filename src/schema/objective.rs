//! Objectives, metric maps and the inequality constraint applied to metrics.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Raw metrics returned by one evaluation, keyed by metric id
/// (e.g. `"sda"`, `"ase"`).
pub type Metrics = BTreeMap<String, f64>;

/// Optimization direction of an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    Maximize,
    Minimize,
}

impl Goal {
    /// Compare two raw values in terms of quality: `Greater` means `a` is
    /// better than `b`.
    pub fn compare(self, a: f64, b: f64) -> Ordering {
        let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        match self {
            Goal::Maximize => ord,
            Goal::Minimize => ord.reverse(),
        }
    }

    /// Signed score: the raw value when maximizing, its negation when minimizing.
    pub fn signed(self, value: f64) -> f64 {
        match self {
            Goal::Maximize => value,
            Goal::Minimize => -value,
        }
    }

    /// The worst possible raw value under this goal.
    pub fn worst_value(self) -> f64 {
        match self {
            Goal::Maximize => f64::NEG_INFINITY,
            Goal::Minimize => f64::INFINITY,
        }
    }
}

/// One optimization objective over a named metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    /// Metric id this objective reads from the metrics map.
    pub id: String,
    pub goal: Goal,
    /// Display unit (e.g. `"%"` for sDA, `"h"` for ASE hours).
    #[serde(default)]
    pub unit: Option<String>,
}

impl Objective {
    pub fn maximize(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal: Goal::Maximize,
            unit: None,
        }
    }

    pub fn minimize(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal: Goal::Minimize,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Objective value of a metrics map, or the worst value if missing.
    pub fn value_of(&self, metrics: &Metrics) -> f64 {
        metrics
            .get(&self.id)
            .copied()
            .filter(|v| !v.is_nan())
            .unwrap_or_else(|| self.goal.worst_value())
    }
}

/// Comparison operator of a metric constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl Comparison {
    fn symbol(self) -> &'static str {
        match self {
            Comparison::Less => "<",
            Comparison::LessEqual => "<=",
            Comparison::Greater => ">",
            Comparison::GreaterEqual => ">=",
            Comparison::Equal => "==",
            Comparison::NotEqual => "!=",
        }
    }

    fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::Less => lhs < rhs,
            Comparison::LessEqual => lhs <= rhs,
            Comparison::Greater => lhs > rhs,
            Comparison::GreaterEqual => lhs >= rhs,
            Comparison::Equal => (lhs - rhs).abs() <= f64::EPSILON * rhs.abs().max(1.0),
            Comparison::NotEqual => (lhs - rhs).abs() > f64::EPSILON * rhs.abs().max(1.0),
        }
    }
}

/// Errors from parsing a constraint expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConstraintParseError {
    #[error("Constraint expression is empty")]
    Empty,
    #[error("No comparison operator in constraint: {0}")]
    MissingOperator(String),
    #[error("Invalid threshold '{value}' in constraint: {expression}")]
    InvalidThreshold { expression: String, value: String },
    #[error("Invalid metric name '{0}' in constraint")]
    InvalidMetric(String),
}

/// A single inequality on one metric, e.g. `ase <= 10`.
///
/// Without a metric name (`"< 10"`) the constraint applies to the primary
/// objective's metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConstraint {
    pub metric: Option<String>,
    pub comparison: Comparison,
    pub threshold: f64,
}

impl MetricConstraint {
    /// Parse an expression of the form `[metric] op threshold`.
    pub fn parse(expression: &str) -> Result<Self, ConstraintParseError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(ConstraintParseError::Empty);
        }

        // Two-character operators first so "<=" is not read as "<".
        const OPERATORS: [(&str, Comparison); 6] = [
            ("<=", Comparison::LessEqual),
            (">=", Comparison::GreaterEqual),
            ("==", Comparison::Equal),
            ("!=", Comparison::NotEqual),
            ("<", Comparison::Less),
            (">", Comparison::Greater),
        ];

        let (position, symbol, comparison) = OPERATORS
            .iter()
            .filter_map(|(symbol, cmp)| trimmed.find(symbol).map(|pos| (pos, *symbol, *cmp)))
            .min_by_key(|(pos, symbol, _)| (*pos, usize::MAX - symbol.len()))
            .ok_or_else(|| ConstraintParseError::MissingOperator(trimmed.to_string()))?;

        let lhs = trimmed[..position].trim();
        let rhs = trimmed[position + symbol.len()..].trim();

        let threshold: f64 = rhs
            .parse()
            .ok()
            .filter(|v: &f64| v.is_finite())
            .ok_or_else(|| ConstraintParseError::InvalidThreshold {
                expression: trimmed.to_string(),
                value: rhs.to_string(),
            })?;

        let metric = if lhs.is_empty() {
            None
        } else if lhs
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            Some(lhs.to_string())
        } else {
            return Err(ConstraintParseError::InvalidMetric(lhs.to_string()));
        };

        Ok(Self {
            metric,
            comparison,
            threshold,
        })
    }

    /// Evaluate the constraint against a metrics map.
    ///
    /// A constraint on a metric that is absent from the map is violated.
    pub fn is_satisfied(&self, metrics: &Metrics, primary_metric: &str) -> bool {
        let name = self.metric.as_deref().unwrap_or(primary_metric);
        metrics
            .get(name)
            .is_some_and(|value| self.comparison.holds(*value, self.threshold))
    }
}

impl FromStr for MetricConstraint {
    type Err = ConstraintParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MetricConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(metric) = &self.metric {
            write!(f, "{metric} ")?;
        }
        write!(f, "{} {}", self.comparison.symbol(), self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(pairs: &[(&str, f64)]) -> Metrics {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_goal_compare() {
        assert_eq!(Goal::Maximize.compare(2.0, 1.0), Ordering::Greater);
        assert_eq!(Goal::Minimize.compare(2.0, 1.0), Ordering::Less);
        assert_eq!(Goal::Minimize.signed(4.0), -4.0);
    }

    #[test]
    fn test_objective_missing_metric_is_worst() {
        let ase = Objective::minimize("ase");
        assert_eq!(ase.value_of(&metrics(&[("sda", 50.0)])), f64::INFINITY);
        assert_eq!(ase.value_of(&metrics(&[("ase", 3.0)])), 3.0);
    }

    #[test]
    fn test_parse_named_constraint() {
        let c = MetricConstraint::parse("ase <= 10").unwrap();
        assert_eq!(c.metric.as_deref(), Some("ase"));
        assert_eq!(c.comparison, Comparison::LessEqual);
        assert_eq!(c.threshold, 10.0);

        assert!(c.is_satisfied(&metrics(&[("ase", 10.0)]), "sda"));
        assert!(!c.is_satisfied(&metrics(&[("ase", 10.5)]), "sda"));
        assert!(!c.is_satisfied(&metrics(&[("sda", 1.0)]), "sda"));
    }

    #[test]
    fn test_parse_bare_constraint_uses_primary_metric() {
        let c: MetricConstraint = ">55".parse().unwrap();
        assert_eq!(c.metric, None);
        assert_eq!(c.comparison, Comparison::Greater);
        assert!(c.is_satisfied(&metrics(&[("sda", 60.0)]), "sda"));
        assert!(!c.is_satisfied(&metrics(&[("sda", 55.0)]), "sda"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(MetricConstraint::parse("  "), Err(ConstraintParseError::Empty));
        assert!(matches!(
            MetricConstraint::parse("sda 50"),
            Err(ConstraintParseError::MissingOperator(_))
        ));
        assert!(matches!(
            MetricConstraint::parse("sda >= lots"),
            Err(ConstraintParseError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            MetricConstraint::parse("s d a >= 1"),
            Err(ConstraintParseError::InvalidMetric(_))
        ));
    }

    #[test]
    fn test_display_round_trip() {
        let c = MetricConstraint::parse("ase!=0").unwrap();
        assert_eq!(c.to_string(), "ase != 0");
        assert_eq!(MetricConstraint::parse(&c.to_string()).unwrap(), c);
    }
}
