//! Parameter space definition: the tunable design variables.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single parameter value.
///
/// Continuous parameters always hold numbers; discrete options may be
/// numeric (e.g. fin counts) or named (e.g. glazing materials).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl ParamValue {
    /// Numeric view of the value, if it is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(v) => Some(*v),
            ParamValue::Text(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Number(v) => write!(f, "{v}"),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

/// A parameter vector, keyed by parameter name.
///
/// Names are kept sorted so that two vectors with the same contents are
/// always laid out identically.
pub type ParamVector = BTreeMap<String, ParamValue>;

/// A tunable design variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterConstraint {
    /// Numeric range, optionally quantized to `step`.
    Continuous {
        name: String,
        min: f64,
        max: f64,
        /// Grid spacing; zero means unquantized.
        #[serde(default)]
        step: f64,
    },
    /// Fixed, ordered set of options.
    Discrete {
        name: String,
        options: Vec<ParamValue>,
    },
}

impl ParameterConstraint {
    /// Convenience constructor for a continuous parameter.
    pub fn continuous(name: impl Into<String>, min: f64, max: f64, step: f64) -> Self {
        Self::Continuous {
            name: name.into(),
            min,
            max,
            step,
        }
    }

    /// Convenience constructor for a discrete parameter.
    pub fn discrete(name: impl Into<String>, options: Vec<ParamValue>) -> Self {
        Self::Discrete {
            name: name.into(),
            options,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Continuous { name, .. } | Self::Discrete { name, .. } => name,
        }
    }

    /// Check whether `value` lies inside this parameter's domain.
    pub fn contains(&self, value: &ParamValue) -> bool {
        match self {
            Self::Continuous { min, max, .. } => value
                .as_f64()
                .is_some_and(|v| v >= *min && v <= *max),
            Self::Discrete { options, .. } => options.contains(value),
        }
    }

    /// Validate the constraint invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Continuous {
                name,
                min,
                max,
                step,
            } => {
                if !min.is_finite() || !max.is_finite() {
                    return Err(format!("{name}: bounds must be finite"));
                }
                if min > max {
                    return Err(format!("{name}: min ({min}) > max ({max})"));
                }
                if step.is_nan() || *step < 0.0 {
                    return Err(format!("{name}: step ({step}) must be non-negative"));
                }
                Ok(())
            }
            Self::Discrete { name, options } => {
                if options.is_empty() {
                    Err(format!("{name}: discrete parameter has no options"))
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_json_shape() {
        let json = r#"[
            {"kind": "continuous", "name": "depth", "min": 0.1, "max": 1.2, "step": 0.05},
            {"kind": "discrete", "name": "glazing", "options": ["clear", "low-e", 3]}
        ]"#;
        let parsed: Vec<ParameterConstraint> = serde_json::from_str(json).unwrap();

        assert_eq!(parsed[0].name(), "depth");
        match &parsed[1] {
            ParameterConstraint::Discrete { options, .. } => {
                assert_eq!(options[0], ParamValue::Text("clear".into()));
                assert_eq!(options[2], ParamValue::Number(3.0));
            }
            other => panic!("expected discrete, got {other:?}"),
        }
    }

    #[test]
    fn test_validate() {
        assert!(
            ParameterConstraint::continuous("x", 0.0, 10.0, 1.0)
                .validate()
                .is_ok()
        );
        assert!(
            ParameterConstraint::continuous("x", 5.0, 1.0, 1.0)
                .validate()
                .is_err()
        );
        assert!(
            ParameterConstraint::continuous("x", 0.0, 1.0, -0.1)
                .validate()
                .is_err()
        );
        assert!(ParameterConstraint::discrete("m", vec![]).validate().is_err());
    }

    #[test]
    fn test_contains() {
        let depth = ParameterConstraint::continuous("depth", 0.0, 1.0, 0.0);
        assert!(depth.contains(&ParamValue::Number(0.5)));
        assert!(!depth.contains(&ParamValue::Number(1.5)));
        assert!(!depth.contains(&ParamValue::Text("deep".into())));

        let glazing = ParameterConstraint::discrete("glazing", vec!["clear".into()]);
        assert!(glazing.contains(&"clear".into()));
        assert!(!glazing.contains(&"tinted".into()));
    }
}
