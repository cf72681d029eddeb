//! Genetic operators over parameter vectors.
//!
//! Provides step snapping, random initialization, crossover, and mutation.
//! All operators keep continuous values inside their bounds.

use rand::prelude::*;

use crate::schema::{ParamValue, ParamVector, ParameterConstraint};

/// Snap a value onto the `min + k * step` grid and clamp it to `[min, max]`.
///
/// A non-positive step only clamps.
pub fn snap_to_step(value: f64, min: f64, max: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value.clamp(min, max);
    }
    let k = ((value - min) / step).round();
    (min + k * step).clamp(min, max)
}

/// Random number generator wrapper for genome operations.
pub struct GenomeRng {
    rng: StdRng,
}

impl GenomeRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate a random parameter vector within constraints.
    pub fn random_params(&mut self, constraints: &[ParameterConstraint]) -> ParamVector {
        constraints
            .iter()
            .map(|c| (c.name().to_string(), self.random_value(c)))
            .collect()
    }

    fn random_value(&mut self, constraint: &ParameterConstraint) -> ParamValue {
        match constraint {
            ParameterConstraint::Continuous {
                min, max, step, ..
            } => {
                let raw = self.rng.gen_range(*min..=*max);
                ParamValue::Number(snap_to_step(raw, *min, *max, *step))
            }
            ParameterConstraint::Discrete { options, .. } => options
                .choose(&mut self.rng)
                .cloned()
                .unwrap_or(ParamValue::Number(0.0)),
        }
    }

    /// Produce one child from two parents.
    ///
    /// Continuous parameters are blended with a fresh uniform weight per
    /// parameter and snapped; discrete parameters come from either parent
    /// with equal probability.
    pub fn crossover(
        &mut self,
        parent1: &ParamVector,
        parent2: &ParamVector,
        constraints: &[ParameterConstraint],
    ) -> ParamVector {
        constraints
            .iter()
            .map(|constraint| {
                let name = constraint.name();
                let a = parent1.get(name);
                let b = parent2.get(name);
                let value = match constraint {
                    ParameterConstraint::Continuous {
                        min, max, step, ..
                    } => {
                        let va = numeric_or(a, b, *min);
                        let vb = numeric_or(b, a, *min);
                        let alpha = self.rng.r#gen::<f64>();
                        ParamValue::Number(snap_to_step(
                            blend(va, vb, alpha),
                            *min,
                            *max,
                            *step,
                        ))
                    }
                    ParameterConstraint::Discrete { .. } => {
                        let pick = if self.rng.gen_bool(0.5) { a.or(b) } else { b.or(a) };
                        match pick {
                            Some(v) => v.clone(),
                            None => self.random_value(constraint),
                        }
                    }
                };
                (name.to_string(), value)
            })
            .collect()
    }

    /// Mutate a parameter vector in place.
    ///
    /// Each parameter fires independently with probability `rate`. A firing
    /// continuous parameter moves by `U(-0.1, 0.1) * (max - min)`; a firing
    /// discrete parameter always switches to a different option.
    pub fn mutate(
        &mut self,
        params: &mut ParamVector,
        rate: f64,
        constraints: &[ParameterConstraint],
    ) {
        for constraint in constraints {
            if self.rng.r#gen::<f64>() >= rate {
                continue;
            }
            let name = constraint.name();
            match constraint {
                ParameterConstraint::Continuous {
                    min, max, step, ..
                } => {
                    let current = params
                        .get(name)
                        .and_then(ParamValue::as_f64)
                        .unwrap_or(*min);
                    let delta = self.rng.gen_range(-0.1..0.1) * (max - min);
                    params.insert(
                        name.to_string(),
                        ParamValue::Number(snap_to_step(current + delta, *min, *max, *step)),
                    );
                }
                ParameterConstraint::Discrete { options, .. } => {
                    let current = params.get(name);
                    let alternatives: Vec<&ParamValue> =
                        options.iter().filter(|o| Some(*o) != current).collect();
                    if let Some(choice) = alternatives.choose(&mut self.rng) {
                        params.insert(name.to_string(), (*choice).clone());
                    }
                }
            }
        }
    }

    /// Uniform index in `0..n`.
    pub fn index(&mut self, n: usize) -> usize {
        self.rng.gen_range(0..n)
    }

    /// Bernoulli draw.
    pub fn chance(&mut self, probability: f64) -> bool {
        self.rng.r#gen::<f64>() < probability
    }
}

/// Linear blend `t * a + (1 - t) * b`.
fn blend(a: f64, b: f64, t: f64) -> f64 {
    t * a + (1.0 - t) * b
}

fn numeric_or(primary: Option<&ParamValue>, secondary: Option<&ParamValue>, default: f64) -> f64 {
    primary
        .and_then(ParamValue::as_f64)
        .or_else(|| secondary.and_then(ParamValue::as_f64))
        .unwrap_or(default)
}

/// Normalized distance between two parameter vectors.
///
/// Continuous parameters contribute their range-normalized absolute
/// difference, discrete parameters 0 or 1. The result is the mean over all
/// parameters, in `[0, 1]`.
pub fn parameter_distance(
    a: &ParamVector,
    b: &ParamVector,
    constraints: &[ParameterConstraint],
) -> f64 {
    if constraints.is_empty() {
        return 0.0;
    }

    let total: f64 = constraints
        .iter()
        .map(|constraint| {
            let name = constraint.name();
            match constraint {
                ParameterConstraint::Continuous { min, max, .. } => {
                    let range = max - min;
                    match (
                        a.get(name).and_then(ParamValue::as_f64),
                        b.get(name).and_then(ParamValue::as_f64),
                    ) {
                        (Some(va), Some(vb)) if range > 0.0 => ((va - vb).abs() / range).min(1.0),
                        (Some(_), Some(_)) => 0.0,
                        _ => 1.0,
                    }
                }
                ParameterConstraint::Discrete { .. } => {
                    if a.get(name) == b.get(name) {
                        0.0
                    } else {
                        1.0
                    }
                }
            }
        })
        .sum();

    total / constraints.len() as f64
}
