//! Asymmetric errors from profile-likelihood scans.
//!
//! For each floating parameter the crossing of `NLL - NLL_min = 0.5` is
//! searched on both sides of the minimum, re-minimizing the remaining
//! parameters at every trial point.

use super::nelder_mead::{self, NelderMeadOptions};

/// NLL rise defining one standard deviation
pub const ERROR_DEF: f64 = 0.5;

const MAX_BRACKET_STEPS: usize = 12;
const MAX_BISECTIONS: usize = 40;
const CROSSING_TOLERANCE: f64 = 1e-3;
/// Profiles only need the NLL value, so the simplex may stay wider
const PROFILE_X_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinosError {
    /// Negative (or zero) distance to the lower crossing
    pub lower: f64,
    pub upper: f64,
    pub valid: bool,
}

struct Profile<'a, F> {
    f: &'a F,
    minimum: &'a [f64],
    steps: &'a [f64],
    bounds: &'a [(f64, f64)],
    options: NelderMeadOptions,
}

impl<F: Fn(&[f64]) -> f64> Profile<'_, F> {
    /// Minimum of the NLL with parameter `index` fixed to `value`.
    ///
    /// `others` holds the warm start for the remaining parameters and is
    /// updated with their profiled values.
    fn value(&self, index: usize, value: f64, others: &mut Vec<f64>) -> f64 {
        let full = |rest: &[f64]| {
            let mut point = Vec::with_capacity(self.minimum.len());
            point.extend_from_slice(&rest[..index]);
            point.push(value);
            point.extend_from_slice(&rest[index..]);
            (self.f)(&point)
        };
        if others.is_empty() {
            return full(&[]);
        }
        let skip = |v: &[f64]| -> Vec<f64> {
            v.iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, x)| *x)
                .collect()
        };
        let steps = skip(self.steps);
        let bounds: Vec<(f64, f64)> = self
            .bounds
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, b)| *b)
            .collect();
        let min = nelder_mead::minimize(full, others.as_slice(), &steps, &bounds, &self.options);
        *others = min.values;
        min.objective
    }

    /// Signed distance from the minimum to the crossing in `direction` (+1 or -1).
    ///
    /// Returns the distance reached and whether a crossing was found.
    fn crossing(&self, index: usize, f_min: f64, error: f64, direction: f64) -> (f64, bool) {
        let center = self.minimum[index];
        let (lo_bound, hi_bound) = self.bounds[index];
        let limit = if direction > 0.0 { hi_bound } else { lo_bound };
        let rest: Vec<f64> = self
            .minimum
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, x)| *x)
            .collect();

        let mut inside = 0.0;
        let mut others = rest.clone();
        let mut step = if error > 0.0 { error } else { self.steps[index] };
        let mut outside = None;

        for _ in 0..MAX_BRACKET_STEPS {
            let mut trial = center + direction * step;
            let at_limit =
                (direction > 0.0 && trial >= limit) || (direction < 0.0 && trial <= limit);
            if at_limit {
                trial = limit;
            }
            let rise = self.value(index, trial, &mut others) - f_min;
            if rise >= ERROR_DEF {
                outside = Some((trial - center).abs());
                break;
            }
            inside = (trial - center).abs();
            if at_limit {
                return (direction * inside, false);
            }
            step *= 2.0;
        }

        let Some(mut outside) = outside else {
            return (direction * inside, false);
        };

        let mut others = rest;
        for _ in 0..MAX_BISECTIONS {
            let mid = 0.5 * (inside + outside);
            let rise = self.value(index, center + direction * mid, &mut others) - f_min;
            if (rise - ERROR_DEF).abs() < CROSSING_TOLERANCE {
                return (direction * mid, true);
            }
            if rise < ERROR_DEF {
                inside = mid;
            } else {
                outside = mid;
            }
        }
        (direction * 0.5 * (inside + outside), true)
    }
}

/// Scan every parameter around `minimum`.
///
/// `errors` are the parabolic errors used as the first bracketing step.
pub fn minos<F: Fn(&[f64]) -> f64>(
    f: &F,
    minimum: &[f64],
    f_min: f64,
    errors: &[f64],
    steps: &[f64],
    bounds: &[(f64, f64)],
    options: &NelderMeadOptions,
) -> Vec<MinosError> {
    let profile = Profile {
        f,
        minimum,
        steps,
        bounds,
        options: NelderMeadOptions {
            x_tolerance: options.x_tolerance.max(PROFILE_X_TOLERANCE),
            ..*options
        },
    };
    (0..minimum.len())
        .map(|i| {
            let (lower, lower_ok) = profile.crossing(i, f_min, errors[i], -1.0);
            let (upper, upper_ok) = profile.crossing(i, f_min, errors[i], 1.0);
            MinosError {
                lower,
                upper,
                valid: lower_ok && upper_ok,
            }
        })
        .collect()
}
