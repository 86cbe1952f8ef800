//! Nelder-Mead simplex minimization
//!
//! Derivative-free minimizer used for the likelihood. It keeps a simplex of
//! N+1 points in N-dimensional space, transforming it toward the minimum. Each
//! trial point is clamped to the parameter bounds.

/// Standard Nelder-Mead coefficients
const REFLECTION_COEF: f64 = 1.0;
const EXPANSION_COEF: f64 = 2.0;
const CONTRACTION_COEF: f64 = 0.5;
const SHRINK_COEF: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct NelderMeadOptions {
    /// Stop when the objective spread over the simplex falls below this
    pub f_tolerance: f64,
    /// ... and every vertex is within this many initial steps of the centroid
    pub x_tolerance: f64,
    pub max_evaluations: usize,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            f_tolerance: 1e-8,
            x_tolerance: 1e-5,
            max_evaluations: 50_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Minimum {
    pub values: Vec<f64>,
    pub objective: f64,
    pub evaluations: usize,
    pub converged: bool,
}

/// A point in parameter space with its objective
#[derive(Debug, Clone)]
struct SimplexVertex {
    values: Vec<f64>,
    objective: f64,
}

/// Objective wrapper counting calls
struct Counted<F> {
    f: F,
    calls: usize,
}

impl<F: FnMut(&[f64]) -> f64> Counted<F> {
    fn eval(&mut self, values: Vec<f64>) -> SimplexVertex {
        self.calls += 1;
        let objective = (self.f)(&values);
        SimplexVertex {
            values,
            // NaN would break the ordering
            objective: if objective.is_nan() {
                f64::INFINITY
            } else {
                objective
            },
        }
    }
}

/// Start at `start` and perturb each dimension by its step, away from the bound
fn initialize_simplex<F: FnMut(&[f64]) -> f64>(
    objective: &mut Counted<F>,
    start: &[f64],
    steps: &[f64],
    bounds: &[(f64, f64)],
) -> Vec<SimplexVertex> {
    let mut simplex = Vec::with_capacity(start.len() + 1);
    simplex.push(objective.eval(start.to_vec()));

    for i in 0..start.len() {
        let mut point = start.to_vec();
        let (min, max) = bounds[i];
        if point[i] + steps[i] <= max {
            point[i] += steps[i];
        } else if point[i] - steps[i] >= min {
            point[i] -= steps[i];
        } else {
            point[i] = 0.5 * (min + max);
        }
        simplex.push(objective.eval(point));
    }

    simplex
}

/// Calculate the centroid of all points except the worst
fn centroid(simplex: &[SimplexVertex]) -> Vec<f64> {
    let n = simplex[0].values.len();
    let mut center = vec![0.0; n];

    for vertex in simplex.iter().take(simplex.len() - 1) {
        for (i, val) in vertex.values.iter().enumerate() {
            center[i] += val;
        }
    }

    let count = (simplex.len() - 1) as f64;
    for val in &mut center {
        *val /= count;
    }

    center
}

/// Reflect a point through the centroid
fn reflect(point: &[f64], centroid: &[f64], coef: f64) -> Vec<f64> {
    point
        .iter()
        .zip(centroid.iter())
        .map(|(p, c)| c + coef * (c - p))
        .collect()
}

fn clamp_to_bounds(values: &mut [f64], bounds: &[(f64, f64)]) {
    for (val, (min, max)) in values.iter_mut().zip(bounds.iter()) {
        *val = val.clamp(*min, *max);
    }
}

/// Largest distance from the centroid, each dimension measured in initial steps
fn simplex_size(simplex: &[SimplexVertex], centroid: &[f64], steps: &[f64]) -> f64 {
    simplex
        .iter()
        .map(|v| {
            v.values
                .iter()
                .zip(centroid.iter())
                .zip(steps.iter())
                .map(|((a, b), s)| ((a - b) / s).powi(2))
                .sum::<f64>()
                .sqrt()
        })
        .fold(0.0_f64, |a, b| a.max(b))
}

fn sort_simplex(simplex: &mut [SimplexVertex]) {
    simplex.sort_by(|a, b| a.objective.total_cmp(&b.objective));
}

/// Minimize `objective` within `bounds`.
///
/// `steps` sets the size of the initial simplex and the scale of the
/// convergence test; all entries must be positive.
pub fn minimize<F: FnMut(&[f64]) -> f64>(
    objective: F,
    start: &[f64],
    steps: &[f64],
    bounds: &[(f64, f64)],
    options: &NelderMeadOptions,
) -> Minimum {
    let mut objective = Counted {
        f: objective,
        calls: 0,
    };
    let mut simplex = initialize_simplex(&mut objective, start, steps, bounds);
    let mut converged = false;

    while objective.calls < options.max_evaluations {
        // Best first, worst last
        sort_simplex(&mut simplex);

        let cent = centroid(&simplex);
        let worst_idx = simplex.len() - 1;
        let best_objective = simplex[0].objective;
        let second_worst_objective = simplex[worst_idx - 1].objective;
        let worst_objective = simplex[worst_idx].objective;

        let spread = worst_objective - best_objective;
        if spread.is_finite()
            && spread <= options.f_tolerance * (1.0 + best_objective.abs())
            && simplex_size(&simplex, &cent, steps) <= options.x_tolerance
        {
            converged = true;
            break;
        }

        let worst_values = simplex[worst_idx].values.clone();

        let mut reflected = reflect(&worst_values, &cent, REFLECTION_COEF);
        clamp_to_bounds(&mut reflected, bounds);
        let reflected = objective.eval(reflected);

        if reflected.objective < best_objective {
            let mut expanded = reflect(&worst_values, &cent, EXPANSION_COEF);
            clamp_to_bounds(&mut expanded, bounds);
            let expanded = objective.eval(expanded);
            simplex[worst_idx] = if expanded.objective < reflected.objective {
                expanded
            } else {
                reflected
            };
        } else if reflected.objective < second_worst_objective {
            simplex[worst_idx] = reflected;
        } else {
            let contract_point = if reflected.objective < worst_objective {
                &reflected.values
            } else {
                &worst_values
            };
            let mut contracted: Vec<f64> = cent
                .iter()
                .zip(contract_point.iter())
                .map(|(c, p)| c + CONTRACTION_COEF * (p - c))
                .collect();
            clamp_to_bounds(&mut contracted, bounds);
            let contracted = objective.eval(contracted);

            if contracted.objective < worst_objective.min(reflected.objective) {
                simplex[worst_idx] = contracted;
            } else {
                // Shrink toward the best point
                let best_values = simplex[0].values.clone();
                for vertex in simplex.iter_mut().skip(1) {
                    let mut shrunk: Vec<f64> = best_values
                        .iter()
                        .zip(vertex.values.iter())
                        .map(|(b, v)| b + SHRINK_COEF * (v - b))
                        .collect();
                    clamp_to_bounds(&mut shrunk, bounds);
                    *vertex = objective.eval(shrunk);
                }
            }
        }
    }

    sort_simplex(&mut simplex);
    let best = simplex.swap_remove(0);
    Minimum {
        values: best.values,
        objective: best.objective,
        evaluations: objective.calls,
        converged,
    }
}
