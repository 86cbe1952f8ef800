//! Covariance estimation from a finite-difference Hessian of the NLL.

use nalgebra::{DMatrix, DVector};

use super::COV_QUALITY_FULL_ACCURATE;

/// Covariance forced positive-definite by diagonal damping
pub const COV_QUALITY_FORCED_POS_DEF: i32 = 2;
/// Only the Hessian diagonal could be used
pub const COV_QUALITY_DIAGONAL: i32 = 1;
pub const COV_QUALITY_NOT_AVAILABLE: i32 = 0;

const MAX_DAMPING_ATTEMPTS: usize = 10;

#[derive(Debug, Clone)]
pub struct HesseOutcome {
    pub covariance: DMatrix<f64>,
    pub quality: i32,
    /// 0 when the full inverse was obtained
    pub status: i32,
    /// Estimated distance to the minimum, `None` without a covariance
    pub edm: Option<f64>,
}

impl HesseOutcome {
    pub fn errors(&self) -> Vec<f64> {
        (0..self.covariance.nrows())
            .map(|i| self.covariance[(i, i)].max(0.0).sqrt())
            .collect()
    }
}

/// Central-difference gradient
pub fn gradient<F: Fn(&[f64]) -> f64>(f: &F, x: &[f64], h: &[f64]) -> DVector<f64> {
    let mut point = x.to_vec();
    DVector::from_iterator(
        x.len(),
        (0..x.len()).map(|i| {
            point[i] = x[i] + h[i];
            let up = f(&point);
            point[i] = x[i] - h[i];
            let down = f(&point);
            point[i] = x[i];
            (up - down) / (2.0 * h[i])
        }),
    )
}

/// Central-difference Hessian, symmetric by construction
pub fn hessian<F: Fn(&[f64]) -> f64>(f: &F, x: &[f64], h: &[f64]) -> DMatrix<f64> {
    let n = x.len();
    let f0 = f(x);
    let mut point = x.to_vec();
    let mut eval = |shifts: &[(usize, f64)]| {
        for (i, s) in shifts {
            point[*i] = x[*i] + s;
        }
        let value = f(&point);
        for (i, _) in shifts {
            point[*i] = x[*i];
        }
        value
    };

    let mut hess = DMatrix::zeros(n, n);
    for i in 0..n {
        let up = eval(&[(i, h[i])]);
        let down = eval(&[(i, -h[i])]);
        hess[(i, i)] = (up - 2.0 * f0 + down) / (h[i] * h[i]);
        for j in 0..i {
            let pp = eval(&[(i, h[i]), (j, h[j])]);
            let pm = eval(&[(i, h[i]), (j, -h[j])]);
            let mp = eval(&[(i, -h[i]), (j, h[j])]);
            let mm = eval(&[(i, -h[i]), (j, -h[j])]);
            let value = (pp - pm - mp + mm) / (4.0 * h[i] * h[j]);
            hess[(i, j)] = value;
            hess[(j, i)] = value;
        }
    }
    hess
}

/// Invert a Hessian into a covariance.
///
/// Tries Cholesky on the Hessian itself, then with geometrically growing
/// diagonal damping. Returns the covariance and whether damping was needed.
pub fn invert_hessian(hessian: &DMatrix<f64>) -> Option<(DMatrix<f64>, bool)> {
    let n = hessian.nrows();
    if hessian.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n)
        .map(|i| hessian[(i, i)].abs())
        .fold(0.0_f64, f64::max)
        .max(1.0);

    let mut damped = hessian.clone();
    let mut damping = 0.0_f64;
    for attempt in 0..MAX_DAMPING_ATTEMPTS {
        if let Some(chol) = damped.clone().cholesky() {
            return Some((chol.solve(&identity), damping > 0.0));
        }
        if attempt + 1 == MAX_DAMPING_ATTEMPTS {
            break;
        }
        let next = if damping == 0.0 {
            diag_scale * 1e-9
        } else {
            damping * 10.0
        };
        for i in 0..n {
            damped[(i, i)] += next - damping;
        }
        damping = next;
    }

    let cov = damped.lu().try_inverse()?;
    if (0..n).any(|i| !(cov[(i, i)].is_finite() && cov[(i, i)] > 0.0)) {
        return None;
    }
    Some((cov, true))
}

/// Run the full covariance estimate at the minimum `x`.
pub fn hesse<F: Fn(&[f64]) -> f64>(f: &F, x: &[f64], h: &[f64]) -> HesseOutcome {
    let n = x.len();
    let hess = hessian(f, x, h);

    match invert_hessian(&hess) {
        Some((covariance, damped)) => {
            let g = gradient(f, x, h);
            let edm = 0.5 * g.dot(&(&covariance * &g));
            HesseOutcome {
                covariance,
                quality: if damped {
                    COV_QUALITY_FORCED_POS_DEF
                } else {
                    COV_QUALITY_FULL_ACCURATE
                },
                status: 0,
                edm: edm.is_finite().then_some(edm),
            }
        }
        None if hess.iter().all(|v| v.is_finite()) => {
            let diagonal = DVector::from_iterator(
                n,
                (0..n).map(|i| 1.0 / hess[(i, i)].abs().max(1e-12)),
            );
            HesseOutcome {
                covariance: DMatrix::from_diagonal(&diagonal),
                quality: COV_QUALITY_DIAGONAL,
                status: 1,
                edm: None,
            }
        }
        None => HesseOutcome {
            covariance: DMatrix::zeros(n, n),
            quality: COV_QUALITY_NOT_AVAILABLE,
            status: 1,
            edm: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic(x: &[f64]) -> f64 {
        // 0.5 x^T A x with A = [[4, 1], [1, 2]]
        0.5 * (4.0 * x[0] * x[0] + 2.0 * x[0] * x[1] + 2.0 * x[1] * x[1])
    }

    #[test]
    fn test_hessian_of_quadratic() {
        let hess = hessian(&quadratic, &[0.3, -0.2], &[1e-3, 1e-3]);
        assert!((hess[(0, 0)] - 4.0).abs() < 1e-5);
        assert!((hess[(0, 1)] - 1.0).abs() < 1e-5);
        assert!((hess[(1, 1)] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_hesse_full_accurate_at_minimum() {
        let outcome = hesse(&quadratic, &[0.0, 0.0], &[1e-3, 1e-3]);
        assert_eq!(outcome.quality, COV_QUALITY_FULL_ACCURATE);
        assert_eq!(outcome.status, 0);
        // inverse of [[4, 1], [1, 2]] is [[2, -1], [-1, 4]] / 7
        assert!((outcome.covariance[(0, 0)] - 2.0 / 7.0).abs() < 1e-6);
        assert!((outcome.covariance[(0, 1)] + 1.0 / 7.0).abs() < 1e-6);
        assert!(outcome.edm.unwrap() < 1e-12);
    }

    #[test]
    fn test_edm_away_from_minimum() {
        // For a quadratic the EDM is the exact distance to the minimum
        let outcome = hesse(&quadratic, &[0.5, 0.0], &[1e-3, 1e-3]);
        let expected = quadratic(&[0.5, 0.0]);
        assert!((outcome.edm.unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_saddle_is_damped_or_diagonal() {
        let saddle = |x: &[f64]| x[0] * x[0] - x[1] * x[1];
        let outcome = hesse(&saddle, &[0.0, 0.0], &[1e-3, 1e-3]);
        assert!(outcome.quality < COV_QUALITY_FULL_ACCURATE);
    }

    #[test]
    fn test_non_finite_hessian() {
        let bad = |x: &[f64]| if x[0] > 0.0 { f64::INFINITY } else { x[0] * x[0] };
        let outcome = hesse(&bad, &[0.0], &[1e-3]);
        assert_eq!(outcome.quality, COV_QUALITY_NOT_AVAILABLE);
        assert_eq!(outcome.status, 1);
        assert_eq!(outcome.errors(), vec![0.0]);
    }
}
