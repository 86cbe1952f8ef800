//! Dense matrix helpers shared by the fit result manager and the systematics.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::FitResultError;

/// Relative tolerance used to decide whether a negative eigenvalue is noise.
const EIGEN_TOLERANCE: f64 = 1e-10;

/// Combine square (or rectangular) blocks into one block-diagonal matrix.
///
/// Off-diagonal blocks are zero.
pub fn block_diagonal(blocks: &[DMatrix<f64>]) -> DMatrix<f64> {
    let rows = blocks.iter().map(|b| b.nrows()).sum();
    let cols = blocks.iter().map(|b| b.ncols()).sum();
    let mut output = DMatrix::zeros(rows, cols);

    let (mut row, mut col) = (0, 0);
    for block in blocks {
        output
            .view_mut((row, col), (block.nrows(), block.ncols()))
            .copy_from(block);
        row += block.nrows();
        col += block.ncols();
    }

    output
}

/// Reshape a row-major flat sequence into an `n x n` matrix.
pub fn square_from_flat(values: &[f64], n: usize) -> Option<DMatrix<f64>> {
    if values.len() != n * n {
        return None;
    }
    Some(DMatrix::from_row_slice(n, n, values))
}

/// Flatten a matrix row-major.
pub fn flatten_row_major(matrix: &DMatrix<f64>) -> Vec<f64> {
    let mut out = Vec::with_capacity(matrix.nrows() * matrix.ncols());
    for row in matrix.row_iter() {
        out.extend(row.iter().copied());
    }
    out
}

/// Multivariate normal distribution parameterized by a mean and a covariance.
///
/// The covariance is factorized once at construction: Cholesky when it is
/// positive definite, otherwise an eigen decomposition with negligible
/// negative eigenvalues clipped to zero (positive semi-definite case).
#[derive(Debug, Clone)]
pub struct MultivariateNormal {
    mean: DVector<f64>,
    factor: DMatrix<f64>,
}

impl MultivariateNormal {
    pub fn new(mean: DVector<f64>, covariance: &DMatrix<f64>) -> Result<Self, FitResultError> {
        let n = mean.len();
        if covariance.nrows() != n || covariance.ncols() != n {
            return Err(FitResultError::InvalidCovariance(format!(
                "covariance is {}x{} but there are {n} central values",
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        if covariance.iter().any(|v| !v.is_finite()) {
            return Err(FitResultError::InvalidCovariance(
                "covariance has non-finite entries".to_string(),
            ));
        }

        let scale = covariance.amax().max(f64::MIN_POSITIVE);
        let asymmetry = (covariance - covariance.transpose()).amax();
        if asymmetry > EIGEN_TOLERANCE.sqrt() * scale {
            return Err(FitResultError::InvalidCovariance(format!(
                "covariance is not symmetric (max asymmetry {asymmetry})"
            )));
        }

        if let Some(cholesky) = covariance.clone().cholesky() {
            return Ok(Self {
                mean,
                factor: cholesky.l(),
            });
        }

        let eigen = covariance.clone().symmetric_eigen();
        let mut roots = DVector::zeros(n);
        for (i, lambda) in eigen.eigenvalues.iter().enumerate() {
            if *lambda < -EIGEN_TOLERANCE * scale {
                return Err(FitResultError::InvalidCovariance(format!(
                    "covariance is not positive semi-definite (eigenvalue {lambda})"
                )));
            }
            roots[i] = lambda.max(0.0).sqrt();
        }
        let factor = &eigen.eigenvectors * DMatrix::from_diagonal(&roots);

        Ok(Self { mean, factor })
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    /// Draw one vector.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> DVector<f64> {
        let z = DVector::from_iterator(
            self.dimension(),
            (0..self.dimension()).map(|_| StandardNormal.sample(rng)),
        );
        &self.mean + &self.factor * z
    }
}
