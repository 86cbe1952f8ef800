//! One-dimensional shapes normalized on the observable range.

use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::function::erf::erfc;

use crate::error::{FitError, ModelError};
use crate::model::ParameterSet;

const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

/// Below this |slope * width| the exponential is treated as flat
const FLAT_EXPONENTIAL_LIMIT: f64 = 1e-10;

/// Shape description as written in the model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShapeConfig {
    Gaussian {
        observable: String,
        mu: String,
        sigma: String,
    },
    /// `exp(tau * x)`
    Exponential { observable: String, tau: String },
    Flat { observable: String },
}

impl ShapeConfig {
    pub fn observable(&self) -> &str {
        match self {
            ShapeConfig::Gaussian { observable, .. }
            | ShapeConfig::Exponential { observable, .. }
            | ShapeConfig::Flat { observable } => observable,
        }
    }

    /// Resolve parameter names against the model parameter set
    pub fn resolve(&self, observable: usize, params: &ParameterSet) -> Result<Shape, ModelError> {
        Ok(match self {
            ShapeConfig::Gaussian { mu, sigma, .. } => Shape::Gaussian {
                observable,
                mu: params.index_of(mu)?,
                sigma: params.index_of(sigma)?,
            },
            ShapeConfig::Exponential { tau, .. } => Shape::Exponential {
                observable,
                tau: params.index_of(tau)?,
            },
            ShapeConfig::Flat { .. } => Shape::Flat { observable },
        })
    }
}

/// Resolved shape: observable and parameters are indices into the model
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Gaussian {
        observable: usize,
        mu: usize,
        sigma: usize,
    },
    Exponential {
        observable: usize,
        tau: usize,
    },
    Flat {
        observable: usize,
    },
}

pub(crate) fn standard_normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

/// Edge where the exponential is largest, so every evaluation stays below one
fn exponential_reference(slope: f64, (min, max): (f64, f64)) -> f64 {
    if slope > 0.0 { max } else { min }
}

impl Shape {
    pub fn observable(&self) -> usize {
        match self {
            Shape::Gaussian { observable, .. }
            | Shape::Exponential { observable, .. }
            | Shape::Flat { observable } => *observable,
        }
    }

    /// Integral of [`Shape::unnormalized`] over the range.
    ///
    /// Zero for invalid parameter values (e.g. non-positive width).
    pub fn normalization(&self, params: &[f64], (min, max): (f64, f64)) -> f64 {
        match *self {
            Shape::Gaussian { mu, sigma, .. } => {
                let (mu, sigma) = (params[mu], params[sigma]);
                if !(sigma > 0.0) {
                    return 0.0;
                }
                standard_normal_cdf((max - mu) / sigma) - standard_normal_cdf((min - mu) / sigma)
            }
            Shape::Exponential { tau, .. } => {
                let slope = params[tau];
                if (slope * (max - min)).abs() < FLAT_EXPONENTIAL_LIMIT {
                    return max - min;
                }
                let reference = exponential_reference(slope, (min, max));
                ((slope * (max - reference)).exp() - (slope * (min - reference)).exp()) / slope
            }
            Shape::Flat { .. } => max - min,
        }
    }

    pub fn unnormalized(&self, x: f64, params: &[f64], (min, max): (f64, f64)) -> f64 {
        match *self {
            Shape::Gaussian { mu, sigma, .. } => {
                let (mu, sigma) = (params[mu], params[sigma]);
                let z = (x - mu) / sigma;
                INV_SQRT_2PI * (-0.5 * z * z).exp() / sigma
            }
            Shape::Exponential { tau, .. } => {
                let slope = params[tau];
                if (slope * (max - min)).abs() < FLAT_EXPONENTIAL_LIMIT {
                    return 1.0;
                }
                (slope * (x - exponential_reference(slope, (min, max)))).exp()
            }
            Shape::Flat { .. } => 1.0,
        }
    }

    /// Normalized density at `x` for the given parameter values and range.
    ///
    /// Invalid parameter values give zero density.
    pub fn density(&self, x: f64, params: &[f64], range: (f64, f64)) -> f64 {
        let norm = self.normalization(params, range);
        if !(norm > 0.0) || !norm.is_finite() {
            return 0.0;
        }
        self.unnormalized(x, params, range) / norm
    }

    /// Draw one value inside the range
    pub fn sample<R: Rng + ?Sized>(
        &self,
        params: &[f64],
        (min, max): (f64, f64),
        rng: &mut R,
    ) -> Result<f64, FitError> {
        let u: f64 = rng.random();
        let x = match *self {
            Shape::Gaussian { mu, sigma, .. } => {
                let (mu, sigma) = (params[mu], params[sigma]);
                let normal = Normal::new(mu, sigma).map_err(|e| {
                    FitError::Generation(format!("invalid gaussian (mu={mu}, sigma={sigma}): {e}"))
                })?;
                let (lo, hi) = (normal.cdf(min), normal.cdf(max));
                if !(hi > lo) {
                    return Err(FitError::Generation(format!(
                        "gaussian (mu={mu}, sigma={sigma}) has no probability in [{min}, {max}]"
                    )));
                }
                normal.inverse_cdf(lo + u * (hi - lo))
            }
            Shape::Exponential { tau, .. } => {
                let slope = params[tau];
                if (slope * (max - min)).abs() < FLAT_EXPONENTIAL_LIMIT {
                    min + u * (max - min)
                } else {
                    let reference = exponential_reference(slope, (min, max));
                    let lo = (slope * (min - reference)).exp();
                    let hi = (slope * (max - reference)).exp();
                    reference + (lo + u * (hi - lo)).ln() / slope
                }
            }
            Shape::Flat { .. } => min + u * (max - min),
        };
        Ok(x.clamp(min, max))
    }
}
