//! Maximum-likelihood fitting
//!
//! The toy loop talks to the fitter through [`FitEngine`], and reads its output
//! through [`EngineResult`]. [`LikelihoodFitter`] is the bundled engine: a bounded
//! Nelder-Mead minimization of the unbinned NLL ("MIGRAD"), a finite-difference
//! covariance ("HESSE") and optional profile scans ("MINOS").
//!
//! ```ignore
//! let raw = LikelihoodFitter::default().fit(&model, "model", FitStrategy::Simple, &data, &FitOptions::default())?;
//! let mut result = FitResult::new();
//! result.populate_from_engine(&raw)?;
//! ```

mod engine;
pub mod hesse;
mod likelihood;
pub mod minos;
pub mod nelder_mead;
mod result;

pub use engine::{LikelihoodFitResult, LikelihoodFitter};
pub use likelihood::Likelihood;
pub use result::{
    FitParameter, FitResult, FlatRecord, FlatValue, SerializedCovariance, SerializedFitResult,
};

use std::fmt;
use std::str::FromStr;

use nalgebra::DMatrix;

use crate::data::Dataset;
use crate::error::{ConfigError, FitError};
use crate::model::PhysicsModel;

/// Status code of a stage that finished without problems
pub const STATUS_SUCCESS: i32 = 0;
/// Best covariance quality grade: full, accurate matrix
pub const COV_QUALITY_FULL_ACCURATE: i32 = 3;

pub const STAGE_MIGRAD: &str = "MIGRAD";
pub const STAGE_HESSE: &str = "HESSE";
pub const STAGE_MINOS: &str = "MINOS";

/// A floating parameter as reported by a fit engine
#[derive(Debug, Clone, PartialEq)]
pub struct RawParameter {
    pub name: String,
    pub value: f64,
    pub error: f64,
    /// Lower asymmetric error, negative; zero when not computed
    pub error_low: f64,
    pub error_high: f64,
    pub initial: f64,
}

/// Narrow view over the raw output of a fit engine
pub trait EngineResult {
    fn constant_parameters(&self) -> Vec<(String, f64)>;
    fn floating_parameters(&self) -> Vec<RawParameter>;
    /// Square over the floating parameters, in the same order
    fn covariance(&self) -> DMatrix<f64>;
    fn covariance_quality(&self) -> i32;
    /// (stage label, status code) in execution order
    fn status_history(&self) -> Vec<(String, i32)>;
    fn edm(&self) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitStrategy {
    /// One minimization
    #[default]
    Simple,
    /// Minimize again from the optimum until the NLL stops improving
    Restart,
}

impl FitStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            FitStrategy::Simple => "simple",
            FitStrategy::Restart => "restart",
        }
    }
}

impl fmt::Display for FitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FitStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(FitStrategy::Simple),
            "restart" => Ok(FitStrategy::Restart),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FitOptions {
    pub extended: bool,
    pub minos: bool,
    pub verbose: bool,
}

pub trait FitEngine {
    type Output: EngineResult;

    /// Fit `dataset` starting from the model's current parameter values.
    ///
    /// The model itself is left untouched.
    fn fit(
        &self,
        model: &PhysicsModel,
        model_name: &str,
        strategy: FitStrategy,
        dataset: &Dataset,
        options: &FitOptions,
    ) -> Result<Self::Output, FitError>;
}
