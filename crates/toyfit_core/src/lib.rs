//! Systematic toy studies over unbinned maximum-likelihood fits
//!
//! This crate provides the pieces of a toy-based systematic study:
//! - Physics models built from YAML: products of 1-D shapes, extended sums, categories
//! - An unbinned likelihood fitter with covariance and asymmetric errors
//! - A fit result manager that serializes, flattens and samples fit results
//! - Systematic strategies that randomize the generation model
//! - The generate/fit toy loop and its CSV toy store
//!
//! # Running toys
//!
//! ```ignore
//! use toyfit_core::prelude::*;
//!
//! let config = ToyConfig::from_value(&load_config(&["syst.yaml"])?)?;
//! let model = PhysicsModel::from_config(&ModelConfig::from_value(config.model.clone())?)?;
//! let paths = DataPaths::new("/data");
//! let registry = SystematicRegistry::with_builtins();
//! let systematic = registry.build(&SystematicContext { model: &model, config: &config.syst, paths: &paths })?;
//! let mut generator = ToyGenerator::new(model.clone(), systematic);
//! let output = run_syst_toys(&LikelihoodFitter::default(), &model, &mut generator, None, &settings, &mut entropy)?;
//! ToyStore::open(&paths, &config.name, None)?.write_run(&output)?;
//! ```

#![warn(clippy::all)]

// ============================================================================
// Core modules
// ============================================================================

pub mod acceptance;
pub mod data;
pub mod error;
pub mod fit;
pub mod linalg;
pub mod model;
pub mod toys;

// ============================================================================
// Support modules
// ============================================================================

pub mod config;
pub mod io;
pub mod paths;

// ============================================================================
// Test modules
// ============================================================================

#[cfg(test)]
mod tests;

// ============================================================================
// Public re-exports for convenience
// ============================================================================

pub mod prelude {
    pub use crate::acceptance::{Acceptance, EfficiencyAcceptance};
    pub use crate::config::{FitConfig, ToyConfig, load_config};
    pub use crate::data::Dataset;
    pub use crate::error::{Result, ToyError};
    pub use crate::fit::{FitEngine, FitOptions, FitResult, FitStrategy, LikelihoodFitter};
    pub use crate::model::{ModelConfig, PhysicsModel};
    pub use crate::paths::DataPaths;
    pub use crate::toys::{
        SystToySettings, SystematicContext, SystematicRegistry, ToyGenerator, ToyStore,
        run_syst_toys,
    };
}
