//! Systematic strategies: how the generation model is randomized before each toy.
//!
//! Strategies are looked up by the `type` key of the `syst` configuration node in a
//! [`SystematicRegistry`], which is built by the caller and passed down to the run.

use std::fmt;

use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};
use rand::RngCore;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{ConfigError, ModelError, ToyError};
use crate::fit::FitResult;
use crate::linalg::{MultivariateNormal, block_diagonal};
use crate::model::PhysicsModel;
use crate::paths::DataPaths;

/// Randomizes nuisance parameters of a generation model
pub trait Systematic: fmt::Debug {
    fn name(&self) -> &str;

    /// Write new values into `model`, returning how many parameters changed
    fn randomize(&self, model: &mut PhysicsModel, rng: &mut dyn RngCore)
    -> Result<usize, ToyError>;
}

/// Inputs available to a strategy while it is being configured
#[derive(Debug, Clone, Copy)]
pub struct SystematicContext<'a> {
    /// The generation model, before any randomization
    pub model: &'a PhysicsModel,
    /// The whole `syst` configuration node
    pub config: &'a Value,
    pub paths: &'a DataPaths,
}

pub type SystematicBuilder = fn(&SystematicContext<'_>) -> Result<Box<dyn Systematic>, ToyError>;

/// Name -> builder table of the available strategies
#[derive(Clone, Default)]
pub struct SystematicRegistry {
    builders: IndexMap<String, SystematicBuilder>,
}

impl fmt::Debug for SystematicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystematicRegistry")
            .field("names", &self.builders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SystematicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `none` and `fixed_params`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.builders.insert(NoneSyst::NAME.to_string(), NoneSyst::build);
        registry
            .builders
            .insert(FixedParamsSyst::NAME.to_string(), FixedParamsSyst::build);
        registry
    }

    /// Add a strategy, returning the number of registered strategies
    pub fn register(
        &mut self,
        name: impl Into<String>,
        builder: SystematicBuilder,
    ) -> Result<usize, ConfigError> {
        let name = name.into();
        if self.builders.contains_key(&name) {
            return Err(ConfigError::DuplicateSystematic(name));
        }
        debug!(systematic = %name, "Registering systematic");
        self.builders.insert(name, builder);
        Ok(self.builders.len())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Result<SystematicBuilder, ConfigError> {
        self.builders
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::UnknownSystematic(name.to_string()))
    }

    /// Build the strategy named by `syst/type`
    pub fn build(&self, ctx: &SystematicContext<'_>) -> Result<Box<dyn Systematic>, ToyError> {
        let kind = ctx
            .config
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ConfigError::MissingKeys(vec!["syst/type".to_string()]))?;
        let builder = self.get(kind)?;
        builder(ctx)
    }
}

/// Leaves the model untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneSyst;

impl NoneSyst {
    pub const NAME: &'static str = "none";

    fn build(_ctx: &SystematicContext<'_>) -> Result<Box<dyn Systematic>, ToyError> {
        Ok(Box::new(NoneSyst))
    }
}

impl Systematic for NoneSyst {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn randomize(
        &self,
        _model: &mut PhysicsModel,
        _rng: &mut dyn RngCore,
    ) -> Result<usize, ToyError> {
        Ok(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct PriorResultConfig {
    result: String,
    /// fit result parameter -> generation model parameter
    param_names: IndexMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FixedParamsConfig {
    syst: Vec<PriorResultConfig>,
}

/// Draws parameters from the covariance of earlier fit results.
///
/// ```yaml
/// syst:
///   type: fixed_params
///   syst:
///     - result: mc-signal-shape
///       param_names: {mu: mu_sig, sigma: sigma_sig}
/// ```
#[derive(Debug, Clone)]
pub struct FixedParamsSyst {
    /// Generation model parameter of each component of the sampled vector
    targets: Vec<String>,
    distribution: MultivariateNormal,
}

impl FixedParamsSyst {
    pub const NAME: &'static str = "fixed_params";

    fn build(ctx: &SystematicContext<'_>) -> Result<Box<dyn Systematic>, ToyError> {
        let config: FixedParamsConfig =
            serde_json::from_value(ctx.config.clone()).map_err(|e| ConfigError::Invalid {
                key: "syst".to_string(),
                reason: e.to_string(),
            })?;
        let mut priors = Vec::with_capacity(config.syst.len());
        for prior in config.syst {
            let result = FitResult::load(&prior.result, ctx.paths)?;
            priors.push((result, prior.param_names));
        }
        Ok(Box::new(Self::from_results(ctx.model, &priors)?))
    }

    /// Combine prior results, each with its own name mapping.
    ///
    /// The covariance is block diagonal: parameters of different results are
    /// taken as uncorrelated.
    pub fn from_results(
        model: &PhysicsModel,
        priors: &[(FitResult, IndexMap<String, String>)],
    ) -> Result<Self, ToyError> {
        let mut blocks: Vec<DMatrix<f64>> = Vec::with_capacity(priors.len());
        let mut central = Vec::new();
        let mut targets = Vec::new();
        for (result, mapping) in priors {
            let names: Vec<&String> = mapping.keys().collect();
            blocks.push(result.covariance_submatrix(&names)?);
            for (fit_name, model_name) in mapping {
                central.push(result.fit_parameter(fit_name)?.value);
                if !model.parameters().contains(model_name) {
                    return Err(ModelError::UnknownParameter(model_name.clone()).into());
                }
                targets.push(model_name.clone());
            }
        }
        let distribution =
            MultivariateNormal::new(DVector::from_vec(central), &block_diagonal(&blocks))?;
        Ok(Self {
            targets,
            distribution,
        })
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }
}

impl Systematic for FixedParamsSyst {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn randomize(
        &self,
        model: &mut PhysicsModel,
        rng: &mut dyn RngCore,
    ) -> Result<usize, ToyError> {
        let sample = self.distribution.sample(rng);
        for (name, value) in self.targets.iter().zip(sample.iter()) {
            model.set_value(name, *value)?;
        }
        Ok(sample.len())
    }
}
