use nalgebra::DMatrix;
use tracing::{debug, trace};

use super::hesse;
use super::likelihood::Likelihood;
use super::minos;
use super::nelder_mead::{self, NelderMeadOptions};
use super::{
    EngineResult, FitEngine, FitOptions, FitStrategy, RawParameter, STAGE_HESSE, STAGE_MIGRAD,
    STAGE_MINOS, STATUS_SUCCESS,
};
use crate::data::Dataset;
use crate::error::FitError;
use crate::model::PhysicsModel;

/// MIGRAD-style status when the call limit was reached
const STATUS_CALL_LIMIT: i32 = 4;
const STATUS_FAILED: i32 = 1;

/// Finite-difference step as a fraction of the initial simplex step
const HESSE_STEP_FRACTION: f64 = 1e-3;

/// Unbinned maximum-likelihood fitter
#[derive(Debug, Clone)]
pub struct LikelihoodFitter {
    pub minimizer: NelderMeadOptions,
    /// Upper bound on restarts for [`FitStrategy::Restart`]
    pub max_restarts: usize,
}

impl Default for LikelihoodFitter {
    fn default() -> Self {
        Self {
            minimizer: NelderMeadOptions::default(),
            max_restarts: 5,
        }
    }
}

/// Raw output of [`LikelihoodFitter`]
#[derive(Debug, Clone)]
pub struct LikelihoodFitResult {
    pub constants: Vec<(String, f64)>,
    pub floating: Vec<RawParameter>,
    pub covariance: DMatrix<f64>,
    pub covariance_quality: i32,
    pub status: Vec<(String, i32)>,
    pub edm: Option<f64>,
    pub nll: f64,
    pub evaluations: usize,
}

impl EngineResult for LikelihoodFitResult {
    fn constant_parameters(&self) -> Vec<(String, f64)> {
        self.constants.clone()
    }

    fn floating_parameters(&self) -> Vec<RawParameter> {
        self.floating.clone()
    }

    fn covariance(&self) -> DMatrix<f64> {
        self.covariance.clone()
    }

    fn covariance_quality(&self) -> i32 {
        self.covariance_quality
    }

    fn status_history(&self) -> Vec<(String, i32)> {
        self.status.clone()
    }

    fn edm(&self) -> Option<f64> {
        self.edm
    }
}

impl FitEngine for LikelihoodFitter {
    type Output = LikelihoodFitResult;

    fn fit(
        &self,
        model: &PhysicsModel,
        model_name: &str,
        strategy: FitStrategy,
        dataset: &Dataset,
        options: &FitOptions,
    ) -> Result<LikelihoodFitResult, FitError> {
        let nll = Likelihood::new(model, dataset, options.extended)?;
        let floating = nll.floating().to_vec();
        if floating.is_empty() {
            return Err(FitError::NoFloatingParameters);
        }

        let params = model.parameters();
        let initial_values = model.values();
        let start: Vec<f64> = floating.iter().map(|i| initial_values[*i]).collect();
        let mut steps = Vec::with_capacity(floating.len());
        let mut bounds = Vec::with_capacity(floating.len());
        for idx in &floating {
            if let Some((_, p)) = params.get_index(*idx) {
                steps.push(p.step());
                bounds.push(p.bounds());
            }
        }

        let objective = |x: &[f64]| nll.nll(x);
        if !objective(&start).is_finite() {
            return Err(FitError::NonFiniteLikelihood);
        }
        if options.verbose {
            debug!(
                model = model_name,
                %strategy,
                events = nll.n_events(),
                floating = floating.len(),
                "Starting fit"
            );
        }

        let mut minimum =
            nelder_mead::minimize(objective, &start, &steps, &bounds, &self.minimizer);
        let mut evaluations = minimum.evaluations;
        if strategy == FitStrategy::Restart {
            for restart in 0..self.max_restarts {
                let next = nelder_mead::minimize(
                    objective,
                    &minimum.values,
                    &steps,
                    &bounds,
                    &self.minimizer,
                );
                evaluations += next.evaluations;
                let improvement = minimum.objective - next.objective;
                trace!(restart, improvement, "Restarted minimization");
                let threshold = self.minimizer.f_tolerance * (1.0 + next.objective.abs());
                let done = !(improvement > threshold);
                if next.objective <= minimum.objective {
                    minimum = next;
                }
                if done {
                    break;
                }
            }
        }

        let mut status = vec![(
            STAGE_MIGRAD.to_string(),
            if minimum.converged {
                STATUS_SUCCESS
            } else {
                STATUS_CALL_LIMIT
            },
        )];

        let h: Vec<f64> = steps.iter().map(|s| s * HESSE_STEP_FRACTION).collect();
        let covariance = hesse::hesse(&objective, &minimum.values, &h);
        status.push((STAGE_HESSE.to_string(), covariance.status));
        let errors = covariance.errors();

        let (error_low, error_high) = if options.minos {
            let scans = minos::minos(
                &objective,
                &minimum.values,
                minimum.objective,
                &errors,
                &steps,
                &bounds,
                &self.minimizer,
            );
            let all_valid = scans.iter().all(|s| s.valid);
            status.push((
                STAGE_MINOS.to_string(),
                if all_valid { STATUS_SUCCESS } else { STATUS_FAILED },
            ));
            (
                scans.iter().map(|s| s.lower).collect(),
                scans.iter().map(|s| s.upper).collect(),
            )
        } else {
            (vec![0.0; floating.len()], vec![0.0; floating.len()])
        };

        if options.verbose {
            debug!(
                nll = minimum.objective,
                evaluations,
                quality = covariance.quality,
                ?status,
                "Fit finished"
            );
        }

        let floating_set: Vec<RawParameter> = floating
            .iter()
            .enumerate()
            .map(|(k, idx)| RawParameter {
                name: params.name(*idx).to_string(),
                value: minimum.values[k],
                error: errors[k],
                error_low: error_low[k],
                error_high: error_high[k],
                initial: start[k],
            })
            .collect();
        let final_values = nll.full_values(&minimum.values);
        let constants = (0..params.len())
            .filter(|i| !floating.contains(i))
            .map(|i| (params.name(i).to_string(), final_values[i]))
            .collect();

        Ok(LikelihoodFitResult {
            constants,
            floating: floating_set,
            covariance: covariance.covariance,
            covariance_quality: covariance.quality,
            status,
            edm: covariance.edm,
            nll: minimum.objective,
            evaluations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::COV_QUALITY_FULL_ACCURATE;
    use crate::model::fixtures::mass_model;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_fit_recovers_generated_values() {
        let model = mass_model();
        let mut rng = StdRng::seed_from_u64(42);
        let data = model.generate_extended(0, &mut rng).unwrap();

        let result = LikelihoodFitter::default()
            .fit(&model, "model", FitStrategy::Simple, &data, &FitOptions::default())
            .unwrap();

        assert_eq!(result.floating.len(), 3);
        let mu = &result.floating[0];
        assert_eq!(mu.name, "mu");
        assert!((mu.value - 5279.0).abs() < 5.0 * mu.error, "{mu:?}");
        assert!(mu.error > 0.0);
        assert_eq!(mu.initial, 5279.0);
        assert_eq!(mu.error_low, 0.0);
        // Yields are held in a non-extended fit
        assert_eq!(
            result.constants,
            vec![("nsig".to_string(), 400.0), ("nbkg".to_string(), 600.0)]
        );
        assert_eq!(result.status[0], ("MIGRAD".to_string(), STATUS_SUCCESS));
        assert_eq!(result.status[1], ("HESSE".to_string(), STATUS_SUCCESS));
        assert_eq!(result.status.len(), 2);
        assert_eq!(result.covariance_quality, COV_QUALITY_FULL_ACCURATE);
        assert_eq!(result.covariance.shape(), (3, 3));
    }

    #[test]
    fn test_extended_fit_with_minos() {
        let model = mass_model();
        let mut rng = StdRng::seed_from_u64(43);
        let data = model.generate(0, 300, &mut rng).unwrap();
        let options = FitOptions {
            extended: true,
            minos: true,
            verbose: false,
        };

        let result = LikelihoodFitter::default()
            .fit(&model, "model", FitStrategy::Restart, &data, &options)
            .unwrap();

        assert_eq!(result.floating.len(), 5);
        assert!(result.constants.is_empty());
        let total: f64 = result.floating[3].value + result.floating[4].value;
        assert!((total - data.len() as f64).abs() < 1.0, "total = {total}");
        assert_eq!(result.status.len(), 3);
        assert_eq!(result.status[2].0, "MINOS");
        let nsig = &result.floating[3];
        assert!(nsig.error_low < 0.0 && nsig.error_high > 0.0, "{nsig:?}");
    }

    #[test]
    fn test_fit_leaves_model_untouched() {
        let model = mass_model();
        let before = model.values();
        let mut rng = StdRng::seed_from_u64(44);
        let data = model.generate(0, 500, &mut rng).unwrap();
        LikelihoodFitter::default()
            .fit(&model, "model", FitStrategy::Simple, &data, &FitOptions::default())
            .unwrap();
        assert_eq!(model.values(), before);
    }

    #[test]
    fn test_empty_dataset() {
        let model = mass_model();
        let data = Dataset::new(vec!["mass".into()]);
        let err = LikelihoodFitter::default()
            .fit(&model, "model", FitStrategy::Simple, &data, &FitOptions::default())
            .unwrap_err();
        assert_eq!(err, FitError::EmptyDataset);
    }
}
