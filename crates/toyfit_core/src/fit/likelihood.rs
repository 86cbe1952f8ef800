//! Unbinned negative log-likelihood of a dataset under a physics model.

use rustc_hash::FxHashMap;

use crate::data::Dataset;
use crate::error::FitError;
use crate::model::PhysicsModel;

/// Negative log-likelihood as a function of the floating parameters.
///
/// Parameters that do not float keep the values they had when the
/// likelihood was built.
#[derive(Debug)]
pub struct Likelihood<'a> {
    model: &'a PhysicsModel,
    /// (category index, values in model observable order)
    events: Vec<(usize, Vec<f64>)>,
    extended: bool,
    base: Vec<f64>,
    floating: Vec<usize>,
}

impl<'a> Likelihood<'a> {
    pub fn new(
        model: &'a PhysicsModel,
        dataset: &Dataset,
        extended: bool,
    ) -> Result<Self, FitError> {
        if dataset.is_empty() {
            return Err(FitError::EmptyDataset);
        }
        let columns = model
            .observables()
            .iter()
            .map(|obs| {
                dataset
                    .observable_index(&obs.name)
                    .ok_or_else(|| FitError::MissingObservable(obs.name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let categories: FxHashMap<&str, usize> = model
            .categories()
            .iter()
            .enumerate()
            .filter_map(|(i, cat)| cat.label.as_deref().map(|label| (label, i)))
            .collect();
        let mut events = Vec::with_capacity(dataset.len());
        for event in dataset.events() {
            let category = if model.is_simultaneous() {
                let label = event.label.as_deref().unwrap_or_default();
                *categories
                    .get(label)
                    .ok_or_else(|| FitError::UnknownCategory(label.to_string()))?
            } else {
                0
            };
            let values = columns.iter().map(|c| event.values[*c]).collect();
            events.push((category, values));
        }

        Ok(Self {
            model,
            events,
            extended,
            base: model.values(),
            floating: model.floating_indices(extended),
        })
    }

    pub fn floating(&self) -> &[usize] {
        &self.floating
    }

    pub fn n_events(&self) -> usize {
        self.events.len()
    }

    /// Full parameter vector with the floating entries replaced
    pub fn full_values(&self, floating_values: &[f64]) -> Vec<f64> {
        let mut values = self.base.clone();
        for (idx, value) in self.floating.iter().zip(floating_values) {
            values[*idx] = *value;
        }
        values
    }

    pub fn nll(&self, floating_values: &[f64]) -> f64 {
        self.nll_full(&self.full_values(floating_values))
    }

    /// NLL for a full parameter vector; invalid points give `+inf`
    pub fn nll_full(&self, values: &[f64]) -> f64 {
        let expected: Vec<f64> = (0..self.model.categories().len())
            .map(|c| self.model.expected_events(c, values))
            .collect();
        if expected.iter().any(|n| !(*n > 0.0)) {
            return f64::INFINITY;
        }

        let mut nll = if self.extended {
            expected.iter().sum::<f64>()
        } else {
            0.0
        };
        let normalized = self.model.normalized(values);
        for (category, x) in &self.events {
            let mut density = normalized.weighted_density(*category, x);
            if !self.extended {
                density /= expected[*category];
            }
            if !(density > 0.0) || !density.is_finite() {
                return f64::INFINITY;
            }
            nll -= density.ln();
        }

        if nll.is_finite() { nll } else { f64::INFINITY }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::mass_model;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_nll_is_lowest_near_truth() {
        let model = mass_model();
        let mut rng = StdRng::seed_from_u64(4);
        let data = model.generate(0, 2000, &mut rng).unwrap();
        let nll = Likelihood::new(&model, &data, false).unwrap();

        let truth = nll.full_values(&[5279.0, 20.0, -0.004]);
        let shifted = nll.full_values(&[5300.0, 20.0, -0.004]);
        assert!(nll.nll_full(&truth) < nll.nll_full(&shifted));
    }

    #[test]
    fn test_extended_term() {
        let model = mass_model();
        let mut rng = StdRng::seed_from_u64(5);
        let data = model.generate(0, 100, &mut rng).unwrap();
        let ext = Likelihood::new(&model, &data, true).unwrap();
        let plain = Likelihood::new(&model, &data, false).unwrap();
        let values = model.values();

        // -sum ln(N f) + N = -sum ln f - n ln N + N
        let n_exp: f64 = 1000.0;
        let expected = plain.nll_full(&values) - 100.0 * n_exp.ln() + n_exp;
        assert!((ext.nll_full(&values) - expected).abs() < 1e-6);
        assert_eq!(ext.floating().len(), 5);
        assert_eq!(plain.floating().len(), 3);
    }

    #[test]
    fn test_invalid_point_is_infinite() {
        let model = mass_model();
        let mut rng = StdRng::seed_from_u64(6);
        let data = model.generate(0, 10, &mut rng).unwrap();
        let nll = Likelihood::new(&model, &data, true).unwrap();
        let mut values = model.values();
        values[1] = -1.0;
        values[3] = 0.0;
        values[4] = 0.0;
        assert_eq!(nll.nll_full(&values), f64::INFINITY);
    }

    #[test]
    fn test_missing_observable_and_empty() {
        let model = mass_model();
        let mut data = Dataset::new(vec!["q2".into()]);
        assert_eq!(
            Likelihood::new(&model, &data, false).unwrap_err(),
            FitError::EmptyDataset
        );
        data.push(vec![1.0]);
        assert_eq!(
            Likelihood::new(&model, &data, false).unwrap_err(),
            FitError::MissingObservable("mass".into())
        );
    }
}
