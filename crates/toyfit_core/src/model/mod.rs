//! Physics model provider
//!
//! A model is a set of observables with ranges, an ordered parameter set, and one or
//! more categories. Each category is an extended sum of components; each component is
//! a yield parameter times a product of one-dimensional shapes. Observables a component
//! does not describe are treated as flat.
//!
//! ```ignore
//! let model = PhysicsModel::from_config(&ModelConfig::from_value(yaml_tree)?)?;
//! let data = model.generate_extended(0, &mut rng)?;
//! ```

mod config;
mod parameters;
mod shapes;

pub use config::{ComponentConfig, ModelConfig, ObservableConfig};
pub use parameters::{Parameter, ParameterSet};
pub use shapes::{Shape, ShapeConfig};

use indexmap::IndexMap;
use rand::Rng;
use rand_distr::{Distribution, Poisson};

use crate::data::Dataset;
use crate::error::{FitError, ModelError};

/// Name of the label column added to datasets of simultaneous models
pub const CATEGORY_COLUMN: &str = "category";

#[derive(Debug, Clone, PartialEq)]
pub struct Observable {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

impl Observable {
    pub fn range(&self) -> (f64, f64) {
        (self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: String,
    pub yield_index: usize,
    pub shapes: Vec<Shape>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    /// `None` for a non-simultaneous model
    pub label: Option<String>,
    pub components: Vec<Component>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsModel {
    observables: Vec<Observable>,
    parameters: ParameterSet,
    categories: Vec<Category>,
}

/// A model with its shape normalizations fixed for one set of parameter values
#[derive(Debug)]
pub struct NormalizedModel<'a> {
    model: &'a PhysicsModel,
    values: &'a [f64],
    /// category -> component -> observable
    norms: Vec<Vec<Vec<f64>>>,
}

impl NormalizedModel<'_> {
    pub fn weighted_density(&self, category: usize, event: &[f64]) -> f64 {
        let observables = &self.model.observables;
        self.model.categories[category]
            .components
            .iter()
            .zip(&self.norms[category])
            .map(|(comp, norms)| {
                let mut density = self.values[comp.yield_index];
                for (obs_idx, obs) in observables.iter().enumerate() {
                    let norm = norms[obs_idx];
                    if !(norm > 0.0) || !norm.is_finite() {
                        return 0.0;
                    }
                    density *= match comp.shapes.iter().find(|s| s.observable() == obs_idx) {
                        Some(shape) => shape.unnormalized(event[obs_idx], self.values, obs.range()),
                        None => 1.0,
                    } / norm;
                }
                density
            })
            .sum()
    }
}

/// Draw a Poisson count; non-positive or non-finite means give zero
pub fn poisson_count<R: Rng + ?Sized>(mean: f64, rng: &mut R) -> usize {
    if !mean.is_finite() || mean <= 0.0 {
        return 0;
    }
    match Poisson::new(mean) {
        Ok(dist) => dist.sample(rng) as usize,
        Err(_) => 0,
    }
}

impl PhysicsModel {
    pub fn new(
        observables: Vec<Observable>,
        parameters: ParameterSet,
        categories: Vec<Category>,
    ) -> Result<Self, ModelError> {
        for obs in &observables {
            if !(obs.min < obs.max) || !obs.min.is_finite() || !obs.max.is_finite() {
                return Err(ModelError::InvalidRange {
                    name: obs.name.clone(),
                    min: obs.min,
                    max: obs.max,
                });
            }
        }
        if categories.is_empty() || categories.iter().any(|c| c.components.is_empty()) {
            return Err(ModelError::Config(
                "every category needs at least one component".to_string(),
            ));
        }
        if categories.len() > 1 && categories.iter().any(|c| c.label.is_none()) {
            return Err(ModelError::Config(
                "simultaneous models need a label per category".to_string(),
            ));
        }
        Ok(Self {
            observables,
            parameters,
            categories,
        })
    }

    pub fn observables(&self) -> &[Observable] {
        &self.observables
    }

    pub fn observable_names(&self) -> Vec<String> {
        self.observables.iter().map(|o| o.name.clone()).collect()
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn is_simultaneous(&self) -> bool {
        self.categories.iter().any(|c| c.label.is_some())
    }

    pub fn category_index(&self, label: Option<&str>) -> Option<usize> {
        self.categories
            .iter()
            .position(|c| c.label.as_deref() == label)
    }

    pub fn set_value(&mut self, name: &str, value: f64) -> Result<(), ModelError> {
        self.parameters.set_value(name, value)
    }

    pub fn values(&self) -> Vec<f64> {
        self.parameters.values()
    }

    /// Current parameter values by name
    pub fn value_map(&self) -> IndexMap<String, f64> {
        self.parameters
            .iter()
            .map(|(name, p)| (name.clone(), p.value))
            .collect()
    }

    pub fn is_yield(&self, index: usize) -> bool {
        self.categories
            .iter()
            .flat_map(|c| &c.components)
            .any(|comp| comp.yield_index == index)
    }

    /// Indices of the parameters a fit should float.
    ///
    /// Yields only float in extended fits; in a plain fit only their ratios enter the
    /// likelihood, so they are held at their current values.
    pub fn floating_indices(&self, extended: bool) -> Vec<usize> {
        self.parameters
            .iter()
            .enumerate()
            .filter(|(i, (_, param))| !param.constant && (extended || !self.is_yield(*i)))
            .map(|(i, _)| i)
            .collect()
    }

    /// Expected number of events in a category for the given parameter values
    pub fn expected_events(&self, category: usize, values: &[f64]) -> f64 {
        self.categories[category]
            .components
            .iter()
            .map(|c| values[c.yield_index])
            .sum()
    }

    /// Shape normalizations at `values`, to evaluate many events cheaply
    pub fn normalized<'a>(&'a self, values: &'a [f64]) -> NormalizedModel<'a> {
        let norms = self
            .categories
            .iter()
            .map(|cat| {
                cat.components
                    .iter()
                    .map(|comp| {
                        self.observables
                            .iter()
                            .enumerate()
                            .map(|(obs_idx, obs)| {
                                match comp.shapes.iter().find(|s| s.observable() == obs_idx) {
                                    Some(shape) => shape.normalization(values, obs.range()),
                                    None => obs.max - obs.min,
                                }
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();
        NormalizedModel {
            model: self,
            values,
            norms,
        }
    }

    /// Yield-weighted density `sum_k N_k f_k(x)` of one category
    pub fn weighted_density(&self, category: usize, event: &[f64], values: &[f64]) -> f64 {
        self.normalized(values).weighted_density(category, event)
    }

    /// Generate exactly `count` events of a category at the current parameter values
    pub fn generate<R: Rng + ?Sized>(
        &self,
        category: usize,
        count: usize,
        rng: &mut R,
    ) -> Result<Dataset, FitError> {
        let values = self.values();
        let cat = &self.categories[category];
        let yields: Vec<f64> = cat
            .components
            .iter()
            .map(|c| values[c.yield_index].max(0.0))
            .collect();
        let total: f64 = yields.iter().sum();
        if count > 0 && !(total > 0.0) {
            return Err(FitError::Generation(format!(
                "category {:?} has no positive yield",
                cat.label
            )));
        }

        let mut dataset = Dataset::with_capacity(self.observable_names(), count);
        for _ in 0..count {
            let mut pick = rng.random::<f64>() * total;
            let mut chosen = cat.components.len() - 1;
            for (i, y) in yields.iter().enumerate() {
                if pick < *y {
                    chosen = i;
                    break;
                }
                pick -= y;
            }
            let component = &cat.components[chosen];

            let mut event = Vec::with_capacity(self.observables.len());
            for (obs_idx, obs) in self.observables.iter().enumerate() {
                let x = match component.shapes.iter().find(|s| s.observable() == obs_idx) {
                    Some(shape) => shape.sample(&values, obs.range(), rng)?,
                    None => obs.min + rng.random::<f64>() * (obs.max - obs.min),
                };
                event.push(x);
            }
            dataset.push(event);
        }

        if let Some(label) = &cat.label {
            dataset.set_label(CATEGORY_COLUMN, label);
        }
        Ok(dataset)
    }

    /// Generate a Poisson-fluctuated number of events around the expected yield
    pub fn generate_extended<R: Rng + ?Sized>(
        &self,
        category: usize,
        rng: &mut R,
    ) -> Result<Dataset, FitError> {
        let expected = self.expected_events(category, &self.values());
        let count = poisson_count(expected, rng);
        self.generate(category, count, rng)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::mass_model;
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_floating_indices_hold_yields_when_not_extended() {
        let model = mass_model();
        assert_eq!(model.floating_indices(true), vec![0, 1, 2, 3, 4]);
        assert_eq!(model.floating_indices(false), vec![0, 1, 2]);
    }

    #[test]
    fn test_generate_exact_count() {
        let model = mass_model();
        let mut rng = StdRng::seed_from_u64(1);
        let data = model.generate(0, 250, &mut rng).unwrap();
        assert_eq!(data.len(), 250);
        assert!(data.label_column().is_none());
        assert!(
            data.column("mass")
                .unwrap()
                .iter()
                .all(|m| (5000.0..=5600.0).contains(m))
        );
    }

    #[test]
    fn test_generate_extended_fluctuates_around_expectation() {
        let model = mass_model();
        let mut rng = StdRng::seed_from_u64(2);
        let sizes: Vec<usize> = (0..50)
            .map(|_| model.generate_extended(0, &mut rng).unwrap().len())
            .collect();
        let mean = sizes.iter().sum::<usize>() as f64 / sizes.len() as f64;
        assert!((mean - 1000.0).abs() < 20.0, "mean = {mean}");
        assert!(sizes.iter().any(|s| *s != sizes[0]));
    }

    #[test]
    fn test_invalid_range() {
        let err = PhysicsModel::new(
            vec![Observable {
                name: "mass".into(),
                min: 2.0,
                max: 1.0,
            }],
            ParameterSet::new(),
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidRange { .. }));
    }

    #[test]
    fn test_poisson_count_zero_mean() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(poisson_count(0.0, &mut rng), 0);
        assert_eq!(poisson_count(f64::NAN, &mut rng), 0);
    }
}
