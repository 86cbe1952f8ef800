//! Acceptance filters applied to generated events by accept/reject.

use indexmap::IndexMap;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::error::{ConfigError, FitError};

/// Per-event efficiency model used to thin generated datasets
pub trait Acceptance {
    /// Efficiency of each event, in `[0, 1]`
    fn efficiencies(&self, dataset: &Dataset) -> Result<Vec<f64>, FitError>;

    /// Keep each event with probability equal to its efficiency
    fn apply_accept_reject(
        &self,
        mut dataset: Dataset,
        rng: &mut dyn RngCore,
    ) -> Result<Dataset, FitError> {
        let efficiencies = self.efficiencies(&dataset)?;
        if efficiencies.len() != dataset.len() {
            return Err(FitError::Generation(format!(
                "acceptance gave {} efficiencies for {} events",
                efficiencies.len(),
                dataset.len()
            )));
        }
        let mut keep = efficiencies.into_iter().map(|eff| rng.random::<f64>() < eff);
        dataset.retain(|_| keep.next().unwrap_or(false));
        Ok(dataset)
    }
}

/// One-dimensional efficiency factor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EfficiencyFactor {
    /// `intercept + slope * x`
    Linear { intercept: f64, slope: f64 },
    /// `inside` within `[min, max]`, `outside` elsewhere
    Step {
        min: f64,
        max: f64,
        #[serde(default = "default_inside")]
        inside: f64,
        #[serde(default)]
        outside: f64,
    },
}

fn default_inside() -> f64 {
    1.0
}

impl EfficiencyFactor {
    pub fn value(&self, x: f64) -> f64 {
        match *self {
            EfficiencyFactor::Linear { intercept, slope } => intercept + slope * x,
            EfficiencyFactor::Step {
                min,
                max,
                inside,
                outside,
            } => {
                if (min..=max).contains(&x) {
                    inside
                } else {
                    outside
                }
            }
        }
    }
}

/// Product of per-observable factors, clamped to `[0, 1]`.
///
/// Configured as a map from observable name to factor:
///
/// ```yaml
/// acceptance:
///   mass: {type: linear, intercept: 0.2, slope: 0.0001}
///   q2: {type: step, min: 1.0, max: 6.0}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EfficiencyAcceptance {
    factors: IndexMap<String, EfficiencyFactor>,
}

impl EfficiencyAcceptance {
    pub fn new(factors: IndexMap<String, EfficiencyFactor>) -> Self {
        Self { factors }
    }

    /// Build from the `acceptance` node of the configuration.
    ///
    /// Every factor must refer to one of `observables`.
    pub fn from_config(
        value: &serde_json::Value,
        observables: &[String],
    ) -> Result<Self, ConfigError> {
        let acceptance: Self =
            serde_json::from_value(value.clone()).map_err(|e| ConfigError::Invalid {
                key: "acceptance".to_string(),
                reason: e.to_string(),
            })?;
        for name in acceptance.factors.keys() {
            if !observables.contains(name) {
                return Err(ConfigError::Invalid {
                    key: format!("acceptance/{name}"),
                    reason: "not an observable of the model".to_string(),
                });
            }
        }
        Ok(acceptance)
    }
}

impl Acceptance for EfficiencyAcceptance {
    fn efficiencies(&self, dataset: &Dataset) -> Result<Vec<f64>, FitError> {
        let columns = self
            .factors
            .iter()
            .map(|(name, factor)| {
                dataset
                    .observable_index(name)
                    .map(|idx| (idx, factor))
                    .ok_or_else(|| FitError::MissingObservable(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(dataset
            .events()
            .iter()
            .map(|event| {
                columns
                    .iter()
                    .map(|(idx, factor)| factor.value(event.values[*idx]))
                    .product::<f64>()
                    .clamp(0.0, 1.0)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    /// Reports one efficiency too few
    struct ShortAcceptance;

    impl Acceptance for ShortAcceptance {
        fn efficiencies(&self, dataset: &Dataset) -> Result<Vec<f64>, FitError> {
            Ok(vec![1.0; dataset.len().saturating_sub(1)])
        }
    }

    #[test]
    fn test_efficiency_count_mismatch_is_an_error() {
        let mut rng = StdRng::seed_from_u64(9);
        let err = ShortAcceptance
            .apply_accept_reject(uniform(10), &mut rng)
            .unwrap_err();
        assert!(matches!(err, FitError::Generation(msg) if msg.contains("9 efficiencies for 10")));
    }

    fn uniform(n: usize) -> Dataset {
        let mut d = Dataset::new(vec!["x".into()]);
        for i in 0..n {
            d.push(vec![i as f64 / n as f64]);
        }
        d
    }

    #[test]
    fn test_step_keeps_only_inside() {
        let config = json!({"x": {"type": "step", "min": 0.0, "max": 0.5}});
        let acc = EfficiencyAcceptance::from_config(&config, &["x".to_string()]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let kept = acc.apply_accept_reject(uniform(1000), &mut rng).unwrap();
        assert_eq!(kept.len(), 501);
        assert!(kept.column("x").unwrap().iter().all(|x| *x <= 0.5));
    }

    #[test]
    fn test_linear_efficiency_is_clamped() {
        let acc = EfficiencyAcceptance::new(IndexMap::from([(
            "x".to_string(),
            EfficiencyFactor::Linear {
                intercept: -0.5,
                slope: 3.0,
            },
        )]));
        let effs = acc.efficiencies(&uniform(10)).unwrap();
        assert_eq!(effs[0], 0.0);
        assert_eq!(effs[9], 1.0);
        assert!((effs[3] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_observable() {
        let err = EfficiencyAcceptance::from_config(
            &json!({"q2": {"type": "linear", "intercept": 1.0, "slope": 0.0}}),
            &["mass".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let acc = EfficiencyAcceptance::new(IndexMap::from([(
            "q2".to_string(),
            EfficiencyFactor::Step {
                min: 0.0,
                max: 1.0,
                inside: 1.0,
                outside: 0.0,
            },
        )]));
        assert_eq!(
            acc.efficiencies(&uniform(3)),
            Err(FitError::MissingObservable("q2".into()))
        );
    }
}
