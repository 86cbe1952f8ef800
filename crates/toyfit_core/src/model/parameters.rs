use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ModelError;

/// A model parameter with optional bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Constant parameters never float in a fit
    #[serde(default)]
    pub constant: bool,
    /// Starting step size for the minimizer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<f64>,
}

impl Parameter {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            min: None,
            max: None,
            constant: false,
            error: None,
        }
    }

    #[must_use]
    pub fn bounded(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    #[must_use]
    pub fn fixed(mut self) -> Self {
        self.constant = true;
        self
    }

    /// Returns the (min, max) bounds, infinite when unset
    pub fn bounds(&self) -> (f64, f64) {
        (
            self.min.unwrap_or(f64::NEG_INFINITY),
            self.max.unwrap_or(f64::INFINITY),
        )
    }

    /// Initial simplex step: the configured error, 10% of the range, or 10% of the value
    pub fn step(&self) -> f64 {
        if let Some(err) = self.error
            && err > 0.0
        {
            return err;
        }
        let (min, max) = self.bounds();
        if min.is_finite() && max.is_finite() && max > min {
            return 0.1 * (max - min);
        }
        if self.value != 0.0 {
            0.1 * self.value.abs()
        } else {
            0.1
        }
    }
}

/// Ordered set of named parameters.
///
/// Indices are stable for the lifetime of the set, shapes refer to parameters by index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    params: IndexMap<String, Parameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, param: Parameter) -> usize {
        self.params.insert_full(name.into(), param).0
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Result<usize, ModelError> {
        self.params
            .get_index_of(name)
            .ok_or_else(|| ModelError::UnknownParameter(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    pub fn get_index(&self, index: usize) -> Option<(&String, &Parameter)> {
        self.params.get_index(index)
    }

    pub fn name(&self, index: usize) -> &str {
        self.params
            .get_index(index)
            .map(|(name, _)| name.as_str())
            .unwrap_or_default()
    }

    /// Set a value, clipped to the parameter bounds
    pub fn set_value(&mut self, name: &str, value: f64) -> Result<(), ModelError> {
        let param = self
            .params
            .get_mut(name)
            .ok_or_else(|| ModelError::UnknownParameter(name.to_string()))?;
        let (min, max) = param.bounds();
        let clipped = value.max(min).min(max);
        if clipped != value {
            debug!(parameter = name, value, clipped, "Value outside parameter range");
        }
        param.value = clipped;
        Ok(())
    }

    /// Current values in index order
    pub fn values(&self) -> Vec<f64> {
        self.params.values().map(|p| p.value).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Parameter)> {
        self.params.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_prefers_error_then_range() {
        let mut p = Parameter::new(5.0).bounded(0.0, 10.0);
        assert_eq!(p.step(), 1.0);
        p.error = Some(0.25);
        assert_eq!(p.step(), 0.25);
        assert_eq!(Parameter::new(-20.0).step(), 2.0);
        assert_eq!(Parameter::new(0.0).step(), 0.1);
    }

    #[test]
    fn test_set_value_unknown() {
        let mut set = ParameterSet::new();
        set.insert("mu", Parameter::new(1.0));
        assert!(set.set_value("mu", 2.0).is_ok());
        assert_eq!(set.values(), vec![2.0]);
        assert_eq!(
            set.set_value("sigma", 1.0),
            Err(ModelError::UnknownParameter("sigma".into()))
        );
    }

    #[test]
    fn test_set_value_clips_to_bounds() {
        let mut set = ParameterSet::new();
        set.insert("sigma", Parameter::new(20.0).bounded(5.0, 60.0));
        set.insert("tau", Parameter::new(-0.004));

        set.set_value("sigma", -3.0).unwrap();
        assert_eq!(set.get("sigma").unwrap().value, 5.0);
        set.set_value("sigma", 75.0).unwrap();
        assert_eq!(set.get("sigma").unwrap().value, 60.0);
        set.set_value("sigma", 12.5).unwrap();
        assert_eq!(set.get("sigma").unwrap().value, 12.5);

        // Unbounded parameters take any value
        set.set_value("tau", -1.0e6).unwrap();
        assert_eq!(set.get("tau").unwrap().value, -1.0e6);
    }
}
