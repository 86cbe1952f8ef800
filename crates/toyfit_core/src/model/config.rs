use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{Category, Component, Observable, ParameterSet, PhysicsModel, ShapeConfig};
use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservableConfig {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub name: String,
    /// Name of the yield parameter
    #[serde(rename = "yield")]
    pub yield_param: String,
    #[serde(default)]
    pub shapes: Vec<ShapeConfig>,
}

/// Model description as found in the configuration tree.
///
/// Exactly one of `components` (single category) or `categories` (simultaneous
/// model, label -> components) must be given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub observables: IndexMap<String, ObservableConfig>,
    pub parameters: ParameterSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<ComponentConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<IndexMap<String, Vec<ComponentConfig>>>,
}

impl ModelConfig {
    pub fn from_value(value: serde_json::Value) -> Result<Self, ModelError> {
        serde_json::from_value(value).map_err(|e| ModelError::Config(e.to_string()))
    }
}

fn resolve_components(
    configs: &[ComponentConfig],
    observables: &[Observable],
    params: &ParameterSet,
) -> Result<Vec<Component>, ModelError> {
    configs
        .iter()
        .map(|cfg| {
            let shapes = cfg
                .shapes
                .iter()
                .map(|shape| {
                    let obs = observables
                        .iter()
                        .position(|o| o.name == shape.observable())
                        .ok_or_else(|| ModelError::UnknownObservable(shape.observable().into()))?;
                    shape.resolve(obs, params)
                })
                .collect::<Result<Vec<_>, _>>()?;

            let mut seen = Vec::with_capacity(shapes.len());
            for shape in &shapes {
                if seen.contains(&shape.observable()) {
                    return Err(ModelError::Config(format!(
                        "component {} has two shapes for {}",
                        cfg.name,
                        observables[shape.observable()].name
                    )));
                }
                seen.push(shape.observable());
            }

            Ok(Component {
                name: cfg.name.clone(),
                yield_index: params.index_of(&cfg.yield_param)?,
                shapes,
            })
        })
        .collect()
}

impl PhysicsModel {
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
        let observables: Vec<Observable> = config
            .observables
            .iter()
            .map(|(name, range)| Observable {
                name: name.clone(),
                min: range.min,
                max: range.max,
            })
            .collect();
        let params = &config.parameters;

        let categories = match (&config.components, &config.categories) {
            (Some(components), None) => vec![Category {
                label: None,
                components: resolve_components(components, &observables, params)?,
            }],
            (None, Some(categories)) => categories
                .iter()
                .map(|(label, components)| {
                    Ok(Category {
                        label: Some(label.clone()),
                        components: resolve_components(components, &observables, params)?,
                    })
                })
                .collect::<Result<Vec<_>, ModelError>>()?,
            _ => {
                return Err(ModelError::Config(
                    "exactly one of `components` or `categories` is required".to_string(),
                ));
            }
        };

        PhysicsModel::new(observables, params.clone(), categories)
    }
}
