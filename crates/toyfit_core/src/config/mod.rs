//! Run configuration
//!
//! Configuration is read from one or more YAML files which are deep-merged in
//! order: mappings are merged key by key, any other value in a later file
//! replaces the earlier one. Nested keys are addressed with `/`, as in
//! `fit/nfits`.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ConfigError, ToyError};
use crate::fit::{FitOptions, FitStrategy};

/// Keys every systematic toy configuration must define
pub const REQUIRED_KEYS: [&str; 4] = ["name", "fit/nfits", "syst", "syst/type"];

const DEFAULT_MODEL_KEY: &str = "model";

/// Value at a `/`-separated path
pub fn get_path<'a>(config: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('/')
        .try_fold(config, |node, part| node.as_object()?.get(part))
}

/// Fails listing every key of `keys` absent from `config`
pub fn validate_keys(config: &Value, keys: &[&str]) -> Result<(), ConfigError> {
    let missing: Vec<String> = keys
        .iter()
        .filter(|key| get_path(config, key).is_none())
        .map(|key| key.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::MissingKeys(missing))
    }
}

/// Merge `overlay` into `base`
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

pub fn parse_yaml(content: &str) -> Result<Value, ConfigError> {
    let value: Value =
        serde_saphyr::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Ok(match value {
        Value::Null => Value::Object(Map::new()),
        other => other,
    })
}

/// Read and merge configuration files, later files taking precedence
pub fn load_config<P: AsRef<Path>>(files: &[P]) -> Result<Value, ToyError> {
    let mut config = Value::Object(Map::new());
    for file in files {
        let path = file.as_ref();
        if !path.is_file() {
            return Err(ToyError::MissingFile(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let value = parse_yaml(&content).map_err(|e| match e {
            ConfigError::Parse(reason) => ConfigError::Parse(format!("{}: {reason}", path.display())),
            other => other,
        })?;
        if !value.is_object() {
            return Err(ConfigError::Invalid {
                key: path.display().to_string(),
                reason: "top level must be a mapping".to_string(),
            }
            .into());
        }
        deep_merge(&mut config, value);
        debug!(path = %path.display(), "Loaded configuration file");
    }
    Ok(config)
}

/// Model and fit settings shared by every command that fits
#[derive(Debug, Clone, PartialEq)]
pub struct FitConfig {
    /// Key of the model configuration, `fit/model`
    pub model_name: String,
    pub model: Value,
    pub strategy: FitStrategy,
    pub extended: bool,
    pub minos: bool,
}

/// Settings of a systematic toy run
#[derive(Debug, Clone, PartialEq)]
pub struct ToyConfig {
    pub name: String,
    /// `fit/nfits-per-job` when given, `fit/nfits` otherwise
    pub nfits: usize,
    pub model_name: String,
    pub model: Value,
    pub strategy: FitStrategy,
    pub extended: bool,
    pub minos: bool,
    pub syst: Value,
    pub acceptance: Option<Value>,
    pub seed: Option<u64>,
    pub link_from: Option<PathBuf>,
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn count(config: &Value, key: &str) -> Result<Option<usize>, ConfigError> {
    get_path(config, key)
        .map(|v| {
            v.as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| invalid(key, "expected a non-negative integer"))
        })
        .transpose()
}

fn flag(config: &Value, key: &str) -> Result<bool, ConfigError> {
    get_path(config, key)
        .map(|v| v.as_bool().ok_or_else(|| invalid(key, "expected a boolean")))
        .transpose()
        .map(Option::unwrap_or_default)
}

fn text<'a>(config: &'a Value, key: &str) -> Result<Option<&'a str>, ConfigError> {
    get_path(config, key)
        .map(|v| v.as_str().ok_or_else(|| invalid(key, "expected a string")))
        .transpose()
}

impl FitConfig {
    /// Only the model section and the `fit` flags are read
    pub fn from_value(config: &Value) -> Result<Self, ConfigError> {
        let model_name = text(config, "fit/model")?
            .unwrap_or(DEFAULT_MODEL_KEY)
            .to_string();
        let model = config
            .get(&model_name)
            .cloned()
            .ok_or_else(|| ConfigError::MissingKeys(vec![model_name.clone()]))?;
        let strategy = text(config, "fit/strategy")?
            .unwrap_or(FitStrategy::default().name())
            .parse()?;
        Ok(Self {
            model_name,
            model,
            strategy,
            extended: flag(config, "fit/extended")?,
            minos: flag(config, "fit/minos")?,
        })
    }

    pub fn fit_options(&self, verbose: bool) -> FitOptions {
        FitOptions {
            extended: self.extended,
            minos: self.minos,
            verbose,
        }
    }
}

impl ToyConfig {
    pub fn from_value(config: &Value) -> Result<Self, ConfigError> {
        validate_keys(config, &REQUIRED_KEYS)?;

        let name = text(config, "name")?.unwrap_or_default().to_string();
        let nfits = match count(config, "fit/nfits-per-job")? {
            Some(n) => n,
            None => count(config, "fit/nfits")?.unwrap_or_default(),
        };
        let FitConfig {
            model_name,
            model,
            strategy,
            extended,
            minos,
        } = FitConfig::from_value(config)?;
        let seed = get_path(config, "seed")
            .map(|v| v.as_u64().ok_or_else(|| invalid("seed", "expected a non-negative integer")))
            .transpose()?;

        Ok(Self {
            name,
            nfits,
            model_name,
            model,
            strategy,
            extended,
            minos,
            syst: config.get("syst").cloned().unwrap_or(Value::Null),
            acceptance: config.get("acceptance").cloned(),
            seed,
            link_from: text(config, "link-from")?.map(PathBuf::from),
        })
    }

    pub fn fit_options(&self, verbose: bool) -> FitOptions {
        FitOptions {
            extended: self.extended,
            minos: self.minos,
            verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    const BASE: &str = r"
name: syst-mass
fit:
  nfits: 100
  strategy: restart
syst:
  type: none
model:
  observables:
    mass: {min: 5000.0, max: 5600.0}
";

    #[test]
    fn test_deep_merge_overrides_leaves() {
        let mut base = json!({"fit": {"nfits": 10, "model": "model"}, "name": "a"});
        deep_merge(&mut base, json!({"fit": {"nfits": 20}, "seed": 4}));
        assert_eq!(
            base,
            json!({"fit": {"nfits": 20, "model": "model"}, "name": "a", "seed": 4})
        );
    }

    #[test]
    fn test_missing_keys_are_all_listed() {
        let config = json!({"fit": {}, "syst": {}});
        let err = validate_keys(&config, &REQUIRED_KEYS).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingKeys(vec![
                "name".into(),
                "fit/nfits".into(),
                "syst/type".into()
            ])
        );
    }

    #[test]
    fn test_defaults() {
        let config = parse_yaml(BASE).unwrap();
        let toy = ToyConfig::from_value(&config).unwrap();
        assert_eq!(toy.name, "syst-mass");
        assert_eq!(toy.nfits, 100);
        assert_eq!(toy.model_name, "model");
        assert_eq!(toy.strategy, FitStrategy::Restart);
        assert!(!toy.extended && !toy.minos);
        assert_eq!(toy.acceptance, None);
        assert_eq!(toy.link_from, None);
    }

    #[test]
    fn test_files_merge_in_order() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("base.yaml");
        let job = dir.path().join("job.yaml");
        fs::write(&base, BASE).unwrap();
        fs::write(
            &job,
            "fit:\n  nfits-per-job: 5\n  extended: true\nlink-from: /scratch\n",
        )
        .unwrap();

        let config = load_config(&[&base, &job]).unwrap();
        let toy = ToyConfig::from_value(&config).unwrap();
        assert_eq!(toy.nfits, 5);
        assert!(toy.extended);
        assert_eq!(toy.strategy, FitStrategy::Restart);
        assert_eq!(toy.link_from, Some(PathBuf::from("/scratch")));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = load_config(&[dir.path().join("absent.yaml")]).unwrap_err();
        assert!(matches!(err, ToyError::MissingFile(_)));
    }

    #[test]
    fn test_missing_model_section() {
        let mut config = parse_yaml(BASE).unwrap();
        deep_merge(&mut config, json!({"fit": {"model": "signal-model"}}));
        assert_eq!(
            ToyConfig::from_value(&config).unwrap_err(),
            ConfigError::MissingKeys(vec!["signal-model".into()])
        );
    }

    #[test]
    fn test_fit_config_needs_no_toy_keys() {
        let config = parse_yaml(
            "fit:\n  model: signal-model\n  extended: true\nsignal-model:\n  observables: {}\n",
        )
        .unwrap();
        assert!(ToyConfig::from_value(&config).is_err());

        let fit = FitConfig::from_value(&config).unwrap();
        assert_eq!(fit.model_name, "signal-model");
        assert_eq!(fit.strategy, FitStrategy::Simple);
        assert!(fit.fit_options(false).extended);
    }

    #[test]
    fn test_unknown_strategy() {
        let mut config = parse_yaml(BASE).unwrap();
        deep_merge(&mut config, json!({"fit": {"strategy": "hesse-only"}}));
        assert_eq!(
            ToyConfig::from_value(&config).unwrap_err(),
            ConfigError::UnknownStrategy("hesse-only".into())
        );
    }
}
