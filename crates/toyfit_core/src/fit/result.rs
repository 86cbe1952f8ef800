//! Fit result manager
//!
//! A [`FitResult`] starts empty and is populated exactly once, either from a
//! fit engine or from a serialized record. Every reader requires the populated
//! state.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{
    COV_QUALITY_FULL_ACCURATE, EngineResult, STAGE_HESSE, STAGE_MIGRAD, STAGE_MINOS,
    STATUS_SUCCESS,
};
use crate::error::{FitResultError, ToyError};
use crate::io::atomic_write;
use crate::linalg::{MultivariateNormal, flatten_row_major, square_from_flat};
use crate::paths::DataPaths;

/// Keys a serialized record must contain, `/` separating nested keys
const REQUIRED_KEYS: [&str; 6] = [
    "fit-parameters",
    "fit-parameters-initial",
    "const-parameters",
    "covariance-matrix/quality",
    "covariance-matrix/matrix",
    "status",
];

/// Column suffixes of a floating parameter in a flat record
const SUFFIX_ERR_HESSE: &str = "_err_hesse";
const SUFFIX_ERR_PLUS: &str = "_err_plus";
const SUFFIX_ERR_MINUS: &str = "_err_minus";

/// Value reported for a stage that never ran
const STATUS_NOT_RUN: i64 = -1;

/// Floating parameter estimate, serialized as `[value, error, error_low, error_high]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct FitParameter {
    pub value: f64,
    /// Symmetric (HESSE) error
    pub error: f64,
    /// Lower asymmetric error, negative; zero when not computed
    pub error_low: f64,
    pub error_high: f64,
}

impl From<[f64; 4]> for FitParameter {
    fn from([value, error, error_low, error_high]: [f64; 4]) -> Self {
        Self {
            value,
            error,
            error_low,
            error_high,
        }
    }
}

impl From<FitParameter> for [f64; 4] {
    fn from(p: FitParameter) -> Self {
        [p.value, p.error, p.error_low, p.error_high]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedCovariance {
    pub quality: i32,
    /// Row-major
    pub matrix: Vec<f64>,
}

/// Serde form of a populated [`FitResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedFitResult {
    #[serde(rename = "const-parameters")]
    pub const_parameters: IndexMap<String, f64>,
    #[serde(rename = "fit-parameters")]
    pub fit_parameters: IndexMap<String, FitParameter>,
    #[serde(rename = "fit-parameters-initial")]
    pub fit_parameters_initial: IndexMap<String, f64>,
    #[serde(rename = "covariance-matrix")]
    pub covariance_matrix: SerializedCovariance,
    pub status: IndexMap<String, i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edm: Option<f64>,
    /// Any other top-level keys, kept as read
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// One cell of a flat record
#[derive(Debug, Clone, PartialEq)]
pub enum FlatValue {
    Float(f64),
    Int(i64),
    Sequence(Vec<f64>),
}

impl FlatValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FlatValue::Float(v) => Some(*v),
            FlatValue::Int(v) => Some(*v as f64),
            FlatValue::Sequence(_) => None,
        }
    }
}

/// Ordered column name -> value mapping for tabular storage
pub type FlatRecord = IndexMap<String, FlatValue>;

#[derive(Debug, Clone, PartialEq)]
struct Populated {
    const_parameters: IndexMap<String, f64>,
    fit_parameters: IndexMap<String, FitParameter>,
    fit_parameters_initial: IndexMap<String, f64>,
    covariance: DMatrix<f64>,
    quality: i32,
    status: IndexMap<String, i32>,
    edm: Option<f64>,
    extra: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitResult {
    inner: Option<Populated>,
}

/// Paths from `REQUIRED_KEYS` missing in `record`
fn missing_keys(record: &Value) -> Vec<String> {
    REQUIRED_KEYS
        .iter()
        .filter(|key| {
            key.split('/')
                .try_fold(record, |node, part| node.get(part))
                .is_none()
        })
        .map(|key| key.to_string())
        .collect()
}

impl FitResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_populated(&self) -> bool {
        self.inner.is_some()
    }

    fn populated(&self) -> Result<&Populated, FitResultError> {
        self.inner.as_ref().ok_or(FitResultError::NotPopulated)
    }

    fn set(&mut self, populated: Populated) -> Result<(), FitResultError> {
        if self.inner.is_some() {
            return Err(FitResultError::AlreadyPopulated);
        }
        self.inner = Some(populated);
        Ok(())
    }

    /// Copy the relevant pieces out of a fit engine result
    pub fn populate_from_engine<E: EngineResult + ?Sized>(
        &mut self,
        raw: &E,
    ) -> Result<(), FitResultError> {
        if self.inner.is_some() {
            return Err(FitResultError::AlreadyPopulated);
        }
        let floating = raw.floating_parameters();
        let covariance = raw.covariance();
        if covariance.shape() != (floating.len(), floating.len()) {
            return Err(FitResultError::MalformedRecord(format!(
                "covariance is {}x{} for {} floating parameters",
                covariance.nrows(),
                covariance.ncols(),
                floating.len()
            )));
        }

        self.set(Populated {
            const_parameters: raw.constant_parameters().into_iter().collect(),
            fit_parameters: floating
                .iter()
                .map(|p| {
                    (
                        p.name.clone(),
                        FitParameter {
                            value: p.value,
                            error: p.error,
                            error_low: p.error_low,
                            error_high: p.error_high,
                        },
                    )
                })
                .collect(),
            fit_parameters_initial: floating
                .iter()
                .map(|p| (p.name.clone(), p.initial))
                .collect(),
            covariance,
            quality: raw.covariance_quality(),
            status: raw.status_history().into_iter().collect(),
            edm: raw.edm(),
            extra: IndexMap::new(),
        })
    }

    /// Load from a generic key/value tree, as read from a YAML file
    pub fn populate_from_serialized(&mut self, record: Value) -> Result<(), FitResultError> {
        if self.inner.is_some() {
            return Err(FitResultError::AlreadyPopulated);
        }
        let missing = missing_keys(&record);
        if !missing.is_empty() {
            return Err(FitResultError::MissingFields(missing));
        }
        let serialized: SerializedFitResult = serde_json::from_value(record)
            .map_err(|e| FitResultError::MalformedRecord(e.to_string()))?;
        self.populate_from_record(serialized)
    }

    /// Load from an already typed record
    pub fn populate_from_record(
        &mut self,
        record: SerializedFitResult,
    ) -> Result<(), FitResultError> {
        let n = record.fit_parameters.len();
        let covariance = square_from_flat(&record.covariance_matrix.matrix, n).ok_or_else(|| {
            FitResultError::MalformedRecord(format!(
                "covariance matrix has {} entries, expected {}",
                record.covariance_matrix.matrix.len(),
                n * n
            ))
        })?;
        self.set(Populated {
            const_parameters: record.const_parameters,
            fit_parameters: record.fit_parameters,
            fit_parameters_initial: record.fit_parameters_initial,
            covariance,
            quality: record.covariance_matrix.quality,
            status: record.status,
            edm: record.edm,
            extra: record.extra,
        })
    }

    /// Deep copy with the covariance matrix flattened row-major
    pub fn serialize(&self) -> Result<SerializedFitResult, FitResultError> {
        let data = self.populated()?;
        Ok(SerializedFitResult {
            const_parameters: data.const_parameters.clone(),
            fit_parameters: data.fit_parameters.clone(),
            fit_parameters_initial: data.fit_parameters_initial.clone(),
            covariance_matrix: SerializedCovariance {
                quality: data.quality,
                matrix: flatten_row_major(&data.covariance),
            },
            status: data.status.clone(),
            edm: data.edm,
            extra: data.extra.clone(),
        })
    }

    /// Flat name -> value mapping.
    ///
    /// Each floating parameter `p` gives `p`, `p_err_hesse`, `p_err_plus` and
    /// `p_err_minus`; constants appear under their name; then `status_migrad`,
    /// `status_hesse`, `status_minos` (-1 for a stage that never ran),
    /// `cov_quality` and `edm`. `cov_matrix` is added on request.
    pub fn to_flat_record(&self, include_covariance: bool) -> Result<FlatRecord, FitResultError> {
        let data = self.populated()?;
        let mut record = FlatRecord::with_capacity(
            4 * data.fit_parameters.len() + data.const_parameters.len() + 6,
        );

        for (name, param) in &data.fit_parameters {
            record.insert(name.clone(), FlatValue::Float(param.value));
            record.insert(format!("{name}{SUFFIX_ERR_HESSE}"), FlatValue::Float(param.error));
            record.insert(
                format!("{name}{SUFFIX_ERR_PLUS}"),
                FlatValue::Float(param.error_high),
            );
            record.insert(
                format!("{name}{SUFFIX_ERR_MINUS}"),
                FlatValue::Float(param.error_low),
            );
        }
        for (name, value) in &data.const_parameters {
            record.insert(name.clone(), FlatValue::Float(*value));
        }

        let stage = |label: &str| {
            data.status
                .get(label)
                .map_or(STATUS_NOT_RUN, |code| i64::from(*code))
        };
        record.insert("status_migrad".into(), FlatValue::Int(stage(STAGE_MIGRAD)));
        record.insert("status_hesse".into(), FlatValue::Int(stage(STAGE_HESSE)));
        record.insert("status_minos".into(), FlatValue::Int(stage(STAGE_MINOS)));
        record.insert("cov_quality".into(), FlatValue::Int(i64::from(data.quality)));
        record.insert(
            "edm".into(),
            FlatValue::Float(data.edm.unwrap_or(f64::NAN)),
        );
        if include_covariance {
            record.insert(
                "cov_matrix".into(),
                FlatValue::Sequence(flatten_row_major(&data.covariance)),
            );
        }

        Ok(record)
    }

    pub fn fit_parameter(&self, name: &str) -> Result<FitParameter, FitResultError> {
        self.populated()?
            .fit_parameters
            .get(name)
            .copied()
            .ok_or_else(|| FitResultError::UnknownParameter(name.to_string()))
    }

    pub fn const_parameter(&self, name: &str) -> Result<f64, FitResultError> {
        self.populated()?
            .const_parameters
            .get(name)
            .copied()
            .ok_or_else(|| FitResultError::UnknownParameter(name.to_string()))
    }

    pub fn fit_parameters(&self) -> Result<&IndexMap<String, FitParameter>, FitResultError> {
        Ok(&self.populated()?.fit_parameters)
    }

    pub fn const_parameters(&self) -> Result<&IndexMap<String, f64>, FitResultError> {
        Ok(&self.populated()?.const_parameters)
    }

    pub fn initial_fit_parameters(&self) -> Result<&IndexMap<String, f64>, FitResultError> {
        Ok(&self.populated()?.fit_parameters_initial)
    }

    pub fn covariance_matrix(&self) -> Result<&DMatrix<f64>, FitResultError> {
        Ok(&self.populated()?.covariance)
    }

    /// Covariance restricted to `names`, in the given order
    pub fn covariance_submatrix<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<DMatrix<f64>, FitResultError> {
        let data = self.populated()?;
        let indices = names
            .iter()
            .map(|name| {
                data.fit_parameters
                    .get_index_of(name.as_ref())
                    .ok_or_else(|| FitResultError::UnknownParameter(name.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DMatrix::from_fn(indices.len(), indices.len(), |r, c| {
            data.covariance[(indices[r], indices[c])]
        }))
    }

    pub fn covariance_quality(&self) -> Result<i32, FitResultError> {
        Ok(self.populated()?.quality)
    }

    pub fn status(&self) -> Result<&IndexMap<String, i32>, FitResultError> {
        Ok(&self.populated()?.status)
    }

    pub fn edm(&self) -> Result<Option<f64>, FitResultError> {
        Ok(self.populated()?.edm)
    }

    /// Every stage succeeded and the covariance is fully accurate
    pub fn has_converged(&self) -> Result<bool, FitResultError> {
        let data = self.populated()?;
        Ok(data.status.values().all(|code| *code == STATUS_SUCCESS)
            && data.quality == COV_QUALITY_FULL_ACCURATE)
    }

    /// One multivariate-normal draw of the floating parameters around their fitted values.
    ///
    /// Constants are appended unchanged when `include_constants` is set.
    pub fn sample_parameters<R: Rng + ?Sized>(
        &self,
        include_constants: bool,
        rng: &mut R,
    ) -> Result<IndexMap<String, f64>, FitResultError> {
        let data = self.populated()?;
        let mean = DVector::from_iterator(
            data.fit_parameters.len(),
            data.fit_parameters.values().map(|p| p.value),
        );
        let sample = MultivariateNormal::new(mean, &data.covariance)?.sample(rng);

        let mut output: IndexMap<String, f64> = data
            .fit_parameters
            .keys()
            .cloned()
            .zip(sample.iter().copied())
            .collect();
        if include_constants {
            output.extend(data.const_parameters.iter().map(|(k, v)| (k.clone(), *v)));
        }
        Ok(output)
    }

    /// Read a YAML fit result file
    pub fn from_yaml_file(path: &Path) -> Result<Self, ToyError> {
        if !path.exists() {
            return Err(ToyError::MissingFile(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let record: Value = serde_saphyr::from_str(&content).map_err(|e| {
            FitResultError::MalformedRecord(format!("{}: {e}", path.display()))
        })?;
        let mut result = FitResult::new();
        result.populate_from_serialized(record)?;
        debug!(path = %path.display(), "Loaded fit result");
        Ok(result)
    }

    /// Write the serialized form as YAML, atomically
    pub fn to_yaml_file(&self, path: &Path) -> Result<(), ToyError> {
        let yaml = serde_saphyr::to_string(&self.serialize()?)
            .map_err(|e| FitResultError::MalformedRecord(e.to_string()))?;
        atomic_write(path, yaml.as_bytes())?;
        debug!(path = %path.display(), "Saved fit result");
        Ok(())
    }

    /// Load the fit result stored as `name` under the data directory
    pub fn load(name: &str, paths: &DataPaths) -> Result<Self, ToyError> {
        Self::from_yaml_file(&paths.fit_result(name))
    }

    /// Save as `name` under the data directory, returning the file written
    pub fn save(&self, name: &str, paths: &DataPaths) -> Result<PathBuf, ToyError> {
        let path = paths.fit_result(name);
        self.to_yaml_file(&path)?;
        Ok(path)
    }
}
