use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the fit result manager
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitResultError {
    #[error("trying to read a fit result that has not been populated")]
    NotPopulated,
    #[error("trying to overwrite an already populated fit result")]
    AlreadyPopulated,
    #[error("unknown parameter {0:?}")]
    UnknownParameter(String),
    #[error("missing keys in fit result record -> {}", .0.join(","))]
    MissingFields(Vec<String>),
    #[error("malformed fit result record: {0}")]
    MalformedRecord(String),
    #[error("covariance matrix cannot be sampled: {0}")]
    InvalidCovariance(String),
}

/// Errors in the configuration tree
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Required keys are absent. Paths use `/` as separator.
    #[error("missing configuration keys -> {}", .0.join(","))]
    MissingKeys(Vec<String>),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
    #[error("unknown fit strategy {0:?}")]
    UnknownStrategy(String),
    #[error("unknown systematic type {0:?}")]
    UnknownSystematic(String),
    #[error("systematic {0:?} is already registered")]
    DuplicateSystematic(String),
    #[error("cannot parse configuration: {0}")]
    Parse(String),
}

/// Errors configuring the physics model
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("unknown parameter {0:?} in the physics model")]
    UnknownParameter(String),
    #[error("unknown observable {0:?} in the physics model")]
    UnknownObservable(String),
    #[error("unknown category {0:?}")]
    UnknownCategory(String),
    #[error("invalid range for {name}: [{min}, {max}]")]
    InvalidRange { name: String, min: f64, max: f64 },
    #[error("bad model configuration: {0}")]
    Config(String),
}

/// Runtime failures while generating or fitting
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("no floating parameters to fit")]
    NoFloatingParameters,
    #[error("cannot fit an empty dataset")]
    EmptyDataset,
    #[error("likelihood is not finite at the starting point")]
    NonFiniteLikelihood,
    #[error("event generation failed: {0}")]
    Generation(String),
    #[error("observable {0:?} is missing from the dataset")]
    MissingObservable(String),
    #[error("event category {0:?} is not part of the model")]
    UnknownCategory(String),
}

/// Errors combining or reading datasets
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DatasetError {
    #[error("incompatible observables: expected {expected:?}, found {found:?}")]
    Incompatible {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("no datasets to merge")]
    Empty,
    #[error("malformed dataset: {0}")]
    Malformed(String),
}

/// Errors in the toy output store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("incompatible columns in {table}: expected {expected:?}, found {found:?}")]
    IncompatibleColumns {
        table: String,
        expected: Vec<String>,
        found: Vec<String>,
    },
}

/// Umbrella error for a full toy run
#[derive(Debug, Error)]
pub enum ToyError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot find file {}", .0.display())]
    MissingFile(PathBuf),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("error in fitting events: {0}")]
    Fitting(#[from] FitError),
    #[error(transparent)]
    FitResult(#[from] FitResultError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToyError {
    /// Wraps any failure raised inside a generate/fit iteration.
    ///
    /// The loop is all-or-nothing, so whatever went wrong is reported as a
    /// fitting failure with the original message preserved.
    pub fn into_fitting(self) -> ToyError {
        match self {
            ToyError::Fitting(_) => self,
            other => ToyError::Fitting(FitError::Generation(other.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, ToyError>;
