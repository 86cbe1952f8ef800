//! Subcommands of the `toyfit` binary.
//!
//! Each command returns a [`ToyError`] on failure; [`exit_status`] turns it into
//! the process exit code.

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::result::Result;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;
use tracing::{info, warn};

use toyfit_core::error::{StoreError, ToyError};
use toyfit_core::model::CATEGORY_COLUMN;
use toyfit_core::prelude::*;
use toyfit_core::toys::{NoneSyst, load_toy_fits};

pub const EXIT_CONFIG: i32 = 1;
pub const EXIT_MISSING_FILE: i32 = 2;
pub const EXIT_MODEL: i32 = 3;
pub const EXIT_FITTING: i32 = 4;
pub const EXIT_INCONSISTENT_INPUT: i32 = 5;
pub const EXIT_OTHER: i32 = 128;

/// Batch system variables holding the job identifier, checked in order
const JOB_ID_VARIABLES: [&str; 3] = ["SLURM_JOB_ID", "PBS_JOBID", "LSB_JOBID"];
const LOCAL_JOB_PREFIX: &str = "local";

pub fn exit_status(err: &ToyError) -> i32 {
    match err {
        ToyError::Config(_) => EXIT_CONFIG,
        ToyError::MissingFile(_) | ToyError::Io(_) => EXIT_MISSING_FILE,
        ToyError::Store(StoreError::Io { .. }) => EXIT_MISSING_FILE,
        ToyError::Model(_) => EXIT_MODEL,
        ToyError::Fitting(_) => EXIT_FITTING,
        ToyError::Dataset(_)
        | ToyError::FitResult(_)
        | ToyError::Store(StoreError::IncompatibleColumns { .. }) => EXIT_INCONSISTENT_INPUT,
        ToyError::Store(StoreError::Csv(_)) => EXIT_OTHER,
    }
}

/// `local-<unix seconds>-<pid>`, distinct for every local run
fn local_job_id() -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    format!("{LOCAL_JOB_PREFIX}-{seconds}-{}", process::id())
}

/// Explicit id, else the batch system's, else a local one
pub fn job_id(explicit: Option<&str>) -> String {
    job_id_from(explicit, |key| env::var(key).ok())
}

fn job_id_from(explicit: Option<&str>, lookup: impl Fn(&str) -> Option<String>) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| {
            JOB_ID_VARIABLES
                .iter()
                .find_map(|key| lookup(key).filter(|v| !v.is_empty()))
        })
        .unwrap_or_else(local_job_id)
}

/// Options of a systematic toy run
#[derive(Debug, Clone, Default)]
pub struct SystRequest {
    /// Configuration files, merged in order
    pub configs: Vec<PathBuf>,
    /// Overrides `link-from` of the configuration
    pub link_from: Option<PathBuf>,
    /// Overrides `seed` of the configuration
    pub seed: Option<u64>,
    pub job_id: Option<String>,
    pub verbose: bool,
}

/// Run systematic toys and append them to the toy store. Returns the store.
pub fn run_syst(paths: &DataPaths, request: &SystRequest) -> Result<ToyStore, ToyError> {
    let config = load_config(&request.configs)?;
    let toy_config = ToyConfig::from_value(&config)?;
    info!(name = %toy_config.name, nfits = toy_config.nfits, "Loaded configuration");

    let model = PhysicsModel::from_config(&ModelConfig::from_value(toy_config.model.clone())?)?;
    let acceptance = toy_config
        .acceptance
        .as_ref()
        .map(|node| EfficiencyAcceptance::from_config(node, &model.observable_names()))
        .transpose()?;

    let registry = SystematicRegistry::with_builtins();
    let systematic = registry.build(&SystematicContext {
        model: &model,
        config: &toy_config.syst,
        paths,
    })?;
    let mut generator = ToyGenerator::new(model.clone(), systematic);

    let mut entropy = seeded_rng(request.seed.or(toy_config.seed));

    let settings = SystToySettings {
        model_name: toy_config.model_name.clone(),
        strategy: toy_config.strategy,
        options: toy_config.fit_options(request.verbose),
        nfits: toy_config.nfits,
        job_id: job_id(request.job_id.as_deref()),
    };
    let output = run_syst_toys(
        &LikelihoodFitter::default(),
        &model,
        &mut generator,
        acceptance.as_ref().map(|a| a as &dyn Acceptance),
        &settings,
        &mut entropy,
    )?;

    let link_from = request.link_from.as_deref().or(toy_config.link_from.as_deref());
    let store = ToyStore::open(paths, &toy_config.name, link_from)?;
    store.write_run(&output)?;
    Ok(store)
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => {
            info!(seed, "Using fixed entropy seed");
            StdRng::seed_from_u64(seed)
        }
        None => StdRng::from_os_rng(),
    }
}

fn load_model(configs: &[PathBuf]) -> Result<(Value, FitConfig, PhysicsModel), ToyError> {
    let config = load_config(configs)?;
    let fit_config = FitConfig::from_value(&config)?;
    let model = PhysicsModel::from_config(&ModelConfig::from_value(fit_config.model.clone())?)?;
    Ok((config, fit_config, model))
}

/// Generate one dataset from the nominal model and write it as CSV.
/// Returns the number of events.
pub fn generate(configs: &[PathBuf], output: &Path, seed: Option<u64>) -> Result<usize, ToyError> {
    let (config, _, model) = load_model(configs)?;
    let acceptance = config
        .get("acceptance")
        .map(|node| EfficiencyAcceptance::from_config(node, &model.observable_names()))
        .transpose()?;

    let mut rng = seeded_rng(seed.or_else(|| config.get("seed").and_then(Value::as_u64)));
    let mut generator = ToyGenerator::new(model, Box::new(NoneSyst));
    let dataset = generator.get_dataset(
        acceptance.as_ref().map(|a| a as &dyn Acceptance),
        false,
        &mut rng,
    )?;
    for (label, events) in dataset.indices_by_label() {
        info!(category = label.unwrap_or("-"), events = events.len(), "Generated");
    }
    dataset.to_csv(output)?;
    info!(path = %output.display(), events = dataset.len(), "Wrote dataset");
    Ok(dataset.len())
}

/// Options of a fit to an external dataset
#[derive(Debug, Clone, Default)]
pub struct FitRequest {
    pub configs: Vec<PathBuf>,
    /// CSV file, one column per observable plus `category` for simultaneous models
    pub data: PathBuf,
    /// Store the result under this name in the data directory
    pub save: Option<String>,
    pub verbose: bool,
}

/// Fit the model to a CSV dataset and print the result
pub fn fit_data<W: Write>(
    paths: &DataPaths,
    request: &FitRequest,
    out: &mut W,
) -> Result<FitResult, ToyError> {
    let (_, fit_config, model) = load_model(&request.configs)?;
    if !request.data.is_file() {
        return Err(ToyError::MissingFile(request.data.clone()));
    }
    let label_column = model.is_simultaneous().then_some(CATEGORY_COLUMN);
    let dataset = Dataset::from_csv(&request.data, label_column)?;
    info!(path = %request.data.display(), events = dataset.len(), "Loaded dataset");

    let raw = LikelihoodFitter::default().fit(
        &model,
        &fit_config.model_name,
        fit_config.strategy,
        &dataset,
        &fit_config.fit_options(request.verbose),
    )?;
    let mut result = FitResult::new();
    result.populate_from_engine(&raw)?;
    if !result.has_converged()? {
        warn!("Fit did not converge");
    }

    match &request.save {
        Some(name) => {
            let path = result.save(name, paths)?;
            write_summary(out, &path.display().to_string(), &result)?;
        }
        None => write_summary(out, &request.data.display().to_string(), &result)?,
    }
    Ok(result)
}

fn write_summary<W: Write>(out: &mut W, title: &str, result: &FitResult) -> Result<(), ToyError> {
    writeln!(out, "{title}")?;
    writeln!(
        out,
        "converged: {}  covariance quality: {}",
        result.has_converged()?,
        result.covariance_quality()?
    )?;
    match result.edm()? {
        Some(edm) => writeln!(out, "edm: {edm:e}")?,
        None => writeln!(out, "edm: n/a")?,
    }
    let status = result
        .status()?
        .iter()
        .map(|(stage, code)| format!("{stage}={code}"))
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(out, "status: {status}")?;

    writeln!(out, "{:<24} {:>14} {:>12} {:>12} {:>12}", "parameter", "value", "error", "low", "high")?;
    for (name, p) in result.fit_parameters()? {
        writeln!(
            out,
            "{name:<24} {:>14.6} {:>12.6} {:>12.6} {:>12.6}",
            p.value, p.error, p.error_low, p.error_high
        )?;
    }
    for (name, value) in result.const_parameters()? {
        writeln!(out, "{name:<24} {value:>14.6} (constant)")?;
    }
    Ok(())
}

/// Resolve a fit result argument: an existing file, or a name under the data directory
fn fit_result_path(paths: &DataPaths, arg: &str) -> PathBuf {
    let path = Path::new(arg);
    if path.is_file() {
        path.to_path_buf()
    } else {
        paths.fit_result(arg)
    }
}

/// Print a stored fit result
pub fn inspect<W: Write>(paths: &DataPaths, arg: &str, out: &mut W) -> Result<(), ToyError> {
    let path = fit_result_path(paths, arg);
    let result = FitResult::from_yaml_file(&path)?;
    write_summary(out, &path.display().to_string(), &result)
}

/// Merge the fit results of several toy stores and write them as CSV
pub fn merge<W: Write>(
    paths: &DataPaths,
    names: &[String],
    allow_incompatible: bool,
    out: W,
) -> Result<usize, ToyError> {
    let table = load_toy_fits(paths, names, !allow_incompatible)?;
    if table.is_empty() {
        warn!("No toy fits found");
    }
    table.write_csv(out, true)?;
    info!(stores = names.len(), rows = table.len(), "Merged toy fits");
    Ok(table.len())
}

/// Write `merge` output to a file, or stdout when `output` is `None`
pub fn merge_to(
    paths: &DataPaths,
    names: &[String],
    allow_incompatible: bool,
    output: Option<&Path>,
) -> Result<usize, ToyError> {
    match output {
        Some(path) => merge(paths, names, allow_incompatible, std::fs::File::create(path)?),
        None => merge(paths, names, allow_incompatible, io::stdout().lock()),
    }
}
