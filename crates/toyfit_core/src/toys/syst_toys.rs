//! Systematic toys: generate from a randomized model, then fit twice.
//!
//! Every iteration draws a 32-bit seed from the entropy source and builds its own
//! generator from it, so a single toy can be reproduced from its `seed` column. The
//! dataset is fitted with the nominal model and with the randomized one; both fits
//! use the same strategy and options.

use indexmap::IndexMap;
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{debug, info};

use super::generator::ToyGenerator;
use super::metrics::RunMetrics;
use super::table::{Cell, ToyTable, record_cells};
use crate::acceptance::Acceptance;
use crate::error::{FitResultError, ToyError};
use crate::fit::{FitEngine, FitOptions, FitResult, FitStrategy, FlatRecord};
use crate::model::PhysicsModel;

const PROGRESS_EVERY: usize = 20;

const SUFFIX_NOMINAL: &str = "_nominal";
const SUFFIX_RAND: &str = "_rand";
const SUFFIX_GEN: &str = "_gen";

/// Fixed settings of a toy run
#[derive(Debug, Clone)]
pub struct SystToySettings {
    pub model_name: String,
    pub strategy: FitStrategy,
    pub options: FitOptions,
    pub nfits: usize,
    pub job_id: String,
}

/// One generate/fit iteration
#[derive(Debug, Clone, PartialEq)]
pub struct SystematicToyRecord {
    pub fitnum: usize,
    pub seed: u32,
    pub nominal: FlatRecord,
    pub rand: FlatRecord,
    /// Parameter values of the randomized model used to generate
    pub gen_values: IndexMap<String, f64>,
    /// Floating parameters, in covariance order
    pub param_names: Vec<String>,
    pub covariance_nominal: DMatrix<f64>,
    pub covariance_rand: DMatrix<f64>,
}

/// Everything a run writes to the toy store
#[derive(Debug, Clone, PartialEq)]
pub struct ToyRunOutput {
    pub fit_results: ToyTable,
    /// `covariance/<jobid>/<fitnum>/{nominal|rand}` -> square table
    pub covariance: IndexMap<String, ToyTable>,
    pub input_values: ToyTable,
}

/// Run `settings.nfits` systematic toys.
///
/// Any failure inside an iteration aborts the run as a fitting error.
pub fn run_syst_toys<E: FitEngine>(
    engine: &E,
    fit_model: &PhysicsModel,
    generator: &mut ToyGenerator,
    acceptance: Option<&dyn Acceptance>,
    settings: &SystToySettings,
    entropy: &mut dyn RngCore,
) -> Result<ToyRunOutput, ToyError> {
    info!(
        nfits = settings.nfits,
        model = %settings.model_name,
        strategy = %settings.strategy,
        systematic = generator.systematic().name(),
        "Starting sampling-fit loop (print frequency is {PROGRESS_EVERY})"
    );
    let mut metrics = RunMetrics::start();
    let mut records = Vec::with_capacity(settings.nfits);
    for fitnum in 0..settings.nfits {
        if (fitnum + 1) % PROGRESS_EVERY == 0 {
            info!("  Fitting event {}/{}", fitnum + 1, settings.nfits);
        }
        let seed = entropy.next_u32();
        let record = run_iteration(engine, fit_model, generator, acceptance, settings, fitnum, seed)
            .map_err(ToyError::into_fitting)?;
        records.push(record);
        metrics.record_iteration();
    }
    let summary = metrics.finish();
    info!("Fitting loop over");
    info!(
        "--> Memory leakage: {:.2} MB/sample-fit",
        summary.mb_per_iteration()
    );
    info!("--> Spent {:.0} ms/sample-fit", summary.ms_per_iteration());

    build_output(&records, generator.input_values(), settings)
}

fn run_iteration<E: FitEngine>(
    engine: &E,
    fit_model: &PhysicsModel,
    generator: &mut ToyGenerator,
    acceptance: Option<&dyn Acceptance>,
    settings: &SystToySettings,
    fitnum: usize,
    seed: u32,
) -> Result<SystematicToyRecord, ToyError> {
    let mut rng = StdRng::seed_from_u64(u64::from(seed));
    let dataset = generator.get_dataset(acceptance, true, &mut rng)?;
    let gen_values = generator.current_values();

    let fit = |model: &PhysicsModel| -> Result<FitResult, ToyError> {
        let raw = engine.fit(
            model,
            &settings.model_name,
            settings.strategy,
            &dataset,
            &settings.options,
        )?;
        let mut result = FitResult::new();
        result.populate_from_engine(&raw)?;
        Ok(result)
    };
    let nominal = fit(fit_model)?;
    let rand = fit(generator.model())?;
    debug!(fitnum, seed, events = dataset.len(), "Finished toy");

    Ok(SystematicToyRecord {
        fitnum,
        seed,
        param_names: rand.fit_parameters()?.keys().cloned().collect(),
        covariance_nominal: nominal.covariance_matrix()?.clone(),
        covariance_rand: rand.covariance_matrix()?.clone(),
        nominal: nominal.to_flat_record(true)?,
        rand: rand.to_flat_record(true)?,
        gen_values,
    })
}

/// Square covariance table with a leading `parameter` column
fn covariance_table(names: &[String], matrix: &DMatrix<f64>) -> Result<ToyTable, ToyError> {
    if matrix.nrows() != names.len() || matrix.ncols() != names.len() {
        return Err(FitResultError::MalformedRecord(format!(
            "covariance is {}x{} for {} parameters",
            matrix.nrows(),
            matrix.ncols(),
            names.len()
        ))
        .into());
    }
    let mut columns = vec!["parameter".to_string()];
    columns.extend(names.iter().cloned());
    let mut table = ToyTable::new(columns);
    for (r, name) in names.iter().enumerate() {
        let mut row = vec![Cell::from(name.as_str())];
        row.extend((0..names.len()).map(|c| Cell::Float(matrix[(r, c)])));
        table.push_row(row)?;
    }
    Ok(table)
}

fn scalar_columns(record: &FlatRecord, suffix: &str) -> Vec<(String, Cell)> {
    record_cells(record)
        .map(|(name, cell)| (format!("{name}{suffix}"), cell))
        .collect()
}

/// Assemble the tables of a finished run
pub fn build_output(
    records: &[SystematicToyRecord],
    input_values: &IndexMap<String, f64>,
    settings: &SystToySettings,
) -> Result<ToyRunOutput, ToyError> {
    let mut fit_results = ToyTable::default();
    let mut covariance = IndexMap::with_capacity(2 * records.len());
    for record in records {
        let mut row: IndexMap<String, Cell> = IndexMap::new();
        row.insert("fitnum".into(), Cell::Int(record.fitnum as i64));
        row.insert("seed".into(), Cell::Int(i64::from(record.seed)));
        row.insert("model_name".into(), Cell::from(settings.model_name.as_str()));
        row.insert("fit_strategy".into(), Cell::from(settings.strategy.name()));
        row.extend(scalar_columns(&record.nominal, SUFFIX_NOMINAL));
        row.extend(scalar_columns(&record.rand, SUFFIX_RAND));
        row.extend(
            record
                .gen_values
                .iter()
                .map(|(name, value)| (format!("{name}{SUFFIX_GEN}"), Cell::Float(*value))),
        );
        row.insert("jobid".into(), Cell::from(settings.job_id.as_str()));
        fit_results.push_record(row)?;

        for (kind, matrix) in [
            ("nominal", &record.covariance_nominal),
            ("rand", &record.covariance_rand),
        ] {
            covariance.insert(
                format!("covariance/{}/{}/{kind}", settings.job_id, record.fitnum),
                covariance_table(&record.param_names, matrix)?,
            );
        }
    }

    let mut input_table = ToyTable::default();
    input_table.push_record(
        input_values
            .iter()
            .map(|(name, value)| (name.clone(), Cell::Float(*value)))
            .collect(),
    )?;

    Ok(ToyRunOutput {
        fit_results,
        covariance,
        input_values: input_table,
    })
}

