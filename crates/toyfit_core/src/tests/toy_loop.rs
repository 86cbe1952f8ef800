//! Tests for full systematic toy runs
//!
//! These tests verify:
//! - Without randomization the nominal and randomized fits agree
//! - The output tables have the expected columns and keys
//! - A fixed entropy seed reproduces byte-identical store files
//! - Failures inside the loop are reported as fitting errors
//! - Simultaneous models generate labelled categories and fit them jointly

use std::fs;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;
use tempfile::tempdir;

use crate::error::{FitError, ToyError};
use crate::fit::{FitEngine, FitOptions, FitResult, FitStrategy, LikelihoodFitter};
use crate::model::fixtures::mass_model;
use crate::model::{CATEGORY_COLUMN, ModelConfig, PhysicsModel};
use crate::paths::DataPaths;
use crate::toys::store::FIT_RESULTS_TABLE;
use crate::toys::{
    Cell, NoneSyst, SystToySettings, ToyGenerator, ToyRunOutput, ToyStore, ToyTable, load_toy_fits,
    run_syst_toys,
};

fn settings(nfits: usize) -> SystToySettings {
    SystToySettings {
        model_name: "model".into(),
        strategy: FitStrategy::Simple,
        options: FitOptions::default(),
        nfits,
        job_id: "local".into(),
    }
}

fn run_identity(nfits: usize, entropy_seed: u64) -> ToyRunOutput {
    let model = mass_model();
    let mut generator = ToyGenerator::new(model.clone(), Box::new(NoneSyst));
    let mut entropy = StdRng::seed_from_u64(entropy_seed);
    run_syst_toys(
        &LikelihoodFitter::default(),
        &model,
        &mut generator,
        None,
        &settings(nfits),
        &mut entropy,
    )
    .unwrap()
}

/// Test that an unrandomized model gives identical nominal and randomized fits
#[test]
fn test_identity_systematic_nominal_equals_rand() {
    let output = run_identity(5, 21);
    let table = &output.fit_results;
    assert_eq!(table.len(), 5);

    for param in ["mu", "sigma", "tau"] {
        let nominal = table.float_column(&format!("{param}_nominal")).unwrap();
        let rand = table.float_column(&format!("{param}_rand")).unwrap();
        for (n, r) in nominal.iter().zip(&rand) {
            assert!((n - r).abs() <= 1e-9 * n.abs().max(1.0), "{param}: {n} vs {r}");
        }
        let gen_values = table.float_column(&format!("{param}_gen")).unwrap();
        assert!(gen_values.iter().all(|v| *v == gen_values[0]));
    }

    let fitnum: Vec<f64> = table.float_column("fitnum").unwrap();
    assert_eq!(fitnum, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
}

/// Test the layout of the output tables
#[test]
fn test_output_layout() {
    let output = run_identity(2, 22);
    let columns = output.fit_results.columns();

    assert_eq!(&columns[..4], ["fitnum", "seed", "model_name", "fit_strategy"]);
    assert_eq!(columns.last().map(String::as_str), Some("jobid"));
    // Three floating parameters, two yields held constant, five status columns
    let per_fit = 4 * 3 + 2 + 5;
    assert_eq!(columns.len(), 4 + 2 * per_fit + 5 + 1);
    assert!(columns.iter().any(|c| c == "mu_err_hesse_nominal"));
    assert!(columns.iter().any(|c| c == "status_migrad_rand"));
    assert!(columns.iter().any(|c| c == "nsig_gen"));
    assert!(!columns.iter().any(|c| c.starts_with("cov_matrix")));

    let row = &output.fit_results.rows()[1];
    assert_eq!(row[2], Cell::from("model"));
    assert_eq!(row[3], Cell::from("simple"));
    assert_eq!(row[columns.len() - 1], Cell::from("local"));

    let keys: Vec<&String> = output.covariance.keys().collect();
    assert_eq!(
        keys,
        [
            "covariance/local/0/nominal",
            "covariance/local/0/rand",
            "covariance/local/1/nominal",
            "covariance/local/1/rand"
        ]
    );
    let cov = &output.covariance["covariance/local/1/rand"];
    assert_eq!(cov.columns(), ["parameter", "mu", "sigma", "tau"]);
    assert_eq!(cov.len(), 3);

    assert_eq!(output.input_values.len(), 1);
    assert_eq!(output.input_values.float_column("mu"), Some(vec![5279.0]));
}

/// Test that a fixed entropy seed reproduces the stored files exactly
#[test]
fn test_runs_are_deterministic() {
    let dir = tempdir().unwrap();
    let paths = DataPaths::new(dir.path());

    for name in ["first", "second"] {
        let output = run_identity(3, 23);
        ToyStore::open(&paths, name, None)
            .unwrap()
            .write_run(&output)
            .unwrap();
    }

    for file in [
        "fit_results.csv",
        "input_values.csv",
        "covariance/local/2/nominal.csv",
    ] {
        let first = fs::read(paths.toy_store("first").join(file)).unwrap();
        let second = fs::read(paths.toy_store("second").join(file)).unwrap();
        assert_eq!(first, second, "{file} differs");
    }

    let merged = load_toy_fits(&paths, &["first", "second"], true).unwrap();
    assert_eq!(merged.len(), 6);
    let seeds = merged.float_column("seed").unwrap();
    assert_eq!(seeds[..3], seeds[3..]);
}

/// Test that rows with a different header are not appended
#[test]
fn test_store_rejects_mismatched_header() {
    let dir = tempdir().unwrap();
    let store = ToyStore::new(dir.path().join("mixed"));
    store.write_run(&run_identity(1, 24)).unwrap();

    let mut output = run_identity(1, 25);
    output.fit_results = {
        let mut table = ToyTable::new(vec!["fitnum".into()]);
        table.push_row(vec![Cell::Int(0)]).unwrap();
        table
    };
    assert!(store.write_run(&output).is_err());
    assert_eq!(store.read_table(FIT_RESULTS_TABLE).unwrap().len(), 1);
}

/// Test that a failing generation aborts the run as a fitting error
#[test]
fn test_failure_is_fitting_error() {
    // No positive yield: nothing to generate, nothing to fit
    let model = PhysicsModel::from_config(
        &ModelConfig::from_value(json!({
            "observables": {"mass": {"min": 5000.0, "max": 5600.0}},
            "parameters": {"nsig": {"value": 0.0, "min": 0.0, "max": 10.0}},
            "components": [{
                "name": "signal",
                "yield": "nsig",
                "shapes": [{"type": "flat", "observable": "mass"}]
            }]
        }))
        .unwrap(),
    )
    .unwrap();

    let mut generator = ToyGenerator::new(model.clone(), Box::new(NoneSyst));
    let mut entropy = StdRng::seed_from_u64(26);
    let err = run_syst_toys(
        &LikelihoodFitter::default(),
        &model,
        &mut generator,
        None,
        &settings(3),
        &mut entropy,
    )
    .unwrap_err();
    assert!(matches!(err, ToyError::Fitting(FitError::EmptyDataset)), "{err:?}");
}

/// Signal in category `a`, background in category `b`
fn two_category_model() -> PhysicsModel {
    PhysicsModel::from_config(
        &ModelConfig::from_value(json!({
            "observables": {"mass": {"min": 5000.0, "max": 5600.0}},
            "parameters": {
                "mu": {"value": 5279.0, "min": 5200.0, "max": 5350.0},
                "sigma": {"value": 20.0, "min": 5.0, "max": 60.0},
                "tau": {"value": -0.004, "min": -0.02, "max": 0.0},
                "nsig": {"value": 300.0, "min": 0.0, "max": 5000.0},
                "nbkg": {"value": 200.0, "min": 0.0, "max": 5000.0}
            },
            "categories": {
                "a": [{
                    "name": "signal",
                    "yield": "nsig",
                    "shapes": [{"type": "gaussian", "observable": "mass", "mu": "mu", "sigma": "sigma"}]
                }],
                "b": [{
                    "name": "background",
                    "yield": "nbkg",
                    "shapes": [{"type": "exponential", "observable": "mass", "tau": "tau"}]
                }]
            }
        }))
        .unwrap(),
    )
    .unwrap()
}

/// Test generating and fitting a simultaneous model
#[test]
fn test_simultaneous_generate_and_fit() {
    let model = two_category_model();
    assert!(model.is_simultaneous());
    let mut generator = ToyGenerator::new(model.clone(), Box::new(NoneSyst));
    let mut rng = StdRng::seed_from_u64(27);
    let data = generator.get_dataset(None, false, &mut rng).unwrap();

    assert_eq!(data.label_column(), Some(CATEGORY_COLUMN));
    let groups = data.indices_by_label();
    let labels: Vec<Option<&str>> = groups.iter().map(|(label, _)| *label).collect();
    assert_eq!(labels, [Some("a"), Some("b")]);
    let (n_a, n_b) = (groups[0].1.len(), groups[1].1.len());
    assert_eq!(n_a + n_b, data.len());
    assert!((n_a as f64 - 300.0).abs() < 5.0 * 300f64.sqrt(), "a: {n_a}");
    assert!((n_b as f64 - 200.0).abs() < 5.0 * 200f64.sqrt(), "b: {n_b}");

    let fit = |extended: bool| {
        let options = FitOptions {
            extended,
            ..FitOptions::default()
        };
        let raw = LikelihoodFitter::default()
            .fit(&model, "model", FitStrategy::Simple, &data, &options)
            .unwrap();
        let mut result = FitResult::new();
        result.populate_from_engine(&raw).unwrap();
        result
    };

    let extended = fit(true);
    assert!(extended.has_converged().unwrap());
    let yields = extended.fit_parameters().unwrap();
    // One component per category: the fitted yield is the observed count
    assert!((yields["nsig"].value - n_a as f64).abs() < 1.0);
    assert!((yields["nbkg"].value - n_b as f64).abs() < 1.0);

    let shapes_only = fit(false);
    assert!(shapes_only.has_converged().unwrap());
    assert_eq!(
        shapes_only.fit_parameters().unwrap().keys().collect::<Vec<_>>(),
        ["mu", "sigma", "tau"]
    );
    assert_eq!(shapes_only.const_parameters().unwrap()["nsig"], 300.0);
}

/// Test a full run over a simultaneous model
#[test]
fn test_simultaneous_toy_run() {
    let model = two_category_model();
    let mut generator = ToyGenerator::new(model.clone(), Box::new(NoneSyst));
    let mut entropy = StdRng::seed_from_u64(28);
    let output = run_syst_toys(
        &LikelihoodFitter::default(),
        &model,
        &mut generator,
        None,
        &settings(2),
        &mut entropy,
    )
    .unwrap();

    assert_eq!(output.fit_results.len(), 2);
    let nominal = output.fit_results.float_column("mu_nominal").unwrap();
    let rand = output.fit_results.float_column("mu_rand").unwrap();
    for (n, r) in nominal.iter().zip(&rand) {
        assert!((n - r).abs() <= 1e-9 * n.abs(), "{n} vs {r}");
    }
    assert_eq!(output.covariance.len(), 4);
}
