//! Criterion benchmarks for toyfit_core
//!
//! Run with: cargo bench -p toyfit_core

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;
use toyfit_core::fit::{FitEngine, FitOptions, FitResult, FitStrategy, LikelihoodFitter};
use toyfit_core::model::{ModelConfig, PhysicsModel};
use toyfit_core::toys::{NoneSyst, SystToySettings, ToyGenerator, run_syst_toys};

fn create_mass_model(nsig: f64, nbkg: f64) -> PhysicsModel {
    let config = ModelConfig::from_value(json!({
        "observables": {"mass": {"min": 5000.0, "max": 5600.0}},
        "parameters": {
            "mu": {"value": 5279.0, "min": 5200.0, "max": 5350.0},
            "sigma": {"value": 20.0, "min": 5.0, "max": 60.0},
            "tau": {"value": -0.004, "min": -0.02, "max": 0.0},
            "nsig": {"value": nsig, "min": 0.0, "max": 100000.0},
            "nbkg": {"value": nbkg, "min": 0.0, "max": 100000.0}
        },
        "components": [
            {"name": "signal", "yield": "nsig",
             "shapes": [{"type": "gaussian", "observable": "mass", "mu": "mu", "sigma": "sigma"}]},
            {"name": "background", "yield": "nbkg",
             "shapes": [{"type": "exponential", "observable": "mass", "tau": "tau"}]}
        ]
    }))
    .expect("valid model configuration");
    PhysicsModel::from_config(&config).expect("valid model")
}

fn bench_generation(c: &mut Criterion) {
    let model = create_mass_model(4000.0, 6000.0);

    c.bench_function("generate_10k_events", |b| {
        let mut rng = StdRng::seed_from_u64(42);
        b.iter(|| model.generate(0, black_box(10_000), &mut rng))
    });
}

fn bench_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit");
    let fitter = LikelihoodFitter::default();

    for events in [500.0, 2000.0].iter() {
        let model = create_mass_model(0.4 * events, 0.6 * events);
        let mut rng = StdRng::seed_from_u64(42);
        let data = model
            .generate_extended(0, &mut rng)
            .expect("generation succeeds");

        group.bench_with_input(BenchmarkId::new("simple", events), events, |b, _| {
            b.iter(|| {
                fitter.fit(
                    black_box(&model),
                    "model",
                    FitStrategy::Simple,
                    black_box(&data),
                    &FitOptions::default(),
                )
            })
        });
    }

    group.finish();
}

fn bench_fit_result_sampling(c: &mut Criterion) {
    let model = create_mass_model(400.0, 600.0);
    let mut rng = StdRng::seed_from_u64(42);
    let data = model.generate_extended(0, &mut rng).expect("generation succeeds");
    let raw = LikelihoodFitter::default()
        .fit(&model, "model", FitStrategy::Simple, &data, &FitOptions::default())
        .expect("fit succeeds");
    let mut result = FitResult::new();
    result.populate_from_engine(&raw).expect("fresh result");

    c.bench_function("sample_parameters", |b| {
        b.iter(|| result.sample_parameters(black_box(true), &mut rng))
    });
}

fn bench_toy_loop(c: &mut Criterion) {
    let model = create_mass_model(400.0, 600.0);
    let settings = SystToySettings {
        model_name: "model".into(),
        strategy: FitStrategy::Simple,
        options: FitOptions::default(),
        nfits: 5,
        job_id: "bench".into(),
    };

    c.bench_function("syst_toys_5_iterations", |b| {
        b.iter(|| {
            let mut generator = ToyGenerator::new(model.clone(), Box::new(NoneSyst));
            let mut entropy = StdRng::seed_from_u64(42);
            run_syst_toys(
                &LikelihoodFitter::default(),
                black_box(&model),
                &mut generator,
                None,
                &settings,
                &mut entropy,
            )
        })
    });
}

criterion_group!(
    benches,
    bench_generation,
    bench_fit,
    bench_fit_result_sampling,
    bench_toy_loop
);
criterion_main!(benches);
