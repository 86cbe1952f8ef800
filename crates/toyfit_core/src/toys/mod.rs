//! Pseudo-experiments for systematic studies
//!
//! A run builds a [`ToyGenerator`] from the generation model and a [`Systematic`]
//! picked from a [`SystematicRegistry`], calls [`run_syst_toys`], and appends the
//! resulting tables to a [`ToyStore`].

mod generator;
pub mod metrics;
pub mod store;
mod syst_toys;
pub mod systematics;
mod table;

pub use generator::ToyGenerator;
pub use metrics::{RunMetrics, RunSummary};
pub use store::{ToyStore, load_toy_fits};
pub use syst_toys::{
    SystToySettings, SystematicToyRecord, ToyRunOutput, build_output, run_syst_toys,
};
pub use systematics::{
    FixedParamsSyst, NoneSyst, Systematic, SystematicBuilder, SystematicContext,
    SystematicRegistry,
};
pub use table::{Cell, ToyTable, record_cells};
