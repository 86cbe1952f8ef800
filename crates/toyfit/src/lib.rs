//! Command line front end for systematic toy studies.
//!
//! The heavy lifting lives in `toyfit_core`; this crate wires configuration files,
//! the data directory, logging and exit codes around it.

pub mod commands;
pub mod logging;

pub use commands::{
    FitRequest, SystRequest, exit_status, fit_data, generate, inspect, job_id, merge, merge_to,
    run_syst,
};
pub use logging::init_logging;
