use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use toyfit::{
    FitRequest, SystRequest, exit_status, fit_data, generate, init_logging, inspect, merge_to,
    run_syst,
};
use toyfit_core::error::ToyError;
use toyfit_core::paths::DataPaths;

#[derive(Parser, Debug)]
#[command(name = "toyfit")]
#[command(about = "Generate and fit toy datasets to estimate systematic uncertainties")]
struct Args {
    /// Path to the data directory (default: ~/.toyfit/)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run systematic toys and append them to the toy store
    Syst {
        /// Configuration files, later ones override earlier ones
        #[arg(required = true)]
        configs: Vec<PathBuf>,

        /// Store the output under this directory and link it into the data directory
        #[arg(long)]
        link_from: Option<PathBuf>,

        /// Entropy seed, for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Job identifier (default: batch system job id, or local-<time>-<pid>)
        #[arg(long)]
        job_id: Option<String>,

        /// Verbose fitting
        #[arg(short, long)]
        verbose: bool,
    },
    /// Fit the model to a CSV dataset
    Fit {
        /// Configuration files, later ones override earlier ones
        #[arg(required = true)]
        configs: Vec<PathBuf>,

        /// CSV file with one column per observable
        #[arg(long)]
        data: PathBuf,

        /// Save the result under this name
        #[arg(long)]
        save: Option<String>,

        #[arg(short, long)]
        verbose: bool,
    },
    /// Generate one dataset from the nominal model and write it as CSV
    Generate {
        #[arg(required = true)]
        configs: Vec<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print a stored fit result, by name or path
    Inspect { fit_result: String },
    /// Merge the fit results of several toy stores into one CSV
    Merge {
        #[arg(required = true)]
        toys: Vec<String>,

        /// Stack stores with different columns instead of failing
        #[arg(long)]
        allow_incompatible: bool,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toyfit")
}

fn run(command: Command, paths: &DataPaths) -> Result<(), ToyError> {
    match command {
        Command::Syst {
            configs,
            link_from,
            seed,
            job_id,
            verbose,
        } => {
            let request = SystRequest {
                configs,
                link_from,
                seed,
                job_id,
                verbose,
            };
            let store = run_syst(paths, &request)?;
            tracing::info!(store = %store.dir().display(), "Toys done");
        }
        Command::Fit {
            configs,
            data,
            save,
            verbose,
        } => {
            let request = FitRequest {
                configs,
                data,
                save,
                verbose,
            };
            fit_data(paths, &request, &mut std::io::stdout())?;
        }
        Command::Generate {
            configs,
            output,
            seed,
        } => {
            generate(&configs, &output, seed)?;
        }
        Command::Inspect { fit_result } => inspect(paths, &fit_result, &mut std::io::stdout())?,
        Command::Merge {
            toys,
            allow_incompatible,
            output,
        } => {
            merge_to(paths, &toys, allow_incompatible, output.as_deref())?;
        }
    }
    Ok(())
}

fn main() -> color_eyre::Result<ExitCode> {
    color_eyre::install()?;

    let args = Args::parse();
    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);

    init_logging(&data_dir, &args.log_level)?;

    let paths = DataPaths::new(data_dir);
    match run(args.command, &paths) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            let code = exit_status(&err);
            tracing::error!(code, "{err}");
            Ok(ExitCode::from(code as u8))
        }
    }
}
