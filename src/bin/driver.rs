//! Slot-driver binary: parses the CLI surface, loads config and ground
//! truth, fans out across slots, and maps the worst observed error onto
//! the process exit code.

use clap::Parser;
use epimcmc::checkpoint::CheckpointStore;
use epimcmc::cli::Args;
use epimcmc::config::Config;
use epimcmc::groundtruth::{CsvGroundTruthSource, GroundTruthSource};
use epimcmc::{orchestrator, Error};
use std::sync::Arc;

fn main() {
    if let Err(e) = run() {
        log::error!("{e}");
        std::process::exit(e.exit_code());
    }
}

fn run() -> Result<(), Error> {
    epimcmc::init_logging().map_err(Error::Runtime)?;
    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new().map_err(Error::Io)?;
    epimcmc::install_interrupt_handler(&runtime);

    let config = Arc::new(Config::load(&args.config)?);
    let gt_path = std::path::PathBuf::from(&config.inference.gt_data_path);
    let ground_truth = CsvGroundTruthSource { path: gt_path }.load(&config.subpops)?;
    let store = Arc::new(CheckpointStore::new(&args.checkpoint_root));

    let outcomes = orchestrator::run(&args, config, ground_truth, store);
    let mut worst: Option<Error> = None;
    for outcome in outcomes {
        if let Err(e) = outcome.result {
            log::error!("slot {} exited with an error: {e}", outcome.slot);
            if worst.as_ref().map_or(true, |w| e.exit_code() > w.exit_code()) {
                worst = Some(e);
            }
        }
    }

    match worst {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
