//! Command-line surface for the slot driver binary. Every option has a
//! matching environment variable (`clap`'s `env` feature); CLI flags take
//! precedence when both are given.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "driver", version, about = "Distributed MH calibration engine")]
pub struct Args {
    /// path to the run configuration (YAML)
    #[arg(long, env = "EPIMCMC_CONFIG")]
    pub config: PathBuf,

    /// unique identifier for this run
    #[arg(long, env = "EPIMCMC_RUN_ID")]
    pub run_id: String,

    /// one scenario name, or "all"
    #[arg(long, env = "EPIMCMC_SEIR_MODIFIERS_SCENARIOS", default_value = "all")]
    pub seir_modifiers_scenarios: String,

    /// one scenario name, or "all"
    #[arg(long, env = "EPIMCMC_OUTCOME_MODIFIERS_SCENARIOS", default_value = "all")]
    pub outcome_modifiers_scenarios: String,

    /// worker count for the orchestrator
    #[arg(long, env = "EPIMCMC_JOBS", default_value_t = 1)]
    pub jobs: usize,

    /// K, iterations per block
    #[arg(long, env = "EPIMCMC_ITERATIONS_PER_SLOT")]
    pub iterations_per_slot: u32,

    /// S, number of chains
    #[arg(long, env = "EPIMCMC_SLOTS")]
    pub slots: u32,

    /// restrict this run to a single slot index, instead of all slots
    #[arg(long, env = "EPIMCMC_THIS_SLOT")]
    pub this_slot: Option<u32>,

    /// the block index to run (B blocks of K iterations each)
    #[arg(long, env = "EPIMCMC_THIS_BLOCK", default_value_t = 1)]
    pub this_block: u32,

    /// switch deterministic/stochastic mode
    #[arg(long, env = "EPIMCMC_STOCH_TRAJ_FLAG", default_value_t = false)]
    pub stoch_traj_flag: bool,

    /// restrict the ground-truth evaluation window (defaults to config)
    #[arg(long, env = "EPIMCMC_GROUND_TRUTH_START")]
    pub ground_truth_start: Option<chrono::NaiveDate>,

    #[arg(long, env = "EPIMCMC_GROUND_TRUTH_END")]
    pub ground_truth_end: Option<chrono::NaiveDate>,

    /// require prior-block final artifacts to exist before starting
    #[arg(long = "is-resume", env = "EPIMCMC_IS_RESUME", default_value_t = false)]
    pub is_resume: bool,

    /// overwrite chimeric state wholesale on a global accept
    #[arg(long, env = "EPIMCMC_RESET_CHIMERIC_ON_ACCEPT", default_value_t = false)]
    pub reset_chimeric_on_accept: bool,

    /// enable periodic memory-profile snapshots
    #[arg(long, env = "EPIMCMC_MEMORY_PROFILING", default_value_t = false)]
    pub memory_profiling: bool,

    /// iteration cadence of memory-profile snapshots
    #[arg(long, env = "EPIMCMC_MEMORY_PROFILING_ITERS", default_value_t = 100)]
    pub memory_profiling_iters: u32,

    /// root directory of the checkpoint store
    #[arg(long, env = "EPIMCMC_CHECKPOINT_ROOT", default_value = "model_output")]
    pub checkpoint_root: PathBuf,

    /// path to the external simulator binary
    #[arg(long, env = "EPIMCMC_SIMULATOR_BINARY")]
    pub simulator_binary: PathBuf,

    /// setup name component of the checkpoint directory tree
    #[arg(long, env = "EPIMCMC_SETUP_NAME")]
    pub setup_name: String,
}
