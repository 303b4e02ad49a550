pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod error;
pub mod groundtruth;
pub mod hierarchical;
pub mod likelihood;
pub mod orchestrator;
pub mod paramtable;
pub mod rng;
pub mod simulator;
pub mod slot;
pub mod timeagg;

pub use error::{Error, Result};

/// opaque subpopulation identifier
pub type SubpopId = String;
/// day-precision calendar date
pub type SimDate = chrono::NaiveDate;
/// a log-density / log-likelihood contribution
pub type LogDensity = f64;

/// epsilon used to clip logit-transform inputs away from 0/1
pub const LOGIT_EPS: f64 = 1e-12;
/// floor applied to hierarchical group standard deviations
pub const HIER_SD_FLOOR: f64 = 0.1;
/// floor applied to `s` in the `*_cov` likelihood family before scaling `sd`
pub const COV_FLOOR: f64 = 5.0;

/// Initializes combined terminal + rolling file logging and installs a
/// cooperative ctrl-c handler that flips the shared interrupt flag checked
/// between iterations (see [`slot::driver`]).
pub fn init_logging() -> anyhow::Result<()> {
    std::fs::create_dir_all("logs")?;
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time moves forward")
        .as_secs();
    let file = simplelog::WriteLogger::new(
        log::LevelFilter::Debug,
        config.clone(),
        std::fs::File::create(format!("logs/{time}.log"))?,
    );
    let term = simplelog::TermLogger::new(
        log::LevelFilter::Info,
        config,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    simplelog::CombinedLogger::init(vec![term, file]).map_err(|e| anyhow::anyhow!(e))
}

static INTERRUPTED: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

/// Spawns a ctrl-c listener on the given tokio runtime that flips the
/// process-wide cooperative cancellation flag. Slot drivers poll
/// [`interrupted`] between iterations; they never abort mid-write.
pub fn install_interrupt_handler(rt: &tokio::runtime::Runtime) {
    rt.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, will stop at next iteration boundary");
            INTERRUPTED.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    });
}

/// Whether a cooperative cancellation has been requested.
pub fn interrupted() -> bool {
    INTERRUPTED.load(std::sync::atomic::Ordering::Relaxed)
}
