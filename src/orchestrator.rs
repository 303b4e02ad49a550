//! Fans a run out across its slots (C8). Each slot is an independent
//! chain: its own simulator process, its own deterministic RNG stream,
//! its own block of checkpoint files. `rayon`'s work-stealing pool
//! covers the parallel dispatch; slot failures are isolated and reported
//! per slot rather than aborting the whole run.

use crate::checkpoint::{CheckpointStore, RunCoordinates};
use crate::cli::Args;
use crate::config::Config;
use crate::groundtruth::GroundTruth;
use crate::simulator::ProcessSimulator;
use crate::slot::SlotDriver;
use crate::Result;
use rayon::prelude::*;
use std::sync::Arc;

/// Outcome of one slot's run, collected back on the calling thread.
pub struct SlotOutcome {
    pub slot: u32,
    pub result: Result<()>,
}

/// Runs every slot named by `args` (or just `args.this_slot` when given)
/// against the shared config and ground truth, one block deep.
pub fn run(args: &Args, config: Arc<Config>, ground_truth: GroundTruth, store: Arc<CheckpointStore>) -> Vec<SlotOutcome> {
    let run = RunCoordinates {
        setup_name: args.setup_name.clone(),
        seir_scenario: args.seir_modifiers_scenarios.clone(),
        outcome_scenario: args.outcome_modifiers_scenarios.clone(),
        run_id: args.run_id.clone(),
    };

    let slots: Vec<u32> = match args.this_slot {
        Some(slot) => vec![slot],
        None => (0..config.nslots).collect(),
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.jobs.max(1))
        .build()
        .expect("thread pool with a positive worker count always builds");

    pool.install(|| {
        slots
            .into_par_iter()
            .map(|slot| {
                let result = run_one_slot(args, &config, &ground_truth, &store, &run, slot);
                if let Err(ref e) = result {
                    log::error!("slot {slot} failed: {e}");
                }
                SlotOutcome { slot, result }
            })
            .collect()
    })
}

fn run_one_slot(
    args: &Args,
    config: &Arc<Config>,
    ground_truth: &GroundTruth,
    store: &Arc<CheckpointStore>,
    run: &RunCoordinates,
    slot: u32,
) -> Result<()> {
    let simulator = ProcessSimulator::new(args.simulator_binary.clone(), store.clone(), run.clone(), slot);
    let mut driver = SlotDriver::new(
        config.clone(),
        store.clone(),
        run.clone(),
        ground_truth.clone(),
        simulator,
        slot,
        args.stoch_traj_flag,
        args.reset_chimeric_on_accept,
        args.memory_profiling.then_some(args.memory_profiling_iters),
    );

    let mut state = if args.is_resume {
        driver.resume(args.this_block.saturating_sub(1))?
    } else {
        driver.initialize()?
    };

    driver.run_block(&mut state, args.this_block, args.iterations_per_slot)?;
    log::info!(
        "slot {slot} block {} complete: global accept rate stable at iteration {}",
        args.this_block,
        state.current_index
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Aggregator, DistributionKind, InferenceConfig, InitialConditionsConfig, InitialConditionsMethod, SeedingConfig};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn base_config(nslots: u32) -> Config {
        Config {
            start_date: chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            end_date: chrono::NaiveDate::from_ymd_opt(2020, 1, 7).unwrap(),
            start_date_groundtruth: chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            end_date_groundtruth: chrono::NaiveDate::from_ymd_opt(2020, 1, 7).unwrap(),
            subpops: vec!["A".into()],
            geography_groups: BTreeMap::new(),
            seeding: SeedingConfig { date_sd: 0.0, amount_sd: 0.0, lambda_file: None, seeding_delay: 0, seeding_inflation_ratio: 1.0 },
            initial_conditions: InitialConditionsConfig { method: InitialConditionsMethod::Proportional, perturbation: None, proportional: true },
            seir_modifiers: BTreeMap::new(),
            outcome_modifiers: BTreeMap::new(),
            outcomes: BTreeMap::new(),
            inference: InferenceConfig {
                statistics: BTreeMap::new(),
                hierarchical_stats_geo: vec![],
                priors: vec![],
                gt_data_path: "gt.csv".into(),
                gt_source: "csv".into(),
                iterations_per_slot: 1,
            },
            nslots,
            week_start: crate::timeagg::WeekStart::Sunday,
        }
    }

    fn base_args() -> Args {
        Args {
            config: PathBuf::from("config.yaml"),
            run_id: "r0".into(),
            seir_modifiers_scenarios: "s1".into(),
            outcome_modifiers_scenarios: "o1".into(),
            jobs: 2,
            iterations_per_slot: 1,
            slots: 2,
            this_slot: None,
            this_block: 1,
            stoch_traj_flag: false,
            ground_truth_start: None,
            ground_truth_end: None,
            is_resume: false,
            reset_chimeric_on_accept: false,
            memory_profiling: false,
            memory_profiling_iters: 100,
            checkpoint_root: PathBuf::from("model_output"),
            simulator_binary: PathBuf::from("/bin/true"),
            setup_name: "test".into(),
        }
    }

    #[test]
    fn restricts_to_one_slot_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(base_config(3));
        let store = Arc::new(CheckpointStore::new(dir.path()));
        let mut args = base_args();
        args.this_slot = Some(1);
        let outcomes = run(&args, config, GroundTruth::default(), store);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].slot, 1);
    }

    #[test]
    fn dispatches_every_configured_slot_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(base_config(3));
        let store = Arc::new(CheckpointStore::new(dir.path()));
        let args = base_args();
        let outcomes = run(&args, config, GroundTruth::default(), store);
        let mut slots: Vec<u32> = outcomes.iter().map(|o| o.slot).collect();
        slots.sort();
        assert_eq!(slots, vec![0, 1, 2]);
    }
}
