//! The block-structured dual-chain Metropolis-Hastings loop: one slot's
//! worth of propose/simulate/evaluate/accept/persist, built on the same
//! batch-then-advance training loop shape used elsewhere in this
//! workspace, adapted from a single best-response accept to the dual
//! global/chimeric accept used here.

use crate::checkpoint::{CheckpointStore, FileKey, Phase, RunCoordinates, Scope, Variable};
use crate::config::Config;
use crate::groundtruth::GroundTruth;
use crate::hierarchical::{self, GroupedValue};
use crate::likelihood;
use crate::paramtable::{
    ModifierRow, OutcomeParamRow, ParamTables, PerturbConfig, RowHeader, Transform,
};
use crate::simulator::SimulatorAdapter;
use crate::slot::state::{LlikRow, SlotState};
use crate::timeagg;
use crate::{Error, LogDensity, Result, SimDate, SubpopId};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The set of `global`/`chimeric` tables the driver itself persists each
/// iteration. `seir`/`hosp` are written by the simulator adapter, not the
/// driver, and `spar` is reserved for simulator-echoed parameters — the
/// core never produces it.
const TABLE_VARIABLES: [Variable; 5] = [
    Variable::Seed,
    Variable::Init,
    Variable::Snpi,
    Variable::Hnpi,
    Variable::Hpar,
];

pub struct SlotDriver<S: SimulatorAdapter> {
    config: Arc<Config>,
    store: Arc<CheckpointStore>,
    run: RunCoordinates,
    ground_truth: GroundTruth,
    simulator: S,
    slot: u32,
    stochastic: bool,
    reset_chimeric_on_accept: bool,
    memory_profiling_iters: Option<u32>,
}

impl<S: SimulatorAdapter> SlotDriver<S> {
    pub fn new(
        config: Arc<Config>,
        store: Arc<CheckpointStore>,
        run: RunCoordinates,
        ground_truth: GroundTruth,
        simulator: S,
        slot: u32,
        stochastic: bool,
        reset_chimeric_on_accept: bool,
        memory_profiling_iters: Option<u32>,
    ) -> Self {
        Self {
            config,
            store,
            run,
            ground_truth,
            simulator,
            slot,
            stochastic,
            reset_chimeric_on_accept,
            memory_profiling_iters,
        }
    }

    fn perturb_config(&self) -> PerturbConfig {
        PerturbConfig {
            sim_start: self.config.start_date,
            sim_end: self.config.end_date,
            stochastic: self.stochastic,
        }
    }

    /// Builds the block-1 initial tables, persists them at
    /// `(slot, block=1, iteration=0)`, invokes the simulator once, and
    /// computes the initial likelihood. The chimeric chain starts as a
    /// copy of the global initial set.
    pub fn initialize(&mut self) -> Result<SlotState> {
        let tables = self.build_initial_tables()?;
        self.simulator.initialize(
            &self.run.run_id,
            "1",
            &self.run.seir_scenario,
            &self.run.outcome_scenario,
            self.stochastic,
        )?;
        self.persist_tables(Scope::Global, 1, 0, &tables)?;

        let exit = self.simulator.one_simulation(0, None)?;
        if exit != 0 {
            return Err(Error::Simulator(format!(
                "initial simulation for slot {} returned exit {exit}",
                self.slot
            )));
        }

        let likelihood = self.evaluate_likelihood(&tables, 0)?;
        let llik_rows = self.llik_rows(&likelihood, true, 1.0, 1.0);
        self.persist_llik(Scope::Global, 1, 0, &llik_rows)?;
        self.persist_tables(Scope::Chimeric, 1, 0, &tables)?;
        self.persist_llik(Scope::Chimeric, 1, 0, &llik_rows)?;

        for &variable in TABLE_VARIABLES.iter().chain(std::iter::once(&Variable::Llik)) {
            self.store
                .promote(&self.run, FileKey::global(self.slot, 1, 0, variable))?;
        }

        Ok(SlotState::initial(tables, likelihood))
    }

    /// Reconstructs the in-memory state from the previous block's
    /// block-stable artifacts, required before resuming at `block > 1`.
    pub fn resume(&mut self, previous_block: u32) -> Result<SlotState> {
        self.store
            .require_resume_artifacts(&self.run, self.slot, previous_block, &TABLE_VARIABLES)?;
        let global = self.read_tables(Scope::Global, previous_block)?;
        let chimeric = self.read_tables(Scope::Chimeric, previous_block)?;
        let global_llik: Vec<LlikRow> = self.store.read_table(
            &self.run,
            FileKey { scope: Scope::Global, phase: Phase::Intermediate, slot: self.slot, block: Some(previous_block), iteration: None, variable: Variable::Llik },
        )?;
        let chimeric_llik: Vec<LlikRow> = self.store.read_table(
            &self.run,
            FileKey { scope: Scope::Chimeric, phase: Phase::Intermediate, slot: self.slot, block: Some(previous_block), iteration: None, variable: Variable::Llik },
        )?;
        let mut state = SlotState::initial(global, to_map(&global_llik));
        state.chimeric = chimeric;
        state.chimeric_log_likelihood = to_map(&chimeric_llik);
        Ok(state)
    }

    /// Runs `iterations` iterations of block `block`, then promotes the
    /// latest accepted state to the block-stable snapshot.
    pub fn run_block(&mut self, state: &mut SlotState, block: u32, iterations: u32) -> Result<()> {
        self.simulator.update_prefix(&block.to_string())?;
        for iteration in 1..=iterations {
            if crate::interrupted() {
                log::warn!(
                    "cooperative cancellation: slot {} stopping before block {block} iteration {iteration}",
                    self.slot
                );
                break;
            }
            self.run_iteration(state, block, iteration, iterations)?;
            if let Some(cadence) = self.memory_profiling_iters {
                if cadence > 0 && iteration % cadence == 0 {
                    self.write_memory_snapshot(block, iteration)?;
                }
            }
        }
        self.persist_tables(Scope::Global, block, state.current_index, &state.global)?;
        for &variable in TABLE_VARIABLES.iter().chain(std::iter::once(&Variable::Llik)) {
            self.store.promote(
                &self.run,
                FileKey::global(self.slot, block, state.current_index, variable),
            )?;
        }
        self.persist_tables(Scope::Chimeric, block, iterations, &state.chimeric)?;
        Ok(())
    }

    fn run_iteration(&mut self, state: &mut SlotState, block: u32, iteration: u32, iterations_per_block: u32) -> Result<()> {
        let step = crate::rng::cumulative_step(block, iteration, iterations_per_block);
        let seed = crate::rng::iteration_seed(&self.run.run_id, self.slot, step);
        let mut rng = crate::rng::rng_for(seed);
        let first_sample = block == 1 && iteration == 1;

        let proposed = if first_sample {
            state.chimeric.clone()
        } else {
            state.chimeric.perturb(&mut rng, &self.perturb_config())
        };

        self.persist_tables(Scope::Global, block, iteration, &proposed)?;
        let exit = self.simulator.one_simulation(iteration, Some(iteration))?;
        if exit != 0 {
            log::info!(
                "slot {} block {block} iteration {iteration}: simulator exit {exit}, rejecting",
                self.slot
            );
            for &variable in TABLE_VARIABLES.iter() {
                self.store.gc_iteration(&self.run, self.slot, block, iteration, variable)?;
            }
            state.record_global_iteration(false);
            return Ok(());
        }

        let proposed_ll = self.evaluate_likelihood(&proposed, iteration)?;
        for (subpop, ll) in &proposed_ll {
            // -inf is an ordinary, spec-anticipated density (e.g. lognorm
            // against a zero count) and must still flow into the MH ratio
            // as a near-certain rejection. Only NaN is unrecoverable.
            if ll.is_nan() {
                return Err(Error::NonFiniteLikelihood {
                    subpop: subpop.clone(),
                    detail: format!("block {block} iteration {iteration}"),
                });
            }
        }

        let global_sum = state.global_log_likelihood_sum();
        let proposed_sum: LogDensity = proposed_ll.values().sum();
        let alpha_global = (proposed_sum - global_sum).exp().min(1.0);
        let u: f64 = rng.random();
        let accept_global = first_sample || u <= alpha_global;
        let accept_avg = state.record_global_iteration(accept_global);

        if accept_global {
            if state.current_index > 0 {
                for &variable in TABLE_VARIABLES.iter() {
                    self.store
                        .gc_iteration(&self.run, self.slot, block, state.current_index, variable)?;
                }
            }
            state.current_index = iteration;
            state.global = proposed.clone();
            state.global_log_likelihood = proposed_ll.clone();
        } else {
            for &variable in TABLE_VARIABLES.iter() {
                self.store.gc_iteration(&self.run, self.slot, block, iteration, variable)?;
            }
        }

        let global_llik_rows = self.llik_rows(&state.global_log_likelihood, accept_global, alpha_global, accept_avg);
        self.persist_llik(Scope::Global, block, iteration, &global_llik_rows)?;

        if self.reset_chimeric_on_accept && accept_global {
            state.chimeric = proposed;
            state.chimeric_log_likelihood = proposed_ll;
        } else {
            for subpop in self.config.subpops.clone() {
                let ll_chimeric = *state.chimeric_log_likelihood.get(&subpop).unwrap_or(&f64::NEG_INFINITY);
                let ll_proposed = *proposed_ll.get(&subpop).unwrap_or(&f64::NEG_INFINITY);
                let alpha_s = (ll_proposed - ll_chimeric).exp().min(1.0);
                let accept_s = rng.random::<f64>() <= alpha_s;
                state.record_chimeric_iteration(&subpop, accept_s);
                if accept_s {
                    state.chimeric.overlay_subpop(&subpop, &proposed);
                    state.chimeric_log_likelihood.insert(subpop, ll_proposed);
                }
            }
        }

        self.persist_tables(Scope::Chimeric, block, iteration, &state.chimeric)?;
        let chimeric_rows = self.llik_rows(&state.chimeric_log_likelihood, accept_global, alpha_global, accept_avg);
        self.persist_llik(Scope::Chimeric, block, iteration, &chimeric_rows)?;

        Ok(())
    }

    fn llik_rows(
        &self,
        likelihood: &BTreeMap<SubpopId, LogDensity>,
        accept: bool,
        accept_prob: f64,
        accept_avg: f64,
    ) -> Vec<LlikRow> {
        likelihood
            .iter()
            .map(|(subpop, &log_likelihood)| LlikRow {
                subpop: subpop.clone(),
                log_likelihood,
                accept,
                accept_prob,
                accept_avg,
            })
            .collect()
    }

    fn persist_tables(&self, scope: Scope, block: u32, iteration: u32, tables: &ParamTables) -> Result<()> {
        let key = |variable| FileKey {
            scope,
            phase: Phase::Intermediate,
            slot: self.slot,
            block: Some(block),
            iteration: Some(iteration),
            variable,
        };
        self.store.write_table(&self.run, key(Variable::Seed), &tables.seeding)?;
        self.store.write_table(&self.run, key(Variable::Init), &tables.initial_conditions)?;
        self.store.write_table(&self.run, key(Variable::Snpi), &tables.transmission_modifiers)?;
        self.store.write_table(&self.run, key(Variable::Hnpi), &tables.outcome_modifiers)?;
        self.store.write_table(&self.run, key(Variable::Hpar), &tables.outcome_params)?;
        Ok(())
    }

    fn read_tables(&self, scope: Scope, block: u32) -> Result<ParamTables> {
        let key = |variable| FileKey {
            scope,
            phase: Phase::Intermediate,
            slot: self.slot,
            block: Some(block),
            iteration: None,
            variable,
        };
        Ok(ParamTables {
            seeding: self.store.read_table(&self.run, key(Variable::Seed))?,
            initial_conditions: self.store.read_table(&self.run, key(Variable::Init))?,
            transmission_modifiers: self.store.read_table(&self.run, key(Variable::Snpi))?,
            outcome_modifiers: self.store.read_table(&self.run, key(Variable::Hnpi))?,
            outcome_params: self.store.read_table(&self.run, key(Variable::Hpar))?,
        })
    }

    fn persist_llik(&self, scope: Scope, block: u32, iteration: u32, rows: &[LlikRow]) -> Result<()> {
        let key = FileKey {
            scope,
            phase: Phase::Intermediate,
            slot: self.slot,
            block: Some(block),
            iteration: Some(iteration),
            variable: Variable::Llik,
        };
        self.store.write_table(&self.run, key, rows)
    }

    fn write_memory_snapshot(&self, block: u32, iteration: u32) -> Result<()> {
        #[derive(serde::Serialize)]
        struct MemRow {
            slot: u32,
            block: u32,
            iteration: u32,
        }
        let key = FileKey::global(self.slot, block, iteration, Variable::Memprof);
        self.store.write_table(&self.run, key, &[MemRow { slot: self.slot, block, iteration }])
    }

    fn build_initial_tables(&self) -> Result<ParamTables> {
        let seeding_variable = self
            .config
            .inference
            .statistics
            .values()
            .next()
            .map(|s| s.data_variable.as_str())
            .unwrap_or("incidD");

        let mut seeding = Vec::new();
        for subpop in &self.config.subpops {
            let observed = self.ground_truth.observed_only(subpop, seeding_variable);
            seeding.extend(crate::paramtable::initial_seeding_from_groundtruth(
                &observed,
                subpop,
                5,
                self.config.seeding.seeding_delay,
                self.config.seeding.seeding_inflation_ratio,
                self.config.seeding.date_sd,
                self.config.seeding.amount_sd,
            ));
        }

        let mut transmission_modifiers = Vec::new();
        for (name, modifier) in &self.config.seir_modifiers {
            for subpop in &self.config.subpops {
                transmission_modifiers.push(ModifierRow {
                    header: RowHeader {
                        subpop: subpop.clone(),
                        modifier_name: name.clone(),
                        value: modifier.value,
                        value_distribution: modifier.value_distribution,
                        perturb_distribution: modifier.perturbation,
                        perturb_sd: perturb_sd_of(modifier.perturbation),
                        transform: modifier.transform.unwrap_or(Transform::Identity),
                        no_perturb: false,
                    },
                });
            }
        }

        let mut outcome_modifiers = Vec::new();
        for (name, modifier) in &self.config.outcome_modifiers {
            for subpop in &self.config.subpops {
                outcome_modifiers.push(ModifierRow {
                    header: RowHeader {
                        subpop: subpop.clone(),
                        modifier_name: name.clone(),
                        value: modifier.value,
                        value_distribution: modifier.value_distribution,
                        perturb_distribution: modifier.perturbation,
                        perturb_sd: perturb_sd_of(modifier.perturbation),
                        transform: modifier.transform.unwrap_or(Transform::Identity),
                        no_perturb: false,
                    },
                });
            }
        }

        let mut outcome_params = Vec::new();
        for (name, oc) in &self.config.outcomes {
            for subpop in &self.config.subpops {
                outcome_params.push(OutcomeParamRow {
                    header: RowHeader {
                        subpop: subpop.clone(),
                        modifier_name: name.clone(),
                        value: oc.value,
                        value_distribution: oc.value_distribution,
                        perturb_distribution: oc.perturbation,
                        perturb_sd: perturb_sd_of(oc.perturbation),
                        transform: oc.transform.unwrap_or(Transform::Identity),
                        no_perturb: false,
                    },
                    outcome: oc.outcome.clone(),
                    quantity: oc.quantity.clone(),
                });
            }
        }

        let initial_conditions = self
            .config
            .subpops
            .iter()
            .map(|subpop| crate::paramtable::InitialConditionRow {
                subpop: subpop.clone(),
                compartment: "I".into(),
                amount: if self.config.initial_conditions.proportional { 0.001 } else { 1.0 },
                proportional: self.config.initial_conditions.proportional,
                perturb_sd: self
                    .config
                    .initial_conditions
                    .perturbation
                    .map(perturb_sd_of)
                    .unwrap_or(0.0),
            })
            .collect();

        Ok(ParamTables {
            seeding,
            transmission_modifiers,
            outcome_modifiers,
            outcome_params,
            initial_conditions,
        })
    }

    /// Reads the simulator's output for every configured statistic, joins
    /// it against ground truth by date, and sums per-subpop log-density
    /// plus the hierarchical and explicit-prior contributions.
    fn evaluate_likelihood(&self, tables: &ParamTables, sim_id: u32) -> Result<BTreeMap<SubpopId, LogDensity>> {
        let mut totals: BTreeMap<SubpopId, LogDensity> =
            self.config.subpops.iter().map(|s| (s.clone(), 0.0)).collect();

        for stat in self.config.inference.statistics.values() {
            let variable = Variable::from_name(&stat.sim_variable)
                .ok_or_else(|| crate::error::config_err(format!("unknown sim_variable {}", stat.sim_variable)))?;
            let raw = self.simulator.read_output(sim_id, variable)?;
            let window = stat.groundtruth_window.unwrap_or(self.config.groundtruth_window());
            let aggregated_sim = timeagg::aggregate(&raw, &stat.period, stat.aggregator, window, None, self.config.week_start);

            for subpop in &self.config.subpops {
                let observed = self.ground_truth.observed_only(subpop, &stat.data_variable);
                let aggregated_gt = timeagg::aggregate(&observed, &stat.period, stat.aggregator, window, None, self.config.week_start);
                let pairs = align(&aggregated_sim, &aggregated_gt);
                let ll = likelihood::series_log_likelihood(
                    stat.distribution,
                    &pairs,
                    &stat.distribution_params,
                    stat.add_one_policy,
                );
                *totals.get_mut(subpop).expect("subpop declared in config") += ll;
            }
        }

        for hstat in &self.config.inference.hierarchical_stats_geo {
            let rows = self.grouped_values(tables, &hstat.modifier_name);
            for (subpop, ll) in hierarchical::hierarchical_log_density(&rows, hstat.transform) {
                *totals.entry(subpop).or_insert(0.0) += ll;
            }
        }

        for prior in &self.config.inference.priors {
            for (subpop, value) in modifier_rows(tables, &prior.modifier_name) {
                *totals.entry(subpop.clone()).or_insert(0.0) +=
                    hierarchical::prior_log_density(prior.kind, prior.mu, prior.sigma, value);
            }
        }

        Ok(totals)
    }

    fn grouped_values<'a>(&'a self, tables: &'a ParamTables, modifier_name: &str) -> Vec<GroupedValue<'a>> {
        modifier_rows(tables, modifier_name)
            .into_iter()
            .filter_map(|(subpop, value)| {
                self.config
                    .geography_groups
                    .get(subpop)
                    .map(|group| GroupedValue { subpop, group: group.as_str(), value })
            })
            .collect()
    }
}

fn modifier_rows<'a>(tables: &'a ParamTables, modifier_name: &str) -> Vec<(&'a SubpopId, f64)> {
    tables
        .transmission_modifiers
        .iter()
        .chain(tables.outcome_modifiers.iter())
        .filter(|row| row.header.modifier_name == modifier_name)
        .map(|row| (&row.header.subpop, row.header.value))
        .collect()
}

fn perturb_sd_of(d: crate::paramtable::PerturbDistribution) -> f64 {
    match d {
        crate::paramtable::PerturbDistribution::Normal { sd } => sd,
    }
}

fn align(sim: &[(SimDate, f64)], gt: &[(SimDate, f64)]) -> Vec<(f64, Option<f64>)> {
    let gt_map: BTreeMap<SimDate, f64> = gt.iter().cloned().collect();
    sim.iter().map(|(date, value)| (*value, gt_map.get(date).copied())).collect()
}

fn to_map(rows: &[LlikRow]) -> BTreeMap<SubpopId, LogDensity> {
    rows.iter().map(|r| (r.subpop.clone(), r.log_likelihood)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Aggregator, DistributionKind, InferenceConfig, InitialConditionsConfig,
        InitialConditionsMethod, SeedingConfig, StatisticSpec,
    };
    use crate::simulator::MockSimulator;
    use crate::timeagg::{Period, PeriodUnit, WeekStart};
    use std::collections::BTreeMap as Map;

    fn d(y: i32, m: u32, day: u32) -> SimDate {
        chrono::NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn identity_chain_config() -> Config {
        let mut statistics = Map::new();
        statistics.insert(
            "incid".to_string(),
            StatisticSpec {
                sim_variable: "hosp".into(),
                data_variable: "incidD".into(),
                period: Period { count: 1, unit: PeriodUnit::Week },
                aggregator: Aggregator::Sum,
                distribution: DistributionKind::Sqrtnorm,
                distribution_params: vec![0.1],
                add_one_policy: true,
                groundtruth_window: None,
            },
        );
        Config {
            start_date: d(2020, 1, 1),
            end_date: d(2020, 1, 7),
            start_date_groundtruth: d(2020, 1, 1),
            end_date_groundtruth: d(2020, 1, 7),
            subpops: vec!["A".into()],
            geography_groups: Map::new(),
            seeding: SeedingConfig { date_sd: 0.0, amount_sd: 0.0, lambda_file: None, seeding_delay: 0, seeding_inflation_ratio: 1.0 },
            initial_conditions: InitialConditionsConfig { method: InitialConditionsMethod::Proportional, perturbation: None, proportional: true },
            seir_modifiers: Map::new(),
            outcome_modifiers: Map::new(),
            outcomes: Map::new(),
            inference: InferenceConfig {
                statistics,
                hierarchical_stats_geo: vec![],
                priors: vec![],
                gt_data_path: "gt.csv".into(),
                gt_source: "csv".into(),
                iterations_per_slot: 5,
            },
            nslots: 1,
            week_start: WeekStart::Monday,
        }
    }

    fn run_coords() -> RunCoordinates {
        RunCoordinates {
            setup_name: "test".into(),
            seir_scenario: "s1".into(),
            outcome_scenario: "o1".into(),
            run_id: "r0".into(),
        }
    }

    #[test]
    fn identity_chain_always_accepts_with_constant_likelihood() {
        let config = Arc::new(identity_chain_config());
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path()));

        let mut gt = GroundTruth::default();
        let week_total = 70.0;
        gt.insert(
            "A".into(),
            "incidD".into(),
            (1..=7).map(|day| (d(2020, 1, day), Some(10.0))).collect(),
        );

        let mut sim = MockSimulator::default();
        let week_end = d(2020, 1, 7);
        sim = sim.with_output(0, Variable::Hosp, vec![(week_end, week_total)]);
        for i in 1..=5u32 {
            sim = sim.with_output(i, Variable::Hosp, vec![(week_end, week_total)]);
        }

        let mut driver = SlotDriver::new(config, store, run_coords(), gt, sim, 1, false, false, None);
        let mut state = driver.initialize().unwrap();
        driver.run_block(&mut state, 1, 5).unwrap();

        assert_eq!(state.current_index, 5);
        let ll = state.global_log_likelihood_sum();
        assert!(ll.is_finite());
    }

    #[test]
    fn nonzero_exit_rejects_without_panicking() {
        let config = Arc::new(identity_chain_config());
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path()));
        let mut gt = GroundTruth::default();
        gt.insert("A".into(), "incidD".into(), vec![(d(2020, 1, 1), Some(10.0))]);

        let init_sim = MockSimulator::default().with_output(0, Variable::Hosp, vec![]);
        let mut init_driver = SlotDriver::new(
            config.clone(),
            store.clone(),
            run_coords(),
            gt.clone(),
            init_sim,
            1,
            false,
            false,
            None,
        );
        let mut state = init_driver.initialize().unwrap();

        // A simulator that always fails from this point on: every proposed
        // iteration must be rejected, never panic.
        let failing_sim = MockSimulator { exit_code: 1, ..Default::default() };
        let mut driver = SlotDriver::new(config, store, run_coords(), gt, failing_sim, 1, false, false, None);
        driver.run_block(&mut state, 1, 2).unwrap();
        assert_eq!(state.current_index, 0);
    }
}
