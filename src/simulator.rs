//! The simulator adapter: the narrow contract the core uses to invoke
//! the forward (ODE/stochastic) simulator, itself out of scope. No
//! in-process state is shared — the adapter reads and writes only
//! through the checkpoint store's filename schema.

use crate::checkpoint::Variable;
use crate::{Error, Result, SimDate};

/// Capability set required of any forward simulator integration. A
/// non-zero return from `one_simulation` is *not* an `Err`: it is a
/// normal outcome the slot driver treats as a rejected iteration. `Err`
/// is reserved for contract violations (adapter process could not even
/// be started, prefix not writable, ...).
pub trait SimulatorAdapter: Send {
    fn initialize(
        &mut self,
        run_id: &str,
        block_prefix: &str,
        seir_scenario: &str,
        outcome_scenario: &str,
        stochastic: bool,
    ) -> Result<()>;

    fn update_prefix(&mut self, new_prefix: &str) -> Result<()>;

    /// Runs one simulation, reading tables at `{prefix}.{sim_id2load}.*`
    /// (when given) and writing outputs at `{prefix}.{sim_id2write}.*`.
    /// Returns the simulator's raw exit status (`0` on success).
    fn one_simulation(&mut self, sim_id2write: u32, sim_id2load: Option<u32>) -> Result<i32>;

    /// Reads back one output variable the simulator produced for
    /// `sim_id` at the current prefix (hospitalization/outcome time
    /// series).
    fn read_output(&self, sim_id: u32, variable: Variable) -> Result<Vec<(SimDate, f64)>>;
}

/// Shells out to an external simulator binary via `std::process::Command`,
/// passing the filename-schema coordinates as CLI arguments, and reads
/// its outputs back through the same [`crate::checkpoint::CheckpointStore`]
/// the driver uses. This is the production adapter; the binary itself (an
/// ODE/stochastic compartment engine) is entirely out of scope.
pub struct ProcessSimulator {
    binary: std::path::PathBuf,
    store: std::sync::Arc<crate::checkpoint::CheckpointStore>,
    run: crate::checkpoint::RunCoordinates,
    slot: u32,
    block: u32,
}

impl ProcessSimulator {
    pub fn new(
        binary: impl Into<std::path::PathBuf>,
        store: std::sync::Arc<crate::checkpoint::CheckpointStore>,
        run: crate::checkpoint::RunCoordinates,
        slot: u32,
    ) -> Self {
        Self { binary: binary.into(), store, run, slot, block: 1 }
    }
}

impl SimulatorAdapter for ProcessSimulator {
    fn initialize(
        &mut self,
        run_id: &str,
        block_prefix: &str,
        seir_scenario: &str,
        outcome_scenario: &str,
        stochastic: bool,
    ) -> Result<()> {
        log::info!(
            "simulator initialized run={run_id} prefix={block_prefix} seir={seir_scenario} outcome={outcome_scenario} stochastic={stochastic}"
        );
        self.update_prefix(block_prefix)
    }

    fn update_prefix(&mut self, new_prefix: &str) -> Result<()> {
        self.block = new_prefix
            .parse()
            .map_err(|_| Error::Simulator(format!("malformed block prefix {new_prefix}")))?;
        Ok(())
    }

    fn one_simulation(&mut self, sim_id2write: u32, sim_id2load: Option<u32>) -> Result<i32> {
        let mut command = std::process::Command::new(&self.binary);
        command
            .arg("--slot").arg(self.slot.to_string())
            .arg("--block").arg(self.block.to_string())
            .arg("--run-id").arg(&self.run.run_id)
            .arg("--write").arg(sim_id2write.to_string());
        if let Some(load) = sim_id2load {
            command.arg("--load").arg(load.to_string());
        }
        let status = command
            .status()
            .map_err(|e| Error::Simulator(format!("failed to spawn simulator process: {e}")))?;
        Ok(status.code().unwrap_or(1))
    }

    fn read_output(&self, sim_id: u32, variable: Variable) -> Result<Vec<(SimDate, f64)>> {
        use crate::checkpoint::FileKey;
        let key = FileKey::global(self.slot, self.block, sim_id, variable);
        self.store.read_table(&self.run, key)
    }
}

/// Test/reference adapter that always "succeeds" and lets the caller
/// supply its outputs directly, bypassing any subprocess and the
/// checkpoint store. Used by the end-to-end "identity chain" scenario
/// where the simulator is defined to output exactly the ground truth.
#[derive(Default)]
pub struct MockSimulator {
    pub outputs: std::collections::HashMap<(u32, &'static str), Vec<(SimDate, f64)>>,
    pub exit_code: i32,
    calls: u32,
}

impl MockSimulator {
    pub fn calls(&self) -> u32 {
        self.calls
    }

    pub fn with_output(mut self, sim_id: u32, variable: Variable, series: Vec<(SimDate, f64)>) -> Self {
        self.outputs.insert((sim_id, variable.name()), series);
        self
    }
}

impl SimulatorAdapter for MockSimulator {
    fn initialize(&mut self, _: &str, _: &str, _: &str, _: &str, _: bool) -> Result<()> {
        Ok(())
    }

    fn update_prefix(&mut self, _: &str) -> Result<()> {
        Ok(())
    }

    fn one_simulation(&mut self, _sim_id2write: u32, _sim_id2load: Option<u32>) -> Result<i32> {
        self.calls += 1;
        Ok(self.exit_code)
    }

    fn read_output(&self, sim_id: u32, variable: Variable) -> Result<Vec<(SimDate, f64)>> {
        Ok(self.outputs.get(&(sim_id, variable.name())).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_tracks_call_count() {
        let mut sim = MockSimulator::default();
        sim.initialize("r", "p", "s", "o", false).unwrap();
        sim.one_simulation(1, None).unwrap();
        sim.one_simulation(2, Some(1)).unwrap();
        assert_eq!(sim.calls(), 2);
    }

    #[test]
    fn mock_nonzero_exit_is_not_an_error() {
        let mut sim = MockSimulator { exit_code: 1, ..Default::default() };
        let code = sim.one_simulation(1, None).unwrap();
        assert_eq!(code, 1);
    }

    #[test]
    fn mock_echoes_configured_output() {
        let date = chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let sim = MockSimulator::default().with_output(1, Variable::Hosp, vec![(date, 10.0)]);
        let out = sim.read_output(1, Variable::Hosp).unwrap();
        assert_eq!(out, vec![(date, 10.0)]);
    }
}
