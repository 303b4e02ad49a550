//! Checkpoint store: the durable, content-addressed file layout used to
//! persist and resume a run. Byte-exact naming is part of the external
//! interface other tooling reads these files through.

mod codec;

use codec::with_retry;
pub use codec::{atomic_write, CsvCodec, TableCodec};

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    Seed,
    Init,
    Seir,
    Hosp,
    Llik,
    Snpi,
    Hnpi,
    Spar,
    Hpar,
    Memprof,
}

impl Variable {
    pub fn name(&self) -> &'static str {
        match self {
            Variable::Seed => "seed",
            Variable::Init => "init",
            Variable::Seir => "seir",
            Variable::Hosp => "hosp",
            Variable::Llik => "llik",
            Variable::Snpi => "snpi",
            Variable::Hnpi => "hnpi",
            Variable::Spar => "spar",
            Variable::Hpar => "hpar",
            Variable::Memprof => "memprof",
        }
    }

    /// Seeding is always plain CSV regardless of the configured columnar
    /// format; every other variable defers to the codec.
    pub fn extension(&self, codec_ext: &'static str) -> &'static str {
        match self {
            Variable::Seed => "csv",
            _ => codec_ext,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "seed" => Variable::Seed,
            "init" => Variable::Init,
            "seir" => Variable::Seir,
            "hosp" => Variable::Hosp,
            "llik" => Variable::Llik,
            "snpi" => Variable::Snpi,
            "hnpi" => Variable::Hnpi,
            "spar" => Variable::Spar,
            "hpar" => Variable::Hpar,
            "memprof" => Variable::Memprof,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Chimeric,
}

impl Scope {
    pub fn name(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Chimeric => "chimeric",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Intermediate,
    Final,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Intermediate => "intermediate",
            Phase::Final => "final",
        }
    }
}

/// Identifies one run uniquely on disk: `{setup}_{seir}_{outcome}/{run_id}`.
#[derive(Debug, Clone)]
pub struct RunCoordinates {
    pub setup_name: String,
    pub seir_scenario: String,
    pub outcome_scenario: String,
    pub run_id: String,
}

impl RunCoordinates {
    fn run_dir(&self) -> String {
        format!("{}_{}_{}", self.setup_name, self.seir_scenario, self.outcome_scenario)
    }
}

/// The remaining coordinates of one file: scope/phase/slot/block/
/// iteration/variable. `block`/`iteration` are `None` for the block-level
/// stable snapshot and (both) for `phase = Final`, which omits the block
/// and iteration component entirely.
#[derive(Debug, Clone, Copy)]
pub struct FileKey {
    pub scope: Scope,
    pub phase: Phase,
    pub slot: u32,
    pub block: Option<u32>,
    pub iteration: Option<u32>,
    pub variable: Variable,
}

impl FileKey {
    pub fn global(slot: u32, block: u32, iteration: u32, variable: Variable) -> Self {
        Self { scope: Scope::Global, phase: Phase::Intermediate, slot, block: Some(block), iteration: Some(iteration), variable }
    }

    pub fn chimeric(slot: u32, block: u32, iteration: u32, variable: Variable) -> Self {
        Self { scope: Scope::Chimeric, phase: Phase::Intermediate, slot, block: Some(block), iteration: Some(iteration), variable }
    }

    /// Block-stable snapshot: same coordinates minus the iteration.
    pub fn block_stable(&self) -> Self {
        Self { iteration: None, ..*self }
    }

    pub fn final_of(slot: u32, variable: Variable) -> Self {
        Self { scope: Scope::Global, phase: Phase::Final, slot, block: None, iteration: None, variable }
    }
}

pub struct CheckpointStore {
    root: PathBuf,
    codec: CsvCodec,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), codec: CsvCodec }
    }

    pub fn path(&self, run: &RunCoordinates, key: FileKey) -> PathBuf {
        let ext = key.variable.extension(self.codec.extension());
        let dir = self
            .root
            .join(run.run_dir())
            .join(&run.run_id)
            .join(key.variable.name())
            .join(key.scope.name())
            .join(key.phase.name());
        let filename = match key.phase {
            Phase::Final => format!("{:09}.{}.{}.{}", key.slot, run.run_id, key.variable.name(), ext),
            Phase::Intermediate => match key.iteration {
                Some(it) => format!(
                    "{:09}.{:09}.{:09}.{}.{}.{}",
                    key.slot,
                    key.block.expect("intermediate per-iteration file requires a block"),
                    it,
                    run.run_id,
                    key.variable.name(),
                    ext
                ),
                None => format!(
                    "{:09}.{:09}.{}.{}.{}",
                    key.slot,
                    key.block.expect("block-stable file requires a block"),
                    run.run_id,
                    key.variable.name(),
                    ext
                ),
            },
        };
        dir.join(filename)
    }

    pub fn exists(&self, run: &RunCoordinates, key: FileKey) -> bool {
        self.path(run, key).is_file()
    }

    pub fn write_table<T: Serialize>(&self, run: &RunCoordinates, key: FileKey, rows: &[T]) -> Result<()> {
        self.codec.write_rows(&self.path(run, key), rows)
    }

    pub fn read_table<T: DeserializeOwned>(&self, run: &RunCoordinates, key: FileKey) -> Result<Vec<T>> {
        self.codec.read_rows(&self.path(run, key))
    }

    /// Copies the file at `key` to its block-stable location (dropping
    /// the iteration component) and to the `phase = final` slot location
    /// — the two copies made on a global accept.
    pub fn promote(&self, run: &RunCoordinates, key: FileKey) -> Result<()> {
        let src = self.path(run, key);
        let stable = self.path(run, key.block_stable());
        let final_path = self.path(run, FileKey::final_of(key.slot, key.variable));
        with_retry(|| {
            if let Some(dir) = stable.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::copy(&src, &stable)?;
            if let Some(dir) = final_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::copy(&src, &final_path)?;
            Ok(())
        })
    }

    /// Garbage-collects one rejected iteration's `global` files: prior
    /// global intermediate files are deleted once a *new* iteration is
    /// accepted.
    pub fn gc_iteration(&self, run: &RunCoordinates, slot: u32, block: u32, iteration: u32, variable: Variable) -> Result<()> {
        let path = self.path(run, FileKey::global(slot, block, iteration, variable));
        with_retry(|| match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        })
    }

    /// Verifies every required variable exists for `(slot, block-1)`
    /// block-stable or `phase=final` set, as required to begin block
    /// `block` when `block > 1`. Fatal (`ResumePrecondition`) if any
    /// are missing.
    pub fn require_resume_artifacts(
        &self,
        run: &RunCoordinates,
        slot: u32,
        previous_block: u32,
        variables: &[Variable],
    ) -> Result<()> {
        for &variable in variables {
            let key = FileKey { scope: Scope::Global, phase: Phase::Intermediate, slot, block: Some(previous_block), iteration: None, variable };
            if !self.exists(run, key) {
                return Err(Error::ResumePrecondition(format!(
                    "missing {} for slot {slot} block {previous_block}",
                    variable.name()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    struct Row {
        value: f64,
    }

    fn run() -> RunCoordinates {
        RunCoordinates {
            setup_name: "test".into(),
            seir_scenario: "s1".into(),
            outcome_scenario: "o1".into(),
            run_id: "run0".into(),
        }
    }

    #[test]
    fn filename_schema_for_final_phase() {
        let store = CheckpointStore::new("/tmp/cp");
        let key = FileKey::final_of(3, Variable::Llik);
        let path = store.path(&run(), key);
        assert!(path.ends_with("000000003.run0.llik.csv"));
        assert!(path.to_string_lossy().contains("test_s1_o1/run0/llik/global/final"));
    }

    #[test]
    fn filename_schema_for_intermediate_phase() {
        let store = CheckpointStore::new("/tmp/cp");
        let key = FileKey::global(1, 2, 5, Variable::Spar);
        let path = store.path(&run(), key);
        assert!(path.ends_with("000000001.000000002.000000005.run0.spar.csv"));
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let run = run();
        let key = FileKey::global(0, 0, 0, Variable::Llik);
        let rows = vec![Row { value: 1.5 }, Row { value: 2.5 }];
        store.write_table(&run, key, &rows).unwrap();
        let back: Vec<Row> = store.read_table(&run, key).unwrap();
        assert_eq!(rows, back);
    }

    #[test]
    fn promote_copies_to_stable_and_final() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let run = run();
        let key = FileKey::global(0, 1, 3, Variable::Spar);
        store.write_table(&run, key, &vec![Row { value: 9.0 }]).unwrap();
        store.promote(&run, key).unwrap();
        assert!(store.exists(&run, key.block_stable()));
        assert!(store.exists(&run, FileKey::final_of(0, Variable::Spar)));
    }

    #[test]
    fn resume_precondition_fails_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let run = run();
        let err = store.require_resume_artifacts(&run, 0, 1, &[Variable::Spar]);
        assert!(matches!(err, Err(Error::ResumePrecondition(_))));
    }

    #[test]
    fn gc_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.gc_iteration(&run(), 0, 0, 99, Variable::Llik).unwrap();
    }
}
