//! In-memory state of one slot: the dual global/chimeric chains and the
//! running diagnostics recorded alongside each accepted or rejected
//! iteration.

use crate::paramtable::ParamTables;
use crate::{LogDensity, SubpopId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of the persisted `llik` table: a subpop's log-likelihood for
/// this iteration plus the running acceptance diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlikRow {
    pub subpop: SubpopId,
    pub log_likelihood: LogDensity,
    pub accept: bool,
    pub accept_prob: f64,
    pub accept_avg: f64,
}

/// The two parameter-table collections tracked per slot: `global` holds
/// the most recent globally-accepted proposal, `chimeric` holds, per
/// subpop, the fields from that subpop's most recent chimeric
/// acceptance. `current_index` is the iteration (within the active
/// block) that produced `global`.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub global: ParamTables,
    pub global_log_likelihood: BTreeMap<SubpopId, LogDensity>,
    pub chimeric: ParamTables,
    pub chimeric_log_likelihood: BTreeMap<SubpopId, LogDensity>,
    pub current_index: u32,
    global_accepts: u32,
    iterations_seen: u32,
    chimeric_accepts: BTreeMap<SubpopId, u32>,
}

impl SlotState {
    /// Seeds both chains from the same initial tables and likelihoods,
    /// per the block-1 initialization rule: the chimeric state starts as
    /// a copy of the global initial set.
    pub fn initial(tables: ParamTables, likelihood: BTreeMap<SubpopId, LogDensity>) -> Self {
        Self {
            global: tables.clone(),
            global_log_likelihood: likelihood.clone(),
            chimeric: tables,
            chimeric_log_likelihood: likelihood,
            current_index: 0,
            global_accepts: 0,
            iterations_seen: 0,
            chimeric_accepts: BTreeMap::new(),
        }
    }

    pub fn global_log_likelihood_sum(&self) -> LogDensity {
        self.global_log_likelihood.values().sum()
    }

    /// Running mean of the global accept indicator since slot start,
    /// including the iteration just recorded.
    pub fn record_global_iteration(&mut self, accepted: bool) -> f64 {
        self.iterations_seen += 1;
        if accepted {
            self.global_accepts += 1;
        }
        self.global_accepts as f64 / self.iterations_seen as f64
    }

    /// Running mean of one subpop's chimeric accept indicator.
    pub fn record_chimeric_iteration(&mut self, subpop: &SubpopId, accepted: bool) -> f64 {
        let entry = self.chimeric_accepts.entry(subpop.clone()).or_insert(0);
        if accepted {
            *entry += 1;
        }
        // chimeric iterations track 1:1 with global ones within a slot
        *entry as f64 / self.iterations_seen.max(1) as f64
    }
}
