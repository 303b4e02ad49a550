//! Typed run configuration. Parsing itself is treated as a narrow external
//! collaborator — this module only defines the shape and a thin
//! `serde_yaml` load, with no bespoke schema validation beyond what
//! `serde` gives for free.

use crate::paramtable::{PerturbDistribution, Transform, ValueDistribution};
use crate::timeagg::Period;
use crate::{Error, Result, SimDate, SubpopId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedingConfig {
    pub date_sd: f64,
    pub amount_sd: f64,
    pub lambda_file: Option<String>,
    pub seeding_delay: i64,
    pub seeding_inflation_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialConditionsMethod {
    FromFile,
    Proportional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialConditionsConfig {
    pub method: InitialConditionsMethod,
    pub perturbation: Option<PerturbDistribution>,
    pub proportional: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifierConfig {
    pub value: f64,
    pub perturbation: PerturbDistribution,
    pub value_distribution: ValueDistribution,
    pub transform: Option<Transform>,
    /// modifier this one depends on, forming the dependency DAG checked
    /// for cycles at load time
    pub baseline_modifier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeParamConfig {
    pub outcome: String,
    pub quantity: String,
    pub value: f64,
    pub perturbation: PerturbDistribution,
    pub value_distribution: ValueDistribution,
    pub transform: Option<Transform>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregator {
    Sum,
    Mean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionKind {
    Pois,
    Norm,
    NormCov,
    Nbinom,
    Sqrtnorm,
    SqrtnormCov,
    SqrtnormScaleSim,
    Lognorm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticSpec {
    pub sim_variable: String,
    pub data_variable: String,
    pub period: Period,
    pub aggregator: Aggregator,
    pub distribution: DistributionKind,
    pub distribution_params: Vec<f64>,
    pub add_one_policy: bool,
    pub groundtruth_window: Option<(SimDate, SimDate)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchicalStatConfig {
    pub modifier_name: String,
    pub group_column: String,
    pub transform: Option<Transform>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorKind {
    Normal,
    LogitNormal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorConfig {
    pub modifier_name: String,
    pub kind: PriorKind,
    pub mu: f64,
    pub sigma: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub statistics: BTreeMap<String, StatisticSpec>,
    pub hierarchical_stats_geo: Vec<HierarchicalStatConfig>,
    pub priors: Vec<PriorConfig>,
    pub gt_data_path: String,
    pub gt_source: String,
    pub iterations_per_slot: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub start_date: SimDate,
    pub end_date: SimDate,
    pub start_date_groundtruth: SimDate,
    pub end_date_groundtruth: SimDate,
    pub subpops: Vec<SubpopId>,
    /// subpop -> group name, used by the hierarchical adjuster (C4)
    pub geography_groups: BTreeMap<SubpopId, String>,
    pub seeding: SeedingConfig,
    pub initial_conditions: InitialConditionsConfig,
    pub seir_modifiers: BTreeMap<String, ModifierConfig>,
    pub outcome_modifiers: BTreeMap<String, ModifierConfig>,
    pub outcomes: BTreeMap<String, OutcomeParamConfig>,
    pub inference: InferenceConfig,
    pub nslots: u32,
    /// which weekday an epidemiological week starts on; must match the
    /// convention used by whatever produced the ground-truth series
    #[serde(default)]
    pub week_start: crate::timeagg::WeekStart,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())
            .map_err(|e| crate::error::config_err(format!("cannot open config: {e}")))?;
        let config: Config = serde_yaml::from_reader(file)
            .map_err(|e| crate::error::config_err(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks outside what `serde` gives for free: period
    /// multiplicity, unknown-distribution references, the modifier
    /// dependency DAG. All fatal (exit 1).
    fn validate(&self) -> Result<()> {
        for (name, stat) in &self.inference.statistics {
            if stat.period.count != 1 {
                return Err(crate::error::config_err(format!(
                    "statistic {name}: only multiplicity 1 of the period unit is supported, got {}",
                    stat.period.count
                )));
            }
        }
        self.check_modifier_dag()?;
        Ok(())
    }

    fn check_modifier_dag(&self) -> Result<()> {
        for name in self.seir_modifiers.keys().chain(self.outcome_modifiers.keys()) {
            let mut seen = std::collections::HashSet::new();
            let mut cursor = name.clone();
            loop {
                if !seen.insert(cursor.clone()) {
                    return Err(crate::error::config_err(format!(
                        "cyclic baseline_modifier reference starting at {name}"
                    )));
                }
                let next = self
                    .seir_modifiers
                    .get(&cursor)
                    .or_else(|| self.outcome_modifiers.get(&cursor))
                    .and_then(|m| m.baseline_modifier.clone());
                match next {
                    Some(n) => cursor = n,
                    None => break,
                }
            }
        }
        Ok(())
    }

    pub fn groundtruth_window(&self) -> (SimDate, SimDate) {
        (self.start_date_groundtruth, self.end_date_groundtruth)
    }
}
