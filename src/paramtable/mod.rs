//! Parameter tables and perturbers (C1).
//!
//! Four row kinds co-exist and are perturbed independently: seeding events,
//! transmission modifiers, outcome modifiers, outcome parameters, and
//! initial conditions. They share a `RowHeader` (subpop, modifier name,
//! value, support, kernel) and carry kind-specific tails — a tagged-variant
//! shape standing in for looser, dynamically-named-column tables.

mod initcond;
mod modifier;
mod outcome;
mod seeding;

pub use initcond::{perturb_initial_conditions, InitialConditionRow};
pub use modifier::{perturb_modifier, ModifierRow};
pub use outcome::{perturb_outcome_param, OutcomeParamRow};
pub use seeding::{perturb_seeding, SeedingRow};

use crate::SubpopId;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

/// Sentinel subpop value meaning "applies to every subpop".
pub const ALL_SUBPOPS: &str = "all";

/// The support a proposed `value` must lie within. Proposals outside the
/// support are rejected *within that row's own perturbation* — the row
/// keeps its previous value rather than failing the whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueDistribution {
    TruncatedNormal { a: f64, b: f64 },
    Uniform { a: f64, b: f64 },
    /// zero-width support: the value is pinned and perturbation is a no-op
    Fixed { value: f64 },
}

impl ValueDistribution {
    pub fn contains(&self, x: f64) -> bool {
        match self {
            ValueDistribution::TruncatedNormal { a, b } | ValueDistribution::Uniform { a, b } => {
                x >= *a && x <= *b
            }
            ValueDistribution::Fixed { value } => (x - value).abs() < f64::EPSILON,
        }
    }
}

/// The kernel used to draw a proposal for a single row's `value`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerturbDistribution {
    Normal { sd: f64 },
}

impl PerturbDistribution {
    /// Draws a perturbation delta, honoring a per-row `perturb_sd`
    /// override: a zero `perturb_sd` collapses the kernel to the identity.
    pub fn sample_delta(&self, rng: &mut SmallRng, perturb_sd: f64) -> f64 {
        if perturb_sd == 0.0 {
            return 0.0;
        }
        match self {
            PerturbDistribution::Normal { .. } => {
                use rand_distr::Distribution;
                let normal = rand_distr::Normal::new(0.0, perturb_sd)
                    .expect("perturb_sd must be finite and non-negative");
                normal.sample(rng)
            }
        }
    }
}

/// The scale perturbation operates on before being mapped back to the raw
/// `value` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Identity,
    Log,
    Logit,
}

impl Transform {
    /// Maps a raw value onto the transform scale. Logit clips to
    /// `[eps, 1-eps]` first; log requires strictly positive input (the
    /// caller is responsible for only using `Log` on supports that
    /// guarantee this).
    pub fn forward(&self, x: f64) -> f64 {
        match self {
            Transform::Identity => x,
            Transform::Log => x.ln(),
            Transform::Logit => {
                let clipped = x.clamp(crate::LOGIT_EPS, 1.0 - crate::LOGIT_EPS);
                (clipped / (1.0 - clipped)).ln()
            }
        }
    }

    /// Inverse of [`Transform::forward`].
    pub fn backward(&self, y: f64) -> f64 {
        match self {
            Transform::Identity => y,
            Transform::Log => y.exp(),
            Transform::Logit => 1.0 / (1.0 + (-y).exp()),
        }
    }
}

/// Fields shared by every parameter-table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowHeader {
    pub subpop: SubpopId,
    pub modifier_name: String,
    pub value: f64,
    pub value_distribution: ValueDistribution,
    pub perturb_distribution: PerturbDistribution,
    pub perturb_sd: f64,
    pub transform: Transform,
    /// when true, perturbation returns this row unchanged (e.g. a fixed
    /// seeding event that must not move)
    pub no_perturb: bool,
}

impl RowHeader {
    /// Core perturb-one-row contract: draw on the transform scale,
    /// invert, keep iff within support — otherwise retain the original
    /// value. Returns the accepted `value` for this row.
    pub fn perturb_value(&self, rng: &mut SmallRng) -> f64 {
        if self.no_perturb {
            return self.value;
        }
        let scaled = self.transform.forward(self.value);
        let delta = self
            .perturb_distribution
            .sample_delta(rng, self.perturb_sd);
        let proposed = self.transform.backward(scaled + delta);
        if self.value_distribution.contains(proposed) {
            proposed
        } else {
            self.value
        }
    }
}

/// The full in-memory state of one accepted (or proposed) parameter set.
/// Kept stable on disk across blocks: perturbation never adds/removes
/// rows or reorders columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamTables {
    pub seeding: Vec<SeedingRow>,
    pub transmission_modifiers: Vec<ModifierRow>,
    pub outcome_modifiers: Vec<ModifierRow>,
    pub outcome_params: Vec<OutcomeParamRow>,
    pub initial_conditions: Vec<InitialConditionRow>,
}

/// Perturbation config: simulation window bounds and the stochastic-mode
/// flag needed by seeding amount rounding.
#[derive(Debug, Clone, Copy)]
pub struct PerturbConfig {
    pub sim_start: chrono::NaiveDate,
    pub sim_end: chrono::NaiveDate,
    pub stochastic: bool,
}

impl ParamTables {
    /// Perturbs every kind independently, producing the proposed
    /// collection for one iteration. Row count, column order, and row
    /// order are all preserved.
    pub fn perturb(&self, rng: &mut SmallRng, config: &PerturbConfig) -> ParamTables {
        ParamTables {
            seeding: self
                .seeding
                .iter()
                .map(|r| perturb_seeding(r, rng, config))
                .collect(),
            transmission_modifiers: self
                .transmission_modifiers
                .iter()
                .map(|r| perturb_modifier(r, rng))
                .collect(),
            outcome_modifiers: self
                .outcome_modifiers
                .iter()
                .map(|r| perturb_modifier(r, rng))
                .collect(),
            outcome_params: self
                .outcome_params
                .iter()
                .map(|r| perturb_outcome_param(r, rng))
                .collect(),
            initial_conditions: self
                .initial_conditions
                .iter()
                .map(|r| perturb_initial_conditions(r, rng))
                .collect(),
        }
    }

    /// Replaces every row belonging to `subpop` with its counterpart from
    /// `source`, leaving every other subpop's rows untouched: a subpop's
    /// chimeric composition is swapped in independently of its siblings.
    /// Row order/count between `self` and `source` must match (always
    /// true here, since `source` was produced by perturbing `self`).
    pub fn overlay_subpop(&mut self, subpop: &str, source: &ParamTables) {
        for (dst, src) in self.seeding.iter_mut().zip(&source.seeding) {
            if dst.subpop == subpop {
                *dst = src.clone();
            }
        }
        for (dst, src) in self
            .transmission_modifiers
            .iter_mut()
            .zip(&source.transmission_modifiers)
        {
            if dst.header.subpop == subpop {
                *dst = src.clone();
            }
        }
        for (dst, src) in self.outcome_modifiers.iter_mut().zip(&source.outcome_modifiers) {
            if dst.header.subpop == subpop {
                *dst = src.clone();
            }
        }
        for (dst, src) in self.outcome_params.iter_mut().zip(&source.outcome_params) {
            if dst.header.subpop == subpop {
                *dst = src.clone();
            }
        }
        for (dst, src) in self
            .initial_conditions
            .iter_mut()
            .zip(&source.initial_conditions)
        {
            if dst.subpop == subpop {
                *dst = src.clone();
            }
        }
    }
}
