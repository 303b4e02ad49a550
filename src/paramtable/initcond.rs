use crate::SubpopId;
use rand::rngs::SmallRng;
use rand_distr::Distribution;
use serde::{Deserialize, Serialize};

/// One compartment's share of a subpop's population at t0. When
/// `proportional` the `amount` is a fraction of the subpop population and
/// is perturbed/clipped to `[0, 1]`; otherwise it is an absolute headcount
/// read verbatim from a file and never perturbed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialConditionRow {
    pub subpop: SubpopId,
    pub compartment: String,
    pub amount: f64,
    pub proportional: bool,
    pub perturb_sd: f64,
}

/// Perturbs amount (if proportional) with a normal kernel, clipped into
/// `[0, 1]`.
pub fn perturb_initial_conditions(row: &InitialConditionRow, rng: &mut SmallRng) -> InitialConditionRow {
    if !row.proportional || row.perturb_sd == 0.0 {
        return row.clone();
    }
    let normal = rand_distr::Normal::new(0.0, row.perturb_sd).expect("finite perturb_sd");
    let proposed = (row.amount + normal.sample(rng)).clamp(0.0, 1.0);
    InitialConditionRow {
        amount: proposed,
        ..row.clone()
    }
}
