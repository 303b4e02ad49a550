use super::RowHeader;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

/// A point parameter of an outcome distribution (delay, probability,
/// dispersion, ...). Carries the extra `outcome`/`quantity` columns on
/// top of the shared header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeParamRow {
    pub header: RowHeader,
    pub outcome: String,
    pub quantity: String,
}

pub fn perturb_outcome_param(row: &OutcomeParamRow, rng: &mut SmallRng) -> OutcomeParamRow {
    let mut next = row.clone();
    next.header.value = row.header.perturb_value(rng);
    next
}
