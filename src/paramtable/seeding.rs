use super::{PerturbConfig, RowHeader};
use crate::SubpopId;
use rand::rngs::SmallRng;
use rand_distr::Distribution;
use serde::{Deserialize, Serialize};

/// One discrete seeding event: `amount` individuals introduced into
/// `subpop` on `date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedingRow {
    pub subpop: SubpopId,
    pub date: chrono::NaiveDate,
    pub amount: f64,
    pub no_perturb: bool,
    pub date_sd: f64,
    pub amount_sd: f64,
}

impl SeedingRow {
    pub fn is_valid(&self, sim_start: chrono::NaiveDate, sim_end: chrono::NaiveDate) -> bool {
        self.date >= sim_start && self.date <= sim_end && self.amount >= 0.0
    }
}

/// Perturbs a seeding row: the date is perturbed by a rounded normal and
/// clamped into the simulation window; the amount is perturbed by a
/// floored (non-negative) normal and, in stochastic mode, rounded to an
/// integer.
pub fn perturb_seeding(row: &SeedingRow, rng: &mut SmallRng, config: &PerturbConfig) -> SeedingRow {
    if row.no_perturb {
        return row.clone();
    }

    let date = if row.date_sd > 0.0 {
        let normal = rand_distr::Normal::new(0.0, row.date_sd).expect("finite date_sd");
        let shift = normal.sample(rng).round() as i64;
        let proposed = row.date + chrono::Duration::days(shift);
        proposed.clamp(config.sim_start, config.sim_end)
    } else {
        row.date
    };

    let amount = if row.amount_sd > 0.0 {
        let normal = rand_distr::Normal::new(0.0, row.amount_sd).expect("finite amount_sd");
        let proposed = (row.amount + normal.sample(rng)).max(0.0);
        if config.stochastic {
            proposed.round()
        } else {
            proposed
        }
    } else {
        row.amount
    };

    SeedingRow {
        subpop: row.subpop.clone(),
        date,
        amount,
        no_perturb: row.no_perturb,
        date_sd: row.date_sd,
        amount_sd: row.amount_sd,
    }
}

/// Builds the initial seeding table from ground truth: for each subpop,
/// take the first few positive incidence days, shift by the configured
/// delay, and inflate by the configured ratio.
pub fn initial_seeding_from_groundtruth(
    series: &[(chrono::NaiveDate, f64)],
    subpop: &SubpopId,
    n_events: usize,
    delay_days: i64,
    inflation_ratio: f64,
    date_sd: f64,
    amount_sd: f64,
) -> Vec<SeedingRow> {
    series
        .iter()
        .filter(|(_, v)| *v > 0.0)
        .take(n_events)
        .map(|(date, amount)| SeedingRow {
            subpop: subpop.clone(),
            date: *date - chrono::Duration::days(delay_days),
            amount: amount * inflation_ratio,
            no_perturb: false,
            date_sd,
            amount_sd,
        })
        .collect()
}
