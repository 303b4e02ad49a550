//! Hierarchical and explicit prior adjusters: additional log-density
//! contributions summed into the *global* per-subpop likelihood. Neither
//! adjuster distinguishes chimeric acceptance.

use crate::config::PriorKind;
use crate::paramtable::Transform;
use crate::{LogDensity, SubpopId, HIER_SD_FLOOR};
use statrs::distribution::{Continuous, Normal};
use std::collections::BTreeMap;

/// One row's (subpop, value) pair for a single named modifier, as seen by
/// the hierarchical adjuster.
pub struct GroupedValue<'a> {
    pub subpop: &'a SubpopId,
    pub group: &'a str,
    pub value: f64,
}

/// Computes, per subpop, the shrinkage log-density `log N(value; mu_g,
/// sigma_g)` where `mu_g`/`sigma_g` are the group's empirical mean/sd
/// (sd floored at [`HIER_SD_FLOOR`]). Hierarchical stats on simulator
/// parameters are unsupported — callers only ever invoke this on
/// modifier-table values, never raw simulator state.
pub fn hierarchical_log_density(
    rows: &[GroupedValue<'_>],
    transform: Option<Transform>,
) -> BTreeMap<SubpopId, LogDensity> {
    let mut by_group: BTreeMap<&str, Vec<(&SubpopId, f64)>> = BTreeMap::new();
    for row in rows {
        let value = transform.map_or(row.value, |t| t.forward(row.value));
        by_group.entry(row.group).or_default().push((row.subpop, value));
    }

    let mut out = BTreeMap::new();
    for values in by_group.into_values() {
        let n = values.len() as f64;
        let mean = values.iter().map(|(_, v)| v).sum::<f64>() / n;
        let variance = if values.len() > 1 {
            values.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>() / n
        } else {
            0.0
        };
        let sd = variance.sqrt().max(HIER_SD_FLOOR);
        let normal = Normal::new(mean, sd).expect("group sd is floored positive");
        for (subpop, value) in values {
            out.insert(subpop.clone(), normal.ln_pdf(value));
        }
    }
    out
}

/// Explicit prior log-density for a single modifier value under
/// `normal(mu, sigma)` or `logit_normal(mu, sigma)` (with the shared
/// epsilon clip for the logit transform).
pub fn prior_log_density(kind: PriorKind, mu: f64, sigma: f64, value: f64) -> LogDensity {
    let (x, sigma) = match kind {
        PriorKind::Normal => (value, sigma),
        PriorKind::LogitNormal => (Transform::Logit.forward(value), sigma),
    };
    Normal::new(mu, sigma.max(f64::MIN_POSITIVE))
        .expect("prior sigma must be finite")
        .ln_pdf(x)
}
