//! Likelihood kernels: per-element log-density under the enumerated
//! distribution family, plus the joint per-subpop sum.

use crate::config::DistributionKind;
use crate::LogDensity;
use statrs::distribution::{Continuous, Discrete, LogNormal, NegativeBinomial, Normal, Poisson};

/// Per-element log-density of observed `o` given simulated `s` and the
/// distribution's `params` (meaning depends on `kind`). `add_one`
/// implements a zero-handling policy: only `s=0, o>0` is lifted to
/// `s=1`, and only under that policy does `o+s=0` short-circuit to 0;
/// with the policy disabled, `o=s=0` is evaluated at its nominal
/// density like any other pair.
pub fn log_density(kind: DistributionKind, o: f64, s: f64, params: &[f64], add_one: bool) -> LogDensity {
    if add_one && o == 0.0 && s == 0.0 {
        return 0.0;
    }
    let s = if add_one && s == 0.0 && o > 0.0 { 1.0 } else { s };

    match kind {
        DistributionKind::Pois => {
            let dist = Poisson::new(s.max(f64::MIN_POSITIVE)).expect("poisson mean must be positive");
            dist.ln_pmf(o.round() as u64)
        }
        DistributionKind::Norm => {
            let sd = params[0];
            normal_ln_pdf(o, s, sd)
        }
        DistributionKind::NormCov => {
            let sd = s.max(crate::COV_FLOOR) * params[0];
            normal_ln_pdf(o, s, sd)
        }
        DistributionKind::Nbinom => {
            let size = params[0];
            nbinom_ln_pmf(o, s, size)
        }
        DistributionKind::Sqrtnorm => {
            let sd = params[0];
            normal_ln_pdf(o.sqrt(), s.sqrt(), sd)
        }
        DistributionKind::SqrtnormCov => {
            let sd = s.max(crate::COV_FLOOR).sqrt() * params[0];
            normal_ln_pdf(o.sqrt(), s.sqrt(), sd)
        }
        DistributionKind::SqrtnormScaleSim => {
            let scale = params[1];
            let mean = (s * scale).sqrt();
            let sd = (s.max(crate::COV_FLOOR) * scale).sqrt() * params[0];
            normal_ln_pdf(o.sqrt(), mean, sd)
        }
        DistributionKind::Lognorm => {
            let sdlog = params[0];
            let meanlog = s.ln() + sdlog * sdlog;
            if o <= 0.0 {
                f64::NEG_INFINITY
            } else {
                LogNormal::new(meanlog, sdlog.max(f64::MIN_POSITIVE))
                    .expect("lognormal sdlog must be positive")
                    .ln_pdf(o)
            }
        }
    }
}

fn normal_ln_pdf(o: f64, mean: f64, sd: f64) -> LogDensity {
    if sd <= 0.0 {
        return if (o - mean).abs() < f64::EPSILON { 0.0 } else { f64::NEG_INFINITY };
    }
    Normal::new(mean, sd).expect("normal sd must be finite").ln_pdf(o)
}

/// Converts a mean/size parametrization to statrs's `(r, p)`
/// parametrization before evaluating the log-pmf.
fn nbinom_ln_pmf(o: f64, mean: f64, size: f64) -> LogDensity {
    let mean = mean.max(f64::MIN_POSITIVE);
    let r = size.max(f64::MIN_POSITIVE);
    let p = r / (r + mean);
    NegativeBinomial::new(r, p)
        .expect("negative binomial params must be valid")
        .ln_pmf(o.round() as u64)
}

/// Sums per-element log-densities over an aligned `(sim, obs)` series,
/// skipping pairs where the observation is missing. Contributes exactly
/// 0 when the series is empty (no overlapping dates).
pub fn series_log_likelihood(
    kind: DistributionKind,
    pairs: &[(f64, Option<f64>)],
    params: &[f64],
    add_one: bool,
) -> LogDensity {
    pairs
        .iter()
        .filter_map(|(s, o)| o.map(|o| log_density(kind, o, *s, params, add_one)))
        .sum()
}
