use super::RowHeader;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

/// A transmission or outcome modifier row. Both kinds share this shape;
/// the distinction lives only in which `ParamTables` vector the row sits
/// in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierRow {
    pub header: RowHeader,
}

impl ModifierRow {
    pub fn subpop_or_all(&self) -> &str {
        &self.header.subpop
    }
}

/// Perturbs one modifier row via the shared [`RowHeader`] contract.
pub fn perturb_modifier(row: &ModifierRow, rng: &mut SmallRng) -> ModifierRow {
    let mut next = row.clone();
    next.header.value = row.header.perturb_value(rng);
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paramtable::{PerturbDistribution, Transform, ValueDistribution};

    #[test]
    fn perturb_preserves_row_identity() {
        let row = ModifierRow {
            header: RowHeader {
                subpop: "A".into(),
                modifier_name: "r0_mult".into(),
                value: 0.3,
                value_distribution: ValueDistribution::Uniform { a: 0.0, b: 1.0 },
                perturb_distribution: PerturbDistribution::Normal { sd: 0.05 },
                perturb_sd: 0.05,
                transform: Transform::Identity,
                no_perturb: false,
            },
        };
        let mut rng = crate::rng::rng_for(1);
        let perturbed = perturb_modifier(&row, &mut rng);
        assert_eq!(perturbed.header.modifier_name, row.header.modifier_name);
        assert_eq!(perturbed.header.subpop, row.header.subpop);
    }
}
