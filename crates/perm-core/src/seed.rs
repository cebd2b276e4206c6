//! Deterministic per-stratum seed derivation.
//!
//! Every (trial, stratum) pair gets its own RNG seed so that the
//! relabeling is independent across strata within a trial and across
//! trials, and so that re-running a trial index reproduces the identical
//! relabeling. Seeds are a pure function of the trial index and the
//! stratum's rank in the canonical (period, subperiod) grid; no process
//! state is involved.

use std::collections::BTreeMap;

use crate::panel::{Panel, StratumKey};
use crate::{PermError, Result};

/// Maximum number of strata per trial. Trial `n` owns the seed block
/// `[n * SEED_STRIDE, (n + 1) * SEED_STRIDE)`, so seeds never collide
/// between trials as long as the grid fits in one block.
pub const SEED_STRIDE: u64 = 10_000;

/// Canonical stratum ranks for one experiment. Ranks are laid out over
/// the full period x subperiod grid (ascending periods, configured
/// subperiod order), which keeps them stable even when some strata are
/// absent from the panel.
#[derive(Debug, Clone)]
pub struct SeedPlan {
    ranks: BTreeMap<StratumKey, u64>,
}

impl SeedPlan {
    pub fn new(panel: &Panel, subperiods: &[u8]) -> Result<Self> {
        let periods = panel.periods();
        let grid = periods.len() * subperiods.len();
        if grid as u64 > SEED_STRIDE {
            return Err(PermError::SeedStrideExhausted {
                strata: grid,
                capacity: SEED_STRIDE,
            });
        }
        for row in panel.rows() {
            if !subperiods.contains(&row.prd) {
                return Err(PermError::UnknownSubperiod { prd: row.prd });
            }
        }
        let mut ranks = BTreeMap::new();
        for (ii, fyear) in periods.iter().enumerate() {
            for (jj, prd) in subperiods.iter().enumerate() {
                let rank = (ii * subperiods.len() + jj) as u64;
                ranks.insert(StratumKey::new(*fyear, *prd), rank);
            }
        }
        Ok(Self { ranks })
    }

    pub fn seed_for(&self, trial: u64, key: &StratumKey) -> Result<u64> {
        let rank = self.ranks.get(key).ok_or(PermError::MissingSeed {
            trial,
            fyear: key.fyear,
            prd: key.prd,
        })?;
        Ok(trial * SEED_STRIDE + rank)
    }

    pub fn stratum_count(&self) -> usize {
        self.ranks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::Observation;
    use std::collections::BTreeSet;

    fn panel(years: &[i32]) -> Panel {
        let rows = years
            .iter()
            .flat_map(|&fyear| {
                [1u8, 2, 3].into_iter().map(move |prd| Observation {
                    permno: 1,
                    fyear,
                    prd,
                    g: 1,
                    car_prd: 0.0,
                })
            })
            .collect();
        Panel::from_rows(rows)
    }

    #[test]
    fn seeds_are_distinct_across_trials_and_strata() {
        // 51 periods x 3 subperiods would already collide under the
        // original fyear-rank*10 layout; the strided layout must not.
        let years: Vec<i32> = (1970..2021).collect();
        let panel = panel(&years);
        let plan = SeedPlan::new(&panel, &[1, 2, 3]).unwrap();

        let mut seen = BTreeSet::new();
        for trial in 0..200u64 {
            for (key, _) in panel.strata() {
                let seed = plan.seed_for(trial, &key).unwrap();
                assert!(seen.insert(seed), "seed collision at trial {trial}");
            }
        }
    }

    #[test]
    fn seeds_do_not_depend_on_row_order() {
        let a = panel(&[2000, 2001]);
        let mut rows = a.rows().to_vec();
        rows.reverse();
        let b = Panel::from_rows(rows);

        let plan_a = SeedPlan::new(&a, &[1, 2, 3]).unwrap();
        let plan_b = SeedPlan::new(&b, &[1, 2, 3]).unwrap();
        let key = StratumKey::new(2001, 2);
        assert_eq!(
            plan_a.seed_for(7, &key).unwrap(),
            plan_b.seed_for(7, &key).unwrap()
        );
    }

    #[test]
    fn oversized_grid_is_rejected() {
        let years: Vec<i32> = (0..4000).collect();
        let panel = panel(&years);
        let err = SeedPlan::new(&panel, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, PermError::SeedStrideExhausted { .. }));
    }

    #[test]
    fn unknown_subperiod_is_rejected() {
        let p = Panel::from_rows(vec![Observation {
            permno: 1,
            fyear: 2000,
            prd: 4,
            g: 0,
            car_prd: 0.0,
        }]);
        let err = SeedPlan::new(&p, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, PermError::UnknownSubperiod { prd: 4 }));
    }
}
