//! The analysis panel: one row per (entity, period, subperiod)
//! observation, loaded from the CSV artifact produced by the upstream
//! ingestion pipeline. The panel is immutable once loaded and shared
//! read-only across all trials.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use serde::Deserialize;

use crate::{PermError, Result};

/// One (period, subperiod) cell of the experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StratumKey {
    pub fyear: i32,
    pub prd: u8,
}

impl StratumKey {
    pub fn new(fyear: i32, prd: u8) -> Self {
        Self { fyear, prd }
    }
}

/// A single panel row. `g` is the real-world treatment label (1 = good
/// news, 0 = bad news); `car_prd` is the cumulative abnormal return over
/// the subperiod window.
#[derive(Debug, Clone, Deserialize)]
pub struct Observation {
    pub permno: i64,
    pub fyear: i32,
    pub prd: u8,
    pub g: u8,
    pub car_prd: f64,
}

impl Observation {
    pub fn treated(&self) -> bool {
        self.g == 1
    }

    pub fn stratum(&self) -> StratumKey {
        StratumKey::new(self.fyear, self.prd)
    }
}

#[derive(Debug, Clone)]
pub struct Panel {
    rows: Vec<Observation>,
}

impl Panel {
    pub fn from_rows(rows: Vec<Observation>) -> Self {
        Self { rows }
    }

    /// Loads the panel CSV. An unreadable file is fatal for the whole
    /// trial process, so the error names the offending path.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| PermError::PanelUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = csv::Reader::from_reader(file);
        let mut rows = Vec::new();
        for (idx, record) in reader.deserialize::<Observation>().enumerate() {
            let row = record.map_err(|e| PermError::PanelRecord {
                record: idx as u64 + 1,
                message: e.to_string(),
            })?;
            rows.push(row);
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct periods in ascending order. This is the canonical
    /// ordering used for seed ranks, so it must not depend on row order.
    pub fn periods(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.rows.iter().map(|r| r.fyear).collect();
        years.sort_unstable();
        years.dedup();
        years
    }

    /// Groups row indices by stratum, preserving the original row order
    /// within each stratum. Relabeling vectors are aligned with this
    /// order, which is what makes re-runs reproducible.
    pub fn strata(&self) -> BTreeMap<StratumKey, Vec<usize>> {
        let mut map: BTreeMap<StratumKey, Vec<usize>> = BTreeMap::new();
        for (idx, row) in self.rows.iter().enumerate() {
            map.entry(row.stratum()).or_default().push(idx);
        }
        map
    }
}
