//! Aggregation of trial results into the presentation table.
//!
//! Trial results are aligned on stratum keys (outer union), the boolean
//! indicator is averaged per stratum over the trials that reported a
//! defined value, and the means are reshaped into one row per period
//! with one column per subperiod position.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use perm_core::store::atomic_write_bytes;
use perm_core::{StratumKey, TrialResult};

/// Rounded values below this threshold are replaced by [`BELOW_THRESHOLD`]
/// in the rendered table. Display-only; the underlying mean is rounded
/// first, then compared.
pub const DISPLAY_THRESHOLD: f64 = 0.001;

/// Presentation sentinel for below-threshold cells.
pub const BELOW_THRESHOLD: &str = "$<$0.001";

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub fyear: i32,
    /// Mean indicator per subperiod position; `None` when no trial
    /// reported a defined value for the cell.
    pub cells: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryTable {
    pub subperiods: Vec<u8>,
    pub rows: Vec<SummaryRow>,
}

impl SummaryTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column headers: `fyear` then one `stat<k>` per subperiod position.
    pub fn headers(&self) -> Vec<String> {
        let mut headers = vec!["fyear".to_string()];
        headers.extend((1..=self.subperiods.len()).map(|k| format!("stat{}", k)));
        headers
    }
}

/// Mean of the trial-level indicator per stratum, then reshape. Trial
/// order is irrelevant: the mean is commutative and a missing stratum in
/// some trials only shrinks that cell's denominator.
pub fn aggregate(results: &[TrialResult], subperiods: &[u8]) -> SummaryTable {
    if results.is_empty() {
        warn!("no trial results to aggregate; summary will be empty");
    }

    let mut hits: BTreeMap<StratumKey, (u64, u64)> = BTreeMap::new();
    for result in results {
        for (key, outcome) in &result.cells {
            if let Some(exceeded) = outcome.defined() {
                let cell = hits.entry(*key).or_insert((0, 0));
                cell.0 += u64::from(exceeded);
                cell.1 += 1;
            } else {
                // Undefined outcomes stay out of the denominator, but the
                // stratum must still appear in the table shape.
                hits.entry(*key).or_insert((0, 0));
            }
        }
    }

    let mut periods: Vec<i32> = hits.keys().map(|k| k.fyear).collect();
    periods.sort_unstable();
    periods.dedup();

    let rows = periods
        .into_iter()
        .map(|fyear| SummaryRow {
            fyear,
            cells: subperiods
                .iter()
                .map(|&prd| {
                    hits.get(&StratumKey::new(fyear, prd))
                        .and_then(|&(sum, n)| (n > 0).then(|| sum as f64 / n as f64))
                })
                .collect(),
        })
        .collect();

    SummaryTable {
        subperiods: subperiods.to_vec(),
        rows,
    }
}

/// Rounds to 3 decimals (banker's rounding, so an exact 0.0005 mean
/// stays below the threshold), then applies the display threshold.
/// Undefined cells render empty.
pub fn render_cell(mean: Option<f64>) -> String {
    let Some(mean) = mean else {
        return String::new();
    };
    let rounded = (mean * 1000.0).round_ties_even() / 1000.0;
    if rounded < DISPLAY_THRESHOLD {
        BELOW_THRESHOLD.to_string()
    } else {
        format!("{:.3}", rounded)
    }
}

/// Writes the summary CSV atomically (tmp + rename, like every other
/// artifact in the results namespace).
pub fn write_summary(table: &SummaryTable, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(table.headers())?;
    for row in &table.rows {
        let mut record = vec![row.fyear.to_string()];
        record.extend(row.cells.iter().map(|&cell| render_cell(cell)));
        writer.write_record(&record)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    atomic_write_bytes(path, &bytes)
        .with_context(|| format!("writing summary {}", path.display()))?;
    Ok(())
}
