//! Per-trial results and their CSV artifact codec.
//!
//! One artifact per trial index, header `fyear,prd,bool_<n>`. The value
//! column embeds the trial index so concatenated results stay
//! disambiguated. Rows are emitted in ascending (fyear, prd) order,
//! which together with the fixed formatting makes re-runs byte-identical.

use std::collections::BTreeMap;
use std::path::Path;

use crate::panel::StratumKey;
use crate::{PermError, Result};

/// Outcome of the spread comparison for one stratum in one trial.
/// `Undefined` marks a degenerate stratum (an empty group on either side
/// of the actual or hypothetical split); it is excluded from the
/// aggregation mean rather than counted as false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Defined(bool),
    Undefined,
}

impl Outcome {
    /// `actual > hypothetical`, undefined if either spread is. A NaN
    /// spread (a NaN outcome somewhere in the stratum) is undefined
    /// too: letting the comparison collapse it to false would bias the
    /// aggregation mean toward zero.
    pub fn compare(actual: Option<f64>, hypothetical: Option<f64>) -> Self {
        match (actual, hypothetical) {
            (Some(a), Some(h)) if a.is_nan() || h.is_nan() => Outcome::Undefined,
            (Some(a), Some(h)) => Outcome::Defined(a > h),
            _ => Outcome::Undefined,
        }
    }

    pub fn defined(self) -> Option<bool> {
        match self {
            Outcome::Defined(b) => Some(b),
            Outcome::Undefined => None,
        }
    }

    fn to_field(self) -> &'static str {
        match self {
            Outcome::Defined(true) => "true",
            Outcome::Defined(false) => "false",
            Outcome::Undefined => "",
        }
    }

    fn from_field(field: &str) -> Option<Self> {
        match field {
            "true" => Some(Outcome::Defined(true)),
            "false" => Some(Outcome::Defined(false)),
            "" => Some(Outcome::Undefined),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialResult {
    pub trial: u64,
    pub cells: BTreeMap<StratumKey, Outcome>,
}

impl TrialResult {
    pub fn new(trial: u64) -> Self {
        Self {
            trial,
            cells: BTreeMap::new(),
        }
    }

    pub fn value_column(&self) -> String {
        format!("bool_{}", self.trial)
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["fyear", "prd", self.value_column().as_str()])?;
        for (key, outcome) in &self.cells {
            writer.write_record([
                key.fyear.to_string(),
                key.prd.to_string(),
                outcome.to_field().to_string(),
            ])?;
        }
        writer.into_inner().map_err(|e| {
            PermError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let malformed = |message: String| PermError::MalformedArtifact {
            path: path.to_path_buf(),
            message,
        };
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        if headers.len() != 3 || &headers[0] != "fyear" || &headers[1] != "prd" {
            return Err(malformed(format!("unexpected header {:?}", headers)));
        }
        let trial = headers[2]
            .strip_prefix("bool_")
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| malformed(format!("unexpected value column '{}'", &headers[2])))?;

        let mut result = TrialResult::new(trial);
        for record in reader.records() {
            let record = record?;
            if record.len() != 3 {
                return Err(malformed(format!("row with {} fields", record.len())));
            }
            let fyear = record[0]
                .parse::<i32>()
                .map_err(|_| malformed(format!("bad fyear '{}'", &record[0])))?;
            let prd = record[1]
                .parse::<u8>()
                .map_err(|_| malformed(format!("bad prd '{}'", &record[1])))?;
            let outcome = Outcome::from_field(&record[2])
                .ok_or_else(|| malformed(format!("bad indicator '{}'", &record[2])))?;
            result.cells.insert(StratumKey::new(fyear, prd), outcome);
        }
        Ok(result)
    }
}
