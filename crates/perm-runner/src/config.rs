//! Experiment configuration.
//!
//! The experiment file is YAML:
//!
//! ```yaml
//! panel: temp/prd.csv
//! results_dir: temp/results
//! trials: 10000
//! subperiods: [1, 2, 3]
//! ```
//!
//! Relative paths are resolved against the experiment file's directory.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

fn default_subperiods() -> Vec<u8> {
    vec![1, 2, 3]
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentConfig {
    /// Analysis panel CSV, produced by the upstream ingestion pipeline.
    pub panel: PathBuf,
    /// Shared namespace for trial artifacts and the summary table.
    pub results_dir: PathBuf,
    /// Total trial population of the experiment.
    pub trials: u64,
    /// Ordered subperiod set; positions determine seed ranks and summary
    /// column order.
    #[serde(default = "default_subperiods")]
    pub subperiods: Vec<u8>,
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("experiment file unreadable: {}", path.display()))?;
        let mut config: ExperimentConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid experiment file: {}", path.display()))?;
        config.validate()?;

        let base = path.parent().unwrap_or(Path::new("."));
        config.panel = resolve(base, &config.panel);
        config.results_dir = resolve(base, &config.results_dir);
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.panel.as_os_str().is_empty() {
            missing.push("panel");
        }
        if self.results_dir.as_os_str().is_empty() {
            missing.push("results_dir");
        }
        if self.trials == 0 {
            missing.push("trials (set > 0)");
        }
        if self.subperiods.is_empty() {
            missing.push("subperiods");
        }
        if !missing.is_empty() {
            return Err(anyhow!(
                "experiment file missing required fields:\n{}",
                missing
                    .iter()
                    .map(|f| format!("  - {}", f))
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
        }
        let mut distinct = self.subperiods.clone();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() != self.subperiods.len() {
            return Err(anyhow!("subperiods must be distinct"));
        }
        Ok(())
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
