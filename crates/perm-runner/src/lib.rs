//! Trial execution.
//!
//! One trial = one full random relabeling of the treatment indicator,
//! stratified by (period, subperiod), compared against the actual
//! labels. Each trial writes exactly one artifact into the shared
//! results directory; trials never communicate, so a scheduler can fan
//! out any number of task processes over disjoint trial-index ranges.

pub mod config;

use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::info;

use perm_core::stats::group_spread;
use perm_core::store::atomic_write_bytes;
use perm_core::{ArtifactStore, Outcome, Panel, SeedPlan, TrialResult};

pub use config::ExperimentConfig;

/// Which slice of the trial population this process instance owns.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub task_id: u64,
    pub slots: usize,
    pub trials: Range<u64>,
}

impl TaskSpec {
    /// Scheduler-style allocation: 1-based task id, `slots` contiguous
    /// trial indices per task, clipped to the experiment's total.
    pub fn from_scheduler(task_id: u64, slots: usize, total_trials: u64) -> Result<Self> {
        if task_id == 0 {
            return Err(anyhow!("task id must be >= 1 (scheduler ids are 1-based)"));
        }
        if slots == 0 {
            return Err(anyhow!("slots must be >= 1"));
        }
        let start = (task_id - 1).checked_mul(slots as u64).ok_or_else(|| {
            anyhow!("task id {task_id} with {slots} slots overflows the trial range")
        })?;
        let end = task_id
            .checked_mul(slots as u64)
            .map_or(total_trials, |end| end.min(total_trials));
        Ok(Self {
            task_id,
            slots,
            trials: start..end.max(start),
        })
    }

    /// Explicit range override, for re-running a subset of trial indices.
    pub fn explicit(trials: Range<u64>, slots: usize) -> Result<Self> {
        if slots == 0 {
            return Err(anyhow!("slots must be >= 1"));
        }
        Ok(Self {
            task_id: 1,
            slots,
            trials,
        })
    }
}

#[derive(Debug)]
pub struct TaskOutcome {
    pub written: Vec<u64>,
    pub manifest_path: PathBuf,
}

/// Computes one trial against a loaded panel. Pure in (panel, plan,
/// trial): the same inputs always produce the same result.
pub fn run_trial(panel: &Panel, plan: &SeedPlan, trial: u64) -> perm_core::Result<TrialResult> {
    let mut result = TrialResult::new(trial);
    for (key, rows) in panel.strata() {
        let seed = plan.seed_for(trial, &key)?;
        let mut rng = StdRng::seed_from_u64(seed);
        // One fair draw per row, aligned with the stratum's original
        // row order.
        let relabel: Vec<bool> = rows.iter().map(|_| rng.gen_bool(0.5)).collect();

        let actual = group_spread(rows.iter().map(|&i| {
            let row = &panel.rows()[i];
            (row.treated(), row.car_prd)
        }));
        let hypothetical = group_spread(
            rows.iter()
                .zip(&relabel)
                .map(|(&i, &label)| (label, panel.rows()[i].car_prd)),
        );
        result.cells.insert(key, Outcome::compare(actual, hypothetical));
    }
    Ok(result)
}

/// Runs this task's trial range over an internal worker pool and writes
/// one artifact per trial plus a per-task manifest. The panel is loaded
/// once and shared read-only across the pool.
pub fn run_task(config: &ExperimentConfig, task: &TaskSpec) -> Result<TaskOutcome> {
    let panel = Panel::load(&config.panel)
        .with_context(|| format!("loading panel {}", config.panel.display()))?;
    let plan = SeedPlan::new(&panel, &config.subperiods)?;
    let store = ArtifactStore::new(&config.results_dir);

    info!(
        task_id = task.task_id,
        trial_start = task.trials.start,
        trial_end = task.trials.end,
        slots = task.slots,
        panel_rows = panel.len(),
        strata = plan.stratum_count(),
        "running trial batch"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(task.slots)
        .build()
        .context("building worker pool")?;
    let written = pool.install(|| {
        task.trials
            .clone()
            .into_par_iter()
            .map(|trial| {
                let result = run_trial(&panel, &plan, trial)?;
                store.write_trial(&result)?;
                Ok(trial)
            })
            .collect::<perm_core::Result<Vec<u64>>>()
    })?;

    let manifest_path = write_task_manifest(config, task, &written)?;
    info!(written = written.len(), "trial batch complete");
    Ok(TaskOutcome {
        written,
        manifest_path,
    })
}

fn write_task_manifest(
    config: &ExperimentConfig,
    task: &TaskSpec,
    written: &[u64],
) -> Result<PathBuf> {
    let manifest = json!({
        "schema_version": "task_manifest_v1",
        "task_id": task.task_id,
        "trial_start": task.trials.start,
        "trial_end": task.trials.end,
        "written": written.len(),
        "panel": config.panel.display().to_string(),
        "panel_sha256": sha256_file(&config.panel)?,
        "created_at": Utc::now().to_rfc3339(),
    });
    let path = config
        .results_dir
        .join(format!("manifest_task_{}.json", task.task_id));
    atomic_write_bytes(&path, &serde_json::to_vec_pretty(&manifest)?)?;
    Ok(path)
}

fn sha256_file(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("digesting {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}
