use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use perm_core::{ArtifactStore, Panel, SeedPlan, TrialResult};
use perm_runner::{ExperimentConfig, TaskSpec};

#[derive(Parser)]
#[command(
    name = "perm",
    version = "0.2.0",
    about = "Stratified permutation test for event-driven return spreads"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved experiment and panel shape.
    Describe {
        #[arg(long)]
        experiment: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Run this task's trial-index range.
    Run {
        #[arg(long)]
        experiment: PathBuf,
        /// 1-based task id; defaults to the scheduler's allocation.
        #[arg(long, env = "SGE_TASK_ID", default_value_t = 1)]
        task_id: u64,
        /// Trials per task and worker pool size.
        #[arg(long, env = "NSLOTS", default_value_t = 1)]
        slots: usize,
        /// Explicit first trial index (overrides the scheduler range).
        #[arg(long, requires = "count")]
        start: Option<u64>,
        /// Explicit trial count (overrides the scheduler range).
        #[arg(long, requires = "start")]
        count: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Aggregate completed trial artifacts into the summary table.
    Aggregate {
        #[arg(long)]
        experiment: PathBuf,
        /// Summary CSV path (default: <results_dir>/summary.csv).
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli.command) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json!({
                    "ok": false,
                    "error": {
                        "code": "command_failed",
                        "message": err.to_string(),
                    }
                }));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Describe { experiment, json } => {
            let config = ExperimentConfig::load(&experiment)?;
            let panel = Panel::load(&config.panel)?;
            let plan = SeedPlan::new(&panel, &config.subperiods)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "panel": config.panel.display().to_string(),
                    "results_dir": config.results_dir.display().to_string(),
                    "trials": config.trials,
                    "subperiods": config.subperiods,
                    "panel_rows": panel.len(),
                    "periods": panel.periods(),
                    "strata": plan.stratum_count(),
                })));
            }
            println!("panel: {}", config.panel.display());
            println!("results_dir: {}", config.results_dir.display());
            println!("trials: {}", config.trials);
            println!("subperiods: {:?}", config.subperiods);
            println!("panel_rows: {}", panel.len());
            println!("periods: {}", panel.periods().len());
            println!("strata: {}", plan.stratum_count());
        }
        Commands::Run {
            experiment,
            task_id,
            slots,
            start,
            count,
            json,
        } => {
            let config = ExperimentConfig::load(&experiment)?;
            let task = match (start, count) {
                (Some(start), Some(count)) => TaskSpec::explicit(start..start + count, slots)?,
                _ => TaskSpec::from_scheduler(task_id, slots, config.trials)?,
            };
            let outcome = perm_runner::run_task(&config, &task)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "task_id": task.task_id,
                    "trial_start": task.trials.start,
                    "trial_end": task.trials.end,
                    "written": outcome.written.len(),
                    "manifest": outcome.manifest_path.display().to_string(),
                })));
            }
            println!("task_id: {}", task.task_id);
            println!("trials: {}..{}", task.trials.start, task.trials.end);
            println!("written: {}", outcome.written.len());
            println!("manifest: {}", outcome.manifest_path.display());
        }
        Commands::Aggregate {
            experiment,
            out,
            json,
        } => {
            let config = ExperimentConfig::load(&experiment)?;
            let store = ArtifactStore::new(&config.results_dir);
            let handles = store.discover()?;
            info!(
                found = handles.len(),
                expected = config.trials,
                "discovered trial artifacts"
            );
            if handles.is_empty() {
                warn!("no trial artifacts found; writing an empty summary");
            } else if (handles.len() as u64) < config.trials {
                warn!(
                    missing = config.trials - handles.len() as u64,
                    "aggregating a partial trial population"
                );
            }

            let results: Vec<TrialResult> = handles
                .iter()
                .map(|h| h.load())
                .collect::<perm_core::Result<_>>()?;
            let table = perm_analysis::aggregate(&results, &config.subperiods);
            let out_path = out.unwrap_or_else(|| config.results_dir.join("summary.csv"));
            perm_analysis::write_summary(&table, &out_path)?;

            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "aggregate",
                    "found": handles.len(),
                    "expected": config.trials,
                    "periods": table.rows.len(),
                    "summary": out_path.display().to_string(),
                })));
            }
            println!("found: {}", handles.len());
            println!("expected: {}", config.trials);
            println!("periods: {}", table.rows.len());
            println!("summary: {}", out_path.display());
        }
    }
    Ok(None)
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Describe { json, .. }
        | Commands::Run { json, .. }
        | Commands::Aggregate { json, .. } => *json,
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\"}}}}"
        ),
    }
}
