//! End-to-end run of a small experiment: two scheduler tasks cover 20
//! trials over a 2-period, 3-subperiod panel, then the results are
//! aggregated into the summary table.

use std::fs;
use std::path::{Path, PathBuf};

use perm_analysis::BELOW_THRESHOLD;
use perm_core::{ArtifactStore, TrialResult};
use perm_runner::{ExperimentConfig, TaskSpec};

fn write_panel(path: &Path) {
    let mut body = String::from("permno,fyear,prd,g,car_prd\n");
    let mut permno = 10000;
    for fyear in [2000, 2001] {
        for prd in 1..=3u8 {
            // Six observations per stratum, both labels represented,
            // treated outcomes shifted upward.
            for k in 0..3 {
                permno += 1;
                body.push_str(&format!(
                    "{permno},{fyear},{prd},1,{}\n",
                    0.08 + 0.01 * k as f64
                ));
                permno += 1;
                body.push_str(&format!(
                    "{permno},{fyear},{prd},0,{}\n",
                    -0.02 + 0.01 * k as f64
                ));
            }
        }
    }
    fs::write(path, body).unwrap();
}

fn setup(dir: &Path, trials: u64) -> (PathBuf, ExperimentConfig) {
    write_panel(&dir.join("prd.csv"));
    let experiment = dir.join("experiment.yaml");
    fs::write(
        &experiment,
        format!("panel: prd.csv\nresults_dir: results\ntrials: {trials}\n"),
    )
    .unwrap();
    let config = ExperimentConfig::load(&experiment).unwrap();
    (experiment, config)
}

#[test]
fn two_tasks_cover_the_population_and_aggregate() {
    let dir = tempfile::tempdir().unwrap();
    let (_experiment, config) = setup(dir.path(), 20);

    for task_id in 1..=2 {
        let task = TaskSpec::from_scheduler(task_id, 10, config.trials).unwrap();
        let outcome = perm_runner::run_task(&config, &task).unwrap();
        assert_eq!(outcome.written.len(), 10);
        assert!(outcome.manifest_path.exists());
    }

    let store = ArtifactStore::new(&config.results_dir);
    let handles = store.discover().unwrap();
    assert_eq!(handles.len(), 20);
    let trials: Vec<u64> = handles.iter().map(|h| h.trial).collect();
    assert_eq!(trials, (0..20).collect::<Vec<u64>>());

    let results: Vec<TrialResult> = handles.iter().map(|h| h.load().unwrap()).collect();
    let table = perm_analysis::aggregate(&results, &config.subperiods);
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[0].fyear, 2000);
    assert_eq!(table.rows[1].fyear, 2001);
    for row in &table.rows {
        assert_eq!(row.cells.len(), 3);
        for cell in &row.cells {
            let mean = cell.expect("at least one trial reported a defined value");
            assert!((0.0..=1.0).contains(&mean));
        }
    }

    let summary = config.results_dir.join("summary.csv");
    perm_analysis::write_summary(&table, &summary).unwrap();
    let text = fs::read_to_string(&summary).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("fyear,stat1,stat2,stat3"));
    assert_eq!(lines.count(), 2);
    for cell in text.lines().skip(1).flat_map(|l| l.split(',').skip(1)) {
        assert!(
            cell == BELOW_THRESHOLD || cell.parse::<f64>().is_ok(),
            "unexpected cell '{cell}'"
        );
    }
}

#[test]
fn rerunning_a_trial_reproduces_the_artifact_byte_for_byte() {
    let dir = tempfile::tempdir().unwrap();
    let (_experiment, config) = setup(dir.path(), 20);

    let task = TaskSpec::explicit(5..6, 1).unwrap();
    perm_runner::run_task(&config, &task).unwrap();
    let path = ArtifactStore::new(&config.results_dir).trial_path(5);
    let first = fs::read(&path).unwrap();

    perm_runner::run_task(&config, &task).unwrap();
    assert_eq!(fs::read(&path).unwrap(), first);
}

#[test]
fn aggregating_a_subset_matches_the_full_table_shape() {
    let dir = tempfile::tempdir().unwrap();
    let (_experiment, config) = setup(dir.path(), 12);

    let task = TaskSpec::from_scheduler(1, 12, config.trials).unwrap();
    perm_runner::run_task(&config, &task).unwrap();

    let handles = ArtifactStore::new(&config.results_dir).discover().unwrap();
    let all: Vec<TrialResult> = handles.iter().map(|h| h.load().unwrap()).collect();
    let full = perm_analysis::aggregate(&all, &config.subperiods);
    let partial = perm_analysis::aggregate(&all[..5], &config.subperiods);

    assert_eq!(full.headers(), partial.headers());
    assert_eq!(full.rows.len(), partial.rows.len());
    for (a, b) in full.rows.iter().zip(&partial.rows) {
        assert_eq!(a.fyear, b.fyear);
        assert_eq!(a.cells.len(), b.cells.len());
    }
}

#[test]
fn missing_panel_fails_the_task_without_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let experiment = dir.path().join("experiment.yaml");
    fs::write(
        &experiment,
        "panel: missing.csv\nresults_dir: results\ntrials: 4\n",
    )
    .unwrap();
    let config = ExperimentConfig::load(&experiment).unwrap();

    let task = TaskSpec::from_scheduler(1, 4, config.trials).unwrap();
    let err = perm_runner::run_task(&config, &task).unwrap_err();
    assert!(err.to_string().contains("missing.csv"));
    let store = ArtifactStore::new(&config.results_dir);
    assert!(store.discover().unwrap().is_empty());
}
