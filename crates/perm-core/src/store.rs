//! The trial-result artifact store.
//!
//! Each trial owns exactly one slot, `trial_<n>.csv`, in a shared
//! results directory; slots are disjoint, so arbitrarily many worker
//! processes can write without coordination. Writes go through a
//! temporary file and a rename so a crashed trial never leaves a
//! discoverable partial artifact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::trial::TrialResult;
use crate::Result;

pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)
}

/// Writes `bytes` to `path` atomically via a hidden sibling tmp file.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0);
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, std::process::id(), micros));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// A discovered trial artifact, not yet parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialHandle {
    pub trial: u64,
    pub path: PathBuf,
}

impl TrialHandle {
    pub fn load(&self) -> Result<TrialResult> {
        TrialResult::from_csv_path(&self.path)
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn trial_path(&self, trial: u64) -> PathBuf {
        self.dir.join(format!("trial_{}.csv", trial))
    }

    pub fn write_trial(&self, result: &TrialResult) -> Result<PathBuf> {
        let path = self.trial_path(result.trial);
        atomic_write_bytes(&path, &result.to_csv_bytes()?)?;
        Ok(path)
    }

    /// Enumerates completed trial artifacts, ordered by trial index.
    /// Tmp files and foreign names are ignored; an absent results
    /// directory counts as zero artifacts rather than an error.
    pub fn discover(&self) -> Result<Vec<TrialHandle>> {
        let mut handles = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(handles),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(trial) = parse_trial_name(name) else {
                continue;
            };
            handles.push(TrialHandle {
                trial,
                path: entry.path(),
            });
        }
        handles.sort_by_key(|h| h.trial);
        Ok(handles)
    }
}

fn parse_trial_name(name: &str) -> Option<u64> {
    name.strip_prefix("trial_")?
        .strip_suffix(".csv")?
        .parse::<u64>()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::StratumKey;
    use crate::trial::Outcome;

    fn result(trial: u64) -> TrialResult {
        let mut r = TrialResult::new(trial);
        r.cells
            .insert(StratumKey::new(2000, 1), Outcome::Defined(true));
        r
    }

    #[test]
    fn parse_trial_name_accepts_only_the_convention() {
        assert_eq!(parse_trial_name("trial_0.csv"), Some(0));
        assert_eq!(parse_trial_name("trial_9999.csv"), Some(9999));
        assert_eq!(parse_trial_name("trial_.csv"), None);
        assert_eq!(parse_trial_name("trial_7.json"), None);
        assert_eq!(parse_trial_name(".trial_7.csv.tmp.1.2"), None);
        assert_eq!(parse_trial_name("summary.csv"), None);
    }

    #[test]
    fn discover_orders_by_trial_and_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        for trial in [12u64, 3, 7] {
            store.write_trial(&result(trial)).unwrap();
        }
        fs::write(dir.path().join("summary.csv"), "fyear\n").unwrap();
        fs::write(dir.path().join(".trial_9.csv.tmp.1.1"), "partial").unwrap();

        let handles = store.discover().unwrap();
        let trials: Vec<u64> = handles.iter().map(|h| h.trial).collect();
        assert_eq!(trials, vec![3, 7, 12]);
        assert_eq!(handles[0].load().unwrap().trial, 3);
    }

    #[test]
    fn discover_on_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("missing"));
        assert!(store.discover().unwrap().is_empty());
    }

    #[test]
    fn write_trial_is_rerun_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.write_trial(&result(5)).unwrap();
        let first = fs::read(&path).unwrap();
        store.write_trial(&result(5)).unwrap();
        assert_eq!(fs::read(&path).unwrap(), first);
    }
}
