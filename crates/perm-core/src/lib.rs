//! Data model and pure logic for the stratified permutation test:
//! the analysis panel, stratum seeding, group-mean spreads, trial
//! result artifacts, and the on-disk artifact store.

pub mod panel;
pub mod seed;
pub mod stats;
pub mod store;
pub mod trial;

pub use panel::{Observation, Panel, StratumKey};
pub use seed::SeedPlan;
pub use store::{ArtifactStore, TrialHandle};
pub use trial::{Outcome, TrialResult};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PermError {
    #[error("panel unreadable: {path}: {source}")]
    PanelUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("panel record {record}: {message}")]
    PanelRecord { record: u64, message: String },
    #[error("panel subperiod {prd} is not in the configured set")]
    UnknownSubperiod { prd: u8 },
    #[error("seed stride exhausted: {strata} strata exceed capacity {capacity}")]
    SeedStrideExhausted { strata: usize, capacity: u64 },
    #[error("trial {trial} has no seed for stratum ({fyear}, {prd})")]
    MissingSeed { trial: u64, fyear: i32, prd: u8 },
    #[error("malformed trial artifact {path}: {message}")]
    MalformedArtifact { path: PathBuf, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, PermError>;
