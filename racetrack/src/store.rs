//! File-backed race metadata store.
//!
//! Every race gets `races/<race timestamp>/race.json` below the root
//! directory. Writes go to a temporary file first and are renamed into
//! place, so readers never see a half-written record.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use racetrack_types::{ClusterInfo, MetricSummary, SystemInfo};
use serde::{Deserialize, Serialize};

use crate::paths;

pub const RACE_FILE_NAME: &str = "race.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No race with timestamp [{0}] found.")]
    NotFound(String),

    #[error("race store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not (de)serialize race record: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RaceStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceRecord {
    pub race_id: String,
    pub race_timestamp: String,
    pub created_at: DateTime<Utc>,
    pub pipeline: String,
    #[serde(default)]
    pub user_tag: Option<String>,
    pub track: String,
    pub challenge: String,
    pub car: String,
    pub laps: u32,
    #[serde(default)]
    pub cluster: ClusterInfo,
    #[serde(default)]
    pub system_info: SystemInfo,
    pub status: RaceStatus,
    #[serde(default)]
    pub results: Vec<MetricSummary>,
}

#[derive(Debug, Clone)]
pub struct FileRaceStore {
    root: PathBuf,
}

impl FileRaceStore {
    /// Store below the racetrack root directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn race_file(&self, race_timestamp: &str) -> PathBuf {
        paths::races_root(&self.root)
            .join(race_timestamp)
            .join(RACE_FILE_NAME)
    }

    pub fn store_race(&self, race: &RaceRecord) -> Result<PathBuf, StoreError> {
        let path = self.race_file(&race.race_timestamp);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(race)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &path)?;
        tracing::debug!(path = %path.display(), status = %race.status, "Stored race");
        Ok(path)
    }

    /// The most recent races first, at most `limit`.
    pub fn list(&self, limit: usize) -> Result<Vec<RaceRecord>, StoreError> {
        let races_root = paths::races_root(&self.root);
        if !races_root.exists() {
            return Ok(Vec::new());
        }
        let mut races = Vec::new();
        for entry in std::fs::read_dir(&races_root)? {
            let file = entry?.path().join(RACE_FILE_NAME);
            if !file.is_file() {
                continue;
            }
            match read_record(&file) {
                Ok(race) => races.push(race),
                Err(e) => {
                    tracing::warn!(path = %file.display(), error = %e, "Skipping unreadable race record");
                }
            }
        }
        races.sort_by(|a, b| b.race_timestamp.cmp(&a.race_timestamp));
        races.truncate(limit);
        Ok(races)
    }

    pub fn find_by_timestamp(&self, race_timestamp: &str) -> Result<RaceRecord, StoreError> {
        let file = self.race_file(race_timestamp);
        if !file.is_file() {
            return Err(StoreError::NotFound(race_timestamp.to_string()));
        }
        read_record(&file)
    }
}

fn read_record(path: &Path) -> Result<RaceRecord, StoreError> {
    let raw = std::fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}
