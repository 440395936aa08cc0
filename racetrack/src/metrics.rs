//! Metrics sink.
//!
//! Hosts and the control loop each own one store. A host ships its records to
//! the control loop as a [`MetricsSnapshot`] when the engine stops.

use std::path::PathBuf;

use racetrack_types::{MetricRecord, MetricsSnapshot, SystemInfo};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics store is not open")]
    NotOpen,
    #[error("could not persist metrics: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not serialize metrics: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Identifies the race a store collects metrics for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    pub race_timestamp: String,
    pub track: String,
    pub challenge: String,
    pub car: String,
}

pub trait MetricsStore: Send {
    fn open(&mut self, identity: RunIdentity) -> Result<(), MetricsError>;

    fn set_lap(&mut self, lap: u32);

    fn lap(&self) -> Option<u32>;

    fn add_meta_info(&mut self, key: &str, value: &str);

    fn meta_info(&self) -> &SystemInfo;

    /// Record one sample, tagged with the current lap.
    fn put(&mut self, record: MetricRecord) -> Result<(), MetricsError>;

    fn bulk_add(&mut self, records: Vec<MetricRecord>) -> Result<(), MetricsError>;

    fn flush(&mut self) -> Result<(), MetricsError>;

    fn close(&mut self) -> Result<(), MetricsError>;

    fn records(&self) -> &[MetricRecord];

    fn externalize(&self) -> MetricsSnapshot;
}

/// Keeps all records in memory. With a persistence path every flush writes
/// the records as JSON (temp file + rename).
#[derive(Debug, Default)]
pub struct InMemoryMetricsStore {
    identity: Option<RunIdentity>,
    lap: Option<u32>,
    meta_info: SystemInfo,
    records: Vec<MetricRecord>,
    persist_to: Option<PathBuf>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persistence(path: PathBuf) -> Self {
        Self {
            persist_to: Some(path),
            ..Self::default()
        }
    }

    pub fn is_open(&self) -> bool {
        self.identity.is_some()
    }

    pub fn identity(&self) -> Option<&RunIdentity> {
        self.identity.as_ref()
    }

    fn ensure_open(&self) -> Result<(), MetricsError> {
        if self.identity.is_none() {
            return Err(MetricsError::NotOpen);
        }
        Ok(())
    }
}

impl MetricsStore for InMemoryMetricsStore {
    fn open(&mut self, identity: RunIdentity) -> Result<(), MetricsError> {
        tracing::debug!(
            race_timestamp = %identity.race_timestamp,
            track = %identity.track,
            "Opening metrics store"
        );
        self.identity = Some(identity);
        self.lap = None;
        self.records.clear();
        Ok(())
    }

    fn set_lap(&mut self, lap: u32) {
        self.lap = Some(lap);
    }

    fn lap(&self) -> Option<u32> {
        self.lap
    }

    fn add_meta_info(&mut self, key: &str, value: &str) {
        self.meta_info.insert(key.to_string(), value.to_string());
    }

    fn meta_info(&self) -> &SystemInfo {
        &self.meta_info
    }

    fn put(&mut self, mut record: MetricRecord) -> Result<(), MetricsError> {
        self.ensure_open()?;
        if record.lap.is_none() {
            record.lap = self.lap;
        }
        self.records.push(record);
        Ok(())
    }

    fn bulk_add(&mut self, records: Vec<MetricRecord>) -> Result<(), MetricsError> {
        self.ensure_open()?;
        self.records.extend(records);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MetricsError> {
        let Some(path) = &self.persist_to else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(&self.externalize())?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), MetricsError> {
        self.flush()?;
        self.identity = None;
        Ok(())
    }

    fn records(&self) -> &[MetricRecord] {
        &self.records
    }

    fn externalize(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            meta_info: self.meta_info.clone(),
            records: self.records.clone(),
        }
    }
}
