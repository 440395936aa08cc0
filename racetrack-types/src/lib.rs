//! Shared types between the race coordinator, host nodes and the wire transport
//!
//! These types are used by:
//! - the `racetrack` control loop and its actors
//! - the `racetrackd` worker daemon
//! - the JSON-line transport between nodes
//!
//! Everything here is plain data and serializable with serde.

pub mod config;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use config::{
    ClientSettings, LogRoute, LoggingRoutes, MechanicSettings, NodeConfig, NodePaths,
    RaceConfig, RaceSettings, ReportFormat, ReportingSettings, RuntimeSettings, SystemSettings,
    TrackSettings, Transport,
};

/// Port hosts listen on when none is given in a `host:port` pair.
pub const DEFAULT_HOST_PORT: u16 = 9200;

// ============================================================================
// Run Mode
// ============================================================================

/// How the benchmark candidate is obtained and launched on a host.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunMode {
    Sources,
    Distribution,
    External,
    Container,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModeSelectionError {
    #[error("no run mode selected")]
    NoneSelected,
    #[error("more than one run mode selected: {0:?}")]
    Ambiguous(Vec<RunMode>),
}

impl RunMode {
    /// Resolve the run mode from independent flags. Exactly one must be set.
    pub fn from_flags(
        sources: bool,
        distribution: bool,
        external: bool,
        container: bool,
    ) -> Result<Self, ModeSelectionError> {
        let selected: Vec<RunMode> = [
            (sources, RunMode::Sources),
            (distribution, RunMode::Distribution),
            (external, RunMode::External),
            (container, RunMode::Container),
        ]
        .into_iter()
        .filter_map(|(flag, mode)| flag.then_some(mode))
        .collect();

        match selected.as_slice() {
            [] => Err(ModeSelectionError::NoneSelected),
            [mode] => Ok(*mode),
            _ => Err(ModeSelectionError::Ambiguous(selected)),
        }
    }
}

// ============================================================================
// Cluster
// ============================================================================

/// A `host:port` pair addressing one target host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostDescriptor {
    pub host: String,
    pub port: u16,
}

impl HostDescriptor {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Targets on the loopback interface run next to the coordinator.
    pub fn is_local(&self) -> bool {
        matches!(self.host.as_str(), "localhost" | "127.0.0.1")
    }
}

impl fmt::Display for HostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid host '{0}', expected host[:port]")]
pub struct InvalidHost(pub String);

impl FromStr for HostDescriptor {
    type Err = InvalidHost;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(InvalidHost(s.to_string()));
        }
        match trimmed.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| InvalidHost(s.to_string()))?;
                Ok(Self::new(host, port))
            }
            Some(_) => Err(InvalidHost(s.to_string())),
            None => Ok(Self::new(trimmed, DEFAULT_HOST_PORT)),
        }
    }
}

impl TryFrom<String> for HostDescriptor {
    type Error = InvalidHost;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HostDescriptor> for String {
    fn from(value: HostDescriptor) -> Self {
        value.to_string()
    }
}

/// Parse a comma separated `host:port` list.
pub fn parse_hosts(raw: &str) -> Result<Vec<HostDescriptor>, InvalidHost> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// What a started cluster reports back to the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub hosts: Vec<HostDescriptor>,
    pub revision: Option<String>,
    pub distribution_version: Option<String>,
}

impl ClusterInfo {
    /// Combine the reports of several hosts into one.
    ///
    /// Hosts are concatenated; revision and version are taken from the first
    /// host that reports one.
    pub fn merge(infos: impl IntoIterator<Item = ClusterInfo>) -> ClusterInfo {
        let mut merged = ClusterInfo::default();
        for info in infos {
            merged.hosts.extend(info.hosts);
            if merged.revision.is_none() {
                merged.revision = info.revision;
            }
            if merged.distribution_version.is_none() {
                merged.distribution_version = info.distribution_version;
            }
        }
        merged
    }
}

/// Free-form system meta information gathered while starting the engine.
pub type SystemInfo = BTreeMap<String, String>;

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub name: String,
    pub value: f64,
    pub unit: String,
    #[serde(default)]
    pub lap: Option<u32>,
    #[serde(default)]
    pub node: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

impl MetricRecord {
    pub fn new(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
            lap: None,
            node: None,
            timestamp: Utc::now(),
            meta: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// Externalized contents of a metrics store, shipped from a host back to the
/// coordinator when the engine stops.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub meta_info: SystemInfo,
    pub records: Vec<MetricRecord>,
}

/// Aggregate of all samples of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub name: String,
    pub unit: String,
    pub count: usize,
    pub min: f64,
    pub median: f64,
    pub mean: f64,
    pub max: f64,
}

// ============================================================================
// Lifecycle Protocol
// ============================================================================

/// Requests sent from the control loop to the coordinator and from the
/// coordinator to every host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleRequest {
    StartEngine {
        config: Box<RaceConfig>,
        mode: RunMode,
        /// Only meaningful for [`RunMode::Sources`].
        build: bool,
    },
    OnBenchmarkStart {
        lap: u32,
    },
    OnBenchmarkStop,
    StopEngine,
}

impl LifecycleRequest {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleRequest::StartEngine { .. } => "StartEngine",
            LifecycleRequest::OnBenchmarkStart { .. } => "OnBenchmarkStart",
            LifecycleRequest::OnBenchmarkStop => "OnBenchmarkStop",
            LifecycleRequest::StopEngine => "StopEngine",
        }
    }
}

/// Which phase a failure originated in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// The request could not be placed or was misconfigured.
    Setup,
    /// A host could not be reached or died.
    Launch,
    /// A host executed the request and it failed.
    Execution,
}

/// Terminal reply to exactly one [`LifecycleRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleReply {
    EngineStarted {
        cluster_info: ClusterInfo,
        system_info: SystemInfo,
    },
    Success,
    EngineStopped {
        system_metrics: MetricsSnapshot,
    },
    Failure {
        message: String,
        cause: String,
        kind: FailureKind,
    },
}

impl LifecycleReply {
    pub fn failure(kind: FailureKind, message: impl Into<String>, cause: impl Into<String>) -> Self {
        LifecycleReply::Failure {
            message: message.into(),
            cause: cause.into(),
            kind,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, LifecycleReply::Failure { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            LifecycleReply::EngineStarted { .. } => "EngineStarted",
            LifecycleReply::Success => "Success",
            LifecycleReply::EngineStopped { .. } => "EngineStopped",
            LifecycleReply::Failure { .. } => "Failure",
        }
    }
}

// ============================================================================
// Capabilities
// ============================================================================

pub const CAPABILITY_COORDINATOR: &str = "coordinator";
pub const CAPABILITY_IP: &str = "ip";
pub const CAPABILITY_CONVENTION_ADDRESS: &str = "convention-address";

/// Capabilities a node advertises when it joins the runtime. Fixed after
/// startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub coordinator: bool,
    pub ip: String,
    pub convention_address: String,
}

impl Capabilities {
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                CAPABILITY_COORDINATOR.to_string(),
                self.coordinator.to_string(),
            ),
            (CAPABILITY_IP.to_string(), self.ip.clone()),
            (
                CAPABILITY_CONVENTION_ADDRESS.to_string(),
                self.convention_address.clone(),
            ),
        ])
    }
}

/// Capabilities a placement request requires. A node satisfies the
/// requirements only if it agrees on every required key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements(BTreeMap<String, String>);

impl Requirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coordinator(mut self, coordinator: bool) -> Self {
        self.0
            .insert(CAPABILITY_COORDINATOR.to_string(), coordinator.to_string());
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.0.insert(CAPABILITY_IP.to_string(), ip.into());
        self
    }

    pub fn is_satisfied_by(&self, capabilities: &Capabilities) -> bool {
        let offered = capabilities.to_map();
        self.0
            .iter()
            .all(|(key, value)| offered.get(key) == Some(value))
    }
}

impl fmt::Display for Requirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_mode_requires_exactly_one_flag() {
        assert_eq!(
            RunMode::from_flags(false, true, false, false),
            Ok(RunMode::Distribution)
        );
        assert_eq!(
            RunMode::from_flags(false, false, false, false),
            Err(ModeSelectionError::NoneSelected)
        );
        assert_eq!(
            RunMode::from_flags(true, false, true, false),
            Err(ModeSelectionError::Ambiguous(vec![
                RunMode::Sources,
                RunMode::External
            ]))
        );
    }

    #[test]
    fn test_run_mode_string_form() {
        assert_eq!(RunMode::Container.to_string(), "container");
        assert_eq!("external".parse::<RunMode>().ok(), Some(RunMode::External));
    }

    #[test]
    fn test_host_descriptor_parsing() {
        assert_eq!(
            "10.0.0.5:39200".parse::<HostDescriptor>(),
            Ok(HostDescriptor::new("10.0.0.5", 39200))
        );
        assert_eq!(
            "search-1".parse::<HostDescriptor>(),
            Ok(HostDescriptor::new("search-1", DEFAULT_HOST_PORT))
        );
        assert!("10.0.0.5:http".parse::<HostDescriptor>().is_err());
        assert!(":9200".parse::<HostDescriptor>().is_err());

        let hosts = parse_hosts("127.0.0.1:9200, 10.0.0.5:9200,").unwrap();
        assert_eq!(hosts.len(), 2);
        assert!(hosts[0].is_local());
        assert!(!hosts[1].is_local());
    }

    #[test]
    fn test_requirements_match_every_key() {
        let node = Capabilities {
            coordinator: false,
            ip: "10.0.0.5".to_string(),
            convention_address: "10.0.0.1:1900".to_string(),
        };
        assert!(Requirements::new().ip("10.0.0.5").is_satisfied_by(&node));
        assert!(!Requirements::new().ip("10.0.0.6").is_satisfied_by(&node));
        assert!(!Requirements::new()
            .ip("10.0.0.5")
            .coordinator(true)
            .is_satisfied_by(&node));
        assert!(Requirements::new().is_satisfied_by(&node));
    }

    #[test]
    fn test_cluster_info_merge_keeps_first_version() {
        let merged = ClusterInfo::merge(vec![
            ClusterInfo {
                hosts: vec![HostDescriptor::new("10.0.0.5", 9200)],
                revision: None,
                distribution_version: Some("8.1.0".to_string()),
            },
            ClusterInfo {
                hosts: vec![HostDescriptor::new("10.0.0.6", 9200)],
                revision: Some("abc123".to_string()),
                distribution_version: Some("8.2.0".to_string()),
            },
        ]);
        assert_eq!(merged.hosts.len(), 2);
        assert_eq!(merged.revision.as_deref(), Some("abc123"));
        assert_eq!(merged.distribution_version.as_deref(), Some("8.1.0"));
    }

    #[test]
    fn test_lifecycle_messages_serialize_tagged() {
        let json = serde_json::to_value(LifecycleRequest::OnBenchmarkStart { lap: 2 }).unwrap();
        assert_eq!(json["type"], "on_benchmark_start");
        assert_eq!(json["lap"], 2);

        let failure = LifecycleReply::failure(FailureKind::Execution, "boom", "disk full");
        let parsed: LifecycleReply =
            serde_json::from_str(&serde_json::to_string(&failure).unwrap()).unwrap();
        assert_eq!(parsed, failure);
        assert!(parsed.is_failure());
    }
}
