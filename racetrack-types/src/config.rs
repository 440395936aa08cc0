//! Race configuration schema.
//!
//! Every section is optional in the config file and falls back to the
//! defaults below. Hosts only ever see the [`NodeConfig`] subset.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::HostDescriptor;

/// Where a log stream is written.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogRoute {
    Console,
    #[default]
    File,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingRoutes {
    /// Control loop, CLI and collaborator output.
    pub application: LogRoute,
    /// Actor protocol and runtime output.
    pub actors: LogRoute,
}

impl Default for LoggingRoutes {
    fn default() -> Self {
        Self {
            application: LogRoute::File,
            actors: LogRoute::File,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    pub root_dir: PathBuf,
    /// Filled per invocation.
    pub race_id: String,
    /// Invocation timestamp, `%Y%m%dT%H%M%SZ`. Filled per invocation.
    pub race_timestamp: String,
    pub offline: bool,
    pub quiet: bool,
    pub logging: LoggingRoutes,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(".racetrack"),
            race_id: String::new(),
            race_timestamp: String::new(),
            offline: false,
            quiet: false,
            logging: LoggingRoutes::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub target_hosts: Vec<HostDescriptor>,
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackSettings {
    pub name: String,
    /// `None` selects the track's default challenge.
    pub challenge: Option<String>,
    pub repository: String,
    /// Samples taken per target host and lap.
    pub iterations: u32,
}

impl Default for TrackSettings {
    fn default() -> Self {
        Self {
            name: "connect-latency".to_string(),
            challenge: None,
            repository: "default".to_string(),
            iterations: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MechanicSettings {
    pub car: String,
    pub distribution_version: Option<String>,
    pub distribution_repository: String,
    pub source_revision: String,
    pub preserve_install: bool,
    pub telemetry: Vec<String>,
    pub data_paths: Vec<PathBuf>,
    pub http_port: u16,
}

impl Default for MechanicSettings {
    fn default() -> Self {
        Self {
            car: "defaults".to_string(),
            distribution_version: None,
            distribution_repository: "release".to_string(),
            source_revision: "current".to_string(),
            preserve_install: false,
            telemetry: Vec::new(),
            data_paths: Vec::new(),
            http_port: 39200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceSettings {
    /// Empty selects a pipeline from the mechanic settings.
    pub pipeline: String,
    pub laps: u32,
    pub user_tag: Option<String>,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            pipeline: String::new(),
            laps: 1,
            user_tag: None,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Markdown,
    Csv,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingSettings {
    pub format: ReportFormat,
    pub output_file: Option<PathBuf>,
}

/// Transport base of the actor runtime.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Transport {
    /// In-process queues only.
    #[default]
    Local,
    /// JSON-line frames over TCP between machines.
    Tcp,
}

impl Transport {
    pub fn is_network_capable(&self) -> bool {
        matches!(self, Transport::Tcp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub transport: Transport,
    pub coordinator_ip: Option<String>,
    pub node_ip: Option<String>,
    pub convention_port: u16,
    pub node_port: u16,
    pub node_wait_timeout_secs: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            transport: Transport::Local,
            coordinator_ip: None,
            node_ip: None,
            convention_port: 1900,
            node_port: 1901,
            node_wait_timeout_secs: 60,
        }
    }
}

/// Full configuration of one race invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceConfig {
    pub system: SystemSettings,
    pub client: ClientSettings,
    pub track: TrackSettings,
    pub mechanic: MechanicSettings,
    pub race: RaceSettings,
    pub reporting: ReportingSettings,
    pub runtime: RuntimeSettings,
}

impl RaceConfig {
    /// The configuration a host sees: only the sections it needs, plus the
    /// paths of the node it runs on.
    pub fn node_scope(&self, node: NodePaths) -> NodeConfig {
        NodeConfig {
            system: self.system.clone(),
            client: self.client.clone(),
            track: self.track.clone(),
            mechanic: self.mechanic.clone(),
            node,
        }
    }
}

/// Filesystem locations on the node a host actor runs on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePaths {
    pub root_dir: PathBuf,
    /// Root of this race invocation, `<root>/races/<timestamp>`.
    pub invocation_root: PathBuf,
    pub install_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub system: SystemSettings,
    pub client: ClientSettings,
    pub track: TrackSettings,
    pub mechanic: MechanicSettings,
    pub node: NodePaths,
}
