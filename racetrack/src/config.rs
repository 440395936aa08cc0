//! Layered configuration loading.
//!
//! Precedence, lowest first:
//! 1. built-in defaults
//! 2. `<root>/racetrack.toml`
//! 3. environment, `RACETRACK__<SECTION>__<KEY>` (lists comma separated)
//! 4. command-line overrides

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use racetrack_types::{HostDescriptor, LogRoute, RaceConfig, ReportFormat, RuntimeSettings, Transport};

use crate::paths;

pub const ENV_PREFIX: &str = "RACETRACK";

const LIST_KEYS: &[&str] = &["client.target_hosts", "mechanic.telemetry"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No config present. Please run 'racetrack configure' first.")]
    Missing(PathBuf),

    #[error("Config file {0} already exists. Use --force to overwrite it.")]
    AlreadyExists(PathBuf),

    #[error("could not load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("could not write configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("{0}")]
    Invalid(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Values given on the command line. `None` keeps the configured value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub pipeline: Option<String>,
    pub target_hosts: Option<Vec<HostDescriptor>>,
    pub laps: Option<u32>,
    pub revision: Option<String>,
    pub distribution_version: Option<String>,
    pub distribution_repository: Option<String>,
    pub track: Option<String>,
    pub challenge: Option<String>,
    pub car: Option<String>,
    pub user_tag: Option<String>,
    pub report_format: Option<ReportFormat>,
    pub report_file: Option<PathBuf>,
    pub telemetry: Option<Vec<String>>,
    pub coordinator_ip: Option<String>,
    pub node_ip: Option<String>,
    pub logging: Option<LogRoute>,
    pub offline: bool,
    pub preserve_install: bool,
    pub quiet: bool,
}

impl ConfigOverrides {
    pub fn apply(&self, cfg: &mut RaceConfig) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }
        fn set_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *target = value.clone();
            }
        }

        set(&mut cfg.race.pipeline, &self.pipeline);
        set(&mut cfg.client.target_hosts, &self.target_hosts);
        set(&mut cfg.race.laps, &self.laps);
        set(&mut cfg.mechanic.source_revision, &self.revision);
        set_opt(
            &mut cfg.mechanic.distribution_version,
            &self.distribution_version,
        );
        set(
            &mut cfg.mechanic.distribution_repository,
            &self.distribution_repository,
        );
        set(&mut cfg.track.name, &self.track);
        set_opt(&mut cfg.track.challenge, &self.challenge);
        set(&mut cfg.mechanic.car, &self.car);
        set_opt(&mut cfg.race.user_tag, &self.user_tag);
        set(&mut cfg.reporting.format, &self.report_format);
        set_opt(&mut cfg.reporting.output_file, &self.report_file);
        set(&mut cfg.mechanic.telemetry, &self.telemetry);
        set_opt(&mut cfg.runtime.coordinator_ip, &self.coordinator_ip);
        set_opt(&mut cfg.runtime.node_ip, &self.node_ip);
        if self.coordinator_ip.is_some() || self.node_ip.is_some() {
            cfg.runtime.transport = Transport::Tcp;
        }

        if let Some(route) = self.logging {
            cfg.system.logging.application = route;
            cfg.system.logging.actors = route;
        }
        cfg.system.offline |= self.offline;
        cfg.system.quiet |= self.quiet;
        cfg.mechanic.preserve_install |= self.preserve_install;
    }
}

/// Load the configuration for a new invocation below `root`.
pub fn load(root: &Path, overrides: &ConfigOverrides) -> Result<RaceConfig, ConfigError> {
    let path = paths::config_file(root);
    if !path.is_file() {
        return Err(ConfigError::Missing(path));
    }

    let mut cfg = load_layers(root, &path)?;
    overrides.apply(&mut cfg);
    stamp_invocation(&mut cfg, Utc::now());
    validate(&cfg)?;

    tracing::debug!(
        path = %path.display(),
        race_id = %cfg.system.race_id,
        "Configuration loaded"
    );
    Ok(cfg)
}

fn load_layers(root: &Path, path: &Path) -> Result<RaceConfig, ConfigError> {
    let mut defaults = RaceConfig::default();
    defaults.system.root_dir = root.to_path_buf();

    let mut environment = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",");
    for key in LIST_KEYS {
        environment = environment.with_list_parse_key(key);
    }

    let settings = config::Config::builder()
        .add_source(config::Config::try_from(&defaults)?)
        .add_source(config::File::from(path).format(config::FileFormat::Toml))
        .add_source(environment)
        .build()?;

    Ok(settings.try_deserialize::<RaceConfig>()?)
}

/// A race needs no network transport unless IPs are configured.
pub fn prefers_local_only(runtime: &RuntimeSettings) -> bool {
    runtime.coordinator_ip.is_none() && runtime.node_ip.is_none()
}

/// Assign the identity of this invocation.
pub fn stamp_invocation(cfg: &mut RaceConfig, now: DateTime<Utc>) {
    cfg.system.race_id = uuid::Uuid::new_v4().to_string();
    cfg.system.race_timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
}

pub fn validate(cfg: &RaceConfig) -> Result<(), ConfigError> {
    if cfg.race.laps == 0 {
        return Err(ConfigError::Invalid(
            "The number of laps must be a positive number.".to_string(),
        ));
    }
    if cfg.track.iterations == 0 {
        return Err(ConfigError::Invalid(
            "track.iterations must be a positive number.".to_string(),
        ));
    }
    Ok(())
}

/// Write a default config file. Refuses to overwrite unless `force` is set.
pub fn write_default(root: &Path, force: bool) -> Result<PathBuf, ConfigError> {
    let path = paths::config_file(root);
    if path.exists() && !force {
        return Err(ConfigError::AlreadyExists(path));
    }
    std::fs::create_dir_all(root)?;

    let mut cfg = RaceConfig::default();
    cfg.system.root_dir = root.to_path_buf();
    let rendered = toml::to_string_pretty(&cfg)?;

    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, rendered)?;
    std::fs::rename(&tmp, &path)?;
    tracing::info!(path = %path.display(), "Wrote default configuration");
    Ok(path)
}
