use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use racetrack_types::LogRoute;
use tracing::Metadata;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

const ACTOR_TARGETS: &[&str] = &["racetrack::actors", "racetrack::runtime"];

pub const APPLICATION_LOG: &str = "racetrack.log";
pub const ACTOR_LOG: &str = "racetrack-actors.log";

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub application: LogRoute,
    pub actors: LogRoute,
    pub log_dir: PathBuf,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

pub fn is_actor_target(metadata: &Metadata<'_>) -> bool {
    ACTOR_TARGETS
        .iter()
        .any(|prefix| metadata.target().starts_with(prefix))
}

/// Install the global subscriber. A second call in the same process keeps
/// the first subscriber.
pub fn init_logging(settings: &LoggingSettings) -> io::Result<()> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if let Some(layer) = stream_layer(
        settings.actors,
        &settings.log_dir.join(ACTOR_LOG),
        is_actor_target,
    )? {
        layers.push(layer);
    }
    if let Some(layer) = stream_layer(
        settings.application,
        &settings.log_dir.join(APPLICATION_LOG),
        |metadata| !is_actor_target(metadata),
    )? {
        layers.push(layer);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global subscriber already installed, keeping it");
    }
    Ok(())
}

fn stream_layer(
    route: LogRoute,
    path: &Path,
    predicate: fn(&Metadata<'_>) -> bool,
) -> io::Result<Option<BoxedLayer>> {
    let layer = match route {
        LogRoute::Off => return Ok(None),
        LogRoute::Console => fmt::layer()
            .with_writer(io::stderr)
            .with_filter(filter_fn(predicate))
            .boxed(),
        LogRoute::File => {
            let file = open_log_file(path)?;
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(filter_fn(predicate))
                .boxed()
        }
    };
    Ok(Some(layer))
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    rotate_existing(path)?;
    OpenOptions::new().create(true).append(true).open(path)
}

/// Move an existing log file out of the way as `<stem>-bak-<unix ts>.log`.
pub fn rotate_existing(path: &Path) -> io::Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string());
    let backup = path.with_file_name(format!("{stem}-bak-{}.log", Utc::now().timestamp()));
    std::fs::rename(path, &backup)?;
    Ok(Some(backup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rotate_existing_moves_file_aside() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join(APPLICATION_LOG);
        assert_eq!(rotate_existing(&log).unwrap(), None);

        std::fs::write(&log, "previous run").unwrap();
        let backup = rotate_existing(&log).unwrap().unwrap();
        assert!(!log.exists());
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "previous run");
    }

    #[test]
    fn test_off_route_builds_no_layer() {
        let dir = TempDir::new().unwrap();
        let layer = stream_layer(LogRoute::Off, &dir.path().join("x.log"), is_actor_target).unwrap();
        assert!(layer.is_none());
        assert!(!dir.path().join("x.log").exists());
    }
}
