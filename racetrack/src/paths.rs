//! Filesystem layout below the racetrack root directory.
//!
//! ```text
//! <root>/
//!   racetrack.toml
//!   logs/<race id>/          live logs of one invocation
//!   races/<timestamp>/       race.json, metrics.json, archived logs
//!   races/<timestamp>/install
//! ```

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use racetrack_types::{NodePaths, SystemSettings};
use regex::Regex;

pub const CONFIG_FILE_NAME: &str = "racetrack.toml";

static UNSAFE_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex"));

/// Default root, `$RACETRACK_HOME` or `~/.racetrack`.
pub fn default_root() -> PathBuf {
    if let Ok(home) = std::env::var("RACETRACK_HOME") {
        return PathBuf::from(home);
    }
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".racetrack")
}

pub fn config_file(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE_NAME)
}

pub fn races_root(root: &Path) -> PathBuf {
    root.join("races")
}

pub fn invocation_root(system: &SystemSettings) -> PathBuf {
    races_root(&system.root_dir).join(&system.race_timestamp)
}

pub fn log_root(system: &SystemSettings) -> PathBuf {
    system.root_dir.join("logs").join(&system.race_id)
}

pub fn node_paths(system: &SystemSettings) -> NodePaths {
    let invocation_root = invocation_root(system);
    NodePaths {
        root_dir: system.root_dir.clone(),
        install_dir: invocation_root.join("install"),
        invocation_root,
    }
}

/// Where the logs of a finished race are archived.
pub fn log_archive(invocation_root: &Path, track: &str, challenge: &str, car: &str) -> PathBuf {
    invocation_root.join(format!(
        "logs-{}-{}-{}",
        sanitize(track),
        sanitize(challenge),
        sanitize(car)
    ))
}

fn sanitize(name: &str) -> String {
    UNSAFE_NAME_CHARS.replace_all(name, "_").into_owned()
}
