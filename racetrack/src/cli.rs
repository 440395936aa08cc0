//! Command-line front end of the `racetrack` binary.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use racetrack_types::{parse_hosts, HostDescriptor, LogRoute, ReportFormat};

use crate::config::{self, prefers_local_only, ConfigOverrides};
use crate::console::Console;
use crate::error::RaceError;
use crate::mechanic::{BuiltinCatalog, StrategyCatalog, CARS, TELEMETRY_DEVICES};
use crate::observability::{init_logging, LoggingSettings};
use crate::paths;
use crate::racecontrol::{pipelines, RaceContext, RaceOutcome};
use crate::reporter::{markdown_table, Reporter};
use crate::runtime::{self, shutdown_with_retries, BootstrapParams, ShutdownOutcome};
use crate::store::FileRaceStore;
use crate::workload::{ConnectLatencyWorkload, TRACKS};

/// Exit code for anything that went wrong.
pub const EXIT_FAILURE: u8 = 64;

#[derive(Parser, Debug)]
#[command(name = "racetrack")]
#[command(about = "Benchmark races against single- and multi-host clusters")]
#[command(version)]
pub struct Cli {
    /// Root directory for configuration, races and logs
    /// (default: $RACETRACK_HOME or ~/.racetrack)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Only print warnings and errors
    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a race (default when a configuration exists)
    Race(RaceArgs),
    /// List telemetry devices, tracks, pipelines, races or cars
    List {
        what: ListTarget,
        /// Number of races to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Compare the results of two races
    Compare {
        /// Race timestamp of the baseline
        #[arg(long)]
        baseline: String,
        /// Race timestamp of the contender
        #[arg(long)]
        contender: String,
    },
    /// Write a default configuration file
    Configure {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Race(_) => "race",
            Command::List { .. } => "list",
            Command::Compare { .. } => "compare",
            Command::Configure { .. } => "configure",
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListTarget {
    Telemetry,
    Tracks,
    Pipelines,
    Races,
    Cars,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingFlag {
    File,
    Console,
}

/// Comma separated `host:port` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetHosts(pub Vec<HostDescriptor>);

fn parse_target_hosts(raw: &str) -> Result<TargetHosts, String> {
    parse_hosts(raw)
        .map(TargetHosts)
        .map_err(|e| e.to_string())
}

#[derive(clap::Args, Debug, Default, Clone)]
pub struct RaceArgs {
    /// Pipeline to run (see `racetrack list pipelines`)
    #[arg(long)]
    pub pipeline: Option<String>,

    /// Comma separated `host:port` pairs to benchmark
    #[arg(long, value_parser = parse_target_hosts)]
    pub target_hosts: Option<TargetHosts>,

    /// Number of laps
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub laps: Option<u32>,

    /// Source revision to build
    #[arg(long)]
    pub revision: Option<String>,

    /// Distribution version to download
    #[arg(long)]
    pub distribution_version: Option<String>,

    /// Repository to download distributions from
    #[arg(long)]
    pub distribution_repository: Option<String>,

    #[arg(long)]
    pub track: Option<String>,

    #[arg(long)]
    pub challenge: Option<String>,

    #[arg(long)]
    pub car: Option<String>,

    /// Free-form tag stored with the race
    #[arg(long)]
    pub user_tag: Option<String>,

    /// markdown or csv
    #[arg(long)]
    pub report_format: Option<ReportFormat>,

    /// Also write the final report to this file
    #[arg(long)]
    pub report_file: Option<PathBuf>,

    #[arg(long)]
    pub offline: bool,

    /// Keep the installation after the race
    #[arg(long)]
    pub preserve_install: bool,

    /// Comma separated telemetry devices (see `racetrack list telemetry`)
    #[arg(long)]
    pub telemetry: Option<String>,

    /// IP of the coordinator node; enables the network transport
    #[arg(long)]
    pub coordinator_ip: Option<String>,

    /// IP of this node; enables the network transport
    #[arg(long)]
    pub node_ip: Option<String>,

    /// Where log output goes
    #[arg(long, value_enum)]
    pub logging: Option<LoggingFlag>,
}

impl RaceArgs {
    pub fn overrides(&self, quiet: bool) -> ConfigOverrides {
        ConfigOverrides {
            pipeline: self.pipeline.clone(),
            target_hosts: self.target_hosts.clone().map(|hosts| hosts.0),
            laps: self.laps,
            revision: self.revision.clone(),
            distribution_version: self.distribution_version.clone(),
            distribution_repository: self.distribution_repository.clone(),
            track: self.track.clone(),
            challenge: self.challenge.clone(),
            car: self.car.clone(),
            user_tag: self.user_tag.clone(),
            report_format: self.report_format,
            report_file: self.report_file.clone(),
            telemetry: self.telemetry.as_deref().map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            }),
            coordinator_ip: self.coordinator_ip.clone(),
            node_ip: self.node_ip.clone(),
            logging: self.logging.map(|flag| match flag {
                LoggingFlag::File => LogRoute::File,
                LoggingFlag::Console => LogRoute::Console,
            }),
            offline: self.offline,
            preserve_install: self.preserve_install,
            quiet,
        }
    }
}

/// Without a subcommand: race when configured, otherwise configure.
pub fn default_command(root: &Path) -> Command {
    if paths::config_file(root).is_file() {
        Command::Race(RaceArgs::default())
    } else {
        Command::Configure { force: false }
    }
}

pub async fn run() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let root = cli.root.clone().unwrap_or_else(paths::default_root);
    let console = Console::new(cli.quiet);
    let command = cli
        .command
        .unwrap_or_else(|| default_command(&root));
    let name = command.name();

    match dispatch(command, &root, console, cli.quiet).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_failure(name, &e, &root);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn dispatch(command: Command, root: &Path, console: Console, quiet: bool) -> Result<()> {
    match command {
        Command::Race(args) => race(&args, root, console, quiet).await,
        Command::List { what, limit } => list(what, limit, root, console),
        Command::Compare {
            baseline,
            contender,
        } => compare(&baseline, &contender, root, console),
        Command::Configure { force } => {
            let path = config::write_default(root, force)?;
            console.info(format!("Wrote configuration file to [{}]", path.display()));
            Ok(())
        }
    }
}

async fn race(args: &RaceArgs, root: &Path, console: Console, quiet: bool) -> Result<()> {
    let config = config::load(root, &args.overrides(quiet))?;
    let log_dir = paths::log_root(&config.system);
    init_logging(&LoggingSettings {
        application: config.system.logging.application,
        actors: config.system.logging.actors,
        log_dir: log_dir.clone(),
    })
    .with_context(|| format!("could not set up logging in {}", log_dir.display()))?;

    let catalog: Arc<dyn StrategyCatalog> = Arc::new(BuiltinCatalog);
    let params = BootstrapParams::from_settings(
        &config.runtime,
        prefers_local_only(&config.runtime),
        catalog,
    );
    runtime::bootstrap(params).await?;
    // From here on the control loop only joins the runtime created above.
    let runtime = runtime::join()?;

    let ctx = RaceContext::new(
        config,
        runtime.clone(),
        Arc::new(ConnectLatencyWorkload::default()),
    );
    let cancel = ctx.cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling the race after the current lap");
            cancel.cancel();
        }
    });

    let result = pipelines::run(ctx).await;
    interrupt.abort();

    let shutdown = shutdown_with_retries(|| runtime.shutdown(), interrupts(), &console).await;
    if let ShutdownOutcome::Abandoned { interrupts } = shutdown {
        tracing::warn!(interrupts, "Actor runtime shutdown abandoned");
    }

    match result? {
        RaceOutcome::Completed { laps } => {
            tracing::info!(laps, "Race completed");
            console.println("");
            console.println("---------------------------------");
            console.println("[SUCCESS]");
            console.println("---------------------------------");
        }
        RaceOutcome::Cancelled { completed_laps } => {
            console.info(format!(
                "User cancelled the benchmark after {completed_laps} completed lap(s)."
            ));
        }
    }
    Ok(())
}

fn interrupts() -> futures::stream::BoxStream<'static, ()> {
    futures::stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|_| ((), ()))
    })
    .boxed()
}

fn list(what: ListTarget, limit: usize, root: &Path, console: Console) -> Result<()> {
    let config = config::load(root, &ConfigOverrides::default())?;
    let (title, table) = match what {
        ListTarget::Telemetry => (
            "Available telemetry devices",
            markdown_table(
                &["Command", "Description"],
                &TELEMETRY_DEVICES
                    .iter()
                    .map(|(name, description)| [name.to_string(), description.to_string()])
                    .collect::<Vec<_>>(),
            ),
        ),
        ListTarget::Tracks => (
            "Available tracks",
            markdown_table(
                &["Name", "Description", "Challenges"],
                &TRACKS
                    .iter()
                    .map(|track| {
                        let challenges: Vec<&str> =
                            track.challenges.iter().map(|c| c.name).collect();
                        [
                            track.name.to_string(),
                            track.description.to_string(),
                            challenges.join(", "),
                        ]
                    })
                    .collect::<Vec<_>>(),
            ),
        ),
        ListTarget::Pipelines => (
            "Available pipelines",
            markdown_table(
                &["Name", "Description"],
                &pipelines::registry()?
                    .available()
                    .map(|p| [p.name.to_string(), p.description.to_string()])
                    .collect::<Vec<_>>(),
            ),
        ),
        ListTarget::Races => (
            "Recent races",
            markdown_table(
                &["Race Timestamp", "Track", "Challenge", "Car", "User Tag", "Status"],
                &FileRaceStore::new(&config.system.root_dir)
                    .list(limit)?
                    .into_iter()
                    .map(|race| {
                        [
                            race.race_timestamp,
                            race.track,
                            race.challenge,
                            race.car,
                            race.user_tag.unwrap_or_default(),
                            race.status.to_string(),
                        ]
                    })
                    .collect::<Vec<_>>(),
            ),
        ),
        ListTarget::Cars => (
            "Available cars",
            markdown_table(
                &["Name", "Description"],
                &CARS
                    .iter()
                    .map(|(name, description)| [name.to_string(), description.to_string()])
                    .collect::<Vec<_>>(),
            ),
        ),
    };
    console.println(format!("{title}:\n"));
    console.println(table);
    Ok(())
}

fn compare(baseline: &str, contender: &str, root: &Path, console: Console) -> Result<()> {
    let config = config::load(root, &ConfigOverrides::default())?;
    let store = FileRaceStore::new(&config.system.root_dir);
    let baseline = store.find_by_timestamp(baseline)?;
    let contender = store.find_by_timestamp(contender)?;
    let reporter = Reporter::new(config.reporting.format, None, console);
    console.heading("Comparing baseline with contender");
    console.println(reporter.compare(&baseline, &contender));
    Ok(())
}

fn print_failure(command: &str, err: &anyhow::Error, root: &Path) {
    let message = err.to_string();
    let message = message.trim_end_matches('.');
    tracing::error!(command, error = ?err, "Command failed");
    eprintln!();
    eprintln!("[ERROR] Cannot {command}. {message}.");
    if let Some(cause) = err.downcast_ref::<RaceError>().and_then(RaceError::cause) {
        eprintln!("\t{}", cause.replace('\n', "\n\t"));
    }
    eprintln!();
    eprintln!("Getting further help:");
    eprintln!("*********************");
    eprintln!(
        "* Check the log files in {} for errors.",
        root.join("logs").display()
    );
    eprintln!("* Run 'racetrack <subcommand> --help' for the available options.");
    eprintln!(
        "* When reporting an issue, include the log files in {}.",
        root.join("logs").display()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_race_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "racetrack",
            "race",
            "--pipeline",
            "benchmark-only",
            "--target-hosts",
            "10.0.0.5:9200,10.0.0.6",
            "--laps",
            "3",
            "--telemetry",
            "process-stats, disk-io",
            "--logging",
            "console",
            "--coordinator-ip",
            "10.0.0.1",
        ])
        .unwrap();
        let Some(Command::Race(args)) = cli.command else {
            panic!("expected race");
        };
        let overrides = args.overrides(false);
        assert_eq!(overrides.pipeline.as_deref(), Some("benchmark-only"));
        assert_eq!(
            overrides.target_hosts,
            Some(vec![
                HostDescriptor::new("10.0.0.5", 9200),
                HostDescriptor::new("10.0.0.6", 9200)
            ])
        );
        assert_eq!(overrides.laps, Some(3));
        assert_eq!(
            overrides.telemetry,
            Some(vec!["process-stats".to_string(), "disk-io".to_string()])
        );
        assert_eq!(overrides.logging, Some(LogRoute::Console));
        assert_eq!(overrides.coordinator_ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_zero_laps_rejected_by_parser() {
        assert!(Cli::try_parse_from(["racetrack", "race", "--laps", "0"]).is_err());
    }

    #[test]
    fn test_list_and_compare_parse() {
        let cli = Cli::try_parse_from(["racetrack", "list", "races", "--limit", "3"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::List {
                what: ListTarget::Races,
                limit: 3
            })
        ));
        let cli = Cli::try_parse_from([
            "racetrack",
            "compare",
            "--baseline",
            "20261018T000000Z",
            "--contender",
            "20261019T000000Z",
        ])
        .unwrap();
        assert_eq!(cli.command.map(|c| c.name()), Some("compare"));
    }

    #[test]
    fn test_missing_subcommand_depends_on_config() {
        let dir = TempDir::new().unwrap();
        assert_eq!(default_command(dir.path()).name(), "configure");
        config::write_default(dir.path(), false).unwrap();
        assert_eq!(default_command(dir.path()).name(), "race");
    }
}
