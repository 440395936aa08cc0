//! The race control loop.
//!
//! ```text
//! setup -> (before lap -> run -> after lap)* -> teardown
//! ```
//!
//! `setup` spawns the coordinator and driver and starts the engine on every
//! target host. Each lap notifies the hosts, runs the workload and notifies
//! them again. `teardown` stops the engine, reports and archives the logs.
//! Teardown runs whenever setup succeeded, also after a failed or cancelled
//! lap.

pub mod laps;
pub mod pipelines;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use racetrack_types::{LifecycleReply, LifecycleRequest, RaceConfig, RunMode};
use ractor::{Actor, ActorRef};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::actors::coordinator::{CoordinatorActor, CoordinatorArguments, CoordinatorMsg};
use crate::actors::driver::{DriverActor, DriverArguments, DriverMsg};
use crate::actors::stop_actor;
use crate::console::Console;
use crate::error::RaceError;
use crate::metrics::{InMemoryMetricsStore, MetricsStore, RunIdentity};
use crate::paths;
use crate::reporter::{summarize, Reporter};
use crate::runtime::RuntimeHandle;
use crate::store::{FileRaceStore, RaceRecord, RaceStatus};
use crate::workload::{load_workload, WorkloadDefinition, WorkloadExecutor, WorkloadOutcome};

pub use laps::{format_duration, seconds_to_hour_minute_seconds, LapCounter};
pub use pipelines::{default_pipeline_name, Pipeline, PipelineError, PipelineRegistry};

pub const METRICS_FILE_NAME: &str = "metrics.json";

/// Everything a race needs from the process that runs it.
#[derive(Clone)]
pub struct RaceContext {
    pub config: RaceConfig,
    pub runtime: RuntimeHandle,
    pub executor: Arc<dyn WorkloadExecutor>,
    /// Cancelling ends the lap in flight and skips the remaining laps.
    pub cancel: CancellationToken,
    pub console: Console,
}

impl RaceContext {
    pub fn new(
        config: RaceConfig,
        runtime: RuntimeHandle,
        executor: Arc<dyn WorkloadExecutor>,
    ) -> Self {
        let console = Console::new(config.system.quiet);
        Self {
            config,
            runtime,
            executor,
            cancel: CancellationToken::new(),
            console,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceOutcome {
    Completed { laps: u32 },
    Cancelled { completed_laps: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LapResult {
    Continue,
    Cancelled,
}

/// One race against one cluster.
pub struct Benchmark {
    ctx: RaceContext,
    mode: RunMode,
    build: bool,
    metrics: InMemoryMetricsStore,
    race_store: FileRaceStore,
    reporter: Reporter,
    coordinator: Option<ActorRef<CoordinatorMsg>>,
    driver: Option<ActorRef<DriverMsg>>,
    workload: Option<WorkloadDefinition>,
    record: Option<RaceRecord>,
}

impl Benchmark {
    pub fn new(ctx: RaceContext, mode: RunMode, build: bool) -> Self {
        let invocation_root = paths::invocation_root(&ctx.config.system);
        let reporter = Reporter::new(
            ctx.config.reporting.format,
            ctx.config.reporting.output_file.clone(),
            ctx.console,
        );
        Self {
            metrics: InMemoryMetricsStore::with_persistence(invocation_root.join(METRICS_FILE_NAME)),
            race_store: FileRaceStore::new(&ctx.config.system.root_dir),
            reporter,
            ctx,
            mode,
            build,
            coordinator: None,
            driver: None,
            workload: None,
            record: None,
        }
    }

    pub fn metrics(&self) -> &InMemoryMetricsStore {
        &self.metrics
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub async fn setup(&mut self) -> Result<(), RaceError> {
        let (coordinator, _) = Actor::spawn(
            None,
            CoordinatorActor,
            CoordinatorArguments {
                runtime: self.ctx.runtime.clone(),
                console: self.ctx.console,
            },
        )
        .await
        .map_err(|e| RaceError::Setup(format!("Could not start coordinator: {e}")))?;
        self.coordinator = Some(coordinator);

        let (driver, _) = Actor::spawn(
            None,
            DriverActor,
            DriverArguments {
                executor: self.ctx.executor.clone(),
                cancel: self.ctx.cancel.clone(),
            },
        )
        .await
        .map_err(|e| RaceError::Setup(format!("Could not start driver: {e}")))?;
        self.driver = Some(driver);

        let reply = self
            .ask(LifecycleRequest::StartEngine {
                config: Box::new(self.ctx.config.clone()),
                mode: self.mode,
                build: self.build,
            })
            .await?;
        let (cluster_info, system_info) = match reply {
            LifecycleReply::EngineStarted {
                cluster_info,
                system_info,
            } => (cluster_info, system_info),
            LifecycleReply::Failure {
                message,
                cause,
                kind,
            } => return Err(RaceError::from_failure(kind, message, cause)),
            other => return Err(RaceError::unexpected("EngineStarted", &other)),
        };

        let workload = load_workload(&self.ctx.config, &cluster_info)
            .map_err(|e| RaceError::Config(e.to_string()))?;
        let config = &self.ctx.config;
        self.metrics.open(RunIdentity {
            race_timestamp: config.system.race_timestamp.clone(),
            track: workload.track.clone(),
            challenge: workload.challenge.clone(),
            car: config.mechanic.car.clone(),
        })?;
        for (key, value) in &system_info {
            self.metrics.add_meta_info(key, value);
        }

        let record = RaceRecord {
            race_id: config.system.race_id.clone(),
            race_timestamp: config.system.race_timestamp.clone(),
            created_at: Utc::now(),
            pipeline: config.race.pipeline.clone(),
            user_tag: config.race.user_tag.clone(),
            track: workload.track.clone(),
            challenge: workload.challenge.clone(),
            car: config.mechanic.car.clone(),
            laps: config.race.laps,
            cluster: cluster_info,
            system_info,
            status: RaceStatus::Running,
            results: Vec::new(),
        };
        self.race_store.store_race(&record)?;
        tracing::info!(
            race_id = %record.race_id,
            hosts = record.cluster.hosts.len(),
            "Engine started, race recorded"
        );
        self.record = Some(record);
        self.workload = Some(workload);
        Ok(())
    }

    pub async fn run(&mut self, lap: u32) -> Result<LapResult, RaceError> {
        let workload = self
            .workload
            .clone()
            .ok_or_else(|| RaceError::Protocol("run called before setup".to_string()))?;
        self.metrics.set_lap(lap);
        self.expect_success(LifecycleRequest::OnBenchmarkStart { lap })
            .await?;

        let driver = self
            .driver
            .clone()
            .ok_or_else(|| RaceError::Communication("driver".to_string()))?;
        let config = Box::new(self.ctx.config.clone());
        let meta_info = self.metrics.meta_info().clone();
        let outcome = ractor::call!(driver, |reply| DriverMsg::StartBenchmark {
            config,
            workload,
            meta_info,
            lap,
            reply,
        })
        .map_err(|e| RaceError::Communication(format!("driver ({e})")))?;

        match outcome {
            WorkloadOutcome::Complete(mut records) => {
                tracing::info!(lap, "Benchmark is complete");
                self.expect_success(LifecycleRequest::OnBenchmarkStop).await?;
                for record in &mut records {
                    record.lap.get_or_insert(lap);
                }
                tracing::info!(lap, records = records.len(), "Bulk adding data to metrics store");
                self.metrics.bulk_add(records)?;
                self.metrics.flush()?;
                Ok(LapResult::Continue)
            }
            WorkloadOutcome::Cancelled => {
                tracing::info!(lap, "User has cancelled the benchmark");
                Ok(LapResult::Cancelled)
            }
            WorkloadOutcome::Failed { message, cause } => Err(RaceError::Remote { message, cause }),
        }
    }

    pub async fn teardown(&mut self, status: RaceStatus) -> Result<(), RaceError> {
        let reply = self.ask(LifecycleRequest::StopEngine).await?;
        match reply {
            LifecycleReply::EngineStopped { system_metrics } => {
                tracing::info!(
                    records = system_metrics.records.len(),
                    "Bulk adding system metrics to metrics store"
                );
                for (key, value) in &system_metrics.meta_info {
                    self.metrics.add_meta_info(key, value);
                }
                self.metrics.bulk_add(system_metrics.records)?;
            }
            LifecycleReply::Failure {
                message,
                cause,
                kind,
            } => return Err(RaceError::from_failure(kind, message, cause)),
            other => return Err(RaceError::unexpected("EngineStopped", &other)),
        }

        self.metrics.close()?;
        let summaries = summarize(self.metrics.records());
        self.reporter.report(&summaries, None)?;
        if let Some(record) = self.record.as_mut() {
            record.status = status;
            record.results = summaries;
            self.race_store.store_race(record)?;
        }
        self.sweep()
    }

    /// Move the log directory of this invocation next to the race results.
    pub fn sweep(&self) -> Result<(), RaceError> {
        let system = &self.ctx.config.system;
        let log_root = paths::log_root(system);
        if !log_root.is_dir() {
            tracing::debug!(path = %log_root.display(), "No log directory to archive");
            return Ok(());
        }
        let (track, challenge) = match &self.workload {
            Some(w) => (w.track.as_str(), w.challenge.as_str()),
            None => (self.ctx.config.track.name.as_str(), "default"),
        };
        let archive = paths::log_archive(
            &paths::invocation_root(system),
            track,
            challenge,
            &self.ctx.config.mechanic.car,
        );
        move_dir(&log_root, &archive)?;
        self.ctx.console.println("");
        self.ctx
            .console
            .info(format!("Archiving logs in {}", archive.display()));
        Ok(())
    }

    /// Record a race that ended with an error. Best effort.
    pub fn mark_failed(&mut self) {
        if let Some(record) = self.record.as_mut() {
            record.status = RaceStatus::Failed;
            if let Err(e) = self.race_store.store_race(record) {
                tracing::warn!(error = %e, "Could not record failed race");
            }
        }
    }

    /// Stop the actors of this race. Safe to call at any point.
    pub async fn abort(&mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            stop_actor(&coordinator, "race aborted").await;
        }
        if let Some(driver) = self.driver.take() {
            stop_actor(&driver, "race aborted").await;
        }
    }

    async fn ask(&self, request: LifecycleRequest) -> Result<LifecycleReply, RaceError> {
        let coordinator = self
            .coordinator
            .as_ref()
            .ok_or_else(|| RaceError::Communication("coordinator".to_string()))?;
        let name = request.name();
        tracing::debug!(request = name, "Asking coordinator");
        ractor::call!(coordinator, |reply| CoordinatorMsg::Lifecycle { request, reply })
            .map_err(|e| RaceError::Communication(format!("coordinator during {name} ({e})")))
    }

    async fn expect_success(&self, request: LifecycleRequest) -> Result<(), RaceError> {
        match self.ask(request).await? {
            LifecycleReply::Success => Ok(()),
            LifecycleReply::Failure {
                message,
                cause,
                kind,
            } => Err(RaceError::from_failure(kind, message, cause)),
            other => Err(RaceError::unexpected("Success", &other)),
        }
    }
}

/// Rename `from` to `to`, falling back to copy and remove across
/// filesystems.
fn move_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(std::io::Error::other)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    std::fs::remove_dir_all(from)
}

fn print_race_info(ctx: &RaceContext) {
    let config = &ctx.config;
    ctx.console.info(format!(
        "Racing on track [{}], challenge [{}] and car [{}]",
        config.track.name,
        config.track.challenge.as_deref().unwrap_or("default"),
        config.mechanic.car
    ));
    ctx.console.println("");
}

/// Run a whole race: setup, all laps, teardown.
pub async fn race(ctx: RaceContext, mode: RunMode, build: bool) -> Result<RaceOutcome, RaceError> {
    let laps = ctx.config.race.laps;
    print_race_info(&ctx);

    let console = ctx.console;
    let mut benchmark = Benchmark::new(ctx, mode, build);
    if let Err(e) = benchmark.setup().await {
        tracing::error!(error = %e, "Race setup failed");
        benchmark.abort().await;
        return Err(e);
    }

    let mut lap_counter = LapCounter::new(laps, console, benchmark.reporter().clone());
    let mut completed_laps = 0;
    let mut cancelled = false;
    let mut lap_error = None;
    for lap in 1..=laps {
        lap_counter.before_lap(lap);
        match benchmark.run(lap).await {
            Ok(LapResult::Continue) => {
                completed_laps = lap;
                lap_counter.after_lap(lap, benchmark.metrics().records());
            }
            Ok(LapResult::Cancelled) => {
                console.info("User cancelled the benchmark.");
                cancelled = true;
                break;
            }
            Err(e) => {
                tracing::error!(lap, error = %e, "Lap failed");
                lap_error = Some(e);
                break;
            }
        }
    }

    let status = match (&lap_error, cancelled) {
        (Some(_), _) => RaceStatus::Failed,
        (None, true) => RaceStatus::Cancelled,
        (None, false) => RaceStatus::Completed,
    };
    let teardown = benchmark.teardown(status).await;
    if lap_error.is_some() || teardown.is_err() {
        benchmark.mark_failed();
    }
    benchmark.abort().await;

    match (lap_error, teardown) {
        (Some(e), Err(teardown_err)) => {
            tracing::error!(error = %teardown_err, "Teardown failed after an earlier error");
            Err(e)
        }
        (Some(e), Ok(())) => Err(e),
        (None, Err(e)) => Err(e),
        (None, Ok(())) if cancelled => Ok(RaceOutcome::Cancelled { completed_laps }),
        (None, Ok(())) => Ok(RaceOutcome::Completed { laps }),
    }
}
