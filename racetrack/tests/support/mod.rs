//! Recording test doubles shared by the integration tests.
//!
//! `RecordingCatalog` hands out strategies that append one line per call to
//! a shared event log, so a test can assert the exact order in which the
//! race drove the engine lifecycle. `RecordingExecutor` does the same for
//! the workload.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use racetrack::mechanic::{
    Artifact, Cluster, InstalledCar, LaunchKind, Launcher, MechanicError, ProvisionKind,
    Provisioner, StrategyCatalog, StrategyContext, SupplyKind, Supplier,
};
use racetrack::metrics::MetricsStore;
use racetrack::workload::{BenchmarkRequest, WorkloadExecutor, WorkloadOutcome};
use racetrack::{RaceContext, RuntimeHandle};
use racetrack_types::{ClusterInfo, HostDescriptor, MetricRecord, RaceConfig};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn record(log: &EventLog, event: impl Into<String>) {
    log.lock().unwrap().push(event.into());
}

// ─── Strategies ──────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingCatalog {
    pub events: EventLog,
    /// Provisioner cleanup reports an error.
    pub fail_cleanup: bool,
    /// The supplier panics.
    pub panic_on_supply: bool,
}

impl RecordingCatalog {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }
}

/// Label of the host a strategy was built for.
fn host_label(ctx: &StrategyContext) -> String {
    ctx.config
        .client
        .target_hosts
        .first()
        .map(|h| h.host.clone())
        .unwrap_or_else(|| "external".to_string())
}

impl StrategyCatalog for RecordingCatalog {
    fn supplier(
        &self,
        kind: SupplyKind,
        ctx: &StrategyContext,
    ) -> Result<Box<dyn Supplier>, MechanicError> {
        Ok(Box::new(RecordingSupplier {
            kind,
            events: self.events.clone(),
            host: host_label(ctx),
            panic: self.panic_on_supply,
        }))
    }

    fn provisioner(
        &self,
        kind: ProvisionKind,
        ctx: &StrategyContext,
    ) -> Result<Box<dyn Provisioner>, MechanicError> {
        Ok(Box::new(RecordingProvisioner {
            kind,
            events: self.events.clone(),
            host: host_label(ctx),
            car: ctx.config.mechanic.car.clone(),
            fail_cleanup: self.fail_cleanup,
        }))
    }

    fn launcher(
        &self,
        kind: LaunchKind,
        ctx: &StrategyContext,
    ) -> Result<Box<dyn Launcher>, MechanicError> {
        Ok(Box::new(RecordingLauncher {
            kind,
            events: self.events.clone(),
            host: host_label(ctx),
            targets: ctx.config.client.target_hosts.clone(),
        }))
    }
}

struct RecordingSupplier {
    kind: SupplyKind,
    events: EventLog,
    host: String,
    panic: bool,
}

#[async_trait]
impl Supplier for RecordingSupplier {
    fn kind(&self) -> SupplyKind {
        self.kind
    }

    async fn supply(&mut self) -> Result<Option<Artifact>, MechanicError> {
        if self.panic {
            panic!("supplier exploded");
        }
        record(&self.events, format!("{} supply {}", self.host, self.kind));
        Ok(Some(Artifact {
            path: "/tmp/candidate.tar.gz".into(),
            version: Some("8.0.0".to_string()),
            revision: None,
        }))
    }
}

struct RecordingProvisioner {
    kind: ProvisionKind,
    events: EventLog,
    host: String,
    car: String,
    fail_cleanup: bool,
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    fn kind(&self) -> ProvisionKind {
        self.kind
    }

    async fn prepare(&mut self, artifact: Option<Artifact>) -> Result<InstalledCar, MechanicError> {
        record(&self.events, format!("{} prepare {}", self.host, self.kind));
        Ok(InstalledCar {
            name: self.car.clone(),
            version: artifact.and_then(|a| a.version),
            ..InstalledCar::default()
        })
    }

    async fn cleanup(&mut self) -> Result<(), MechanicError> {
        record(&self.events, format!("{} cleanup", self.host));
        if self.fail_cleanup {
            return Err(MechanicError::Strategy(
                "install directory is still in use".to_string(),
            ));
        }
        Ok(())
    }
}

struct RecordingLauncher {
    kind: LaunchKind,
    events: EventLog,
    host: String,
    targets: Vec<HostDescriptor>,
}

#[async_trait]
impl Launcher for RecordingLauncher {
    fn kind(&self) -> LaunchKind {
        self.kind
    }

    async fn start(
        &mut self,
        car: InstalledCar,
        metrics: &mut dyn MetricsStore,
    ) -> Result<Box<dyn Cluster>, MechanicError> {
        record(&self.events, format!("{} launch {}", self.host, self.kind));
        metrics.add_meta_info(&format!("node_{}", self.host), "up");
        Ok(Box::new(RecordingCluster {
            events: self.events.clone(),
            host: self.host.clone(),
            info: ClusterInfo {
                hosts: self.targets.clone(),
                revision: None,
                distribution_version: car.version,
            },
        }))
    }

    async fn stop(
        &mut self,
        _cluster: Box<dyn Cluster>,
        metrics: &mut dyn MetricsStore,
    ) -> Result<(), MechanicError> {
        record(&self.events, format!("{} stop", self.host));
        let _ = metrics.put(MetricRecord::new("node_uptime", 1.0, "s").with_meta("host", &self.host));
        Ok(())
    }
}

struct RecordingCluster {
    events: EventLog,
    host: String,
    info: ClusterInfo,
}

#[async_trait]
impl Cluster for RecordingCluster {
    fn info(&self) -> ClusterInfo {
        self.info.clone()
    }

    async fn on_benchmark_start(&mut self) -> Result<(), MechanicError> {
        record(&self.events, format!("{} benchmark-start", self.host));
        Ok(())
    }

    async fn on_benchmark_stop(&mut self) -> Result<(), MechanicError> {
        record(&self.events, format!("{} benchmark-stop", self.host));
        Ok(())
    }
}

// ─── Workload ────────────────────────────────────────────────────────────────

pub struct RecordingExecutor {
    pub events: EventLog,
    /// Lap on which the executor cancels the race and then blocks.
    pub cancel_on_lap: Option<u32>,
    pub cancel: CancellationToken,
}

#[async_trait]
impl WorkloadExecutor for RecordingExecutor {
    async fn execute(&self, request: &BenchmarkRequest) -> WorkloadOutcome {
        record(&self.events, format!("workload lap {}", request.lap));
        if self.cancel_on_lap == Some(request.lap) {
            self.cancel.cancel();
            futures::future::pending::<()>().await;
        }
        WorkloadOutcome::Complete(vec![MetricRecord::new(
            "service_time",
            10.0 * f64::from(request.lap),
            "ms",
        )])
    }
}

// ─── Race setup ──────────────────────────────────────────────────────────────

/// A quiet race config rooted in a fresh temporary directory.
pub fn race_config(laps: u32, hosts: &[&str]) -> (RaceConfig, TempDir) {
    let root = tempfile::tempdir().expect("tempdir");
    let mut config = RaceConfig::default();
    config.system.root_dir = root.path().to_path_buf();
    config.system.quiet = true;
    config.race.laps = laps;
    config.track.iterations = 1;
    config.client.target_hosts = hosts
        .iter()
        .map(|h| h.parse().expect("valid host"))
        .collect();
    racetrack::config::stamp_invocation(&mut config, Utc::now());
    (config, root)
}

pub struct RaceFixture {
    pub ctx: RaceContext,
    pub runtime: RuntimeHandle,
    pub events: EventLog,
    pub root: TempDir,
}

/// Everything needed to run a race against recording doubles.
pub async fn race_fixture(
    config: RaceConfig,
    root: TempDir,
    catalog: RecordingCatalog,
    cancel_on_lap: Option<u32>,
) -> RaceFixture {
    let events = catalog.events.clone();
    let runtime = RuntimeHandle::local(Arc::new(catalog))
        .await
        .expect("local runtime");
    let cancel = CancellationToken::new();
    let executor = RecordingExecutor {
        events: events.clone(),
        cancel_on_lap,
        cancel: cancel.clone(),
    };
    let mut ctx = RaceContext::new(config, runtime.clone(), Arc::new(executor));
    ctx.cancel = cancel;
    RaceFixture {
        ctx,
        runtime,
        events,
        root,
    }
}
