//! Engine lifecycle - supply, provision and launch a benchmark candidate.
//!
//! The three strategies are picked by run mode:
//!
//! | mode         | supply      | provision         | launch     |
//! |--------------|-------------|-------------------|------------|
//! | sources      | source-tree | local-install     | in-process |
//! | distribution | download    | local-install     | in-process |
//! | external     | noop        | noop              | external   |
//! | container    | noop        | container-install | container  |
//!
//! Concrete strategies come from a [`StrategyCatalog`]; see [`builtin`] for
//! the ones shipped with this crate.

pub mod builtin;

use std::path::PathBuf;

use async_trait::async_trait;
use racetrack_types::{ClusterInfo, NodeConfig, RunMode};

use crate::metrics::MetricsStore;

pub use builtin::{BuiltinCatalog, CARS, TELEMETRY_DEVICES};

#[derive(Debug, thiserror::Error)]
pub enum MechanicError {
    #[error("the {0} strategy is not available on this node")]
    Unavailable(String),

    #[error("unknown telemetry device '{0}'. Run 'racetrack list telemetry' to see all devices.")]
    UnknownTelemetry(String),

    #[error("no cluster is running")]
    NotStarted,

    #[error("{0}")]
    Strategy(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Strategy kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SupplyKind {
    SourceTree,
    Download,
    Noop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ProvisionKind {
    LocalInstall,
    ContainerInstall,
    Noop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum LaunchKind {
    InProcess,
    External,
    Container,
}

/// The strategy triple for one run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyPlan {
    pub supply: SupplyKind,
    pub provision: ProvisionKind,
    pub launch: LaunchKind,
}

impl StrategyPlan {
    pub fn for_mode(mode: RunMode) -> Self {
        let (supply, provision, launch) = match mode {
            RunMode::Sources => (
                SupplyKind::SourceTree,
                ProvisionKind::LocalInstall,
                LaunchKind::InProcess,
            ),
            RunMode::Distribution => (
                SupplyKind::Download,
                ProvisionKind::LocalInstall,
                LaunchKind::InProcess,
            ),
            RunMode::External => (SupplyKind::Noop, ProvisionKind::Noop, LaunchKind::External),
            RunMode::Container => (
                SupplyKind::Noop,
                ProvisionKind::ContainerInstall,
                LaunchKind::Container,
            ),
        };
        Self {
            supply,
            provision,
            launch,
        }
    }
}

// ============================================================================
// Strategy traits
// ============================================================================

/// Output of a supplier: something a provisioner can install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub version: Option<String>,
    pub revision: Option<String>,
}

/// An installed benchmark candidate, ready to launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledCar {
    pub name: String,
    pub binary_path: Option<PathBuf>,
    pub data_paths: Vec<PathBuf>,
    pub version: Option<String>,
    pub revision: Option<String>,
}

/// Everything a catalog needs to build strategies for one host.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub config: NodeConfig,
    /// Only used by the source-tree supplier.
    pub build: bool,
    /// The candidate shares the machine with the coordinator.
    pub single_machine: bool,
}

#[async_trait]
pub trait Supplier: Send + Sync {
    fn kind(&self) -> SupplyKind;

    async fn supply(&mut self) -> Result<Option<Artifact>, MechanicError>;
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    fn kind(&self) -> ProvisionKind;

    async fn prepare(&mut self, artifact: Option<Artifact>) -> Result<InstalledCar, MechanicError>;

    async fn cleanup(&mut self) -> Result<(), MechanicError>;
}

#[async_trait]
pub trait Launcher: Send + Sync {
    fn kind(&self) -> LaunchKind;

    async fn start(
        &mut self,
        car: InstalledCar,
        metrics: &mut dyn MetricsStore,
    ) -> Result<Box<dyn Cluster>, MechanicError>;

    async fn stop(
        &mut self,
        cluster: Box<dyn Cluster>,
        metrics: &mut dyn MetricsStore,
    ) -> Result<(), MechanicError>;
}

/// Handle to a running cluster, owned by exactly one [`EngineLifecycle`].
#[async_trait]
pub trait Cluster: Send + Sync {
    fn info(&self) -> ClusterInfo;

    async fn on_benchmark_start(&mut self) -> Result<(), MechanicError>;

    async fn on_benchmark_stop(&mut self) -> Result<(), MechanicError>;
}

/// Source of concrete strategies on a node.
pub trait StrategyCatalog: Send + Sync + 'static {
    fn supplier(
        &self,
        kind: SupplyKind,
        ctx: &StrategyContext,
    ) -> Result<Box<dyn Supplier>, MechanicError>;

    fn provisioner(
        &self,
        kind: ProvisionKind,
        ctx: &StrategyContext,
    ) -> Result<Box<dyn Provisioner>, MechanicError>;

    fn launcher(
        &self,
        kind: LaunchKind,
        ctx: &StrategyContext,
    ) -> Result<Box<dyn Launcher>, MechanicError>;
}

// ============================================================================
// Engine lifecycle
// ============================================================================

pub struct EngineLifecycle {
    plan: StrategyPlan,
    supplier: Box<dyn Supplier>,
    provisioner: Box<dyn Provisioner>,
    launcher: Box<dyn Launcher>,
    cluster: Option<Box<dyn Cluster>>,
}

impl std::fmt::Debug for EngineLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineLifecycle")
            .field("plan", &self.plan)
            .field("running", &self.cluster.is_some())
            .finish()
    }
}

/// Build the lifecycle for `mode` from the strategies `catalog` provides.
pub fn create(
    config: &NodeConfig,
    catalog: &dyn StrategyCatalog,
    mode: RunMode,
    build: bool,
    single_machine: bool,
) -> Result<EngineLifecycle, MechanicError> {
    for device in &config.mechanic.telemetry {
        if !TELEMETRY_DEVICES.iter().any(|(name, _)| name == device) {
            return Err(MechanicError::UnknownTelemetry(device.clone()));
        }
    }

    let plan = StrategyPlan::for_mode(mode);
    let ctx = StrategyContext {
        config: config.clone(),
        build,
        single_machine,
    };
    tracing::debug!(
        mode = %mode,
        supply = %plan.supply,
        provision = %plan.provision,
        launch = %plan.launch,
        "Creating engine lifecycle"
    );

    Ok(EngineLifecycle {
        plan,
        supplier: catalog.supplier(plan.supply, &ctx)?,
        provisioner: catalog.provisioner(plan.provision, &ctx)?,
        launcher: catalog.launcher(plan.launch, &ctx)?,
        cluster: None,
    })
}

impl EngineLifecycle {
    pub fn plan(&self) -> StrategyPlan {
        self.plan
    }

    pub fn is_running(&self) -> bool {
        self.cluster.is_some()
    }

    /// Supply, provision and launch, in that order.
    pub async fn start(
        &mut self,
        metrics: &mut dyn MetricsStore,
    ) -> Result<ClusterInfo, MechanicError> {
        let artifact = self.supplier.supply().await?;
        let car = self.provisioner.prepare(artifact).await?;
        metrics.add_meta_info("car", &car.name);
        let cluster = self.launcher.start(car, metrics).await?;
        let info = cluster.info();
        self.cluster = Some(cluster);
        Ok(info)
    }

    pub async fn on_benchmark_start(&mut self) -> Result<(), MechanicError> {
        self.cluster
            .as_mut()
            .ok_or(MechanicError::NotStarted)?
            .on_benchmark_start()
            .await
    }

    pub async fn on_benchmark_stop(&mut self) -> Result<(), MechanicError> {
        self.cluster
            .as_mut()
            .ok_or(MechanicError::NotStarted)?
            .on_benchmark_stop()
            .await
    }

    /// Stop the cluster and clean up the installation. Cleanup runs even if
    /// stopping fails; the first error wins.
    pub async fn stop(&mut self, metrics: &mut dyn MetricsStore) -> Result<(), MechanicError> {
        let stopped = match self.cluster.take() {
            Some(cluster) => self.launcher.stop(cluster, metrics).await,
            None => Ok(()),
        };
        let cleaned = self.provisioner.cleanup().await;
        stopped.and(cleaned)
    }
}
