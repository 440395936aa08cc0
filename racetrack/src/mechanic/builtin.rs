//! Strategies every node ships with.
//!
//! Only attaching to an externally managed cluster works out of the box.
//! Source builds, downloads and containers need a catalog supplied by the
//! embedding application.

use async_trait::async_trait;
use racetrack_types::{ClusterInfo, HostDescriptor};

use super::{
    Artifact, Cluster, InstalledCar, LaunchKind, Launcher, MechanicError, ProvisionKind,
    Provisioner, StrategyCatalog, StrategyContext, SupplyKind, Supplier,
};
use crate::metrics::MetricsStore;

/// Known cars with a short description.
pub const CARS: &[(&str, &str)] = &[
    ("defaults", "Default settings of the benchmark candidate"),
    ("4gheap", "Candidate with a fixed 4GB memory budget"),
    ("ssd", "Tuned for local SSD storage"),
    ("external", "Externally managed candidate; settings are not touched"),
];

/// Telemetry devices accepted in `mechanic.telemetry`.
pub const TELEMETRY_DEVICES: &[(&str, &str)] = &[
    ("process-stats", "Samples CPU and memory of the candidate process"),
    ("disk-io", "Records bytes read and written by the candidate"),
    ("network", "Records bytes sent and received on the benchmark interface"),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCatalog;

impl StrategyCatalog for BuiltinCatalog {
    fn supplier(
        &self,
        kind: SupplyKind,
        _ctx: &StrategyContext,
    ) -> Result<Box<dyn Supplier>, MechanicError> {
        match kind {
            SupplyKind::Noop => Ok(Box::new(NoopSupplier)),
            other => Err(MechanicError::Unavailable(other.to_string())),
        }
    }

    fn provisioner(
        &self,
        kind: ProvisionKind,
        ctx: &StrategyContext,
    ) -> Result<Box<dyn Provisioner>, MechanicError> {
        match kind {
            ProvisionKind::Noop => Ok(Box::new(NoopProvisioner {
                car: ctx.config.mechanic.car.clone(),
                data_paths: ctx.config.mechanic.data_paths.clone(),
            })),
            other => Err(MechanicError::Unavailable(other.to_string())),
        }
    }

    fn launcher(
        &self,
        kind: LaunchKind,
        ctx: &StrategyContext,
    ) -> Result<Box<dyn Launcher>, MechanicError> {
        match kind {
            LaunchKind::External => Ok(Box::new(ExternalLauncher {
                hosts: ctx.config.client.target_hosts.clone(),
                distribution_version: ctx.config.mechanic.distribution_version.clone(),
                telemetry: ctx.config.mechanic.telemetry.clone(),
            })),
            other => Err(MechanicError::Unavailable(other.to_string())),
        }
    }
}

pub struct NoopSupplier;

#[async_trait]
impl Supplier for NoopSupplier {
    fn kind(&self) -> SupplyKind {
        SupplyKind::Noop
    }

    async fn supply(&mut self) -> Result<Option<Artifact>, MechanicError> {
        Ok(None)
    }
}

pub struct NoopProvisioner {
    car: String,
    data_paths: Vec<std::path::PathBuf>,
}

#[async_trait]
impl Provisioner for NoopProvisioner {
    fn kind(&self) -> ProvisionKind {
        ProvisionKind::Noop
    }

    async fn prepare(&mut self, artifact: Option<Artifact>) -> Result<InstalledCar, MechanicError> {
        Ok(InstalledCar {
            name: self.car.clone(),
            binary_path: artifact.as_ref().map(|a| a.path.clone()),
            data_paths: self.data_paths.clone(),
            version: artifact.as_ref().and_then(|a| a.version.clone()),
            revision: artifact.and_then(|a| a.revision),
        })
    }

    async fn cleanup(&mut self) -> Result<(), MechanicError> {
        Ok(())
    }
}

/// Attaches to hosts that are already running.
pub struct ExternalLauncher {
    hosts: Vec<HostDescriptor>,
    distribution_version: Option<String>,
    telemetry: Vec<String>,
}

#[async_trait]
impl Launcher for ExternalLauncher {
    fn kind(&self) -> LaunchKind {
        LaunchKind::External
    }

    async fn start(
        &mut self,
        car: InstalledCar,
        metrics: &mut dyn MetricsStore,
    ) -> Result<Box<dyn Cluster>, MechanicError> {
        if !self.telemetry.is_empty() {
            tracing::warn!(
                devices = ?self.telemetry,
                "Telemetry devices are not supported for externally managed clusters"
            );
        }
        tracing::info!(hosts = self.hosts.len(), car = %car.name, "Attaching to external cluster");
        metrics.add_meta_info("launcher", "external");
        if let Some(version) = &self.distribution_version {
            metrics.add_meta_info("distribution_version", version);
        }
        Ok(Box::new(ExternalCluster {
            info: ClusterInfo {
                hosts: self.hosts.clone(),
                revision: car.revision,
                distribution_version: self.distribution_version.clone().or(car.version),
            },
        }))
    }

    async fn stop(
        &mut self,
        cluster: Box<dyn Cluster>,
        _metrics: &mut dyn MetricsStore,
    ) -> Result<(), MechanicError> {
        tracing::info!(
            hosts = cluster.info().hosts.len(),
            "Detaching from external cluster"
        );
        Ok(())
    }
}

pub struct ExternalCluster {
    info: ClusterInfo,
}

#[async_trait]
impl Cluster for ExternalCluster {
    fn info(&self) -> ClusterInfo {
        self.info.clone()
    }

    async fn on_benchmark_start(&mut self) -> Result<(), MechanicError> {
        Ok(())
    }

    async fn on_benchmark_stop(&mut self) -> Result<(), MechanicError> {
        Ok(())
    }
}
