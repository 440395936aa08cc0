//! Named pipelines: how the benchmark candidate is obtained before a race.
//!
//! The registry is built once, on first use, from explicit registrations
//! and never changes afterwards.

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use racetrack_types::{HostDescriptor, RaceConfig, RunMode, DEFAULT_HOST_PORT};

use super::{race, RaceContext, RaceOutcome};
use crate::error::RaceError;

pub type PipelineFuture = BoxFuture<'static, Result<RaceOutcome, RaceError>>;
pub type PipelineEntry = fn(RaceContext) -> PipelineFuture;

const DEFAULT_HOST: &str = "127.0.0.1";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Unknown pipeline [{0}]. List the available pipelines with racetrack list pipelines.")]
    Unknown(String),

    #[error("A pipeline named [{0}] is already registered.")]
    Duplicate(String),
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: &'static str,
    pub description: &'static str,
    /// Unstable pipelines are hidden from listings but can be run by name.
    pub stable: bool,
    entry: PipelineEntry,
}

impl Pipeline {
    pub fn new(
        name: &'static str,
        description: &'static str,
        stable: bool,
        entry: PipelineEntry,
    ) -> Self {
        Self {
            name,
            description,
            stable,
            entry,
        }
    }

    pub async fn run(&self, ctx: RaceContext) -> Result<RaceOutcome, RaceError> {
        (self.entry)(ctx).await
    }
}

#[derive(Debug, Default)]
pub struct PipelineRegistry {
    pipelines: Vec<Pipeline>,
}

#[derive(Debug, Default)]
pub struct PipelineRegistryBuilder {
    pipelines: Vec<Pipeline>,
}

impl PipelineRegistryBuilder {
    pub fn register(mut self, pipeline: Pipeline) -> Result<Self, PipelineError> {
        if self.pipelines.iter().any(|p| p.name == pipeline.name) {
            return Err(PipelineError::Duplicate(pipeline.name.to_string()));
        }
        self.pipelines.push(pipeline);
        Ok(self)
    }

    pub fn build(self) -> PipelineRegistry {
        PipelineRegistry {
            pipelines: self.pipelines,
        }
    }
}

impl PipelineRegistry {
    pub fn builder() -> PipelineRegistryBuilder {
        PipelineRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Result<&Pipeline, PipelineError> {
        self.pipelines
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| PipelineError::Unknown(name.to_string()))
    }

    /// Stable pipelines, in registration order.
    pub fn available(&self) -> impl Iterator<Item = &Pipeline> {
        self.pipelines.iter().filter(|p| p.stable)
    }
}

static PIPELINES: Lazy<Result<PipelineRegistry, PipelineError>> = Lazy::new(builtin_pipelines);

/// The process-wide pipeline registry.
pub fn registry() -> Result<&'static PipelineRegistry, RaceError> {
    PIPELINES
        .as_ref()
        .map_err(|e| RaceError::Config(e.to_string()))
}

fn builtin_pipelines() -> Result<PipelineRegistry, PipelineError> {
    Ok(PipelineRegistry::builder()
        .register(Pipeline::new(
            "from-sources-complete",
            "Builds and provisions the benchmark candidate, runs a benchmark and reports results.",
            true,
            from_sources_complete,
        ))?
        .register(Pipeline::new(
            "from-sources-skip-build",
            "Provisions the benchmark candidate (skips the build), runs a benchmark and reports results.",
            true,
            from_sources_skip_build,
        ))?
        .register(Pipeline::new(
            "from-distribution",
            "Downloads a distribution, provisions it, runs a benchmark and reports results.",
            true,
            from_distribution,
        ))?
        .register(Pipeline::new(
            "benchmark-only",
            "Assumes an already running cluster, runs a benchmark and reports results.",
            true,
            benchmark_only,
        ))?
        .register(Pipeline::new(
            "docker",
            "Runs a benchmark against the benchmark candidate's container image and reports results.",
            false,
            docker,
        ))?
        .build())
}

/// Target `host:port` unless target hosts are configured already.
pub fn set_default_hosts(config: &mut RaceConfig, host: &str, port: u16) {
    if config.client.target_hosts.is_empty() {
        tracing::info!(host, port, "Setting default host");
        config.client.target_hosts = vec![HostDescriptor::new(host, port)];
    } else {
        tracing::info!(hosts = ?config.client.target_hosts, "Using configured hosts");
    }
}

fn from_sources_complete(mut ctx: RaceContext) -> PipelineFuture {
    let port = ctx.config.mechanic.http_port;
    set_default_hosts(&mut ctx.config, DEFAULT_HOST, port);
    Box::pin(race(ctx, RunMode::Sources, true))
}

fn from_sources_skip_build(mut ctx: RaceContext) -> PipelineFuture {
    let port = ctx.config.mechanic.http_port;
    set_default_hosts(&mut ctx.config, DEFAULT_HOST, port);
    Box::pin(race(ctx, RunMode::Sources, false))
}

fn from_distribution(mut ctx: RaceContext) -> PipelineFuture {
    if ctx.config.mechanic.distribution_version.is_none() {
        return Box::pin(async {
            Err(RaceError::Config(
                "The from-distribution pipeline needs a distribution version. \
                 Please specify one with --distribution-version."
                    .to_string(),
            ))
        });
    }
    let port = ctx.config.mechanic.http_port;
    set_default_hosts(&mut ctx.config, DEFAULT_HOST, port);
    Box::pin(race(ctx, RunMode::Distribution, false))
}

fn benchmark_only(mut ctx: RaceContext) -> PipelineFuture {
    set_default_hosts(&mut ctx.config, DEFAULT_HOST, DEFAULT_HOST_PORT);
    ctx.config.mechanic.car = "external".to_string();
    Box::pin(race(ctx, RunMode::External, false))
}

fn docker(mut ctx: RaceContext) -> PipelineFuture {
    set_default_hosts(&mut ctx.config, DEFAULT_HOST, DEFAULT_HOST_PORT);
    Box::pin(race(ctx, RunMode::Container, false))
}

/// Pipeline to use when none is configured.
pub fn default_pipeline_name(config: &RaceConfig) -> &'static str {
    if config.mechanic.distribution_version.is_some() {
        "from-distribution"
    } else {
        "from-sources-complete"
    }
}

/// Run the configured pipeline, deriving one if none is configured.
pub async fn run(mut ctx: RaceContext) -> Result<RaceOutcome, RaceError> {
    if ctx.config.race.pipeline.is_empty() {
        let name = default_pipeline_name(&ctx.config);
        tracing::info!(pipeline = name, "User specified no pipeline, derived one");
        ctx.config.race.pipeline = name.to_string();
    } else {
        tracing::info!(pipeline = %ctx.config.race.pipeline, "User specified pipeline");
    }
    let pipeline = registry()?
        .get(&ctx.config.race.pipeline)
        .map_err(|e| RaceError::Config(e.to_string()))?;
    pipeline.run(ctx).await
}
