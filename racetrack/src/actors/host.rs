//! HostActor - runs the engine lifecycle of one target host.
//!
//! ```text
//! Idle --StartEngine--> Started --OnBenchmarkStart--> BenchmarkRunning
//!                          ^                              |
//!                          |                       OnBenchmarkStop
//!                          |                              v
//!                          +------------------------ BenchmarkIdle
//! Started/BenchmarkIdle --StopEngine--> Idle
//! ```
//!
//! Every request gets exactly one reply. Errors and panics inside the
//! strategies become `Failure` replies; the actor itself keeps running and
//! can be reused for the next race after `StopEngine`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use racetrack_types::{FailureKind, LifecycleReply, LifecycleRequest, NodeConfig};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};

use super::{error_chain, panic_message};
use crate::mechanic::{self, EngineLifecycle, MechanicError, StrategyCatalog};
use crate::metrics::{InMemoryMetricsStore, MetricsError, MetricsStore, RunIdentity};
use crate::paths;

const EXECUTION_FAILED: &str = "Could not execute command";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum EnginePhase {
    Idle,
    Started,
    BenchmarkRunning,
    BenchmarkIdle,
}

#[derive(Debug)]
pub enum HostMsg {
    Lifecycle {
        request: LifecycleRequest,
        reply: RpcReplyPort<LifecycleReply>,
    },
    GetPhase {
        reply: RpcReplyPort<EnginePhase>,
    },
}

#[derive(Debug, thiserror::Error)]
enum HostError {
    #[error("{0}")]
    Protocol(String),
    #[error(transparent)]
    Mechanic(#[from] MechanicError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

#[derive(Debug, Default)]
pub struct HostActor;

pub struct HostArguments {
    pub catalog: Arc<dyn StrategyCatalog>,
    /// The host shares its machine with the coordinator.
    pub single_machine: bool,
}

pub struct HostState {
    catalog: Arc<dyn StrategyCatalog>,
    single_machine: bool,
    phase: EnginePhase,
    config: Option<NodeConfig>,
    metrics: Option<InMemoryMetricsStore>,
    lifecycle: Option<EngineLifecycle>,
}

impl HostState {
    fn reset(&mut self) {
        self.phase = EnginePhase::Idle;
        self.config = None;
        self.metrics = None;
        self.lifecycle = None;
    }
}

#[async_trait]
impl Actor for HostActor {
    type Msg = HostMsg;
    type State = HostState;
    type Arguments = HostArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            single_machine = args.single_machine,
            "HostActor starting"
        );
        Ok(HostState {
            catalog: args.catalog,
            single_machine: args.single_machine,
            phase: EnginePhase::Idle,
            config: None,
            metrics: None,
            lifecycle: None,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            HostMsg::Lifecycle { request, reply } => {
                let name = request.name();
                let stops_engine = matches!(request, LifecycleRequest::StopEngine);
                tracing::debug!(actor_id = %myself.get_id(), request = name, "Host received request");

                let outcome = AssertUnwindSafe(Self::execute(state, request))
                    .catch_unwind()
                    .await;
                let response = match outcome {
                    Ok(Ok(response)) => response,
                    Ok(Err(err)) => {
                        tracing::error!(
                            actor_id = %myself.get_id(),
                            request = name,
                            error = %err,
                            "Host request failed"
                        );
                        LifecycleReply::failure(FailureKind::Execution, EXECUTION_FAILED, error_chain(&err))
                    }
                    Err(payload) => {
                        let cause = panic_message(payload);
                        tracing::error!(
                            actor_id = %myself.get_id(),
                            request = name,
                            cause = %cause,
                            "Host request panicked"
                        );
                        LifecycleReply::failure(FailureKind::Execution, EXECUTION_FAILED, cause)
                    }
                };

                // The actor may be reused for another race.
                if stops_engine {
                    state.reset();
                }
                let _ = reply.send(response);
            }
            HostMsg::GetPhase { reply } => {
                let _ = reply.send(state.phase);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let (Some(lifecycle), Some(metrics)) = (state.lifecycle.as_mut(), state.metrics.as_mut())
        {
            if lifecycle.is_running() {
                tracing::warn!(
                    actor_id = %myself.get_id(),
                    car = state.config.as_ref().map(|c| c.mechanic.car.as_str()).unwrap_or("unknown"),
                    "HostActor stopping with a running engine, stopping it"
                );
                if let Err(e) = lifecycle.stop(metrics).await {
                    tracing::warn!(actor_id = %myself.get_id(), error = %e, "Could not stop engine");
                }
            }
        }
        state.reset();
        tracing::info!(actor_id = %myself.get_id(), "HostActor stopped");
        Ok(())
    }
}

impl HostActor {
    async fn execute(
        state: &mut HostState,
        request: LifecycleRequest,
    ) -> Result<LifecycleReply, HostError> {
        match request {
            LifecycleRequest::StartEngine {
                config,
                mode,
                build,
            } => {
                if state.lifecycle.is_some() {
                    return Err(HostError::Protocol(
                        "an engine is already running on this host".to_string(),
                    ));
                }
                let node_config = config.node_scope(paths::node_paths(&config.system));

                let mut metrics = InMemoryMetricsStore::new();
                metrics.open(RunIdentity {
                    race_timestamp: node_config.system.race_timestamp.clone(),
                    track: node_config.track.name.clone(),
                    challenge: node_config
                        .track
                        .challenge
                        .clone()
                        .unwrap_or_else(|| "default".to_string()),
                    car: node_config.mechanic.car.clone(),
                })?;

                let mut lifecycle = mechanic::create(
                    &node_config,
                    state.catalog.as_ref(),
                    mode,
                    build,
                    state.single_machine,
                )?;
                let cluster_info = lifecycle.start(&mut metrics).await?;
                let system_info = metrics.meta_info().clone();

                tracing::info!(
                    mode = %mode,
                    car = %node_config.mechanic.car,
                    hosts = cluster_info.hosts.len(),
                    "Engine started"
                );
                state.phase = EnginePhase::Started;
                state.config = Some(node_config);
                state.metrics = Some(metrics);
                state.lifecycle = Some(lifecycle);

                Ok(LifecycleReply::EngineStarted {
                    cluster_info,
                    system_info,
                })
            }
            LifecycleRequest::OnBenchmarkStart { lap } => {
                let (lifecycle, metrics) = running(state)?;
                metrics.set_lap(lap);
                lifecycle.on_benchmark_start().await?;
                state.phase = EnginePhase::BenchmarkRunning;
                Ok(LifecycleReply::Success)
            }
            LifecycleRequest::OnBenchmarkStop => {
                let (lifecycle, _) = running(state)?;
                lifecycle.on_benchmark_stop().await?;
                state.phase = EnginePhase::BenchmarkIdle;
                Ok(LifecycleReply::Success)
            }
            LifecycleRequest::StopEngine => {
                let (lifecycle, metrics) = running(state)?;
                lifecycle.stop(metrics).await?;
                let system_metrics = metrics.externalize();
                metrics.close()?;
                Ok(LifecycleReply::EngineStopped { system_metrics })
            }
        }
    }
}

fn running(
    state: &mut HostState,
) -> Result<(&mut EngineLifecycle, &mut InMemoryMetricsStore), HostError> {
    match (state.lifecycle.as_mut(), state.metrics.as_mut()) {
        (Some(lifecycle), Some(metrics)) => Ok((lifecycle, metrics)),
        _ => Err(HostError::Protocol(
            "no engine has been started on this host".to_string(),
        )),
    }
}
