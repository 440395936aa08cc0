//! DriverActor - runs the workload of one lap at a time.
//!
//! The control loop asks `StartBenchmark` once per lap and gets exactly one
//! `WorkloadOutcome` back. Cancelling the shared token turns the lap in
//! flight into `Cancelled`; a panicking executor becomes `Failed`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use racetrack_types::{RaceConfig, SystemInfo};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio_util::sync::CancellationToken;

use super::panic_message;
use crate::workload::{BenchmarkRequest, WorkloadDefinition, WorkloadExecutor, WorkloadOutcome};

#[derive(Debug)]
pub enum DriverMsg {
    StartBenchmark {
        config: Box<RaceConfig>,
        workload: WorkloadDefinition,
        meta_info: SystemInfo,
        lap: u32,
        reply: RpcReplyPort<WorkloadOutcome>,
    },
}

#[derive(Debug, Default)]
pub struct DriverActor;

pub struct DriverArguments {
    pub executor: Arc<dyn WorkloadExecutor>,
    pub cancel: CancellationToken,
}

pub struct DriverState {
    executor: Arc<dyn WorkloadExecutor>,
    cancel: CancellationToken,
}

#[async_trait]
impl Actor for DriverActor {
    type Msg = DriverMsg;
    type State = DriverState;
    type Arguments = DriverArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(actor_id = %myself.get_id(), "DriverActor starting");
        Ok(DriverState {
            executor: args.executor,
            cancel: args.cancel,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            DriverMsg::StartBenchmark {
                config,
                workload,
                meta_info,
                lap,
                reply,
            } => {
                tracing::info!(
                    actor_id = %myself.get_id(),
                    lap,
                    track = %workload.track,
                    challenge = %workload.challenge,
                    "Starting benchmark"
                );
                let request = BenchmarkRequest {
                    config: *config,
                    workload,
                    meta_info,
                    lap,
                };
                let outcome = if state.cancel.is_cancelled() {
                    WorkloadOutcome::Cancelled
                } else {
                    let run = AssertUnwindSafe(state.executor.execute(&request)).catch_unwind();
                    tokio::select! {
                        _ = state.cancel.cancelled() => WorkloadOutcome::Cancelled,
                        result = run => result.unwrap_or_else(|payload| WorkloadOutcome::Failed {
                            message: "The workload panicked".to_string(),
                            cause: panic_message(payload),
                        }),
                    }
                };
                tracing::info!(
                    actor_id = %myself.get_id(),
                    lap,
                    outcome = outcome_name(&outcome),
                    "Benchmark finished"
                );
                let _ = reply.send(outcome);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(actor_id = %myself.get_id(), "DriverActor stopped");
        Ok(())
    }
}

fn outcome_name(outcome: &WorkloadOutcome) -> &'static str {
    match outcome {
        WorkloadOutcome::Complete(_) => "complete",
        WorkloadOutcome::Cancelled => "cancelled",
        WorkloadOutcome::Failed { .. } => "failed",
    }
}
