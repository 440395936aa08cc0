//! CoordinatorActor - fans lifecycle requests out to the host actors

use async_trait::async_trait;
use racetrack_types::{FailureKind, LifecycleReply, LifecycleRequest};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort, SupervisionEvent};

use super::placement::{self, PlacedHost};
use super::protocol::{aggregate, CoordinatorMsg};
use crate::actors::host::HostMsg;
use crate::console::Console;
use crate::runtime::RuntimeHandle;

const UNREACHABLE_HOST: &str = "Could not communicate with benchmark candidate";

#[derive(Debug, Default)]
pub struct CoordinatorActor;

#[derive(Debug, Clone)]
pub struct CoordinatorArguments {
    pub runtime: RuntimeHandle,
    pub console: Console,
}

/// A request waiting for the replies of all hosts.
struct PendingRequest {
    id: u64,
    name: &'static str,
    replies: Vec<Option<LifecycleReply>>,
    reply: RpcReplyPort<LifecycleReply>,
    stops_engine: bool,
}

pub struct CoordinatorState {
    runtime: RuntimeHandle,
    console: Console,
    hosts: Vec<PlacedHost>,
    pending: Option<PendingRequest>,
    next_request_id: u64,
}

#[async_trait]
impl Actor for CoordinatorActor {
    type Msg = CoordinatorMsg;
    type State = CoordinatorState;
    type Arguments = CoordinatorArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(actor_id = %myself.get_id(), "CoordinatorActor starting");
        Ok(CoordinatorState {
            runtime: args.runtime,
            console: args.console,
            hosts: Vec::new(),
            pending: None,
            next_request_id: 0,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CoordinatorMsg::Lifecycle { request, reply } => {
                self.handle_request(myself, state, request, reply).await;
            }
            CoordinatorMsg::HostReplied {
                request_id,
                index,
                reply,
            } => {
                if let Some(pending) = state.pending.as_mut() {
                    if pending.id == request_id {
                        if let Some(slot) = pending.replies.get_mut(index) {
                            slot.get_or_insert(reply);
                        }
                    } else {
                        tracing::debug!(request_id, "Dropping reply to a stale request");
                    }
                }
                self.try_complete(&myself, state).await;
            }
        }
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        event: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let SupervisionEvent::ActorTerminated(actor_cell, _, _)
        | SupervisionEvent::ActorFailed(actor_cell, _) = &event
        {
            let actor_id = actor_cell.get_id();
            state.hosts.retain(|host| host.actor.get_id() != actor_id);
        }
        tracing::info!(
            actor_id = %myself.get_id(),
            event = ?event,
            "CoordinatorActor supervision event"
        );
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(pending) = state.pending.take() {
            let _ = pending.reply.send(LifecycleReply::failure(
                FailureKind::Launch,
                "Coordinator stopped before all hosts replied",
                pending.name,
            ));
        }
        placement::release(std::mem::take(&mut state.hosts)).await;
        tracing::info!(actor_id = %myself.get_id(), "CoordinatorActor stopped");
        Ok(())
    }
}

impl CoordinatorActor {
    async fn handle_request(
        &self,
        myself: ActorRef<CoordinatorMsg>,
        state: &mut CoordinatorState,
        request: LifecycleRequest,
        reply: RpcReplyPort<LifecycleReply>,
    ) {
        let name = request.name();
        if let Some(pending) = &state.pending {
            let _ = reply.send(LifecycleReply::failure(
                FailureKind::Execution,
                format!("Received {name} while {} is still outstanding", pending.name),
                "",
            ));
            return;
        }
        tracing::debug!(actor_id = %myself.get_id(), request = name, "Coordinator received request");

        if let LifecycleRequest::StartEngine {
            config,
            mode,
            build,
        } = request
        {
            if !state.hosts.is_empty() {
                let _ = reply.send(LifecycleReply::failure(
                    FailureKind::Setup,
                    "The engine has already been started for this race",
                    "",
                ));
                return;
            }
            match placement::place_hosts(&myself, &state.runtime, &state.console, &config, mode)
                .await
            {
                Ok(hosts) => state.hosts = hosts,
                Err(e) => {
                    tracing::error!(actor_id = %myself.get_id(), error = %e, "Could not place host actors");
                    let _ = reply.send(e.into_reply());
                    return;
                }
            }
            // Each host only launches its own target.
            self.broadcast(&myself, state, name, reply, |host| {
                let mut config = config.clone();
                if let Some(target) = &host.target {
                    config.client.target_hosts = vec![target.clone()];
                }
                LifecycleRequest::StartEngine { config, mode, build }
            })
            .await;
            return;
        }

        if state.hosts.is_empty() {
            let _ = reply.send(LifecycleReply::failure(
                FailureKind::Execution,
                format!("Cannot handle {name} before the engine has been started"),
                "",
            ));
            return;
        }
        self.broadcast(&myself, state, name, reply, |_| request.clone())
            .await;
    }

    /// Send one request per host and register the join barrier for their
    /// replies.
    async fn broadcast<F>(
        &self,
        myself: &ActorRef<CoordinatorMsg>,
        state: &mut CoordinatorState,
        name: &'static str,
        reply: RpcReplyPort<LifecycleReply>,
        request_for: F,
    ) where
        F: Fn(&PlacedHost) -> LifecycleRequest,
    {
        let id = state.next_request_id;
        state.next_request_id += 1;
        let mut pending = PendingRequest {
            id,
            name,
            replies: vec![None; state.hosts.len()],
            reply,
            stops_engine: name == "StopEngine",
        };

        for (index, host) in state.hosts.iter().enumerate() {
            let (tx, rx) = ractor::concurrency::oneshot();
            let message = HostMsg::Lifecycle {
                request: request_for(host),
                reply: RpcReplyPort::from(tx),
            };
            if let Err(e) = host.actor.cast(message) {
                tracing::warn!(node_ip = %host.node_ip, error = %e, "Host actor is gone");
                pending.replies[index] = Some(unreachable_host(e.to_string()));
                continue;
            }
            let coordinator = myself.clone();
            tokio::spawn(async move {
                let reply = rx.await.unwrap_or_else(|_| {
                    unreachable_host("host actor stopped before replying".to_string())
                });
                let _ = coordinator.cast(CoordinatorMsg::HostReplied {
                    request_id: id,
                    index,
                    reply,
                });
            });
        }

        state.pending = Some(pending);
        self.try_complete(myself, state).await;
    }

    async fn try_complete(&self, myself: &ActorRef<CoordinatorMsg>, state: &mut CoordinatorState) {
        let complete = state
            .pending
            .as_ref()
            .is_some_and(|p| p.replies.iter().all(Option::is_some));
        if !complete {
            return;
        }
        let Some(pending) = state.pending.take() else {
            return;
        };

        let replies = pending.replies.into_iter().flatten().collect();
        let response = aggregate(pending.name, replies);
        let finished = pending.stops_engine
            && matches!(response, LifecycleReply::EngineStopped { .. });
        if let LifecycleReply::Failure { message, cause, kind } = &response {
            tracing::warn!(
                actor_id = %myself.get_id(),
                request = pending.name,
                kind = %kind,
                failure = %message,
                cause = %cause,
                "Relaying host failure"
            );
        }
        let _ = pending.reply.send(response);

        if finished {
            placement::release(std::mem::take(&mut state.hosts)).await;
            myself.stop(Some("race finished".to_string()));
        }
    }
}

fn unreachable_host(cause: String) -> LifecycleReply {
    LifecycleReply::failure(FailureKind::Launch, UNREACHABLE_HOST, cause)
}
