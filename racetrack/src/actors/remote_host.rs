//! RemoteHostActor - stand-in for a HostActor served by another node.
//!
//! Speaks `HostMsg` to the coordinator and forwards lifecycle requests over a
//! placement connection to the node server, which runs the real HostActor.
//! The remote actor lives exactly as long as the connection.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use racetrack_types::{FailureKind, LifecycleReply, LifecycleRequest};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::net::TcpStream;

use super::host::HostMsg;
use crate::runtime::transport::{framed, recv_frame, send_frame, Frame, FrameStream};
use crate::runtime::RuntimeError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct RemoteHostActor;

#[derive(Debug, Clone)]
pub struct RemoteHostArguments {
    /// Node server of the node the host actor is placed on.
    pub address: SocketAddr,
    pub node_ip: String,
}

pub struct RemoteHostState {
    address: SocketAddr,
    node_ip: String,
    conn: Option<FrameStream>,
}

#[async_trait]
impl Actor for RemoteHostActor {
    type Msg = HostMsg;
    type State = RemoteHostState;
    type Arguments = RemoteHostArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(args.address))
            .await
            .map_err(|_| {
                RuntimeError::Transport(format!(
                    "timed out connecting to node {} at {}",
                    args.node_ip, args.address
                ))
            })??;
        tracing::info!(
            actor_id = %myself.get_id(),
            node_ip = %args.node_ip,
            address = %args.address,
            "RemoteHostActor connected"
        );
        Ok(RemoteHostState {
            address: args.address,
            node_ip: args.node_ip,
            conn: Some(framed(stream)),
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
                let response = match forward(state, request).await {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::error!(
                            actor_id = %myself.get_id(),
                            node_ip = %state.node_ip,
                            request = name,
                            error = %e,
                            "Lost connection to node"
                        );
                        state.conn = None;
                        myself.stop(Some(format!("lost connection to {}", state.address)));
                        LifecycleReply::failure(
                            FailureKind::Launch,
                            "Could not communicate with benchmark candidate",
                            format!("node {}: {e}", state.node_ip),
                        )
                    }
                };
                let _ = reply.send(response);
            }
            HostMsg::GetPhase { .. } => {
                tracing::debug!(
                    actor_id = %myself.get_id(),
                    "Phase of a remote host is not observable, dropping request"
                );
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.conn = None;
        tracing::info!(actor_id = %myself.get_id(), node_ip = %state.node_ip, "RemoteHostActor stopped");
        Ok(())
    }
}

async fn forward(
    state: &mut RemoteHostState,
    request: LifecycleRequest,
) -> Result<LifecycleReply, RuntimeError> {
    let conn = state.conn.as_mut().ok_or(RuntimeError::NotRunning)?;
    send_frame(conn, &Frame::Request { request }).await?;
    match recv_frame(conn).await? {
        Some(Frame::Reply { reply }) => Ok(reply),
        Some(other) => Err(RuntimeError::Transport(format!(
            "expected a reply frame, received {other:?}"
        ))),
        None => Err(RuntimeError::Transport(
            "node closed the placement connection".to_string(),
        )),
    }
}
