//! Node server - hosts HostActors for a remote coordinator.
//!
//! Every placement connection gets its own HostActor. The actor lives as
//! long as the connection; closing it stops the actor, which in turn makes a
//! best-effort stop of any engine still running.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use racetrack_types::{FailureKind, LifecycleReply};
use ractor::{Actor, ActorRef};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::transport::{framed, recv_frame, send_frame, Frame, FrameStream};
use super::RuntimeError;
use crate::actors::host::{HostActor, HostArguments, HostMsg};
use crate::actors::stop_actor;
use crate::mechanic::StrategyCatalog;

const SHUTDOWN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn serve_host_placements(
    listener: TcpListener,
    catalog: Arc<dyn StrategyCatalog>,
    shutdown: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Node server listening");
    }
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_connection(stream, peer, catalog.clone(), shutdown.clone()));
                }
                Err(e) => tracing::warn!(error = %e, "Node server accept failed"),
            },
        }
    }
    tracing::debug!("Node server stopped");
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    catalog: Arc<dyn StrategyCatalog>,
    shutdown: CancellationToken,
) {
    let mut conn = framed(stream);
    let mut host: Option<ActorRef<HostMsg>> = None;

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = recv_frame(&mut conn) => frame,
        };
        match frame {
            Ok(Some(Frame::Request { request })) => {
                let actor = match &host {
                    Some(actor) => actor.clone(),
                    None => match spawn_host(catalog.clone()).await {
                        Ok(actor) => {
                            host = Some(actor.clone());
                            actor
                        }
                        Err(e) => {
                            let reply = LifecycleReply::failure(
                                FailureKind::Launch,
                                "Could not start benchmark candidate host",
                                e.to_string(),
                            );
                            if send_reply(&mut conn, reply).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    },
                };
                tracing::debug!(peer = %peer, request = request.name(), "Forwarding request to host");
                let reply = match ractor::call!(actor, |reply| HostMsg::Lifecycle { request, reply })
                {
                    Ok(reply) => reply,
                    Err(e) => LifecycleReply::failure(
                        FailureKind::Launch,
                        "Could not communicate with benchmark candidate",
                        e.to_string(),
                    ),
                };
                if send_reply(&mut conn, reply).await.is_err() {
                    break;
                }
            }
            Ok(Some(Frame::Shutdown)) => {
                tracing::info!(peer = %peer, "Shutdown requested");
                let _ = send_frame(&mut conn, &Frame::Ack).await;
                shutdown.cancel();
                break;
            }
            Ok(Some(other)) => {
                tracing::warn!(peer = %peer, frame = ?other, "Unexpected frame on placement connection");
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Placement connection failed");
                break;
            }
        }
    }

    if let Some(actor) = host {
        stop_actor(&actor, "placement connection closed").await;
    }
}

async fn spawn_host(catalog: Arc<dyn StrategyCatalog>) -> Result<ActorRef<HostMsg>, RuntimeError> {
    let (actor, _) = Actor::spawn(
        None,
        HostActor,
        HostArguments {
            catalog,
            single_machine: false,
        },
    )
    .await
    .map_err(|e| RuntimeError::Actor(e.to_string()))?;
    Ok(actor)
}

async fn send_reply(conn: &mut FrameStream, reply: LifecycleReply) -> Result<(), RuntimeError> {
    send_frame(conn, &Frame::Reply { reply }).await.map_err(|e| {
        tracing::warn!(error = %e, "Could not send reply to coordinator");
        e
    })
}

/// Ask the node server at `address` to shut its node down.
///
/// Returns `Ok(false)` when nothing is listening there.
pub async fn request_shutdown(address: &str) -> Result<bool, RuntimeError> {
    let stream = match TcpStream::connect(address).await {
        Ok(stream) => stream,
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let mut conn = framed(stream);
    send_frame(&mut conn, &Frame::Shutdown).await?;
    match tokio::time::timeout(SHUTDOWN_REQUEST_TIMEOUT, recv_frame(&mut conn)).await {
        Ok(Ok(Some(Frame::Ack))) => Ok(true),
        Ok(Ok(other)) => Err(RuntimeError::Transport(format!(
            "expected acknowledgement, received {other:?}"
        ))),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(RuntimeError::Transport(
            "node did not acknowledge the shutdown request".to_string(),
        )),
    }
}
