//! Convention membership.
//!
//! The coordinator node is the convention leader: it accepts announcements
//! from worker nodes and keeps them in the node registry for as long as their
//! connection stays open. Workers keep re-announcing until shut down.

use std::net::SocketAddr;
use std::time::Duration;

use racetrack_types::Capabilities;
use ractor::ActorRef;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::registry::{NodeEndpoint, NodeEntry, RegistryMsg};
use super::transport::{framed, recv_frame, send_frame, Frame};
use super::RuntimeError;

const ANNOUNCE_RETRY: Duration = Duration::from_secs(1);

/// Accept worker announcements until `shutdown` fires.
pub async fn serve_convention(
    listener: TcpListener,
    registry: ActorRef<RegistryMsg>,
    shutdown: CancellationToken,
) {
    let leader = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    tracing::info!(address = %leader, "Convention leader listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_member(
                        stream,
                        peer,
                        leader.clone(),
                        registry.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => tracing::warn!(error = %e, "Convention accept failed"),
            },
        }
    }
    tracing::debug!("Convention leader stopped");
}

async fn handle_member(
    stream: TcpStream,
    peer: SocketAddr,
    leader: String,
    registry: ActorRef<RegistryMsg>,
    shutdown: CancellationToken,
) {
    let mut conn = framed(stream);
    let (capabilities, node_address) = match recv_frame(&mut conn).await {
        Ok(Some(Frame::Announce {
            capabilities,
            node_address,
        })) => (capabilities, node_address),
        Ok(Some(other)) => {
            tracing::warn!(peer = %peer, frame = ?other, "Expected an announcement");
            return;
        }
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "Could not read announcement");
            return;
        }
    };

    let endpoint = match node_address.parse::<SocketAddr>() {
        Ok(addr) => NodeEndpoint::Remote(addr),
        Err(e) => {
            tracing::warn!(peer = %peer, node_address = %node_address, error = %e, "Invalid node address");
            return;
        }
    };
    let ip = capabilities.ip.clone();
    if registry
        .cast(RegistryMsg::Register(NodeEntry {
            capabilities,
            endpoint,
        }))
        .is_err()
    {
        return;
    }
    if let Err(e) = send_frame(&mut conn, &Frame::Welcome { leader }).await {
        tracing::warn!(peer = %peer, error = %e, "Could not welcome node");
    } else {
        // Membership lasts as long as the connection.
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = recv_frame(&mut conn) => match frame {
                    Ok(Some(_)) => continue,
                    Ok(None) | Err(_) => break,
                },
            }
        }
    }
    let _ = registry.cast(RegistryMsg::Deregister { ip, endpoint });
}

/// Keep this worker announced to the leader at `convention_address`.
pub async fn announce_loop(
    convention_address: String,
    capabilities: Capabilities,
    node_address: String,
    shutdown: CancellationToken,
) {
    loop {
        match announce_once(&convention_address, &capabilities, &node_address, &shutdown).await {
            Ok(()) if shutdown.is_cancelled() => break,
            Ok(()) => tracing::warn!(
                convention = %convention_address,
                "Lost connection to the coordinator, reconnecting"
            ),
            Err(e) => tracing::debug!(
                convention = %convention_address,
                error = %e,
                "Coordinator not reachable yet"
            ),
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(ANNOUNCE_RETRY) => {}
        }
    }
}

async fn announce_once(
    convention_address: &str,
    capabilities: &Capabilities,
    node_address: &str,
    shutdown: &CancellationToken,
) -> Result<(), RuntimeError> {
    let stream = TcpStream::connect(convention_address).await?;
    let mut conn = framed(stream);
    send_frame(
        &mut conn,
        &Frame::Announce {
            capabilities: capabilities.clone(),
            node_address: node_address.to_string(),
        },
    )
    .await?;

    match recv_frame(&mut conn).await? {
        Some(Frame::Welcome { leader }) => {
            tracing::info!(leader = %leader, node = %node_address, "Joined convention");
        }
        Some(other) => {
            return Err(RuntimeError::Transport(format!(
                "expected welcome from leader, received {other:?}"
            )))
        }
        None => return Ok(()),
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            frame = recv_frame(&mut conn) => match frame {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return Ok(()),
            },
        }
    }
}
