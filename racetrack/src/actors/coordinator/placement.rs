//! Where host actors go.

use std::time::{Duration, Instant};

use racetrack_types::{
    FailureKind, HostDescriptor, LifecycleReply, RaceConfig, Requirements, RunMode,
};
use ractor::{Actor, ActorRef};

use super::protocol::CoordinatorMsg;
use crate::actors::host::{HostActor, HostArguments, HostMsg};
use crate::actors::stop_actor;
use crate::actors::remote_host::{RemoteHostActor, RemoteHostArguments};
use crate::console::Console;
use crate::runtime::registry::{NodeEndpoint, NodeEntry};
use crate::runtime::{RuntimeError, RuntimeHandle};

const NODE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const NODE_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    #[error("No target hosts are configured for this race.")]
    NoTargetHosts,

    #[error(
        "Target host {host} is on another machine but racetrack runs without a network \
         transport. Start 'racetrackd start --node-ip <ip> --coordinator-ip <ip>' on every \
         machine and pass --coordinator-ip and --node-ip to racetrack."
    )]
    NotNetworked { host: String },

    #[error("No coordinator node is registered in the actor runtime.")]
    NoCoordinator,

    #[error("Node {ip} did not join within {timeout_secs} seconds.")]
    NodeTimeout { ip: String, timeout_secs: u64 },

    #[error("Could not start host actor for {target}: {reason}")]
    Spawn { target: String, reason: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl PlacementError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PlacementError::NoTargetHosts
            | PlacementError::NotNetworked { .. }
            | PlacementError::NoCoordinator => FailureKind::Setup,
            PlacementError::NodeTimeout { .. }
            | PlacementError::Spawn { .. }
            | PlacementError::Runtime(_) => FailureKind::Launch,
        }
    }

    pub fn into_reply(self) -> LifecycleReply {
        let cause = match &self {
            PlacementError::Runtime(e) => e.to_string(),
            _ => String::new(),
        };
        LifecycleReply::failure(self.kind(), self.to_string(), cause)
    }
}

/// A host actor placed for one target.
#[derive(Debug, Clone)]
pub struct PlacedHost {
    /// The target this actor is responsible for; `None` in external mode,
    /// where one actor attaches to all targets.
    pub target: Option<HostDescriptor>,
    pub node_ip: String,
    pub actor: ActorRef<HostMsg>,
}

/// Place one host actor per distinct target host, linked to `supervisor`.
///
/// Nothing is left running on error.
pub async fn place_hosts(
    supervisor: &ActorRef<CoordinatorMsg>,
    runtime: &RuntimeHandle,
    console: &Console,
    config: &RaceConfig,
    mode: RunMode,
) -> Result<Vec<PlacedHost>, PlacementError> {
    if mode == RunMode::External {
        let entry = runtime
            .resolve(Requirements::new().coordinator(true))
            .await?
            .ok_or(PlacementError::NoCoordinator)?;
        let actor = spawn_on(supervisor, runtime, &entry, "external cluster").await?;
        return Ok(vec![PlacedHost {
            target: None,
            node_ip: entry.capabilities.ip,
            actor,
        }]);
    }

    let mut targets: Vec<&HostDescriptor> = Vec::new();
    for host in &config.client.target_hosts {
        if !targets.contains(&host) {
            targets.push(host);
        }
    }
    if targets.is_empty() {
        return Err(PlacementError::NoTargetHosts);
    }

    let mut placed = Vec::with_capacity(targets.len());
    for target in targets {
        match place_one(supervisor, runtime, console, config, target).await {
            Ok(host) => placed.push(host),
            Err(e) => {
                release(placed).await;
                return Err(e);
            }
        }
    }
    Ok(placed)
}

async fn place_one(
    supervisor: &ActorRef<CoordinatorMsg>,
    runtime: &RuntimeHandle,
    console: &Console,
    config: &RaceConfig,
    target: &HostDescriptor,
) -> Result<PlacedHost, PlacementError> {
    let entry = if target.is_local() {
        runtime
            .resolve(Requirements::new().coordinator(true))
            .await?
            .ok_or(PlacementError::NoCoordinator)?
    } else {
        if !runtime.is_networked() {
            return Err(PlacementError::NotNetworked {
                host: target.host.clone(),
            });
        }
        let timeout = Duration::from_secs(config.runtime.node_wait_timeout_secs);
        await_node(runtime, console, &target.host, timeout).await?
    };

    let actor = spawn_on(supervisor, runtime, &entry, &target.to_string()).await?;
    tracing::info!(
        host = %target,
        node_ip = %entry.capabilities.ip,
        endpoint = ?entry.endpoint,
        "Placed host actor"
    );
    Ok(PlacedHost {
        target: Some(target.clone()),
        node_ip: entry.capabilities.ip,
        actor,
    })
}

/// Wait for the node advertising `ip` to join the runtime.
pub async fn await_node(
    runtime: &RuntimeHandle,
    console: &Console,
    ip: &str,
    timeout: Duration,
) -> Result<NodeEntry, PlacementError> {
    let started = Instant::now();
    let mut last_progress = started;
    loop {
        if let Some(entry) = runtime.resolve(Requirements::new().ip(ip)).await? {
            return Ok(entry);
        }
        if started.elapsed() >= timeout {
            return Err(PlacementError::NodeTimeout {
                ip: ip.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
        if last_progress.elapsed() >= NODE_PROGRESS_INTERVAL {
            console.info(format!("Still waiting for node {ip} to join..."));
            last_progress = Instant::now();
        }
        tokio::time::sleep(NODE_POLL_INTERVAL).await;
    }
}

async fn spawn_on(
    supervisor: &ActorRef<CoordinatorMsg>,
    runtime: &RuntimeHandle,
    entry: &NodeEntry,
    target: &str,
) -> Result<ActorRef<HostMsg>, PlacementError> {
    let spawned = match entry.endpoint {
        NodeEndpoint::Local => {
            Actor::spawn_linked(
                None,
                HostActor,
                HostArguments {
                    catalog: runtime.catalog(),
                    single_machine: true,
                },
                supervisor.get_cell(),
            )
            .await
        }
        NodeEndpoint::Remote(address) => {
            Actor::spawn_linked(
                None,
                RemoteHostActor,
                RemoteHostArguments {
                    address,
                    node_ip: entry.capabilities.ip.clone(),
                },
                supervisor.get_cell(),
            )
            .await
        }
    };
    spawned
        .map(|(actor, _)| actor)
        .map_err(|e| PlacementError::Spawn {
            target: target.to_string(),
            reason: e.to_string(),
        })
}

/// Stop every placed host and wait for it.
pub async fn release(hosts: Vec<PlacedHost>) {
    for host in hosts {
        stop_actor(&host.actor, "race finished").await;
    }
}
