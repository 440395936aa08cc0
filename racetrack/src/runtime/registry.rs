//! NodeRegistryActor - which nodes exist and where to reach them.
//!
//! Placement requests are resolved here by exact capability match. The local
//! node registers itself at bootstrap; remote nodes are added and removed by
//! the convention leader as they connect and disconnect.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use racetrack_types::{Capabilities, Requirements};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEndpoint {
    /// This process; actors are spawned in-process.
    Local,
    /// Host actors are served by the node server at this address.
    Remote(SocketAddr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub capabilities: Capabilities,
    pub endpoint: NodeEndpoint,
}

#[derive(Debug)]
pub enum RegistryMsg {
    Register(NodeEntry),
    /// Removes the node only if it is still registered with `endpoint`.
    Deregister {
        ip: String,
        endpoint: NodeEndpoint,
    },
    Resolve {
        requirements: Requirements,
        reply: RpcReplyPort<Option<NodeEntry>>,
    },
    List {
        reply: RpcReplyPort<Vec<NodeEntry>>,
    },
}

#[derive(Debug, Default)]
pub struct NodeRegistryActor;

#[derive(Debug, Default)]
pub struct NodeRegistryState {
    nodes: BTreeMap<String, NodeEntry>,
}

#[async_trait]
impl Actor for NodeRegistryActor {
    type Msg = RegistryMsg;
    type State = NodeRegistryState;
    type Arguments = ();

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!(actor_id = %myself.get_id(), "NodeRegistryActor starting");
        Ok(NodeRegistryState::default())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            RegistryMsg::Register(entry) => {
                tracing::info!(
                    ip = %entry.capabilities.ip,
                    coordinator = entry.capabilities.coordinator,
                    endpoint = ?entry.endpoint,
                    "Node joined"
                );
                state.nodes.insert(entry.capabilities.ip.clone(), entry);
            }
            RegistryMsg::Deregister { ip, endpoint } => {
                let registered = state
                    .nodes
                    .get(&ip)
                    .is_some_and(|entry| entry.endpoint == endpoint);
                if registered {
                    state.nodes.remove(&ip);
                    tracing::info!(ip = %ip, "Node left");
                }
            }
            RegistryMsg::Resolve {
                requirements,
                reply,
            } => {
                let found = state
                    .nodes
                    .values()
                    .find(|entry| requirements.is_satisfied_by(&entry.capabilities))
                    .cloned();
                tracing::debug!(
                    requirements = %requirements,
                    found = found.is_some(),
                    "Resolved placement"
                );
                let _ = reply.send(found);
            }
            RegistryMsg::List { reply } => {
                let _ = reply.send(state.nodes.values().cloned().collect());
            }
        }
        Ok(())
    }
}
