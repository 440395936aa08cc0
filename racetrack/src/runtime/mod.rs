//! Actor runtime bootstrap.
//!
//! A process creates its runtime once (or joins the one already running) and
//! gets a [`RuntimeHandle`]. The handle knows the node's capabilities, the
//! node registry used for placement and the strategy catalog host actors on
//! this node use.
//!
//! ## Roles
//!
//! - local-only: loopback, always coordinator, no sockets
//! - coordinator: `local ip == coordinator ip`; runs the convention leader
//! - worker: announces itself to the leader and serves host placements

pub mod convention;
pub mod node;
pub mod registry;
pub mod shutdown;
pub mod transport;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use once_cell::sync::Lazy;
use racetrack_types::{Capabilities, Requirements, RuntimeSettings, Transport};
use ractor::{Actor, ActorRef};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::mechanic::StrategyCatalog;
use registry::{NodeEndpoint, NodeEntry, NodeRegistryActor, RegistryMsg};

pub use shutdown::{shutdown_with_retries, ShutdownOutcome, MAX_SHUTDOWN_INTERRUPTS};

pub const LOOPBACK_IP: &str = "127.0.0.1";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

static INSTALLED: Lazy<Mutex<Option<RuntimeHandle>>> = Lazy::new(|| Mutex::new(None));

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("{0}")]
    Setup(String),

    #[error(
        "Could not initialize the internal actor system on {address} ({source}). \
         Please check for leftover racetrack processes and terminate them."
    )]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("No actor runtime is running in this process.")]
    NotRunning,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("actor error: {0}")]
    Actor(String),

    #[error("could not encode frame: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapMode {
    /// Start a new runtime for this process.
    Create,
    /// Attach to the runtime this process already runs.
    Join,
}

#[derive(Clone)]
pub struct BootstrapParams {
    pub mode: BootstrapMode,
    pub prefer_local_only: bool,
    pub local_ip: Option<String>,
    pub coordinator_ip: Option<String>,
    pub transport: Transport,
    pub convention_port: u16,
    pub node_port: u16,
    pub catalog: Arc<dyn StrategyCatalog>,
}

impl BootstrapParams {
    pub fn local_only(catalog: Arc<dyn StrategyCatalog>) -> Self {
        let defaults = RuntimeSettings::default();
        Self::from_settings(&defaults, true, catalog)
    }

    pub fn from_settings(
        settings: &RuntimeSettings,
        prefer_local_only: bool,
        catalog: Arc<dyn StrategyCatalog>,
    ) -> Self {
        Self {
            mode: BootstrapMode::Create,
            prefer_local_only,
            local_ip: settings.node_ip.clone(),
            coordinator_ip: settings.coordinator_ip.clone(),
            transport: settings.transport,
            convention_port: settings.convention_port,
            node_port: settings.node_port,
            catalog,
        }
    }
}

/// Work out this node's capabilities. Pure, no sockets involved.
pub fn resolve_capabilities(params: &BootstrapParams) -> Result<Capabilities, RuntimeError> {
    if params.prefer_local_only {
        return Ok(Capabilities {
            coordinator: true,
            ip: LOOPBACK_IP.to_string(),
            convention_address: format!("{LOOPBACK_IP}:{}", params.convention_port),
        });
    }
    if !params.transport.is_network_capable() {
        return Err(RuntimeError::Setup(format!(
            "The '{}' transport cannot reach other machines. Use 'tcp' to benchmark remote hosts.",
            params.transport
        )));
    }
    let local_ip = params.local_ip.as_deref().ok_or_else(|| {
        RuntimeError::Setup("A node IP is required for a networked runtime (--node-ip).".to_string())
    })?;
    let coordinator_ip = params.coordinator_ip.as_deref().ok_or_else(|| {
        RuntimeError::Setup(
            "A coordinator IP is required for a networked runtime (--coordinator-ip).".to_string(),
        )
    })?;

    Ok(Capabilities {
        coordinator: local_ip == coordinator_ip,
        ip: local_ip.to_string(),
        convention_address: format!("{coordinator_ip}:{}", params.convention_port),
    })
}

pub async fn bootstrap(params: BootstrapParams) -> Result<RuntimeHandle, RuntimeError> {
    match params.mode {
        BootstrapMode::Join => join(),
        BootstrapMode::Create => {
            let handle = create(params).await?;
            install(handle.clone());
            Ok(handle)
        }
    }
}

/// The runtime this process created earlier.
pub fn join() -> Result<RuntimeHandle, RuntimeError> {
    INSTALLED
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
        .ok_or(RuntimeError::NotRunning)
}

fn install(handle: RuntimeHandle) {
    *INSTALLED
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
}

async fn create(params: BootstrapParams) -> Result<RuntimeHandle, RuntimeError> {
    let mut capabilities = resolve_capabilities(&params)?;
    let networked = !params.prefer_local_only;
    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();
    let mut convention_address = None;
    let mut convention_listener = None;
    let mut node_address = None;

    if networked {
        if capabilities.coordinator {
            let listener = bind(&capabilities.convention_address).await?;
            let bound = listener.local_addr()?;
            capabilities.convention_address = bound.to_string();
            convention_address = Some(bound);
            convention_listener = Some(listener);
        } else {
            let listener = bind(&format!("{}:{}", capabilities.ip, params.node_port)).await?;
            node_address = Some(listener.local_addr()?);
            tasks.push(tokio::spawn(node::serve_host_placements(
                listener,
                params.catalog.clone(),
                shutdown.clone(),
            )));
        }
    }

    let (registry, _) = Actor::spawn(None, NodeRegistryActor, ())
        .await
        .map_err(|e| RuntimeError::Actor(e.to_string()))?;
    registry
        .cast(RegistryMsg::Register(NodeEntry {
            capabilities: capabilities.clone(),
            endpoint: NodeEndpoint::Local,
        }))
        .map_err(|e| RuntimeError::Actor(e.to_string()))?;

    if let Some(listener) = convention_listener {
        tasks.push(tokio::spawn(convention::serve_convention(
            listener,
            registry.clone(),
            shutdown.clone(),
        )));
    }
    if let Some(addr) = node_address {
        tasks.push(tokio::spawn(convention::announce_loop(
            capabilities.convention_address.clone(),
            capabilities.clone(),
            addr.to_string(),
            shutdown.clone(),
        )));
    }

    tracing::info!(
        ip = %capabilities.ip,
        coordinator = capabilities.coordinator,
        convention = %capabilities.convention_address,
        networked,
        "Actor runtime started"
    );

    Ok(RuntimeHandle {
        inner: Arc::new(RuntimeInner {
            capabilities,
            transport: if networked {
                params.transport
            } else {
                Transport::Local
            },
            registry,
            catalog: params.catalog,
            shutdown,
            convention_address,
            node_address,
            tasks: Mutex::new(tasks),
        }),
    })
}

async fn bind(address: &str) -> Result<TcpListener, RuntimeError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| RuntimeError::Bind {
            address: address.to_string(),
            source,
        })
}

struct RuntimeInner {
    capabilities: Capabilities,
    transport: Transport,
    registry: ActorRef<RegistryMsg>,
    catalog: Arc<dyn StrategyCatalog>,
    shutdown: CancellationToken,
    convention_address: Option<SocketAddr>,
    node_address: Option<SocketAddr>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Cheap to clone; all clones refer to the same runtime.
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("capabilities", &self.inner.capabilities)
            .field("transport", &self.inner.transport)
            .finish()
    }
}

impl RuntimeHandle {
    /// A fresh local-only runtime, not installed for [`join`].
    pub async fn local(catalog: Arc<dyn StrategyCatalog>) -> Result<Self, RuntimeError> {
        create(BootstrapParams::local_only(catalog)).await
    }

    /// A fresh runtime from explicit parameters, not installed for [`join`].
    pub async fn standalone(params: BootstrapParams) -> Result<Self, RuntimeError> {
        create(params).await
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.inner.capabilities
    }

    pub fn is_networked(&self) -> bool {
        self.inner.transport.is_network_capable()
    }

    pub fn catalog(&self) -> Arc<dyn StrategyCatalog> {
        self.inner.catalog.clone()
    }

    pub fn registry(&self) -> ActorRef<RegistryMsg> {
        self.inner.registry.clone()
    }

    /// Where the convention leader listens, on the coordinator node.
    pub fn convention_address(&self) -> Option<SocketAddr> {
        self.inner.convention_address
    }

    /// Where host placements are served, on worker nodes.
    pub fn node_address(&self) -> Option<SocketAddr> {
        self.inner.node_address
    }

    /// Fires when the runtime shuts down, including on a remote request.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub async fn resolve(
        &self,
        requirements: Requirements,
    ) -> Result<Option<NodeEntry>, RuntimeError> {
        ractor::call!(self.inner.registry, |reply| RegistryMsg::Resolve {
            requirements,
            reply
        })
        .map_err(|e| RuntimeError::Actor(e.to_string()))
    }

    pub async fn nodes(&self) -> Result<Vec<NodeEntry>, RuntimeError> {
        ractor::call!(self.inner.registry, |reply| RegistryMsg::List { reply })
            .map_err(|e| RuntimeError::Actor(e.to_string()))
    }

    /// Stop listeners and the registry. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = self
            .inner
            .tasks
            .lock()
            .map(|mut tasks| tasks.drain(..).collect())
            .unwrap_or_default();
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!("Runtime task did not stop in time, aborting it");
                abort.abort();
            }
        }
        let _ = self
            .inner
            .registry
            .stop_and_wait(Some("runtime shutdown".to_string()), Some(SHUTDOWN_GRACE))
            .await;

        let mut installed = INSTALLED
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if installed
            .as_ref()
            .is_some_and(|h| Arc::ptr_eq(&h.inner, &self.inner))
        {
            *installed = None;
        }
        tracing::info!("Actor runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanic::BuiltinCatalog;

    static INSTALL_MUTEX: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

    fn params() -> BootstrapParams {
        BootstrapParams {
            mode: BootstrapMode::Create,
            prefer_local_only: false,
            local_ip: Some("10.0.0.5".to_string()),
            coordinator_ip: Some("10.0.0.1".to_string()),
            transport: Transport::Tcp,
            convention_port: 1900,
            node_port: 1901,
            catalog: Arc::new(BuiltinCatalog),
        }
    }

    #[test]
    fn test_local_only_forces_loopback_coordinator() {
        let caps = resolve_capabilities(&BootstrapParams {
            prefer_local_only: true,
            transport: Transport::Local,
            ..params()
        })
        .unwrap();
        assert!(caps.coordinator);
        assert_eq!(caps.ip, "127.0.0.1");
        assert_eq!(caps.convention_address, "127.0.0.1:1900");
    }

    #[test]
    fn test_worker_capabilities() {
        let caps = resolve_capabilities(&params()).unwrap();
        assert!(!caps.coordinator);
        assert_eq!(caps.ip, "10.0.0.5");
        assert_eq!(caps.convention_address, "10.0.0.1:1900");

        let caps = resolve_capabilities(&BootstrapParams {
            local_ip: Some("10.0.0.1".to_string()),
            ..params()
        })
        .unwrap();
        assert!(caps.coordinator);
    }

    #[test]
    fn test_networked_runtime_needs_both_ips_and_tcp() {
        let missing_node = resolve_capabilities(&BootstrapParams {
            local_ip: None,
            ..params()
        });
        assert!(matches!(missing_node, Err(RuntimeError::Setup(_))));

        let missing_coordinator = resolve_capabilities(&BootstrapParams {
            coordinator_ip: None,
            ..params()
        });
        assert!(matches!(missing_coordinator, Err(RuntimeError::Setup(_))));

        let local_transport = resolve_capabilities(&BootstrapParams {
            transport: Transport::Local,
            ..params()
        });
        assert!(matches!(local_transport, Err(RuntimeError::Setup(_))));
    }

    #[tokio::test]
    async fn test_join_attaches_to_created_runtime() {
        let _lock = INSTALL_MUTEX.lock().await;
        let handle = bootstrap(BootstrapParams::local_only(Arc::new(BuiltinCatalog)))
            .await
            .unwrap();
        let joined = bootstrap(BootstrapParams {
            mode: BootstrapMode::Join,
            ..BootstrapParams::local_only(Arc::new(BuiltinCatalog))
        })
        .await
        .unwrap();
        assert_eq!(joined.capabilities(), handle.capabilities());

        handle.shutdown().await;
        assert!(matches!(join(), Err(RuntimeError::NotRunning)));
    }

    #[tokio::test]
    async fn test_second_leader_on_same_address_reports_leftovers() {
        let first = RuntimeHandle::standalone(BootstrapParams {
            local_ip: Some("127.0.0.1".to_string()),
            coordinator_ip: Some("127.0.0.1".to_string()),
            convention_port: 0,
            ..params()
        })
        .await
        .unwrap();
        let taken = first.convention_address().unwrap().port();

        let second = RuntimeHandle::standalone(BootstrapParams {
            local_ip: Some("127.0.0.1".to_string()),
            coordinator_ip: Some("127.0.0.1".to_string()),
            convention_port: taken,
            ..params()
        })
        .await;
        let err = second.unwrap_err();
        assert!(matches!(err, RuntimeError::Bind { .. }));
        assert!(err.to_string().contains("leftover racetrack processes"));

        first.shutdown().await;
    }

    #[tokio::test]
    async fn test_local_runtime_registers_itself() {
        let handle = RuntimeHandle::local(Arc::new(BuiltinCatalog)).await.unwrap();
        assert!(!handle.is_networked());
        let entry = handle
            .resolve(Requirements::new().coordinator(true))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.endpoint, NodeEndpoint::Local);
        assert_eq!(entry.capabilities.ip, "127.0.0.1");
        handle.shutdown().await;
    }
}
