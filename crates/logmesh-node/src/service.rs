//! The service facade.
//!
//! Everything the RPC surface exposes goes through [`Service`]. Before
//! `init` there is no runtime and every operation but `status`/`health`
//! fails with `NotInitialized`. `init` builds the [`NodeRuntime`], which
//! owns the local log, the discovered-log registry and the mesh until
//! `shutdown`.

use std::path::PathBuf;
use std::sync::Arc;

use logmesh_core::discovery::SYNC_PROTOCOL;
use logmesh_core::{
    CodecError, DiscoveredLogs, DiscoveryKey, Keypair, Log, LogEntryWire, LogError, LogStore,
    LogValue, MembershipCoordinator, MembershipError, PublicKey, QueryEngine, Writer, encode,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::mesh::{Mesh, MeshError};
use crate::relay::{DISCOVERY_CHANNEL_CAPACITY, Registrar};
use crate::remote::RemoteLogs;
use crate::store::NodeStore;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Service is not initialized")]
    NotInitialized,

    #[error("Service is already initialized")]
    AlreadyInitialized,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("No logPrivateKey given and no log recorded in the data directory")]
    NoRecordedLog,

    #[error("Log is not writable")]
    NotWritable,

    #[error("Invalid entry: {0}")]
    Codec(#[from] CodecError),

    #[error("Log error: {0}")]
    Log(LogError),

    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),
}

impl From<LogError> for ServiceError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::NotWritable => Self::NotWritable,
            other => Self::Log(other),
        }
    }
}

impl From<MembershipError> for ServiceError {
    fn from(err: MembershipError) -> Self {
        match err {
            MembershipError::NotWritable => Self::NotWritable,
            MembershipError::Log(e) => Self::Log(e),
        }
    }
}

impl ServiceError {
    /// Message safe to hand to callers: storage and network detail stays in
    /// the server log.
    pub fn public_message(&self) -> String {
        match self {
            Self::Log(_) => "log operation failed".to_string(),
            Self::Mesh(_) => "mesh unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Parameters of `init`.
#[derive(Debug, Clone)]
pub struct InitRequest {
    /// Hex seed (or seed ‖ public) of this node's identity
    pub node_private_key: String,
    /// Hex seed of the log; `None` reopens the log recorded in `data_dir`
    pub log_private_key: Option<String>,
    /// Found the log: write as the log key and admit this node as indexer
    pub bootstrap: bool,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub initialized: bool,
    pub node_key: Option<PublicKey>,
    pub log_key: Option<PublicKey>,
    pub writable: bool,
    pub discovered_logs: usize,
    pub connected_peers: usize,
}

/// Process-scoped state built by `init`.
pub struct NodeRuntime {
    node_key: PublicKey,
    log: Arc<dyn Log>,
    registry: Arc<DiscoveredLogs>,
    membership: MembershipCoordinator,
    engine: QueryEngine,
    mesh: Arc<Mesh>,
    registrar: JoinHandle<()>,
}

impl NodeRuntime {
    pub fn node_key(&self) -> PublicKey {
        self.node_key
    }

    pub fn log(&self) -> &Arc<dyn Log> {
        &self.log
    }

    pub fn registry(&self) -> &Arc<DiscoveredLogs> {
        &self.registry
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    async fn shutdown(&self) {
        self.mesh.shutdown().await;
        self.registrar.abort();
    }
}

pub struct Service {
    config: Config,
    runtime: RwLock<Option<Arc<NodeRuntime>>>,
}

impl Service {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            runtime: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open or create the local log, join the mesh, and return the log key.
    pub async fn init(&self, request: InitRequest) -> Result<PublicKey> {
        let mut slot = self.runtime.write().await;
        if slot.is_some() {
            return Err(ServiceError::AlreadyInitialized);
        }

        let node = Keypair::from_secret_hex(&request.node_private_key)
            .map_err(|e| ServiceError::InvalidKey(format!("nodePrivateKey: {}", e)))?;
        let node_key = node.public_key();

        let remotes = Arc::new(RemoteLogs::new(self.config.remote_read_timeout()));
        let store = Arc::new(NodeStore::new(&request.data_dir, remotes.clone()));

        let log_key = match &request.log_private_key {
            Some(secret) => Keypair::from_secret_hex(secret)
                .map_err(|e| ServiceError::InvalidKey(format!("logPrivateKey: {}", e)))?
                .public_key(),
            None => store
                .recorded_log()
                .await?
                .ok_or(ServiceError::NoRecordedLog)?,
        };

        // A founder writes as the log key; everyone else waits to be admitted
        let local_writer = if request.bootstrap { log_key } else { node_key };
        let log = store.open_local(log_key, local_writer).await?;

        let membership = MembershipCoordinator::new(log.clone());
        if request.bootstrap && !is_indexer(&log.active_writers(), &node_key) {
            membership.bootstrap(node_key).await?;
        }
        log.update().await?;

        let registry = Arc::new(DiscoveredLogs::new());
        let (discovered_tx, discovered_rx) = mpsc::channel(DISCOVERY_CHANNEL_CAPACITY);
        let registrar =
            Registrar::new(store.clone(), remotes, registry.clone()).spawn(discovered_rx);

        let mesh = match Mesh::bind(
            &self.config.mesh_listen,
            node_key,
            log.clone(),
            discovered_tx,
            self.config.reconnect_config(),
            self.config.replication_config(),
        )
        .await
        {
            Ok(mesh) => mesh,
            Err(e) => {
                registrar.abort();
                return Err(e.into());
            }
        };
        mesh.join(log.discovery_key());
        mesh.join(DiscoveryKey::for_protocol(SYNC_PROTOCOL));
        for seed in &self.config.seeds {
            mesh.dial(seed.clone());
        }

        info!(
            "Initialized node {} on log {} (writable: {}, data dir: {:?})",
            node_key,
            log_key,
            log.writable(),
            request.data_dir
        );
        if let Some(advertise) = &self.config.advertise {
            info!("Reachable at {}", advertise);
        }

        *slot = Some(Arc::new(NodeRuntime {
            node_key,
            log,
            registry,
            membership,
            engine: QueryEngine::new(self.config.max_alias_hops),
            mesh,
            registrar,
        }));
        Ok(log_key)
    }

    /// Store `entry` under its hash and point each alias at it.
    pub async fn update(&self, entry: LogEntryWire) -> Result<()> {
        let runtime = self.runtime().await?;
        if !runtime.log.writable() {
            return Err(ServiceError::NotWritable);
        }

        let encoded = encode(entry)?;
        let hash = encoded.record.hash.clone();
        runtime
            .log
            .put(&hash, LogValue::Data(encoded.record))
            .await?;

        for alias in encoded.aliases {
            if alias == hash {
                warn!("Skipping alias {:?}: it is the entry's own hash", alias);
                continue;
            }
            runtime
                .log
                .put(&alias, LogValue::Alias(hash.clone()))
                .await?;
        }
        Ok(())
    }

    /// Entries found under `keys` in the local and every discovered log.
    pub async fn query(&self, keys: &[String]) -> Result<Vec<LogEntryWire>> {
        let runtime = self.runtime().await?;
        match runtime
            .engine
            .query(runtime.log.as_ref(), &runtime.registry, keys)
            .await
        {
            Ok(entries) => Ok(entries),
            Err(e) => {
                error!("Query failed: {}", e);
                Ok(Vec::new())
            }
        }
    }

    /// Admit every node of `nodes` that is not already a writer.
    pub async fn update_nodes(&self, nodes: &[PublicKey]) -> Result<()> {
        let runtime = self.runtime().await?;
        runtime.membership.add_missing_writers(nodes).await?;
        Ok(())
    }

    pub async fn remove_node(&self, node: PublicKey) -> Result<()> {
        let runtime = self.runtime().await?;
        runtime.membership.remove_writer(node).await?;
        Ok(())
    }

    pub async fn writers(&self) -> Result<Vec<Writer>> {
        let runtime = self.runtime().await?;
        Ok(runtime.membership.list_active_writers())
    }

    pub async fn status(&self) -> Status {
        match self.runtime.read().await.as_ref() {
            Some(runtime) => Status {
                initialized: true,
                node_key: Some(runtime.node_key),
                log_key: Some(runtime.log.key()),
                writable: runtime.log.writable(),
                discovered_logs: runtime.registry.len(),
                connected_peers: runtime.mesh.connected_peers().len(),
            },
            None => Status {
                initialized: false,
                node_key: None,
                log_key: None,
                writable: false,
                discovered_logs: 0,
                connected_peers: 0,
            },
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.runtime.read().await.is_some()
    }

    /// The runtime built by `init`.
    pub async fn runtime(&self) -> Result<Arc<NodeRuntime>> {
        self.runtime
            .read()
            .await
            .clone()
            .ok_or(ServiceError::NotInitialized)
    }

    /// Tear the runtime down. The service can be initialized again after.
    pub async fn shutdown(&self) {
        let runtime = self.runtime.write().await.take();
        if let Some(runtime) = runtime {
            runtime.shutdown().await;
            info!("Node {} shut down", runtime.node_key);
        }
    }
}

fn is_indexer(writers: &[Writer], key: &PublicKey) -> bool {
    writers.iter().any(|w| w.key == *key && w.indexer)
}
