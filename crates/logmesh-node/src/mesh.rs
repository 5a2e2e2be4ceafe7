//! WebSocket mesh transport.
//!
//! Accepts connections on one listener and dials configured seeds. Every
//! connection runs in its own task (see [`connection`](crate::connection)).
//! Topics joined here are advertised in each new handshake; peers sharing
//! none of them are turned away.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use logmesh_core::protocol::FrameError;
use logmesh_core::{DiscoveryKey, Log, PublicKey, Role};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, accept_async};
use tracing::{debug, error, info};

use crate::connection::{self, ConnectionOutcome};
use crate::dialer::{self, ReconnectConfig};
use crate::mux::Mux;
use crate::relay::Discovered;
use crate::replicator::ReplicationConfig;

/// How long connection and dialer tasks get to wind down on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Channel {0} is not open")]
    ChannelNotOpen(String),

    #[error("Connection closed")]
    Closed,
}

struct ConnectedPeer {
    node: PublicKey,
    mux: Arc<Mux>,
}

pub struct Mesh {
    node_key: PublicKey,
    local_log: Arc<dyn Log>,
    topics: RwLock<Vec<DiscoveryKey>>,
    discovered_tx: mpsc::Sender<Discovered>,
    reconnect: ReconnectConfig,
    replication: ReplicationConfig,
    local_addr: SocketAddr,
    peers: Mutex<HashMap<u64, ConnectedPeer>>,
    next_conn_id: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Mesh {
    /// Bind the listener and start accepting connections.
    pub async fn bind(
        listen_addr: &str,
        node_key: PublicKey,
        local_log: Arc<dyn Log>,
        discovered_tx: mpsc::Sender<Discovered>,
        reconnect: ReconnectConfig,
        replication: ReplicationConfig,
    ) -> Result<Arc<Self>, MeshError> {
        let bind_err = |source| MeshError::Bind {
            addr: listen_addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(listen_addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        info!("Mesh listening on {}", local_addr);

        let (shutdown_tx, _) = watch::channel(false);
        let mesh = Arc::new(Self {
            node_key,
            local_log,
            topics: RwLock::new(Vec::new()),
            discovered_tx,
            reconnect,
            replication,
            local_addr,
            peers: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        });

        let accept_loop = tokio::spawn(mesh.clone().accept_loop(listener));
        mesh.track(accept_loop);
        Ok(mesh)
    }

    /// Advertise `topic` in every handshake from now on.
    pub fn join(&self, topic: DiscoveryKey) {
        if let Ok(mut topics) = self.topics.write() {
            if !topics.contains(&topic) {
                debug!("Joined topic {}", topic);
                topics.push(topic);
            }
        }
    }

    pub fn topics(&self) -> Vec<DiscoveryKey> {
        self.topics.read().map(|t| t.clone()).unwrap_or_default()
    }

    /// Keep a connection to `url` up until shutdown.
    pub fn dial(self: &Arc<Self>, url: String) {
        let task = tokio::spawn(dialer::run(
            url,
            self.clone(),
            self.reconnect.clone(),
            self.subscribe_shutdown(),
        ));
        self.track(task);
    }

    pub fn node_key(&self) -> PublicKey {
        self.node_key
    }

    pub fn local_log(&self) -> Arc<dyn Log> {
        self.local_log.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn replication(&self) -> ReplicationConfig {
        self.replication
    }

    /// Node keys of every established connection. A peer connected twice
    /// appears twice.
    pub fn connected_peers(&self) -> Vec<PublicKey> {
        self.peers
            .lock()
            .map(|peers| peers.values().map(|p| p.node).collect())
            .unwrap_or_default()
    }

    /// Close every connection and stop accepting and dialing.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        info!("Shutting down mesh");

        let muxes: Vec<Arc<Mux>> = match self.peers.lock() {
            Ok(mut peers) => peers.drain().map(|(_, p)| p.mux).collect(),
            Err(_) => Vec::new(),
        };
        for mux in muxes {
            mux.shutdown().await;
        }

        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                abort.abort();
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub(crate) fn discovered_sender(&self) -> &mpsc::Sender<Discovered> {
        &self.discovered_tx
    }

    pub(crate) fn register_peer(&self, node: PublicKey, mux: Arc<Mux>) -> u64 {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut peers) = self.peers.lock() {
            peers.insert(id, ConnectedPeer { node, mux });
        }
        id
    }

    pub(crate) fn unregister_peer(&self, id: u64) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.remove(&id);
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(task);
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.subscribe_shutdown();
        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, addr)) => {
                        let task = tokio::spawn(self.clone().accept(stream, addr));
                        self.track(task);
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!("Accept loop stopped");
    }

    async fn accept(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let ws = match accept_async(MaybeTlsStream::Plain(stream)).await {
            Ok(ws) => ws,
            Err(e) => {
                // Port scanners connect and close without upgrading
                debug!("WebSocket upgrade failed for {}: {}", addr, e);
                return;
            }
        };

        debug!("New connection from {}", addr);
        match connection::run(ws, Role::Responder, self, addr.to_string()).await {
            Ok(ConnectionOutcome::SelfConnection) => debug!("Closed self connection from {}", addr),
            Ok(outcome) => debug!("Connection from {} ended: {:?}", addr, outcome),
            Err(e) => debug!("Connection from {} failed: {}", addr, e),
        }
    }
}
