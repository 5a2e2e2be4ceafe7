//! Read-only handles on logs served by peers.
//!
//! A [`RemoteLog`] owns no data. Every `get` is a request over the
//! `logmesh.log` channel of one of its [`Route`]s, bounded by the read
//! timeout. Routes come and go with connections; a handle without a live
//! route fails its reads, which the query engine tolerates.
//!
//! A [`Route`] is also the [`ReplicationPeer`] for a peer that serves the
//! same log as this node: pulls go over the same channel as reads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use logmesh_core::log::Result;
use logmesh_core::protocol::{
    LOG_PROTOCOL, LogMessage, LogRequest, LogResponse, MAX_PULL_BATCH, decode_records,
};
use logmesh_core::{
    Heads, Log, LogError, LogValue, MembershipOp, PublicKey, ReplicatedRecord, ReplicationPeer,
    Writer,
};
use tokio::sync::oneshot;
use tracing::debug;

use crate::mux::Mux;

/// Client side of the `logmesh.log` channel on one connection.
pub struct Route {
    node: PublicKey,
    mux: Arc<Mux>,
    pending: Mutex<HashMap<u64, oneshot::Sender<LogResponse>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    /// Bound on pulls; reads carry their own
    pull_timeout: Duration,
}

impl Route {
    pub fn new(node: PublicKey, mux: Arc<Mux>, pull_timeout: Duration) -> Self {
        Self {
            node,
            mux,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            pull_timeout,
        }
    }

    /// Node at the other end.
    pub fn node(&self) -> PublicKey {
        self.node
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.mux.is_closed()
    }

    /// Read `key` from `log` on the peer.
    pub async fn get(&self, log: PublicKey, key: &str, timeout: Duration) -> Result<Option<LogValue>> {
        let key = key.to_string();
        match self
            .request(|id| LogRequest::Get { id, log, key }, timeout)
            .await?
        {
            LogResponse::Value { value, .. } => Ok(Some(value)),
            LogResponse::NotFound { .. } => Ok(None),
            LogResponse::Error { message, .. } => Err(LogError::Unavailable(message)),
            other => Err(unexpected(&other)),
        }
    }

    /// Send the request built for a fresh id and wait for its response.
    async fn request(
        &self,
        build: impl FnOnce(u64) -> LogRequest,
        timeout: Duration,
    ) -> Result<LogResponse> {
        if self.is_closed() {
            return Err(LogError::Unavailable(format!("route to {} closed", self.node)));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.with_pending(|pending| pending.insert(id, tx));

        let sent = match LogMessage::Request(build(id)).encode() {
            Ok(bytes) => self
                .mux
                .send(LOG_PROTOCOL, bytes)
                .await
                .map_err(|e| LogError::Unavailable(e.to_string())),
            Err(e) => Err(LogError::Unavailable(e.to_string())),
        };
        if let Err(e) = sent {
            self.with_pending(|pending| pending.remove(&id));
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                self.with_pending(|pending| pending.remove(&id));
                Err(LogError::Timeout)
            }
            Ok(Err(_)) => Err(LogError::Unavailable(format!(
                "connection to {} closed",
                self.node
            ))),
            Ok(Ok(response)) => Ok(response),
        }
    }

    /// Hand a response to the request waiting for it.
    pub fn resolve(&self, response: LogResponse) {
        let id = response.id();
        match self.with_pending(|pending| pending.remove(&id)) {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!("Response {} from {} matches no request", id, self.node),
        }
    }

    /// Fail every waiting request and refuse new ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.with_pending(|pending| pending.clear());
    }

    fn with_pending<T>(
        &self,
        f: impl FnOnce(&mut HashMap<u64, oneshot::Sender<LogResponse>>) -> T,
    ) -> T {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut pending)
    }
}

fn unexpected(response: &LogResponse) -> LogError {
    LogError::Unavailable(format!("unexpected response {}", response.id()))
}

#[async_trait]
impl ReplicationPeer for Route {
    async fn pull(&self, log: PublicKey, have: &Heads) -> Result<Vec<ReplicatedRecord>> {
        let have = have.clone();
        match self
            .request(|id| LogRequest::Pull { id, log, have }, self.pull_timeout)
            .await?
        {
            LogResponse::Records { records, .. } => decode_records(&records)
                .map_err(|e| LogError::Corrupt(format!("records from {}: {}", self.node, e))),
            LogResponse::Error { message, .. } => Err(LogError::Unavailable(message)),
            other => Err(unexpected(&other)),
        }
    }
}

/// Lazy read-only view of a peer's log.
pub struct RemoteLog {
    key: PublicKey,
    routes: RwLock<Vec<Arc<Route>>>,
    timeout: Duration,
}

impl RemoteLog {
    pub fn new(key: PublicKey, timeout: Duration) -> Self {
        Self {
            key,
            routes: RwLock::new(Vec::new()),
            timeout,
        }
    }

    /// Add a connection over which the log can be read. Closed routes are
    /// pruned on the way.
    pub fn add_route(&self, route: Arc<Route>) {
        if let Ok(mut routes) = self.routes.write() {
            routes.retain(|r| !r.is_closed());
            if !routes.iter().any(|r| Arc::ptr_eq(r, &route)) {
                routes.push(route);
            }
        }
    }

    /// Live routes.
    pub fn route_count(&self) -> usize {
        self.live_routes().len()
    }

    fn live_routes(&self) -> Vec<Arc<Route>> {
        self.routes
            .read()
            .map(|routes| routes.iter().filter(|r| !r.is_closed()).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Log for RemoteLog {
    fn key(&self) -> PublicKey {
        self.key
    }

    fn writable(&self) -> bool {
        false
    }

    /// Membership of a peer's log is not visible through a read handle.
    fn active_writers(&self) -> Vec<Writer> {
        Vec::new()
    }

    async fn get(&self, key: &str) -> Result<Option<LogValue>> {
        let mut last_err = LogError::Unavailable(format!("no route to log {}", self.key));

        for route in self.live_routes() {
            match route.get(self.key, key, self.timeout).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!("Read of {:?} via {} failed: {}", key, route.node(), e);
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    async fn put(&self, _key: &str, _value: LogValue) -> Result<()> {
        Err(LogError::ReadOnly)
    }

    async fn append_membership(&self, _op: MembershipOp) -> Result<()> {
        Err(LogError::ReadOnly)
    }

    /// Merging happens on the peer that serves the log.
    async fn update(&self) -> Result<()> {
        Ok(())
    }

    /// Nothing is held locally.
    fn heads(&self) -> Heads {
        Heads::new()
    }

    fn records_since(&self, _have: &Heads, _limit: usize) -> Result<Vec<ReplicatedRecord>> {
        Ok(Vec::new())
    }

    async fn ingest(&self, _records: Vec<ReplicatedRecord>) -> Result<usize> {
        Err(LogError::ReadOnly)
    }

    /// Reads already go to the peer.
    async fn replicate(&self, _peer: &dyn ReplicationPeer) -> Result<usize> {
        Ok(0)
    }
}

/// Every remote log handle this node holds, one per log key.
pub struct RemoteLogs {
    handles: Mutex<HashMap<PublicKey, Arc<RemoteLog>>>,
    timeout: Duration,
}

impl RemoteLogs {
    pub fn new(timeout: Duration) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Handle for `key`, created on first use.
    pub fn handle(&self, key: PublicKey) -> Arc<RemoteLog> {
        let mut handles = match self.handles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handles
            .entry(key)
            .or_insert_with(|| Arc::new(RemoteLog::new(key, self.timeout)))
            .clone()
    }

    pub fn add_route(&self, key: PublicKey, route: Arc<Route>) {
        self.handle(key).add_route(route);
    }
}

/// Answer a peer's request against the log this node serves.
pub async fn serve_request(local: &dyn Log, request: LogRequest) -> LogResponse {
    let (id, log) = match &request {
        LogRequest::Get { id, log, .. } | LogRequest::Pull { id, log, .. } => (*id, *log),
    };
    if log != local.key() {
        return LogResponse::Error {
            id,
            message: format!("log {} is not served here", log),
        };
    }

    match request {
        LogRequest::Pull { have, .. } => {
            let served = local
                .records_since(&have, MAX_PULL_BATCH)
                .and_then(|records| {
                    LogResponse::records(id, &records)
                        .map_err(|e| LogError::Corrupt(e.to_string()))
                });
            served.unwrap_or_else(|e| LogResponse::Error {
                id,
                message: e.to_string(),
            })
        }
        LogRequest::Get { key, .. } => {
            match local.get(&key).await {
                Ok(Some(value)) => LogResponse::Value { id, value },
                Ok(None) => LogResponse::NotFound { id },
                Err(e) => LogResponse::Error {
                    id,
                    message: e.to_string(),
                },
            }
        }
    }
}
