//! Turns log keys learned on connections into query sources.
//!
//! Connection tasks send every key they learn to one registrar task, which
//! is the only writer of the discovered-log registry.

use std::sync::Arc;

use logmesh_core::{DiscoveredLogs, LogStore, PublicKey};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::remote::{RemoteLogs, Route};

/// Capacity of the connection → registrar channel.
pub const DISCOVERY_CHANNEL_CAPACITY: usize = 64;

/// A log key received on a connection.
pub struct Discovered {
    pub log: PublicKey,
    /// Connection the key arrived on; reads of the log can use it.
    pub route: Arc<Route>,
}

pub struct Registrar {
    store: Arc<dyn LogStore>,
    remotes: Arc<RemoteLogs>,
    registry: Arc<DiscoveredLogs>,
}

impl Registrar {
    pub fn new(
        store: Arc<dyn LogStore>,
        remotes: Arc<RemoteLogs>,
        registry: Arc<DiscoveredLogs>,
    ) -> Self {
        Self {
            store,
            remotes,
            registry,
        }
    }

    /// Record a discovered key. Returns `true` when the log is new.
    ///
    /// A key that is already registered only gains the connection as an
    /// additional route.
    pub fn register(&self, discovered: Discovered) -> bool {
        let Discovered { log, route } = discovered;
        let via = route.node();
        self.remotes.add_route(log, route);

        if self.registry.contains(&log) {
            debug!("Log {} now also reachable via {}", log, via);
            return false;
        }

        match self.registry.register(log, self.store.open_remote(log)) {
            Ok(true) => {
                info!("Discovered log {} via {}", log, via);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!("Failed to register log {}: {}", log, e);
                false
            }
        }
    }

    /// Consume discoveries until every sender is gone.
    pub fn spawn(self, mut rx: mpsc::Receiver<Discovered>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(discovered) = rx.recv().await {
                self.register(discovered);
            }
            debug!("Registrar stopped");
        })
    }
}
