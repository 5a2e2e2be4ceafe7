//! Replication with peers that serve the same log.
//!
//! When a connection's peer announces this node's own log key, the
//! connection spawns one replication task. The task pulls whatever the peer
//! holds beyond our heads, then repeats on every tick until the route
//! closes or the mesh shuts down. Both ends run one, so records flow both
//! ways.

use std::sync::Arc;
use std::time::Duration;

use logmesh_core::Log;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::remote::Route;

/// Pacing of replication rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationConfig {
    /// Pause between rounds
    pub interval: Duration,
    /// Bound on one pull
    pub pull_timeout: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            pull_timeout: Duration::from_secs(5),
        }
    }
}

/// Replicate `log` from the peer behind `route` until either goes away.
pub async fn run(
    log: Arc<dyn Log>,
    route: Arc<Route>,
    config: ReplicationConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Replicating log {} with {}", log.key(), route.node());

    while !route.is_closed() && !*shutdown.borrow() {
        match log.replicate(route.as_ref()).await {
            Ok(0) => {}
            Ok(applied) => info!(
                "Replicated {} record(s) of log {} from {} (writable: {})",
                applied,
                log.key(),
                route.node(),
                log.writable()
            ),
            Err(e) => debug!("Replication from {} failed: {}", route.node(), e),
        }

        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            _ = shutdown.changed() => break,
        }
    }

    debug!("Stopped replicating with {}", route.node());
}
