//! Outgoing connections to seed nodes.
//!
//! Each seed gets one dialer task that keeps a connection up, reconnecting
//! with exponential backoff. A seed that turns out to be this node is
//! dropped for good.

use std::sync::Arc;
use std::time::Duration;

use logmesh_core::Role;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use crate::connection::{self, ConnectionOutcome};
use crate::mesh::Mesh;

/// Redial schedule for seeds.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    /// Ceiling for the delay
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Consecutive failures before a seed is dropped; None retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Wait before dial number `failures + 1`, given `failures >= 1`.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let ceiling = self.max_delay.as_secs_f64();
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.max(1.0).powi(exponent);
        if secs.is_nan() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.clamp(0.0, ceiling))
    }
}

/// Failure count of one seed's dialer.
#[derive(Debug, Clone, Default)]
pub struct SeedBackoff {
    failures: u32,
}

impl SeedBackoff {
    /// Record a failure; returns the wait before the next dial, or `None`
    /// once the seed has used up its attempts.
    pub fn fail(&mut self, config: &ReconnectConfig) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        match config.max_attempts {
            Some(max) if self.failures >= max => None,
            _ => Some(config.delay_after(self.failures)),
        }
    }

    pub fn succeed(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Keep a connection to `url` up until shutdown.
pub async fn run(
    url: String,
    mesh: Arc<Mesh>,
    config: ReconnectConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = SeedBackoff::default();

    loop {
        if *shutdown.borrow() {
            return;
        }

        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!("Connected to seed {}", url);
                backoff.succeed();
                match connection::run(ws, Role::Initiator, mesh.clone(), url.clone()).await {
                    Ok(ConnectionOutcome::SelfConnection) => {
                        info!("Seed {} is this node, not redialing", url);
                        return;
                    }
                    Ok(ConnectionOutcome::Shutdown) => return,
                    Ok(outcome) => debug!("Connection to {} ended: {:?}", url, outcome),
                    Err(e) => warn!("Connection to {} failed: {}", url, e),
                }
            }
            Err(e) => warn!("Failed to connect to {}: {}", url, e),
        }

        let Some(delay) = backoff.fail(&config) else {
            warn!(
                "Giving up on {} after {} failed attempt(s)",
                url,
                backoff.failures()
            );
            return;
        };

        debug!("Redialing {} in {:?}", url, delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}
