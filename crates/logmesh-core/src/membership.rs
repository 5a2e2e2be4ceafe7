//! Writer membership of the local log.
//!
//! Membership changes are ordinary appends of [`MembershipOp`]s; the log's
//! merge step turns them into the active writer set. Each mutating call
//! appends and then runs the merge step so the local view reflects it.

use crate::keys::PublicKey;
use crate::log::{Log, LogError, MembershipOp, Writer};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("Log is not writable")]
    NotWritable,

    #[error(transparent)]
    Log(LogError),
}

impl From<LogError> for MembershipError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::NotWritable => Self::NotWritable,
            other => Self::Log(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, MembershipError>;

/// Translates writer admission and removal into log operations.
#[derive(Clone)]
pub struct MembershipCoordinator {
    log: Arc<dyn Log>,
}

impl MembershipCoordinator {
    pub fn new(log: Arc<dyn Log>) -> Self {
        Self { log }
    }

    /// Admit `key` as a writer. With `bootstrap`, it also becomes an indexer.
    pub async fn add_writer(&self, key: PublicKey, bootstrap: bool) -> Result<()> {
        self.ensure_writable()?;
        self.log
            .append_membership(MembershipOp::AddWriter { key, bootstrap })
            .await?;
        self.log.update().await?;
        info!("Added writer {} (bootstrap: {})", key, bootstrap);
        Ok(())
    }

    /// Remove `key` from the writer set.
    pub async fn remove_writer(&self, key: PublicKey) -> Result<()> {
        self.ensure_writable()?;
        self.log
            .append_membership(MembershipOp::RemoveWriter { key })
            .await?;
        self.log.update().await?;
        info!("Removed writer {}", key);
        Ok(())
    }

    /// Admit every key of `keys` that is not already an active writer.
    ///
    /// Returns how many writers were added. The writability check runs
    /// before anything is appended, even when nothing would be.
    pub async fn add_missing_writers(&self, keys: &[PublicKey]) -> Result<usize> {
        self.ensure_writable()?;

        let mut known: HashSet<PublicKey> =
            self.log.active_writers().iter().map(|w| w.key).collect();

        let mut added = 0;
        for &key in keys {
            if !known.insert(key) {
                debug!("Writer {} already active", key);
                continue;
            }
            self.log
                .append_membership(MembershipOp::AddWriter {
                    key,
                    bootstrap: false,
                })
                .await?;
            added += 1;
        }

        if added > 0 {
            self.log.update().await?;
            info!("Added {} missing writer(s)", added);
        }
        Ok(added)
    }

    /// Writers in the last locally merged view.
    pub fn list_active_writers(&self) -> Vec<Writer> {
        self.log.active_writers()
    }

    /// Admit the founding node as the first indexer of a new log.
    ///
    /// The log must already be writable through its founder key.
    pub async fn bootstrap(&self, node_key: PublicKey) -> Result<()> {
        self.add_writer(node_key, true).await
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.log.writable() {
            Ok(())
        } else {
            Err(MembershipError::NotWritable)
        }
    }
}
