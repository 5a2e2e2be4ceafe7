//! Alias-resolving point queries across the local log and discovered logs.
//!
//! A stored value is either entry data or an alias naming another key of
//! the same log. Resolution follows aliases until it reaches data, with a
//! visited set and a hop bound so a cyclic chain ends as a lookup failure
//! instead of looping.
//!
//! Failures are scoped: one key failing in one log only removes that
//! source's contribution. Only a failure of the engine itself (the registry
//! cannot be read) aborts a query.

use crate::discovery::{DiscoveredLogs, RegistryError};
use crate::entry::{self, CodecError, LogEntryWire, StoredEntry};
use crate::log::{Log, LogError, LogValue};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Default bound on alias hops for one lookup.
pub const DEFAULT_MAX_ALIAS_HOPS: usize = 32;

/// Why one source contributed nothing for one key.
#[derive(Debug, Error)]
pub enum LookupFailure {
    #[error("Log read failed: {0}")]
    Log(#[from] LogError),

    #[error("Alias cycle through {0:?}")]
    AliasCycle(String),

    #[error("Alias chain from {key:?} exceeds {max} hops")]
    TooManyHops { key: String, max: usize },

    #[error("Stored record does not decode: {0}")]
    Decode(#[from] CodecError),
}

/// The query path itself failed.
#[derive(Debug, Error)]
pub enum EngineFailure {
    #[error("Discovered-log registry unavailable: {0}")]
    Registry(#[from] RegistryError),
}

/// Resolves keys against a set of logs.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    max_alias_hops: usize,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ALIAS_HOPS)
    }
}

impl QueryEngine {
    pub fn new(max_alias_hops: usize) -> Self {
        Self {
            max_alias_hops: max_alias_hops.max(1),
        }
    }

    pub fn max_alias_hops(&self) -> usize {
        self.max_alias_hops
    }

    /// Follow `key` through aliases inside `log` until entry data is found.
    ///
    /// Returns `Ok(None)` when the key (or any key along the chain) is
    /// absent.
    pub async fn resolve_alias(
        &self,
        log: &dyn Log,
        key: &str,
    ) -> Result<Option<StoredEntry>, LookupFailure> {
        let mut current = key.to_string();
        let mut visited = HashSet::new();

        for _ in 0..=self.max_alias_hops {
            if !visited.insert(current.clone()) {
                return Err(LookupFailure::AliasCycle(current));
            }

            match log.get(&current).await? {
                None => return Ok(None),
                Some(LogValue::Data(record)) => return Ok(Some(record)),
                Some(LogValue::Alias(next)) => {
                    debug!("Alias {:?} -> {:?} in log {}", current, next, log.key());
                    current = next;
                }
            }
        }

        Err(LookupFailure::TooManyHops {
            key: key.to_string(),
            max: self.max_alias_hops,
        })
    }

    /// Resolve and decode `key` in one log.
    pub async fn lookup(
        &self,
        log: &dyn Log,
        key: &str,
    ) -> Result<Option<LogEntryWire>, LookupFailure> {
        match self.resolve_alias(log, key).await? {
            Some(record) => Ok(Some(entry::decode(&record)?)),
            None => Ok(None),
        }
    }

    /// Query `keys` against `local` and then every discovered log, in
    /// registration order. Results are deduplicated by structural equality,
    /// keeping first occurrences.
    pub async fn query(
        &self,
        local: &dyn Log,
        discovered: &DiscoveredLogs,
        keys: &[String],
    ) -> Result<Vec<LogEntryWire>, EngineFailure> {
        let remotes = discovered.snapshot()?;
        Ok(self.query_sources(local, &remotes, keys).await)
    }

    /// Like [`QueryEngine::query`], over an explicit list of remote sources.
    pub async fn query_sources(
        &self,
        local: &dyn Log,
        remotes: &[Arc<dyn Log>],
        keys: &[String],
    ) -> Vec<LogEntryWire> {
        let mut sources: Vec<&dyn Log> = Vec::with_capacity(remotes.len() + 1);
        sources.push(local);
        sources.extend(remotes.iter().map(|log| log.as_ref() as &dyn Log));

        let mut results: Vec<LogEntryWire> = Vec::new();

        for key in keys {
            for &log in &sources {
                match self.lookup(log, key).await {
                    Ok(Some(entry)) => {
                        if !results.contains(&entry) {
                            results.push(entry);
                        }
                    }
                    Ok(None) => {}
                    Err(LookupFailure::Log(e)) => {
                        debug!("Lookup of {:?} in log {} failed: {}", key, log.key(), e);
                    }
                    Err(e) => {
                        warn!("Lookup of {:?} in log {} failed: {}", key, log.key(), e);
                    }
                }
            }
        }

        results
    }
}
