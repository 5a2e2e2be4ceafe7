//! Registry of logs learned from peers.
//!
//! Written only by the discovery relay, read by the query engine. Readers
//! take a snapshot, so a log registered mid-query is simply not part of
//! that query.

use crate::keys::PublicKey;
use crate::log::Log;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry lock poisoned")]
    Poisoned,
}

#[derive(Default)]
struct Inner {
    /// Registration order.
    order: Vec<PublicKey>,
    logs: HashMap<PublicKey, Arc<dyn Log>>,
}

/// Discovered logs keyed by log key, iterated in registration order.
///
/// Thread-safe; wrap in `Arc` for shared ownership.
#[derive(Default)]
pub struct DiscoveredLogs {
    inner: RwLock<Inner>,
}

impl DiscoveredLogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `log` under `key`.
    ///
    /// Returns `false` (and drops `log`) if the key is already known.
    pub fn register(&self, key: PublicKey, log: Arc<dyn Log>) -> Result<bool, RegistryError> {
        let mut inner = self.inner.write().map_err(|_| RegistryError::Poisoned)?;
        if inner.logs.contains_key(&key) {
            return Ok(false);
        }
        inner.order.push(key);
        inner.logs.insert(key, log);
        Ok(true)
    }

    pub fn contains(&self, key: &PublicKey) -> bool {
        self.inner
            .read()
            .map(|inner| inner.logs.contains_key(key))
            .unwrap_or(false)
    }

    pub fn get(&self, key: &PublicKey) -> Option<Arc<dyn Log>> {
        self.inner.read().ok()?.logs.get(key).cloned()
    }

    /// Handles of every registered log, in registration order.
    pub fn snapshot(&self) -> Result<Vec<Arc<dyn Log>>, RegistryError> {
        let inner = self.inner.read().map_err(|_| RegistryError::Poisoned)?;
        Ok(inner
            .order
            .iter()
            .filter_map(|key| inner.logs.get(key).cloned())
            .collect())
    }

    /// Registered keys, in registration order.
    pub fn keys(&self) -> Vec<PublicKey> {
        self.inner
            .read()
            .map(|inner| inner.order.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.order.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLog;

    fn key(b: u8) -> PublicKey {
        PublicKey::from_bytes([b; 32])
    }

    fn log(b: u8) -> Arc<dyn Log> {
        Arc::new(MemoryLog::founder(key(b)))
    }

    #[test]
    fn test_register_new_key() {
        let registry = DiscoveredLogs::new();
        assert!(registry.register(key(1), log(1)).unwrap());
        assert!(registry.contains(&key(1)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_known_key_is_noop() {
        let registry = DiscoveredLogs::new();
        let first = log(1);
        registry.register(key(1), first.clone()).unwrap();
        assert!(!registry.register(key(1), log(1)).unwrap());

        assert_eq!(registry.len(), 1);
        let stored = registry.get(&key(1)).unwrap();
        assert!(Arc::ptr_eq(&stored, &first));
    }

    #[test]
    fn test_snapshot_preserves_registration_order() {
        let registry = DiscoveredLogs::new();
        registry.register(key(3), log(3)).unwrap();
        registry.register(key(1), log(1)).unwrap();
        registry.register(key(2), log(2)).unwrap();

        let keys: Vec<_> = registry
            .snapshot()
            .unwrap()
            .iter()
            .map(|log| log.key())
            .collect();
        assert_eq!(keys, vec![key(3), key(1), key(2)]);
        assert_eq!(registry.keys(), keys);
    }

    #[test]
    fn test_snapshot_is_detached_from_later_registrations() {
        let registry = DiscoveredLogs::new();
        registry.register(key(1), log(1)).unwrap();
        let snapshot = registry.snapshot().unwrap();

        registry.register(key(2), log(2)).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }
}
