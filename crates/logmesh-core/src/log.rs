//! The append-only keyed log abstraction.
//!
//! A [`Log`] is an append-only sequence of writes projected into a
//! key/value view, shared by a set of writers. Membership changes are
//! appended as [`MembershipOp`]s and take effect when the log's merge step
//! ([`Log::update`]) applies them.
//!
//! Every record carries its author and its position in that author's
//! sequence ([`ReplicatedRecord`]). Replicas of one log converge by pulling
//! the records they lack from each other ([`Log::replicate`]).
//!
//! Implementations:
//! - [`MemoryLog`](crate::memory::MemoryLog) - in-process, used for tests and
//!   as the state machine behind persistent logs
//! - `FileLog` (in logmesh-node) - JSON-lines file under the data directory
//! - `RemoteLog` (in logmesh-node) - read-only view of a peer's log

use crate::entry::StoredEntry;
use crate::keys::{DiscoveryKey, PublicKey};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Log is not writable")]
    NotWritable,

    #[error("Log is a read-only view")]
    ReadOnly,

    #[error("Log unavailable: {0}")]
    Unavailable(String),

    #[error("Log read timed out")]
    Timeout,

    #[error("Corrupt log record: {0}")]
    Corrupt(String),

    #[error("Log I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, LogError>;

/// A value stored under a log key.
///
/// Either terminal entry data or a pointer to another key of the same log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogValue {
    Data(StoredEntry),
    Alias(String),
}

/// A membership change, consumed by the log's merge step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MembershipOp {
    /// Admit a writer. With `bootstrap`, the writer also becomes an indexer.
    AddWriter {
        key: PublicKey,
        #[serde(default)]
        bootstrap: bool,
    },
    RemoveWriter { key: PublicKey },
}

/// One record of the append-only sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum LogRecord {
    Put { key: String, value: LogValue },
    Membership { change: MembershipOp },
}

/// A record as authored: who wrote it and where it sits in that writer's
/// sequence. Sequences start at 1 and have no gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedRecord {
    pub writer: PublicKey,
    pub seq: u64,
    pub record: LogRecord,
}

impl ReplicatedRecord {
    pub fn new(writer: PublicKey, seq: u64, record: LogRecord) -> Self {
        Self {
            writer,
            seq,
            record,
        }
    }
}

/// Highest sequence number held for each writer.
pub type Heads = BTreeMap<PublicKey, u64>;

/// A writer in the merged membership view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Writer {
    pub key: PublicKey,
    pub indexer: bool,
}

/// An append-only, multi-writer keyed log.
///
/// Implementations serialize their own mutations; callers add no locking.
#[async_trait]
pub trait Log: Send + Sync {
    /// The log's public key.
    fn key(&self) -> PublicKey;

    /// Identifier under which the log is found on the mesh.
    fn discovery_key(&self) -> DiscoveryKey {
        DiscoveryKey::for_log(&self.key())
    }

    /// Whether this process holds write capability.
    fn writable(&self) -> bool;

    /// Writers in the last locally merged view.
    fn active_writers(&self) -> Vec<Writer>;

    /// Read the current value under `key`.
    async fn get(&self, key: &str) -> Result<Option<LogValue>>;

    /// Append a write of `value` under `key`.
    async fn put(&self, key: &str, value: LogValue) -> Result<()>;

    /// Append a membership change. It is applied by the next [`Log::update`].
    async fn append_membership(&self, op: MembershipOp) -> Result<()>;

    /// Run the merge step, applying appended membership changes.
    async fn update(&self) -> Result<()>;

    /// Highest sequence number this replica holds for each writer.
    fn heads(&self) -> Heads;

    /// Records beyond `have`, in log order, at most `limit` of them.
    fn records_since(&self, have: &Heads, limit: usize) -> Result<Vec<ReplicatedRecord>>;

    /// Take in records pulled from another replica of this log.
    ///
    /// A record is applied only when it extends its writer's sequence by
    /// one; anything else is skipped. Runs the merge step when something was
    /// applied. Returns how many records were applied.
    async fn ingest(&self, records: Vec<ReplicatedRecord>) -> Result<usize>;

    /// Pull from `peer` every record of this log it holds and we lack.
    async fn replicate(&self, peer: &dyn ReplicationPeer) -> Result<usize> {
        let mut total = 0;
        loop {
            let have = self.heads();
            let records = peer.pull(self.key(), &have).await?;
            if records.is_empty() {
                return Ok(total);
            }
            let applied = self.ingest(records).await?;
            if applied == 0 {
                return Ok(total);
            }
            total += applied;
        }
    }
}

/// The far end of a connection, as seen by [`Log::replicate`].
#[async_trait]
pub trait ReplicationPeer: Send + Sync {
    /// Records of log `log` the peer holds beyond `have`, in its log order.
    /// May return a partial batch.
    async fn pull(&self, log: PublicKey, have: &Heads) -> Result<Vec<ReplicatedRecord>>;
}

/// Where a node gets its logs from.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Open, creating if needed, the local log `key`, writing as
    /// `local_writer` once that key is admitted.
    async fn open_local(&self, key: PublicKey, local_writer: PublicKey) -> Result<Arc<dyn Log>>;

    /// Lazy read-only handle on a peer's log. Nothing is fetched until the
    /// handle is read.
    fn open_remote(&self, key: PublicKey) -> Arc<dyn Log>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> PublicKey {
        PublicKey::from_bytes([b; 32])
    }

    #[test]
    fn test_membership_op_wire_format() {
        let op = MembershipOp::AddWriter {
            key: key(1),
            bootstrap: true,
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"type\":\"addWriter\""));
        assert!(json.contains("\"bootstrap\":true"));

        let remove = MembershipOp::RemoveWriter { key: key(2) };
        let json = serde_json::to_string(&remove).unwrap();
        assert!(json.contains("\"type\":\"removeWriter\""));
    }

    #[test]
    fn test_membership_op_bootstrap_defaults_false() {
        let json = format!(r#"{{"type":"addWriter","key":"{}"}}"#, key(1));
        let op: MembershipOp = serde_json::from_str(&json).unwrap();
        assert_eq!(
            op,
            MembershipOp::AddWriter {
                key: key(1),
                bootstrap: false
            }
        );
    }

    #[test]
    fn test_alias_value_is_tagged() {
        let json = serde_json::to_string(&LogValue::Alias("ab12".into())).unwrap();
        assert_eq!(json, r#"{"alias":"ab12"}"#);
    }

    #[test]
    fn test_log_record_roundtrip() {
        let record = LogRecord::Membership {
            change: MembershipOp::RemoveWriter { key: key(3) },
        };
        let json = serde_json::to_string(&record).unwrap();
        let parsed: LogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_replicated_record_wire_format() {
        let record = ReplicatedRecord::new(
            key(4),
            7,
            LogRecord::Put {
                key: "k".into(),
                value: LogValue::Alias("v".into()),
            },
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(&format!("\"writer\":\"{}\"", key(4))));
        assert!(json.contains("\"seq\":7"));
        assert!(json.contains("\"op\":\"put\""));

        let parsed: ReplicatedRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_log_value_survives_bincode() {
        let value = LogValue::Alias("nice-name".into());
        let bytes = bincode::serialize(&value).unwrap();
        let parsed: LogValue = bincode::deserialize(&bytes).unwrap();
        assert_eq!(parsed, value);
    }
}
