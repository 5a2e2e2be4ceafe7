//! In-process implementation of [`Log`].
//!
//! Holds the authored record sequence, the key/value view projected from
//! it, per-writer sequence heads, and the merged writer set. Membership
//! changes wait in a pending queue until [`Log::update`] merges them.
//!
//! The log's own key is always an indexing writer: whoever holds the log
//! key founded the log. A process is writable when its local writer key is
//! in the merged writer set.

use crate::keys::PublicKey;
use crate::log::{
    Heads, Log, LogError, LogRecord, LogValue, MembershipOp, ReplicatedRecord, Result, Writer,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct State {
    records: Vec<ReplicatedRecord>,
    heads: Heads,
    view: HashMap<String, LogValue>,
    writers: BTreeMap<PublicKey, Writer>,
    pending: Vec<MembershipOp>,
}

impl State {
    fn extends(&self, record: &ReplicatedRecord) -> bool {
        record.seq == self.heads.get(&record.writer).copied().unwrap_or(0) + 1
    }
}

/// In-memory append-only log.
pub struct MemoryLog {
    key: PublicKey,
    local_writer: PublicKey,
    state: RwLock<State>,
}

impl MemoryLog {
    /// Open an empty log `key`, writing (if permitted) as `local_writer`.
    pub fn new(key: PublicKey, local_writer: PublicKey) -> Self {
        let mut state = State::default();
        state.writers.insert(
            key,
            Writer {
                key,
                indexer: true,
            },
        );

        Self {
            key,
            local_writer,
            state: RwLock::new(state),
        }
    }

    /// Open a log as its founder: the local writer is the log key itself.
    pub fn founder(key: PublicKey) -> Self {
        Self::new(key, key)
    }

    pub fn local_writer(&self) -> PublicKey {
        self.local_writer
    }

    /// Stamp `record` as the local writer's next record, without applying
    /// it. Fails when the local writer is not admitted.
    pub fn author(&self, record: LogRecord) -> Result<ReplicatedRecord> {
        let state = self.read_state()?;
        if !state.writers.contains_key(&self.local_writer) {
            return Err(LogError::NotWritable);
        }
        let seq = state.heads.get(&self.local_writer).copied().unwrap_or(0) + 1;
        Ok(ReplicatedRecord::new(self.local_writer, seq, record))
    }

    /// Whether `record` is the next one of its writer's sequence.
    pub fn extends(&self, record: &ReplicatedRecord) -> bool {
        self.read_state().map(|s| s.extends(record)).unwrap_or(false)
    }

    /// Apply an authored record without permission checks, as when replaying
    /// from disk or taking in a replica's records. Returns `false` and
    /// leaves the log untouched when the record does not extend its
    /// writer's sequence. Membership records are queued; call
    /// [`Log::update`] afterwards to merge them.
    pub fn replay(&self, record: ReplicatedRecord) -> Result<bool> {
        let mut state = self.write_state()?;
        if !state.extends(&record) {
            return Ok(false);
        }
        Self::apply_record(&mut state, record);
        Ok(true)
    }

    /// Append `record` as the local writer.
    pub fn append(&self, record: LogRecord) -> Result<()> {
        let authored = self.author(record)?;
        self.replay(authored)?;
        Ok(())
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn apply_record(state: &mut State, authored: ReplicatedRecord) {
        match &authored.record {
            LogRecord::Put { key, value } => {
                state.view.insert(key.clone(), value.clone());
            }
            LogRecord::Membership { change } => {
                state.pending.push(change.clone());
            }
        }
        state.heads.insert(authored.writer, authored.seq);
        state.records.push(authored);
    }

    fn merge(state: &mut State) {
        for op in std::mem::take(&mut state.pending) {
            match op {
                MembershipOp::AddWriter { key, bootstrap } => {
                    let writer = state.writers.entry(key).or_insert(Writer {
                        key,
                        indexer: false,
                    });
                    if bootstrap {
                        writer.indexer = true;
                    }
                    debug!("Merged writer {} (indexer: {})", key, writer.indexer);
                }
                MembershipOp::RemoveWriter { key } => {
                    if state.writers.remove(&key).is_some() {
                        debug!("Merged removal of writer {}", key);
                    }
                }
            }
        }
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| LogError::Unavailable("log state lock poisoned".into()))
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| LogError::Unavailable("log state lock poisoned".into()))
    }
}

#[async_trait]
impl Log for MemoryLog {
    fn key(&self) -> PublicKey {
        self.key
    }

    fn writable(&self) -> bool {
        self.read_state()
            .map(|s| s.writers.contains_key(&self.local_writer))
            .unwrap_or(false)
    }

    fn active_writers(&self) -> Vec<Writer> {
        self.read_state()
            .map(|s| s.writers.values().copied().collect())
            .unwrap_or_default()
    }

    async fn get(&self, key: &str) -> Result<Option<LogValue>> {
        Ok(self.read_state()?.view.get(key).cloned())
    }

    async fn put(&self, key: &str, value: LogValue) -> Result<()> {
        self.append(LogRecord::Put {
            key: key.to_string(),
            value,
        })
    }

    async fn append_membership(&self, op: MembershipOp) -> Result<()> {
        self.append(LogRecord::Membership { change: op })
    }

    async fn update(&self) -> Result<()> {
        let mut state = self.write_state()?;
        Self::merge(&mut state);
        Ok(())
    }

    fn heads(&self) -> Heads {
        self.read_state().map(|s| s.heads.clone()).unwrap_or_default()
    }

    fn records_since(&self, have: &Heads, limit: usize) -> Result<Vec<ReplicatedRecord>> {
        let state = self.read_state()?;
        Ok(state
            .records
            .iter()
            .filter(|r| r.seq > have.get(&r.writer).copied().unwrap_or(0))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ingest(&self, records: Vec<ReplicatedRecord>) -> Result<usize> {
        let mut applied = 0;
        for record in records {
            if self.replay(record)? {
                applied += 1;
            }
        }
        if applied > 0 {
            self.update().await?;
        }
        Ok(applied)
    }
}
