//! File-backed [`Log`].
//!
//! Each log lives in its own directory under the data dir:
//!
//! ```text
//! <data_dir>/logs/<log key hex>/log.jsonl   one ReplicatedRecord per line
//! <data_dir>/logs/<log key hex>/local       local writer key (hex)
//! ```
//!
//! Opening replays every line into a [`MemoryLog`] and runs its merge step.
//! A torn last line, left by an interrupted append, is cut off before the
//! file is reopened for appending. Records are written and flushed before
//! they are applied in memory, so a failed write never shows up in reads.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use logmesh_core::log::Result;
use logmesh_core::{
    Heads, Log, LogError, LogRecord, LogValue, MemoryLog, MembershipOp, PublicKey,
    ReplicatedRecord, Writer,
};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const LOG_FILE: &str = "log.jsonl";
const LOCAL_WRITER_FILE: &str = "local";

fn io_err(context: &str, path: &Path, err: std::io::Error) -> LogError {
    LogError::Io(format!("{} {:?}: {}", context, path, err))
}

/// Directory holding log `key` under `data_dir`.
pub fn log_dir(data_dir: &Path, key: &PublicKey) -> PathBuf {
    data_dir.join("logs").join(key.to_hex())
}

/// Outcome of reading the log file back.
#[derive(Debug, Default)]
struct Replayed {
    records: usize,
    /// Length of the file up to the end of the last complete record
    good_len: u64,
    torn: bool,
}

pub struct FileLog {
    state: MemoryLog,
    path: PathBuf,
    /// Append handle; also serializes writes against merges.
    file: Mutex<File>,
}

impl FileLog {
    /// Open log `key` stored in `dir`, creating it if needed.
    ///
    /// The first open records `local_writer` as the key this process writes
    /// with. Later opens keep the recorded key and ignore `local_writer`, so
    /// a founding node stays the founder across restarts.
    pub async fn open(dir: &Path, key: PublicKey, local_writer: PublicKey) -> Result<Self> {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| io_err("Failed to create log directory", dir, e))?;

        let local_writer = Self::local_writer_pointer(dir, local_writer).await?;
        let state = MemoryLog::new(key, local_writer);

        let path = dir.join(LOG_FILE);
        let replayed = Self::replay(&path, &state).await?;
        if replayed.torn {
            Self::truncate(&path, replayed.good_len).await?;
        }
        state.update().await?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_err("Failed to open log file", &path, e))?;

        info!(
            "Opened log {} ({} record(s), local writer {}, writable: {})",
            key,
            replayed.records,
            local_writer,
            state.writable()
        );

        Ok(Self {
            state,
            path,
            file: Mutex::new(file),
        })
    }

    /// Key this process writes with.
    pub fn local_writer(&self) -> PublicKey {
        self.state.local_writer()
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    async fn local_writer_pointer(dir: &Path, proposed: PublicKey) -> Result<PublicKey> {
        let path = dir.join(LOCAL_WRITER_FILE);
        match fs::read_to_string(&path).await {
            Ok(content) => content
                .trim()
                .parse()
                .map_err(|e| LogError::Corrupt(format!("{:?}: {}", path, e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::write(&path, proposed.to_hex())
                    .await
                    .map_err(|e| io_err("Failed to record local writer", &path, e))?;
                debug!("Recorded local writer {} in {:?}", proposed, path);
                Ok(proposed)
            }
            Err(e) => Err(io_err("Failed to read local writer", &path, e)),
        }
    }

    async fn replay(path: &Path, state: &MemoryLog) -> Result<Replayed> {
        let content = match fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Replayed::default()),
            Err(e) => return Err(io_err("Failed to read log file", path, e)),
        };

        let mut replayed = Replayed::default();
        let mut offset = 0u64;

        for (index, chunk) in content.split_inclusive(|b| *b == b'\n').enumerate() {
            offset += chunk.len() as u64;
            let complete = chunk.ends_with(b"\n");

            if chunk.iter().all(u8::is_ascii_whitespace) {
                if complete {
                    replayed.good_len = offset;
                }
                continue;
            }

            match serde_json::from_slice::<ReplicatedRecord>(chunk) {
                Ok(record) if complete => {
                    let (writer, seq) = (record.writer, record.seq);
                    if !state.replay(record)? {
                        return Err(LogError::Corrupt(format!(
                            "{:?} line {}: record {} of writer {} is out of sequence",
                            path,
                            index + 1,
                            seq,
                            writer
                        )));
                    }
                    replayed.records += 1;
                    replayed.good_len = offset;
                }
                // Without its newline the append never finished
                Ok(_) => replayed.torn = true,
                Err(e) if !complete => {
                    warn!("Dropping incomplete last record in {:?}: {}", path, e);
                    replayed.torn = true;
                }
                Err(e) => {
                    return Err(LogError::Corrupt(format!(
                        "{:?} line {}: {}",
                        path,
                        index + 1,
                        e
                    )));
                }
            }
        }

        Ok(replayed)
    }

    async fn truncate(path: &Path, len: u64) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(|e| io_err("Failed to open log file", path, e))?;
        file.set_len(len)
            .await
            .map_err(|e| io_err("Failed to truncate", path, e))?;
        file.sync_all()
            .await
            .map_err(|e| io_err("Failed to sync", path, e))?;
        debug!("Truncated {:?} to {} byte(s)", path, len);
        Ok(())
    }

    async fn write_record(&self, file: &mut File, record: &ReplicatedRecord) -> Result<()> {
        let mut line =
            serde_json::to_vec(record).map_err(|e| LogError::Corrupt(e.to_string()))?;
        line.push(b'\n');

        file.write_all(&line)
            .await
            .map_err(|e| io_err("Failed to append to", &self.path, e))
    }

    async fn sync(&self, file: &mut File) -> Result<()> {
        file.sync_data()
            .await
            .map_err(|e| io_err("Failed to sync", &self.path, e))
    }

    async fn append(&self, record: LogRecord) -> Result<()> {
        let mut file = self.file.lock().await;

        let authored = self.state.author(record)?;
        self.write_record(&mut file, &authored).await?;
        self.sync(&mut file).await?;

        self.state.replay(authored)?;
        Ok(())
    }
}

#[async_trait]
impl Log for FileLog {
    fn key(&self) -> PublicKey {
        self.state.key()
    }

    fn writable(&self) -> bool {
        self.state.writable()
    }

    fn active_writers(&self) -> Vec<Writer> {
        self.state.active_writers()
    }

    async fn get(&self, key: &str) -> Result<Option<LogValue>> {
        self.state.get(key).await
    }

    async fn put(&self, key: &str, value: LogValue) -> Result<()> {
        self.append(LogRecord::Put {
            key: key.to_string(),
            value,
        })
        .await
    }

    async fn append_membership(&self, op: MembershipOp) -> Result<()> {
        self.append(LogRecord::Membership { change: op }).await
    }

    async fn update(&self) -> Result<()> {
        let _guard = self.file.lock().await;
        self.state.update().await
    }

    fn heads(&self) -> Heads {
        self.state.heads()
    }

    fn records_since(&self, have: &Heads, limit: usize) -> Result<Vec<ReplicatedRecord>> {
        self.state.records_since(have, limit)
    }

    async fn ingest(&self, records: Vec<ReplicatedRecord>) -> Result<usize> {
        let mut file = self.file.lock().await;

        let mut applied = 0;
        for record in records {
            if !self.state.extends(&record) {
                continue;
            }
            self.write_record(&mut file, &record).await?;
            self.sync(&mut file).await?;
            self.state.replay(record)?;
            applied += 1;
        }

        if applied > 0 {
            self.state.update().await?;
            debug!("Ingested {} record(s) into log {}", applied, self.key());
        }
        Ok(applied)
    }
}
