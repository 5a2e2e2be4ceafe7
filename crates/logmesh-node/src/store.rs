//! The node's [`LogStore`]: file logs under the data directory for the local
//! log, lazy remote handles for everyone else's.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use logmesh_core::log::Result;
use logmesh_core::{Log, LogError, LogStore, PublicKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::file_log::{FileLog, log_dir};
use crate::remote::RemoteLogs;

const METADATA_FILE: &str = "node.json";

/// Which log a data directory serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    log_key: PublicKey,
}

pub struct NodeStore {
    data_dir: PathBuf,
    remotes: Arc<RemoteLogs>,
}

impl NodeStore {
    pub fn new(data_dir: impl Into<PathBuf>, remotes: Arc<RemoteLogs>) -> Self {
        Self {
            data_dir: data_dir.into(),
            remotes,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The log this data directory was last opened with, if any.
    pub async fn recorded_log(&self) -> Result<Option<PublicKey>> {
        let path = self.data_dir.join(METADATA_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LogError::Io(format!("{:?}: {}", path, e))),
        };
        let metadata: Metadata = serde_json::from_str(&content)
            .map_err(|e| LogError::Corrupt(format!("{:?}: {}", path, e)))?;
        Ok(Some(metadata.log_key))
    }

    async fn record_log(&self, key: PublicKey) -> Result<()> {
        let path = self.data_dir.join(METADATA_FILE);
        let content = serde_json::to_string_pretty(&Metadata { log_key: key })
            .map_err(|e| LogError::Corrupt(e.to_string()))?;
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| LogError::Io(format!("{:?}: {}", self.data_dir, e)))?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| LogError::Io(format!("{:?}: {}", path, e)))?;
        debug!("Recorded log {} in {:?}", key, path);
        Ok(())
    }
}

#[async_trait]
impl LogStore for NodeStore {
    async fn open_local(&self, key: PublicKey, local_writer: PublicKey) -> Result<Arc<dyn Log>> {
        let log = FileLog::open(&log_dir(&self.data_dir, &key), key, local_writer).await?;
        self.record_log(key).await?;
        Ok(Arc::new(log))
    }

    fn open_remote(&self, key: PublicKey) -> Arc<dyn Log> {
        self.remotes.handle(key)
    }
}
