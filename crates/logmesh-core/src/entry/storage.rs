//! Storage form of a log entry: every binary field is a prefixed text token.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A log entry as written into the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry {
    /// Lowercase hex digest; also the log key the record lives under.
    pub hash: String,
    pub proof: String,
    /// Base58btc multibase (`z…`), or empty.
    pub multihash: String,
    #[serde(default)]
    pub protocol: String,
    /// `key:<hex>`
    pub key: String,
    pub size: u64,
    #[serde(default)]
    pub slabs: Vec<StoredSlabSlice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSlabSlice {
    pub slab: StoredSlab,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSlab {
    #[serde(default)]
    pub health: f64,
    /// `key:<hex>`
    pub key: String,
    #[serde(default)]
    pub min_shards: u32,
    #[serde(default)]
    pub shards: Vec<StoredShard>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredShard {
    /// `h:<hex>`
    pub root: String,
    /// `ed25519:<hex>`
    pub latest_host: String,
    /// `ed25519:<hex>` host → `fcid:<hex>` contract ids.
    #[serde(default)]
    pub contracts: BTreeMap<String, Vec<String>>,
}
