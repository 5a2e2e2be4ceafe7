//! Wire form of a log entry: the shape callers send and receive.
//!
//! JSON rendering follows the protobuf JSON mapping used by the callers:
//! binary fields are base64 strings, `size` is a 64-bit integer that may
//! arrive as a string or a number, and names are camelCase.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One file record as exchanged with callers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryWire {
    /// Digest that uniquely identifies the entry.
    #[serde(with = "base64_bytes")]
    pub hash: Vec<u8>,
    #[serde(with = "base64_bytes", default)]
    pub proof: Vec<u8>,
    /// Self-describing hash; empty when absent.
    #[serde(with = "base64_bytes", default)]
    pub multihash: Vec<u8>,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub key: EncryptionKey,
    #[serde(with = "wide_u64", default)]
    pub size: u64,
    #[serde(default)]
    pub slabs: Vec<SlabSlice>,
    /// Extra lookup keys for this entry. Never stored inside the record.
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EncryptionKey {
    #[serde(with = "base64_bytes", default)]
    pub entropy: Vec<u8>,
}

impl EncryptionKey {
    pub fn new(entropy: impl Into<Vec<u8>>) -> Self {
        Self {
            entropy: entropy.into(),
        }
    }
}

/// A window into a slab.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlabSlice {
    pub slab: Slab,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slab {
    #[serde(default)]
    pub health: f64,
    #[serde(default)]
    pub key: EncryptionKey,
    #[serde(default)]
    pub min_shards: u32,
    #[serde(default)]
    pub shards: Vec<Shard>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shard {
    #[serde(with = "base64_bytes", default)]
    pub root: Vec<u8>,
    #[serde(with = "base64_bytes", default)]
    pub latest_host: Vec<u8>,
    /// Host public key → contracts storing this shard on that host.
    #[serde(default)]
    pub contract_set: BTreeMap<Bytes, Vec<Bytes>>,
}

/// Raw bytes usable as a map key or list element; renders as base64.
///
/// Ordering is byte-lexicographic, which matches the ordering of the
/// lowercase hex rendering used by the storage form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Bytes(pub Vec<u8>);

impl Bytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Bytes {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Serialize for Bytes {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        base64_bytes::serialize(&self.0, s)
    }
}

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        base64_bytes::deserialize(d).map(Self)
    }
}

/// serde adapter: `Vec<u8>` as a standard base64 string.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// serde adapter: `u64` written as a decimal string, read from either a
/// string or a number.
mod wide_u64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wide {
            Number(u64),
            Text(String),
        }

        match Wide::deserialize(d)? {
            Wide::Number(n) => Ok(n),
            Wide::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
        }
    }
}
