//! Conversion between the wire form and the storage form of an entry.
//!
//! Both directions are pure. `decode(encode(e).record)` restores `e`
//! minus its aliases, which `encode` hands back separately. The one lossy
//! spot is the empty multihash, stored as the empty string.

use super::storage::{StoredEntry, StoredShard, StoredSlab, StoredSlabSlice};
use super::wire::{Bytes, EncryptionKey, LogEntryWire, Shard, Slab, SlabSlice};
use thiserror::Error;

pub const KEY_PREFIX: &str = "key:";
pub const ROOT_PREFIX: &str = "h:";
pub const HOST_PREFIX: &str = "ed25519:";
pub const CONTRACT_PREFIX: &str = "fcid:";

/// Multibase code for base58btc.
const BASE58BTC_PREFIX: char = 'z';

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field {field}: expected prefix {prefix:?}, got {value:?}")]
    BadPrefix {
        field: &'static str,
        prefix: &'static str,
        value: String,
    },

    #[error("Field {field}: invalid hex: {source}")]
    InvalidHex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },

    #[error("Field {field}: invalid multibase value {value:?}")]
    InvalidMultibase { field: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Output of [`encode`]: the record to store plus the aliases that were
/// split off it.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    pub record: StoredEntry,
    pub aliases: Vec<String>,
}

/// Convert a wire entry into its storage form.
///
/// Fails only when the entry has no hash, since the hash is the key the
/// record is stored under.
pub fn encode(entry: LogEntryWire) -> Result<Encoded> {
    if entry.hash.is_empty() {
        return Err(CodecError::MissingField("hash"));
    }

    let record = StoredEntry {
        hash: hex::encode(&entry.hash),
        proof: hex::encode(&entry.proof),
        multihash: encode_multihash(&entry.multihash),
        protocol: entry.protocol,
        key: encode_key(&entry.key),
        size: entry.size,
        slabs: entry.slabs.iter().map(encode_slab_slice).collect(),
    };

    Ok(Encoded {
        record,
        aliases: entry.aliases,
    })
}

/// Convert a stored record back into wire form. The result has no aliases.
pub fn decode(record: &StoredEntry) -> Result<LogEntryWire> {
    Ok(LogEntryWire {
        hash: parse_hex("hash", &record.hash)?,
        proof: parse_hex("proof", &record.proof)?,
        multihash: decode_multihash(&record.multihash)?,
        protocol: record.protocol.clone(),
        key: decode_key("key", &record.key)?,
        size: record.size,
        slabs: record
            .slabs
            .iter()
            .map(decode_slab_slice)
            .collect::<Result<_>>()?,
        aliases: Vec::new(),
    })
}

// ============================================================================
// Encoding helpers
// ============================================================================

fn encode_multihash(raw: &[u8]) -> String {
    if raw.is_empty() {
        return String::new();
    }
    format!("{}{}", BASE58BTC_PREFIX, bs58::encode(raw).into_string())
}

fn encode_key(key: &EncryptionKey) -> String {
    prefixed(KEY_PREFIX, &key.entropy)
}

fn encode_slab_slice(slice: &SlabSlice) -> StoredSlabSlice {
    StoredSlabSlice {
        slab: StoredSlab {
            health: slice.slab.health,
            key: encode_key(&slice.slab.key),
            min_shards: slice.slab.min_shards,
            shards: slice.slab.shards.iter().map(encode_shard).collect(),
        },
        offset: slice.offset,
        length: slice.length,
    }
}

fn encode_shard(shard: &Shard) -> StoredShard {
    let contracts = shard
        .contract_set
        .iter()
        .map(|(host, ids)| {
            let ids = ids
                .iter()
                .map(|id| prefixed(CONTRACT_PREFIX, id.as_slice()))
                .collect();
            (prefixed(HOST_PREFIX, host.as_slice()), ids)
        })
        .collect();

    StoredShard {
        root: prefixed(ROOT_PREFIX, &shard.root),
        latest_host: prefixed(HOST_PREFIX, &shard.latest_host),
        contracts,
    }
}

fn prefixed(prefix: &str, bytes: &[u8]) -> String {
    format!("{}{}", prefix, hex::encode(bytes))
}

// ============================================================================
// Decoding helpers
// ============================================================================

fn decode_multihash(value: &str) -> Result<Vec<u8>> {
    if value.is_empty() {
        return Ok(Vec::new());
    }

    let invalid = || CodecError::InvalidMultibase {
        field: "multihash",
        value: value.to_string(),
    };

    let body = value.strip_prefix(BASE58BTC_PREFIX).ok_or_else(invalid)?;
    bs58::decode(body).into_vec().map_err(|_| invalid())
}

fn decode_key(field: &'static str, value: &str) -> Result<EncryptionKey> {
    Ok(EncryptionKey::new(strip_hex(field, KEY_PREFIX, value)?))
}

fn decode_slab_slice(slice: &StoredSlabSlice) -> Result<SlabSlice> {
    Ok(SlabSlice {
        slab: Slab {
            health: slice.slab.health,
            key: decode_key("slab.key", &slice.slab.key)?,
            min_shards: slice.slab.min_shards,
            shards: slice
                .slab
                .shards
                .iter()
                .map(decode_shard)
                .collect::<Result<_>>()?,
        },
        offset: slice.offset,
        length: slice.length,
    })
}

fn decode_shard(shard: &StoredShard) -> Result<Shard> {
    let mut contract_set = std::collections::BTreeMap::new();
    for (host, ids) in &shard.contracts {
        let host = Bytes(strip_hex("shard.contracts", HOST_PREFIX, host)?);
        let ids = ids
            .iter()
            .map(|id| strip_hex("shard.contracts[]", CONTRACT_PREFIX, id).map(Bytes))
            .collect::<Result<Vec<_>>>()?;
        contract_set.insert(host, ids);
    }

    Ok(Shard {
        root: strip_hex("shard.root", ROOT_PREFIX, &shard.root)?,
        latest_host: strip_hex("shard.latestHost", HOST_PREFIX, &shard.latest_host)?,
        contract_set,
    })
}

fn strip_hex(field: &'static str, prefix: &'static str, value: &str) -> Result<Vec<u8>> {
    let body = value
        .strip_prefix(prefix)
        .ok_or_else(|| CodecError::BadPrefix {
            field,
            prefix,
            value: value.to_string(),
        })?;
    parse_hex(field, body)
}

fn parse_hex(field: &'static str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|source| CodecError::InvalidHex { field, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_shard(seed: u8) -> Shard {
        let mut contract_set = BTreeMap::new();
        contract_set.insert(
            Bytes(vec![seed; 32]),
            vec![Bytes(vec![seed ^ 0xff; 32]), Bytes(vec![seed; 32])],
        );
        contract_set.insert(Bytes(vec![0x01; 32]), vec![]);
        Shard {
            root: vec![seed; 32],
            latest_host: vec![seed.wrapping_add(1); 32],
            contract_set,
        }
    }

    fn sample_entry() -> LogEntryWire {
        LogEntryWire {
            hash: vec![0xab, 0x12],
            proof: vec![1, 2, 3, 4],
            multihash: vec![0x12, 0x20, 0xde, 0xad, 0xbe, 0xef],
            protocol: "s5".into(),
            key: EncryptionKey::new(vec![0x11; 32]),
            size: u64::MAX - 1,
            slabs: vec![
                SlabSlice {
                    slab: Slab {
                        health: 1.0,
                        key: EncryptionKey::new(vec![0x22; 32]),
                        min_shards: 10,
                        shards: vec![sample_shard(3), sample_shard(4)],
                    },
                    offset: 0,
                    length: 4096,
                },
                SlabSlice {
                    slab: Slab {
                        health: 0.5,
                        key: EncryptionKey::new(vec![0x33; 32]),
                        min_shards: 1,
                        shards: vec![],
                    },
                    offset: 4096,
                    length: 12,
                },
            ],
            aliases: vec![],
        }
    }

    // ==================== Encoding ====================

    #[test]
    fn test_encode_prefixes() {
        let encoded = encode(sample_entry()).unwrap();
        let record = encoded.record;

        assert_eq!(record.hash, "ab12");
        assert_eq!(record.proof, "01020304");
        assert!(record.multihash.starts_with('z'));
        assert_eq!(record.key, format!("key:{}", "11".repeat(32)));
        assert_eq!(record.size, u64::MAX - 1);

        let slab = &record.slabs[0].slab;
        assert_eq!(slab.key, format!("key:{}", "22".repeat(32)));

        let shard = &slab.shards[0];
        assert_eq!(shard.root, format!("h:{}", "03".repeat(32)));
        assert_eq!(shard.latest_host, format!("ed25519:{}", "04".repeat(32)));

        let host = format!("ed25519:{}", "03".repeat(32));
        assert_eq!(
            shard.contracts[&host],
            vec![
                format!("fcid:{}", "fc".repeat(32)),
                format!("fcid:{}", "03".repeat(32)),
            ]
        );
    }

    #[test]
    fn test_encode_splits_aliases() {
        let mut entry = sample_entry();
        entry.aliases = vec!["nice-name".into(), "other".into()];

        let encoded = encode(entry).unwrap();
        assert_eq!(encoded.aliases, vec!["nice-name", "other"]);

        let json = serde_json::to_string(&encoded.record).unwrap();
        assert!(!json.contains("aliases"));
        assert!(!json.contains("nice-name"));
    }

    #[test]
    fn test_encode_rejects_empty_hash() {
        let entry = LogEntryWire {
            hash: vec![],
            ..sample_entry()
        };
        assert!(matches!(encode(entry), Err(CodecError::MissingField("hash"))));
    }

    #[test]
    fn test_multihash_uses_base58btc() {
        // "Hello World!" is a well known base58btc vector
        let entry = LogEntryWire {
            multihash: b"Hello World!".to_vec(),
            ..sample_entry()
        };
        let record = encode(entry).unwrap().record;
        assert_eq!(record.multihash, "z2NEpo7TZRRrLZSi2U");
    }

    // ==================== Round trip ====================

    #[test]
    fn test_roundtrip_full_entry() {
        let entry = sample_entry();
        let decoded = decode(&encode(entry.clone()).unwrap().record).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_roundtrip_restores_entry_minus_aliases() {
        let mut entry = sample_entry();
        entry.aliases = vec!["alias".into()];

        let encoded = encode(entry.clone()).unwrap();
        let decoded = decode(&encoded.record).unwrap();

        assert!(decoded.aliases.is_empty());
        assert_eq!(
            LogEntryWire {
                aliases: encoded.aliases,
                ..decoded
            },
            entry
        );
    }

    #[test]
    fn test_empty_multihash_maps_to_empty_string_and_back() {
        let entry = LogEntryWire {
            multihash: vec![],
            ..sample_entry()
        };
        let record = encode(entry).unwrap().record;
        assert_eq!(record.multihash, "");

        let decoded = decode(&record).unwrap();
        assert!(decoded.multihash.is_empty());
    }

    #[test]
    fn test_roundtrip_minimal_entry() {
        let entry = LogEntryWire {
            hash: vec![0xab, 0x12],
            ..Default::default()
        };
        let record = encode(entry.clone()).unwrap().record;
        assert_eq!(record.key, "key:");
        assert_eq!(decode(&record).unwrap(), entry);
    }

    // ==================== Decode failures ====================

    #[test]
    fn test_decode_rejects_wrong_key_prefix() {
        let mut record = encode(sample_entry()).unwrap().record;
        record.key = format!("kex:{}", "11".repeat(32));
        assert!(matches!(
            decode(&record),
            Err(CodecError::BadPrefix { field: "key", .. })
        ));
    }

    #[test]
    fn test_decode_rejects_too_short_host() {
        let mut record = encode(sample_entry()).unwrap().record;
        record.slabs[0].slab.shards[0].latest_host = "ed25".into();
        assert!(matches!(
            decode(&record),
            Err(CodecError::BadPrefix {
                field: "shard.latestHost",
                ..
            })
        ));
    }

    #[test]
    fn test_decode_rejects_bad_contract_prefix() {
        let mut record = encode(sample_entry()).unwrap().record;
        let shard = &mut record.slabs[0].slab.shards[0];
        let host = shard.contracts.keys().next().unwrap().clone();
        shard.contracts.insert(host, vec!["fcx:00".into()]);
        assert!(matches!(decode(&record), Err(CodecError::BadPrefix { .. })));
    }

    #[test]
    fn test_decode_rejects_invalid_hex() {
        let mut record = encode(sample_entry()).unwrap().record;
        record.hash = "xyz".into();
        assert!(matches!(
            decode(&record),
            Err(CodecError::InvalidHex { field: "hash", .. })
        ));
    }

    #[test]
    fn test_decode_rejects_multihash_without_multibase_prefix() {
        let mut record = encode(sample_entry()).unwrap().record;
        record.multihash = "2NEpo7TZRRrLZSi2U".into();
        assert!(matches!(
            decode(&record),
            Err(CodecError::InvalidMultibase { .. })
        ));

        record.multihash = "z0OIl".into();
        assert!(matches!(
            decode(&record),
            Err(CodecError::InvalidMultibase { .. })
        ));
    }
}
