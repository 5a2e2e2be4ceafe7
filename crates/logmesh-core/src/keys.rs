//! Keys used across the mesh: node identities, log keys and discovery keys.
//!
//! All keys are 32 bytes and display as 64-character lowercase hex,
//! which is also their serde representation.

use ed25519_dalek::SigningKey;
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Length of every key in bytes.
pub const KEY_LEN: usize = 32;

/// Domain separator for deriving a log's discovery key.
const DISCOVERY_NAMESPACE: &[u8] = b"logmesh/discovery";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("Secret key does not match its embedded public key")]
    PublicKeyMismatch,
}

macro_rules! key_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; KEY_LEN]);

        impl $name {
            /// Wrap raw key bytes.
            pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
                Self(bytes)
            }

            /// Parse from a slice, which must be exactly 32 bytes.
            pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
                let arr: [u8; KEY_LEN] =
                    bytes.try_into().map_err(|_| KeyError::InvalidLength {
                        expected: KEY_LEN,
                        actual: bytes.len(),
                    })?;
                Ok(Self(arr))
            }

            pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = KeyError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = hex::decode(s)?;
                Self::from_slice(&bytes)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_str(&self.to_hex())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                let s = String::deserialize(d)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

key_type!(
    /// An ed25519 public key: identifies a node on the mesh, a writer of a
    /// log, or the log itself.
    PublicKey
);

key_type!(
    /// Public identifier by which a log (or a protocol) is located on the
    /// mesh. Never used as a key inside a log's key-value space.
    DiscoveryKey
);

impl DiscoveryKey {
    /// Discovery key for a log.
    pub fn for_log(log_key: &PublicKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(DISCOVERY_NAMESPACE);
        hasher.update(log_key.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Topic under which every node speaking `protocol` meets.
    pub fn for_protocol(protocol: &str) -> Self {
        Self(Sha256::digest(protocol.as_bytes()).into())
    }
}

/// An ed25519 keypair held by a node (its identity) or by a log founder.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh keypair from OS randomness.
    pub fn generate() -> Self {
        use rand::Rng;
        let seed: [u8; KEY_LEN] = rand::rng().random();
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Build a keypair from secret material.
    ///
    /// Accepts either a 32-byte seed or the 64-byte `seed ‖ public` form.
    /// In the long form the public half must match the seed.
    pub fn from_secret(bytes: &[u8]) -> Result<Self, KeyError> {
        let seed: [u8; KEY_LEN] = match bytes.len() {
            KEY_LEN | 64 => bytes[..KEY_LEN]
                .try_into()
                .map_err(|_| KeyError::InvalidLength {
                    expected: KEY_LEN,
                    actual: bytes.len(),
                })?,
            actual => {
                return Err(KeyError::InvalidLength {
                    expected: KEY_LEN,
                    actual,
                })
            }
        };

        let keypair = Self {
            signing_key: SigningKey::from_bytes(&seed),
        };

        if bytes.len() == 64 && keypair.public_key().as_bytes()[..] != bytes[KEY_LEN..] {
            return Err(KeyError::PublicKeyMismatch);
        }

        Ok(keypair)
    }

    /// Parse hex-encoded secret material (see [`Keypair::from_secret`]).
    pub fn from_secret_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim())?;
        Self::from_secret(&bytes)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// The 32-byte seed as hex.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== PublicKey ====================

    #[test]
    fn test_display_is_lowercase_hex() {
        let key = PublicKey::from_bytes([0xab; KEY_LEN]);
        assert_eq!(key.to_string(), "ab".repeat(KEY_LEN));
    }

    #[test]
    fn test_parse_uppercase_hex() {
        let key: PublicKey = "AB".repeat(KEY_LEN).parse().unwrap();
        assert_eq!(key.as_bytes(), &[0xab; KEY_LEN]);
    }

    #[test]
    fn test_reject_wrong_length() {
        assert!("abcd".parse::<PublicKey>().is_err());
        assert!("".parse::<PublicKey>().is_err());
        assert!(PublicKey::from_slice(&[0u8; 31]).is_err());
        assert!(PublicKey::from_slice(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_reject_non_hex() {
        assert!("zz".repeat(KEY_LEN).parse::<PublicKey>().is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let key = PublicKey::from_bytes([7; KEY_LEN]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", "07".repeat(KEY_LEN)));
        let parsed: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }

    // ==================== DiscoveryKey ====================

    #[test]
    fn test_discovery_key_differs_from_log_key() {
        let log_key = PublicKey::from_bytes([1; KEY_LEN]);
        let discovery = DiscoveryKey::for_log(&log_key);
        assert_ne!(discovery.as_bytes(), log_key.as_bytes());
        assert_eq!(discovery, DiscoveryKey::for_log(&log_key));
    }

    #[test]
    fn test_protocol_topic_is_stable() {
        let a = DiscoveryKey::for_protocol("logmesh.sync");
        let b = DiscoveryKey::for_protocol("logmesh.sync");
        let c = DiscoveryKey::for_protocol("logmesh.other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    // ==================== Keypair ====================

    #[test]
    fn test_keypair_from_seed_is_deterministic() {
        let a = Keypair::from_secret(&[9; KEY_LEN]).unwrap();
        let b = Keypair::from_secret(&[9; KEY_LEN]).unwrap();
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_keypair_accepts_long_form() {
        let short = Keypair::from_secret(&[3; KEY_LEN]).unwrap();
        let mut long = vec![3; KEY_LEN];
        long.extend_from_slice(short.public_key().as_bytes());

        let parsed = Keypair::from_secret(&long).unwrap();
        assert_eq!(parsed.public_key(), short.public_key());
    }

    #[test]
    fn test_keypair_rejects_mismatched_long_form() {
        let mut long = vec![3; KEY_LEN];
        long.extend_from_slice(&[0; KEY_LEN]);
        assert!(matches!(
            Keypair::from_secret(&long),
            Err(KeyError::PublicKeyMismatch)
        ));
    }

    #[test]
    fn test_keypair_rejects_bad_length() {
        assert!(Keypair::from_secret(&[0; 16]).is_err());
    }

    #[test]
    fn test_secret_hex_roundtrip() {
        let original = Keypair::generate();
        let parsed = Keypair::from_secret_hex(&original.secret_hex()).unwrap();
        assert_eq!(original.public_key(), parsed.public_key());
    }
}
