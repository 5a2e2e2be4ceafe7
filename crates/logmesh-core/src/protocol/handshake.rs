//! Versioned handshake.
//!
//! Sent by both sides immediately after the WebSocket connection is up. It
//! carries the node identity (used by the relay's self-check) and the topics
//! the node has joined; two nodes with no topic in common hang up.

use crate::keys::{DiscoveryKey, PublicKey};
use serde::{Deserialize, Serialize};

/// Mesh protocol version spoken by this build.
pub const PROTOCOL_VERSION: u32 = 1;

const HANDSHAKE_TYPE: &str = "handshake";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Message type discriminator
    #[serde(rename = "type")]
    pub msg_type: String,
    pub version: u32,
    /// Sender's node identity
    pub node_key: PublicKey,
    /// Topics the sender has joined
    #[serde(default)]
    pub topics: Vec<DiscoveryKey>,
}

impl Handshake {
    pub fn new(node_key: PublicKey, topics: Vec<DiscoveryKey>) -> Self {
        Self {
            msg_type: HANDSHAKE_TYPE.to_string(),
            version: PROTOCOL_VERSION,
            node_key,
            topics,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Try to parse from JSON bytes. Returns `None` for anything that is not
    /// a handshake.
    pub fn from_json(data: &[u8]) -> Option<Self> {
        let handshake: Self = serde_json::from_slice(data).ok()?;
        (handshake.msg_type == HANDSHAKE_TYPE).then_some(handshake)
    }

    /// Peer speaks another version. Connections still proceed; frames this
    /// build cannot decode are dropped.
    pub fn is_foreign_version(&self) -> bool {
        self.version != PROTOCOL_VERSION
    }

    /// Whether the sender joined at least one of `ours`.
    pub fn shares_topic(&self, ours: &[DiscoveryKey]) -> bool {
        self.topics.iter().any(|topic| ours.contains(topic))
    }
}
