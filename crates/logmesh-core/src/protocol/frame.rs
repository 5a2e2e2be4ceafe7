//! Binary frames exchanged after the handshake.
//!
//! Every frame names the channel (protocol) it belongs to, so several
//! protocols share one connection. The `logmesh.log` channel carries
//! [`LogRequest`]/[`LogResponse`] pairs matched by `id`, each wrapped in a
//! [`LogMessage`] so a payload says which of the two it is.
//!
//! Replicated records ride inside [`LogResponse::Records`] as JSON text:
//! their internally tagged enums do not survive bincode.

use crate::keys::PublicKey;
use crate::log::{Heads, LogValue, ReplicatedRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum message size (50MB).
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Channel over which peers read each other's logs.
pub const LOG_PROTOCOL: &str = "logmesh.log";

/// Most records served for one pull.
pub const MAX_PULL_BATCH: usize = 256;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Malformed record: {0}")]
    Record(#[from] serde_json::Error),
}

fn encode_bounded<T: Serialize>(value: &T) -> Result<Vec<u8>, FrameError> {
    let bytes = bincode::serialize(value)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(bytes)
}

fn decode_bounded<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, FrameError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(bincode::deserialize(data)?)
}

/// One multiplexed frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MuxFrame {
    /// Sender opened its side of `protocol`.
    Open { protocol: String },
    Message { protocol: String, payload: Vec<u8> },
    /// Sender closed its side of `protocol`.
    Close { protocol: String },
}

impl MuxFrame {
    pub fn protocol(&self) -> &str {
        match self {
            Self::Open { protocol } | Self::Message { protocol, .. } | Self::Close { protocol } => {
                protocol
            }
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode_bounded(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        decode_bounded(data)
    }
}

/// Request on the `logmesh.log` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRequest {
    /// Read `key` from the log `log` served by the receiver.
    Get { id: u64, log: PublicKey, key: String },
    /// Fetch records of `log` beyond what the sender already holds.
    Pull { id: u64, log: PublicKey, have: Heads },
}

impl LogRequest {
    pub fn id(&self) -> u64 {
        match self {
            Self::Get { id, .. } | Self::Pull { id, .. } => *id,
        }
    }
}

/// Response on the `logmesh.log` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogResponse {
    Value { id: u64, value: LogValue },
    NotFound { id: u64 },
    Error { id: u64, message: String },
    /// Answer to a pull: one JSON-encoded [`ReplicatedRecord`] per element.
    Records { id: u64, records: Vec<String> },
}

impl LogResponse {
    pub fn id(&self) -> u64 {
        match self {
            Self::Value { id, .. }
            | Self::NotFound { id }
            | Self::Error { id, .. }
            | Self::Records { id, .. } => *id,
        }
    }

    pub fn records(id: u64, records: &[ReplicatedRecord]) -> Result<Self, FrameError> {
        let records = records
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<_, _>>()?;
        Ok(Self::Records { id, records })
    }
}

/// Decode the records carried by [`LogResponse::Records`].
pub fn decode_records(records: &[String]) -> Result<Vec<ReplicatedRecord>, FrameError> {
    records
        .iter()
        .map(|r| serde_json::from_str(r).map_err(FrameError::from))
        .collect()
}

/// Payload of a `logmesh.log` channel message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogMessage {
    Request(LogRequest),
    Response(LogResponse),
}

impl LogMessage {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode_bounded(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        decode_bounded(data)
    }
}
