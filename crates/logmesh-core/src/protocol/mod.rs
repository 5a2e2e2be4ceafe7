//! Mesh wire protocol.
//!
//! - Versioned JSON handshake, sent first by both sides
//! - Bincode mux frames carrying named channels afterwards
//! - Request/response messages of the `logmesh.log` channel

pub mod encoding;
pub mod frame;
pub mod handshake;

pub use encoding::{detect_message_type, MessageType};
pub use frame::{
    decode_records, FrameError, LogMessage, LogRequest, LogResponse, MuxFrame, LOG_PROTOCOL,
    MAX_MESSAGE_SIZE, MAX_PULL_BATCH,
};
pub use handshake::{Handshake, PROTOCOL_VERSION};
