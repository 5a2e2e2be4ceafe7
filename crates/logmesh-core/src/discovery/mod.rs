//! Peer discovery: learning which logs connected peers serve.
//!
//! - [`relay`]: per-connection key exchange state machine
//! - [`registry`]: the discovered-log registry queries read from

pub mod registry;
pub mod relay;

pub use registry::{DiscoveredLogs, RegistryError};
pub use relay::{RelayAction, RelaySession, RelayState, Role, SYNC_PROTOCOL};
