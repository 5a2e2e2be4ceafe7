//! logmesh-core: the replicated log model, independent of any transport.
//!
//! - [`entry`]: wire and storage forms of a log entry and the codec between them
//! - [`log`]: the [`Log`] abstraction, with [`MemoryLog`] as in-process state machine
//! - [`query`]: alias-resolving lookups across the local and discovered logs
//! - [`membership`]: writer admission and removal
//! - [`discovery`]: per-connection log key exchange and the discovered-log registry
//! - [`protocol`]: mesh handshake and mux frames

pub mod discovery;
pub mod entry;
pub mod keys;
pub mod log;
pub mod membership;
pub mod memory;
pub mod protocol;
pub mod query;

pub use discovery::{DiscoveredLogs, RelayAction, RelaySession, Role};
pub use entry::{decode, encode, CodecError, Encoded, LogEntryWire, StoredEntry};
pub use keys::{DiscoveryKey, KeyError, Keypair, PublicKey};
pub use log::{
    Heads, Log, LogError, LogRecord, LogStore, LogValue, MembershipOp, ReplicatedRecord,
    ReplicationPeer, Writer,
};
pub use membership::{MembershipCoordinator, MembershipError};
pub use memory::MemoryLog;
pub use query::{EngineFailure, LookupFailure, QueryEngine, DEFAULT_MAX_ALIAS_HOPS};
