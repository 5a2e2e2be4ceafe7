//! Log entries in their two shapes and the codec between them.
//!
//! - [`wire`]: what callers send and receive (binary fields)
//! - [`storage`]: what the log holds (prefixed text tokens)
//! - [`codec`]: `encode` / `decode` between the two

pub mod codec;
pub mod storage;
pub mod wire;

pub use codec::{decode, encode, CodecError, Encoded};
pub use storage::{StoredEntry, StoredShard, StoredSlab, StoredSlabSlice};
pub use wire::{Bytes, EncryptionKey, LogEntryWire, Shard, Slab, SlabSlice};
