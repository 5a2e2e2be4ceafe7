//! logmesh-node library: the node runtime behind the `logmesh-node` binary.
//!
//! Exposed as a library so integration tests can run whole nodes in process.

pub mod config;
pub mod connection;
pub mod dialer;
pub mod file_log;
pub mod mesh;
pub mod mux;
pub mod relay;
pub mod remote;
pub mod replicator;
pub mod rpc;
pub mod service;
pub mod store;

pub use config::Config;
pub use file_log::FileLog;
pub use mesh::{Mesh, MeshError};
pub use service::{InitRequest, NodeRuntime, Service, ServiceError, Status};
pub use store::NodeStore;
