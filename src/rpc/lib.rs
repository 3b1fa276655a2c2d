//! RPC surface for FastCopy: the namenode/datanode client traits, wire
//! types, the netapp-backed transport, and the datanode connection cache.
#[macro_use]
extern crate tracing;

pub mod connection_cache;
pub mod datanode;
pub mod namenode;
pub mod transport;
pub mod types;

pub use connection_cache::{Closeable, DatanodeConnectionCache};
pub use datanode::DatanodeClient;
pub use namenode::{AllocateOutcome, CompleteOutcome, NamenodeClient};
