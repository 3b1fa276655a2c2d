//! Core data model and orchestration logic for FastCopy: the distributed
//! block-copy orchestrator that duplicates replicas locally on the
//! datanode that already hosts them, instead of moving bytes across racks.
#[macro_use]
extern crate tracing;

pub mod block_copy_task;
pub mod block_status;
pub mod datanode_errors;
pub mod expansion;
pub mod file_copy_job;
pub mod file_status;
pub mod lease_renewer;
pub mod metrics;
pub mod orchestrator;
pub mod shared;

pub use orchestrator::{CopyRequest, FastCopy, NamenodeResolver};
