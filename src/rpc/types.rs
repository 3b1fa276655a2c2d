//! Wire-level data types shared by the namenode and datanode RPC surfaces.
use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a block as assigned by a namenode. Equality and
/// ordering are by identifier only; generation stamp and size ride along
/// for the RPC but do not participate in identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
	pub id: u64,
	pub generation_stamp: u64,
	pub num_bytes: u64,
}

impl fmt::Display for BlockId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "blk_{}_{}", self.id, self.generation_stamp)
	}
}

impl PartialOrd for BlockId {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for BlockId {
	fn cmp(&self, other: &Self) -> Ordering {
		self.id.cmp(&other.id)
	}
}

/// Integer tag present only in federation-capable clusters, paired with a
/// [`BlockId`] whenever the RPC surface supports federation.
pub type NamespaceId = i64;

/// Stable textual identity (host:port) plus the routable info a datanode
/// RPC and a connection cache both need. Identity is `host:port` alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatanodeRef {
	pub hostname: String,
	pub transfer_port: u16,
	pub storage_id: String,
}

impl DatanodeRef {
	/// The stable identity used for equality, ordering, error-registry and
	/// connection-cache keys.
	pub fn identity(&self) -> String {
		format!("{}:{}", self.hostname, self.transfer_port)
	}
}

impl PartialEq for DatanodeRef {
	fn eq(&self, other: &Self) -> bool {
		self.identity() == other.identity()
	}
}
impl Eq for DatanodeRef {}

impl PartialOrd for DatanodeRef {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for DatanodeRef {
	fn cmp(&self, other: &Self) -> Ordering {
		self.identity().cmp(&other.identity())
	}
}

impl fmt::Display for DatanodeRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.identity())
	}
}

/// A block together with the ordered list of datanodes holding a replica,
/// and its position within the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatedBlock {
	pub block: BlockId,
	pub namespace_id: Option<NamespaceId>,
	pub replicas: Vec<DatanodeRef>,
	pub offset: u64,
	pub length: u64,
}

/// Attributes of a source file needed to recreate it at the destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttrs {
	pub permission: u16,
	pub replication: u16,
	pub block_size: u64,
}

/// Result of a successful `addBlock`/`addBlockAndFetchMetaInfo` call: the
/// newly allocated block plus, when the namenode speaks the federation
/// dialect, its namespace id.
#[derive(Debug, Clone)]
pub struct AllocatedBlock {
	pub located: LocatedBlock,
}

/// The three shapes of the allocate-block RPC a namenode may expose,
/// richest first. Probed once per namenode handle and cached (see
/// [`crate::namenode::ApiLevel`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddBlockShape {
	/// `addBlock`: no start position, no federation metadata.
	Legacy,
	/// `addBlockAndFetchMetaInfo` without start position.
	FetchMetaInfo,
	/// `addBlockAndFetchMetaInfo` with start position: the richest shape.
	FetchMetaInfoWithStart,
}

/// The two shapes of the "open and get locations" RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenShape {
	/// `getBlockLocations`: no namespace id in the response.
	Legacy,
	/// `openAndFetchMetaInfo`: federation-aware.
	Federation,
}
