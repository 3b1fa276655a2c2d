//! The namenode RPC surface, as consumed by the FastCopy client.
//!
//! This module defines *interfaces only*: the actual RPC
//! transport and wire serialization are an external collaborator. A real
//! deployment plugs in a concrete `NamenodeClient`, for example one built
//! atop `netapp`-style point-to-point RPC (see [`crate::transport`]); tests
//! plug in an in-memory fake.
use async_trait::async_trait;

use fastcopy_util::error::Error;

use crate::types::{AddBlockShape, DatanodeRef, FileAttrs, LocatedBlock, OpenShape};

/// Outcome of an allocate-block call that may still be pending on the
/// namenode side ("not replicated yet" for the previous block).
pub enum AllocateOutcome {
	Allocated(LocatedBlock),
	NotReplicatedYet,
}

/// Outcome of a `complete` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
	Completed,
	NotYet,
}

/// Logical RPC surface exposed by a namenode, as used by a `FileCopyJob`.
///
/// Implementations decide internally which wire shape
/// ([`AddBlockShape`]/[`OpenShape`]) to speak; `api_level()` reports what
/// was detected so `FileCopyJob` can reject cross-federation copies before
/// doing any work.
#[async_trait]
pub trait NamenodeClient: Send + Sync {
	/// The richest supported shape of `addBlock*`, probed once and cached
	/// by the implementation.
	fn add_block_shape(&self) -> AddBlockShape;

	/// The richest supported shape of the "open" RPC.
	fn open_shape(&self) -> OpenShape;

	/// `getFileInfo`
	async fn get_file_info(&self, path: &str) -> Result<Option<FileAttrs>, Error>;

	/// `getBlockLocations` / `openAndFetchMetaInfo` depending on
	/// `open_shape()`. Returns the complete block list in file order.
	async fn get_located_blocks(&self, path: &str) -> Result<Vec<LocatedBlock>, Error>;

	/// `create(path, perm, clientName, overwrite=true, createParent=true, replication, blockSize)`
	async fn create(&self, path: &str, client_name: &str, attrs: &FileAttrs) -> Result<(), Error>;

	/// `addBlock` / `addBlockAndFetchMetaInfo`, using the richest shape
	/// this namenode supports. `start_pos` is only sent when
	/// `add_block_shape()` is [`AddBlockShape::FetchMetaInfoWithStart`].
	async fn add_block(
		&self,
		path: &str,
		client_name: &str,
		favored_nodes: &[DatanodeRef],
		start_pos: u64,
	) -> Result<AllocateOutcome, Error>;

	/// `complete(path, clientName) -> bool`
	async fn complete(&self, path: &str, client_name: &str) -> Result<CompleteOutcome, Error>;

	/// `delete(path, recursive=false)`. Best-effort: failures are logged by
	/// the caller, never propagated past cleanup.
	async fn delete(&self, path: &str, recursive: bool) -> Result<(), Error>;

	/// `renewLease(clientName)`
	async fn renew_lease(&self, client_name: &str) -> Result<(), Error>;
}
