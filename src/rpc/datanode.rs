//! The datanode RPC surface, as consumed by `BlockCopyTask`.
use async_trait::async_trait;

use fastcopy_util::error::Error;

use crate::types::{BlockId, DatanodeRef, NamespaceId};

/// A single replica-copy operation: "you (the source datanode) produce a
/// local replica transfer of `src_block` to `dst_node`, as `dst_block`".
///
/// The RPC is synchronous: it returns only once `dst_node` holds the
/// replica. There is no async/background variant in this client: callers
/// always invoke the RPC with `async=false`.
#[async_trait]
pub trait DatanodeClient: Send + Sync {
	async fn copy_block(
		&self,
		src_namespace_id: Option<NamespaceId>,
		src_block: BlockId,
		dst_namespace_id: Option<NamespaceId>,
		dst_block: BlockId,
		dst_node: &DatanodeRef,
	) -> Result<(), Error>;
}
