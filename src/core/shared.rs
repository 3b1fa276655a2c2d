//! State shared between every in-flight `BlockCopyTask` and `FileCopyJob`
//! within one orchestrator instance.
use std::sync::Arc;

use async_trait::async_trait;

use fastcopy_rpc::connection_cache::Closeable;
use fastcopy_rpc::datanode::DatanodeClient;
use fastcopy_rpc::types::DatanodeRef;
use fastcopy_rpc::DatanodeConnectionCache;
use fastcopy_util::config::Config;
use fastcopy_util::error::Error;

use crate::block_status::BlockStatusRegistry;
use crate::datanode_errors::DatanodeErrorRegistry;
use crate::file_status::FileStatusRegistry;
use crate::metrics::OrchestratorMetrics;

/// Builds a fresh datanode RPC handle for a given node identity. The
/// connection cache calls this on first use of a node; the external RPC
/// transport (e.g. [`fastcopy_rpc::transport`]) supplies the implementation.
#[async_trait]
pub trait DatanodeConnector<C>: Send + Sync {
	async fn connect(&self, node: DatanodeRef) -> Result<C, Error>;
}

pub struct SharedState<C> {
	pub config: Config,
	pub client_name: String,
	pub block_status: BlockStatusRegistry,
	pub file_status: FileStatusRegistry,
	pub datanode_errors: DatanodeErrorRegistry,
	pub datanode_cache: DatanodeConnectionCache<C>,
	pub metrics: OrchestratorMetrics,
	connector: Arc<dyn DatanodeConnector<C>>,
}

impl<C> SharedState<C>
where
	C: DatanodeClient + Closeable,
{
	pub fn new(config: Config, client_name: String, connector: Arc<dyn DatanodeConnector<C>>) -> Arc<Self> {
		Arc::new(Self {
			config,
			client_name,
			block_status: BlockStatusRegistry::new(),
			file_status: FileStatusRegistry::new(),
			datanode_errors: DatanodeErrorRegistry::new(),
			datanode_cache: DatanodeConnectionCache::new(),
			metrics: OrchestratorMetrics::new(),
			connector,
		})
	}

	pub async fn datanode(&self, node: &DatanodeRef) -> Result<Arc<C>, Error> {
		let connector = self.connector.clone();
		self.datanode_cache
			.get_or_connect(node, |node| async move { connector.connect(node).await })
			.await
	}
}
