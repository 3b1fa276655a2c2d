//! Lazily-built, shared pool of datanode RPC handles keyed by node identity.
//!
//! Two-phase lookup as described in the design: an optimistic read against
//! the shared map; on miss, an exclusive section that re-checks (another
//! caller may have raced us) before inserting. Entries live until
//! [`DatanodeConnectionCache::shutdown`] is called by the orchestrator at
//! teardown.
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use fastcopy_util::error::Error;

use crate::types::DatanodeRef;

/// A cached handle that can be torn down when the orchestrator shuts down.
#[async_trait]
pub trait Closeable: Send + Sync {
	async fn close(&self);
}

pub struct DatanodeConnectionCache<C> {
	entries: RwLock<HashMap<String, Arc<C>>>,
}

impl<C: Closeable> Default for DatanodeConnectionCache<C> {
	fn default() -> Self {
		Self::new()
	}
}

impl<C: Closeable> DatanodeConnectionCache<C> {
	pub fn new() -> Self {
		Self {
			entries: RwLock::new(HashMap::new()),
		}
	}

	/// Get the cached handle for `node`, building a new one with `connect`
	/// on first use.
	pub async fn get_or_connect<F, Fut>(&self, node: &DatanodeRef, connect: F) -> Result<Arc<C>, Error>
	where
		F: FnOnce(DatanodeRef) -> Fut,
		Fut: Future<Output = Result<C, Error>>,
	{
		let key = node.identity();

		// Optimistic unsynchronized read.
		if let Some(conn) = self.entries.read().await.get(&key) {
			return Ok(conn.clone());
		}

		// Miss: take the exclusive section, re-check, then insert.
		let mut guard = self.entries.write().await;
		if let Some(conn) = guard.get(&key) {
			return Ok(conn.clone());
		}
		let conn = Arc::new(connect(node.clone()).await?);
		debug!("opened datanode connection to {}", key);
		guard.insert(key, conn.clone());
		Ok(conn)
	}

	pub async fn len(&self) -> usize {
		self.entries.read().await.len()
	}

	/// Close every cached handle and clear the map. Must be called exactly
	/// once by the orchestrator at teardown; safe to call twice (the
	/// second call just finds an empty map).
	pub async fn shutdown(&self) {
		let mut guard = self.entries.write().await;
		let n = guard.len();
		for (_, conn) in guard.drain() {
			conn.close().await;
		}
		debug!("closed {} datanode connection(s)", n);
	}
}
