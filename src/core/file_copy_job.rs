//! Per-file pipeline: metadata fetch, allocate-block-then-fan-out loop,
//! commit.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::sleep;

use fastcopy_rpc::connection_cache::Closeable;
use fastcopy_rpc::datanode::DatanodeClient;
use fastcopy_rpc::namenode::{AllocateOutcome, CompleteOutcome, NamenodeClient};
use fastcopy_rpc::types::{AddBlockShape, DatanodeRef, LocatedBlock, OpenShape};
use fastcopy_util::error::Error;

use crate::block_copy_task::{BlockCopyTask, JobErrorFlag};
use crate::shared::SharedState;

const NOT_REPLICATED_RETRY_LIMIT: u32 = 10;
const NOT_REPLICATED_RETRY_SLEEP: Duration = Duration::from_secs(1);
const COMMIT_POLL_SLEEP: Duration = Duration::from_secs(5);

/// One request to copy `src` to `dst` within the cluster.
pub struct FileCopyJob<N, C> {
	pub src_path: String,
	pub dst_path: String,
	pub src_namenode: Arc<N>,
	pub dst_namenode: Arc<N>,
	pub shared: Arc<SharedState<C>>,
}

impl<N, C> FileCopyJob<N, C>
where
	N: NamenodeClient + ?Sized,
	C: DatanodeClient + Closeable,
{
	pub async fn run(self) -> Result<(), Error> {
		check_federation_compatibility(self.src_namenode.open_shape(), self.dst_namenode.add_block_shape())?;

		let attrs = self
			.src_namenode
			.get_file_info(&self.src_path)
			.await?
			.ok_or_else(|| Error::Precondition(format!("source file not found: {}", self.src_path)))?;
		let src_blocks = self.src_namenode.get_located_blocks(&self.src_path).await?;

		self.dst_namenode.create(&self.dst_path, &self.shared.client_name, &attrs).await?;

		self.shared.file_status.set_total(&self.dst_path, src_blocks.len()).await;
		let job_error = JobErrorFlag::new();
		let pool = Arc::new(Semaphore::new(self.shared.config.block_rpc_pool_size));

		let mut blocks_added = 0usize;
		let mut offset = 0u64;

		for src_block in &src_blocks {
			let allocated = self.allocate_block(src_block, offset, &job_error).await?;
			offset += src_block.length;

			let pairs = pair_replicas(&src_block.replicas, &allocated.replicas);
			self.shared.block_status.register(allocated.block, pairs.len(), self.shared.config.min_replication).await;

			for (src_node, dst_node) in pairs {
				let task = BlockCopyTask {
					path: self.dst_path.clone(),
					src_namespace_id: src_block.namespace_id,
					src_block: src_block.block,
					src_node,
					dst_namespace_id: allocated.namespace_id,
					dst_block: allocated.block,
					dst_node,
					shared: self.shared.clone(),
					job_error: job_error.clone(),
				};
				let permit = pool.clone().acquire_owned().await.expect("semaphore never closed");
				tokio::spawn(async move {
					task.run().await;
					drop(permit);
				});
			}

			blocks_added += 1;

			tokio::select! {
				_ = self.shared.file_status.wait_for_blocks_done(&self.dst_path, blocks_added) => {}
				msg = job_error.wait() => return Err(Error::message(msg)),
			}
		}

		// Drain: make sure every spawned task has actually released its
		// permit before declaring the pool empty.
		let drain = pool.acquire_many(self.shared.config.block_rpc_pool_size as u32);
		tokio::time::timeout(self.shared.config.file_wait_time(), drain)
			.await
			.map_err(|_| Error::Timeout(format!("draining block pool for {}", self.dst_path)))?
			.expect("semaphore never closed");

		if let Some(msg) = job_error.get().await {
			return Err(Error::message(msg));
		}

		self.commit().await
	}

	async fn allocate_block(&self, src_block: &LocatedBlock, offset: u64, job_error: &Arc<JobErrorFlag>) -> Result<LocatedBlock, Error> {
		for attempt in 0..=NOT_REPLICATED_RETRY_LIMIT {
			if let Some(msg) = job_error.get().await {
				return Err(Error::message(msg));
			}
			let outcome = self
				.dst_namenode
				.add_block(&self.dst_path, &self.shared.client_name, &src_block.replicas, offset)
				.await;
			match outcome {
				Ok(AllocateOutcome::Allocated(located)) => return Ok(located),
				Ok(AllocateOutcome::NotReplicatedYet) => {
					if attempt == NOT_REPLICATED_RETRY_LIMIT {
						return Err(Error::Timeout(format!(
							"previous block of {} never finished replicating",
							self.dst_path
						)));
					}
					debug!("block of {} not replicated yet, retrying in 1s (attempt {})", self.dst_path, attempt + 1);
					sleep(NOT_REPLICATED_RETRY_SLEEP).await;
				}
				Err(e) => return Err(e),
			}
		}
		unreachable!()
	}

	async fn commit(&self) -> Result<(), Error> {
		let deadline = tokio::time::Instant::now() + self.shared.config.file_wait_time();
		loop {
			match self.dst_namenode.complete(&self.dst_path, &self.shared.client_name).await? {
				CompleteOutcome::Completed => return Ok(()),
				CompleteOutcome::NotYet => {
					if tokio::time::Instant::now() >= deadline {
						return Err(Error::Timeout(format!("commit of {}", self.dst_path)));
					}
					sleep(COMMIT_POLL_SLEEP).await;
				}
			}
		}
	}
}

fn check_federation_compatibility(src_open_shape: OpenShape, dst_add_block_shape: AddBlockShape) -> Result<(), Error> {
	let src_federated = src_open_shape == OpenShape::Federation;
	let dst_federated = matches!(dst_add_block_shape, AddBlockShape::FetchMetaInfo | AddBlockShape::FetchMetaInfoWithStart);
	if src_federated != dst_federated {
		return Err(Error::CrossFederation(
			"source and destination namenodes disagree on federation support".to_string(),
		));
	}
	Ok(())
}

/// Sort both replica lists deterministically and pair them positionally;
/// the shorter list bounds how many replicas get copied.
fn pair_replicas(src: &[DatanodeRef], dst: &[DatanodeRef]) -> Vec<(DatanodeRef, DatanodeRef)> {
	let mut src = src.to_vec();
	let mut dst = dst.to_vec();
	src.sort();
	dst.sort();
	src.into_iter().zip(dst).collect()
}
