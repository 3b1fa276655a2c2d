//! Per-destination-block replica tally and verdict, plus the process-wide
//! registry of in-flight blocks.
//!
//! The registry is a concurrent map with an exclusive section around verdict
//! transitions, so that "observed GOOD/BAD → remove entry" happens
//! at-most-once per block, as required by `FileStatus`'s exactly-once
//! increment invariant.
use std::collections::HashMap;

use tokio::sync::Mutex;

use fastcopy_rpc::types::BlockId;

/// Verdict reached by a block once enough replicas have reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
	Good,
	Bad,
}

#[derive(Debug)]
struct BlockStatus {
	total_replicas: usize,
	good: usize,
	bad: usize,
	min_replication: usize,
}

impl BlockStatus {
	fn new(total_replicas: usize, min_replication: usize) -> Self {
		Self {
			total_replicas,
			good: 0,
			bad: 0,
			min_replication,
		}
	}

	/// Record one outcome, returning a verdict if this observation just
	/// reached one. Never called again for a block once this returns
	/// `Some(_)` (the registry removes the entry).
	fn record(&mut self, success: bool) -> Option<Verdict> {
		if success {
			self.good += 1;
		} else {
			self.bad += 1;
		}
		debug_assert!(self.good <= self.total_replicas);
		debug_assert!(self.bad <= self.total_replicas);
		if self.good >= self.min_replication {
			Some(Verdict::Good)
		} else if self.bad >= self.total_replicas {
			Some(Verdict::Bad)
		} else {
			None
		}
	}
}

/// Tracks every destination block currently being fanned out, keyed by its
/// own `BlockId`. A block is registered exactly once per [`BlockCopyTask`]
/// batch and removed exactly once, on its first terminal verdict.
///
/// [`BlockCopyTask`]: crate::block_copy_task::BlockCopyTask
#[derive(Default)]
pub struct BlockStatusRegistry {
	blocks: Mutex<HashMap<BlockId, BlockStatus>>,
}

impl BlockStatusRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a new block about to be fanned out to `total_replicas`
	/// paired replicas.
	pub async fn register(&self, block: BlockId, total_replicas: usize, min_replication: usize) {
		let mut guard = self.blocks.lock().await;
		guard.insert(block, BlockStatus::new(total_replicas, min_replication));
	}

	/// Record one replica outcome for `block`. Returns the verdict and
	/// removes the entry if this observation reached one; returns `None`
	/// and leaves the entry in place otherwise.
	///
	/// A block's sibling replica tasks race each other: by the time this
	/// one finishes, another may have already pushed the block to a
	/// terminal verdict and had the entry removed. That's a no-op here,
	/// not an error: the block's fate is already decided.
	pub async fn record(&self, block: BlockId, success: bool) -> Option<Verdict> {
		let mut guard = self.blocks.lock().await;
		let status = guard.get_mut(&block)?;
		let verdict = status.record(success);
		if verdict.is_some() {
			guard.remove(&block);
		}
		verdict
	}

	#[cfg(test)]
	pub async fn len(&self) -> usize {
		self.blocks.lock().await.len()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn blk(id: u64) -> BlockId {
		BlockId {
			id,
			generation_stamp: 0,
			num_bytes: 0,
		}
	}

	#[tokio::test]
	async fn good_verdict_fires_once() {
		let reg = BlockStatusRegistry::new();
		reg.register(blk(1), 3, 1).await;
		assert_eq!(reg.record(blk(1), true).await, Some(Verdict::Good));
		assert_eq!(reg.len().await, 0);
	}

	#[tokio::test]
	async fn bad_verdict_requires_all_replicas() {
		let reg = BlockStatusRegistry::new();
		reg.register(blk(2), 3, 1).await;
		assert_eq!(reg.record(blk(2), false).await, None);
		assert_eq!(reg.record(blk(2), false).await, None);
		assert_eq!(reg.record(blk(2), false).await, Some(Verdict::Bad));
	}

	#[tokio::test]
	async fn min_replication_above_one() {
		let reg = BlockStatusRegistry::new();
		reg.register(blk(3), 3, 2).await;
		assert_eq!(reg.record(blk(3), true).await, None);
		assert_eq!(reg.record(blk(3), true).await, Some(Verdict::Good));
	}
}
