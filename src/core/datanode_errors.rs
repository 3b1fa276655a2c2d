//! Process-wide per-datanode error counter with a threshold gate.
//!
//! Keyed by [`DatanodeRef::identity`], monotonically non-decreasing,
//! never time-decayed within a run ("the registry is process-wide and
//! not time-decayed within a run").
use std::collections::HashMap;

use tokio::sync::Mutex;

use fastcopy_rpc::types::DatanodeRef;

#[derive(Default)]
pub struct DatanodeErrorRegistry {
	counts: Mutex<HashMap<String, u64>>,
}

impl DatanodeErrorRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn increment(&self, node: &DatanodeRef) -> u64 {
		let mut guard = self.counts.lock().await;
		let count = guard.entry(node.identity()).or_insert(0);
		*count += 1;
		*count
	}

	pub async fn get(&self, node: &DatanodeRef) -> u64 {
		self.counts.lock().await.get(&node.identity()).copied().unwrap_or(0)
	}

	/// Whether `node` has already accrued more than `max_errors`, past the
	/// point where a [`BlockCopyTask`] should decline to issue its RPC.
	///
	/// [`BlockCopyTask`]: crate::block_copy_task::BlockCopyTask
	pub async fn is_quarantined(&self, node: &DatanodeRef, max_errors: u64) -> bool {
		self.get(node).await > max_errors
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn dn(name: &str) -> DatanodeRef {
		DatanodeRef {
			hostname: name.to_string(),
			transfer_port: 50010,
			storage_id: format!("{}-storage", name),
		}
	}

	#[tokio::test]
	async fn quarantine_triggers_past_threshold() {
		let reg = DatanodeErrorRegistry::new();
		let node = dn("dn1");
		for _ in 0..5 {
			reg.increment(&node).await;
		}
		assert!(!reg.is_quarantined(&node, 5).await);
		reg.increment(&node).await;
		assert!(reg.is_quarantined(&node, 5).await);
	}

	#[tokio::test]
	async fn counts_are_per_node() {
		let reg = DatanodeErrorRegistry::new();
		reg.increment(&dn("a")).await;
		assert_eq!(reg.get(&dn("a")).await, 1);
		assert_eq!(reg.get(&dn("b")).await, 0);
	}
}
