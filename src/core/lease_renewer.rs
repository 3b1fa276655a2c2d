//! Background keep-alive of the client's write lease on destination files.
//!
//! The sole long-lived background task in the orchestrator (design notes:
//! "best modeled as a task consuming a timer and cancellation signal").
//! Modeled as a [`Worker`] so it plugs into the same `BackgroundRunner`
//! infrastructure as any other FastCopy background job.
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use opentelemetry::Context;
use tokio::sync::watch;

use fastcopy_rpc::namenode::NamenodeClient;
use fastcopy_util::background::worker::{Worker, WorkerStatus};
use fastcopy_util::error::Error;

use crate::metrics::OrchestratorMetrics;

pub struct LeaseRenewer<N: ?Sized> {
	namenode: Arc<N>,
	client_name: String,
	interval: Duration,
	last_renewed: Instant,
	metrics: Option<Arc<OrchestratorMetrics>>,
}

impl<N> LeaseRenewer<N>
where
	N: NamenodeClient + ?Sized,
{
	pub fn new(namenode: Arc<N>, client_name: String, interval: Duration) -> Self {
		Self {
			namenode,
			client_name,
			interval,
			last_renewed: Instant::now() - interval,
			metrics: None,
		}
	}

	pub fn with_metrics(mut self, metrics: Arc<OrchestratorMetrics>) -> Self {
		self.metrics = Some(metrics);
		self
	}
}

#[async_trait]
impl<N> Worker for LeaseRenewer<N>
where
	N: NamenodeClient + ?Sized,
{
	fn name(&self) -> String {
		format!("lease renewer for {}", self.client_name)
	}

	async fn work(&mut self, _must_exit: &mut watch::Receiver<bool>) -> Result<WorkerStatus, Error> {
		// Renewal failures are swallowed here: the orchestrator may
		// still make progress, and if the lease truly lapsed the next
		// namenode RPC on the hot path will surface it.
		match self.namenode.renew_lease(&self.client_name).await {
			Ok(()) => {
				if let Some(metrics) = &self.metrics {
					metrics.lease_renewals.add(&Context::current(), 1, &[]);
				}
			}
			Err(e) => warn!("lease renewal failed for {}: {}", self.client_name, e),
		}
		self.last_renewed = Instant::now();
		Ok(WorkerStatus::Idle)
	}

	async fn wait_for_work(&mut self, must_exit: &watch::Receiver<bool>) -> WorkerStatus {
		let elapsed = self.last_renewed.elapsed();
		let remaining = self.interval.saturating_sub(elapsed);
		tokio::select! {
			_ = tokio::time::sleep(remaining) => WorkerStatus::Busy,
			_ = wait_for_exit(must_exit) => WorkerStatus::Done,
		}
	}
}

async fn wait_for_exit(must_exit: &watch::Receiver<bool>) {
	let mut rx = must_exit.clone();
	if *rx.borrow() {
		return;
	}
	let _ = rx.changed().await;
}

#[cfg(test)]
mod test {
	use super::*;
	use fastcopy_rpc::types::{AddBlockShape, DatanodeRef, FileAttrs, LocatedBlock, OpenShape};
	use fastcopy_rpc::namenode::{AllocateOutcome, CompleteOutcome};
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct CountingNamenode {
		renewals: AtomicUsize,
		fail: bool,
	}

	#[async_trait]
	impl NamenodeClient for CountingNamenode {
		fn add_block_shape(&self) -> AddBlockShape {
			AddBlockShape::Legacy
		}
		fn open_shape(&self) -> OpenShape {
			OpenShape::Legacy
		}
		async fn get_file_info(&self, _path: &str) -> Result<Option<FileAttrs>, Error> {
			unimplemented!()
		}
		async fn get_located_blocks(&self, _path: &str) -> Result<Vec<LocatedBlock>, Error> {
			unimplemented!()
		}
		async fn create(&self, _path: &str, _client_name: &str, _attrs: &FileAttrs) -> Result<(), Error> {
			unimplemented!()
		}
		async fn add_block(
			&self,
			_path: &str,
			_client_name: &str,
			_favored_nodes: &[DatanodeRef],
			_start_pos: u64,
		) -> Result<AllocateOutcome, Error> {
			unimplemented!()
		}
		async fn complete(&self, _path: &str, _client_name: &str) -> Result<CompleteOutcome, Error> {
			unimplemented!()
		}
		async fn delete(&self, _path: &str, _recursive: bool) -> Result<(), Error> {
			unimplemented!()
		}
		async fn renew_lease(&self, _client_name: &str) -> Result<(), Error> {
			self.renewals.fetch_add(1, Ordering::SeqCst);
			if self.fail {
				Err(Error::message("namenode unreachable"))
			} else {
				Ok(())
			}
		}
	}

	#[tokio::test]
	async fn renewal_failure_is_swallowed() {
		let namenode = Arc::new(CountingNamenode {
			renewals: AtomicUsize::new(0),
			fail: true,
		});
		let mut renewer = LeaseRenewer::new(namenode.clone(), "FastCopy1".to_string(), Duration::from_millis(10));
		let (_tx, mut rx) = watch::channel(false);
		let status = renewer.work(&mut rx).await.expect("renewal errors are swallowed, not propagated");
		assert_eq!(status, WorkerStatus::Idle);
		assert_eq!(namenode.renewals.load(Ordering::SeqCst), 1);
	}
}
