//! Process-wide façade: accepts copy requests, runs a bounded pool of
//! `FileCopyJob`s, owns every shared cache, and handles shutdown.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::Context;
use tokio::sync::{watch, Mutex, Semaphore};

use fastcopy_rpc::connection_cache::Closeable;
use fastcopy_rpc::datanode::DatanodeClient;
use fastcopy_rpc::namenode::NamenodeClient;
use fastcopy_util::background::BackgroundRunner;
use fastcopy_util::config::Config;
use fastcopy_util::error::Error;
use fastcopy_util::random_client_name;

use crate::file_copy_job::FileCopyJob;
use crate::file_status::FileStatus;
use crate::lease_renewer::LeaseRenewer;
use crate::shared::{DatanodeConnector, SharedState};

/// Resolves a namenode URI (e.g. `hdfs://nn1:8020`) to a live RPC handle.
/// Implementations are expected to memoize nothing themselves: the
/// orchestrator is responsible for deduplicating by URI.
#[async_trait]
pub trait NamenodeResolver<N: ?Sized>: Send + Sync {
	async fn resolve(&self, uri: &str) -> Result<Arc<N>, Error>;
}

/// A single (source, destination) path pair to copy, each qualified by the
/// namenode URI it lives under.
pub struct CopyRequest {
	pub src_uri: String,
	pub src_path: String,
	pub dst_uri: String,
	pub dst_path: String,
}

pub struct FastCopy<N: ?Sized, C> {
	config: Config,
	shared: Arc<SharedState<C>>,
	resolver: Arc<dyn NamenodeResolver<N>>,
	namenodes: Mutex<HashMap<String, Arc<N>>>,
	file_pool: Arc<Semaphore>,
	background: Arc<BackgroundRunner>,
	stop_send: watch::Sender<bool>,
	_background_join: tokio::task::JoinHandle<()>,
}

impl<N, C> FastCopy<N, C>
where
	N: NamenodeClient + Closeable + ?Sized + 'static,
	C: DatanodeClient + Closeable + 'static,
{
	pub fn new(config: Config, resolver: Arc<dyn NamenodeResolver<N>>, connector: Arc<dyn DatanodeConnector<C>>) -> Arc<Self> {
		let client_name = random_client_name();
		info!("starting FastCopy as lease holder {}", client_name);

		let shared = SharedState::new(config.clone(), client_name, connector);
		let (stop_send, stop_recv) = watch::channel(false);
		let (background, join) = BackgroundRunner::new(1, stop_recv);
		let file_pool = Arc::new(Semaphore::new(config.file_pool_size));

		Arc::new(Self {
			config,
			shared,
			resolver,
			namenodes: Mutex::new(HashMap::new()),
			file_pool,
			background,
			stop_send,
			_background_join: join,
		})
	}

	async fn namenode(&self, uri: &str) -> Result<Arc<N>, Error> {
		let mut guard = self.namenodes.lock().await;
		if let Some(nn) = guard.get(uri) {
			return Ok(nn.clone());
		}
		let nn = self.resolver.resolve(uri).await?;
		guard.insert(uri.to_string(), nn.clone());
		Ok(nn)
	}

	/// Start background lease renewal. Must be called once, before any
	/// copy request, on a namenode whose lease needs keeping alive (in
	/// practice every distinct destination namenode used in this run).
	pub async fn keep_lease_alive(&self, dst_uri: &str) -> Result<(), Error> {
		let namenode = self.namenode(dst_uri).await?;
		let renewer = LeaseRenewer::new(namenode, self.shared.client_name.clone(), self.config.lease_renew_interval());
		self.background.spawn_worker(renewer);
		Ok(())
	}

	/// Copy a single (src, dst) pair, bounded by the top-level file pool.
	pub async fn copy_one(self: &Arc<Self>, request: CopyRequest) -> Result<(), Error> {
		let permit = self.file_pool.clone().acquire_owned().await.expect("file pool semaphore never closed");
		let result = self.run_job(request).await;
		drop(permit);
		result
	}

	/// Copy a batch of requests concurrently (bounded by the file pool).
	/// Every request's error is isolated: one bad file doesn't stop the
	/// others. Returns `Ok(())` only if every request succeeded.
	pub async fn copy(self: &Arc<Self>, requests: Vec<CopyRequest>) -> Result<(), Error> {
		let mut handles = Vec::with_capacity(requests.len());
		for request in requests {
			let this = self.clone();
			handles.push(tokio::spawn(async move { (request.dst_path.clone(), this.copy_one(request).await) }));
		}

		let mut failures = Vec::new();
		for handle in handles {
			let (dst_path, result) = handle.await.expect("copy task panicked");
			if let Err(e) = result {
				error!("copy of {} failed: {}", dst_path, e);
				failures.push(format!("{}: {}", dst_path, e));
			}
		}

		if failures.is_empty() {
			Ok(())
		} else {
			Err(Error::message(format!("{} of the batch failed: {}", failures.len(), failures.join("; "))))
		}
	}

	async fn run_job(&self, request: CopyRequest) -> Result<(), Error> {
		let src_namenode = self.namenode(&request.src_uri).await?;
		let dst_namenode = if request.src_uri == request.dst_uri {
			src_namenode.clone()
		} else {
			self.namenode(&request.dst_uri).await?
		};

		let job = FileCopyJob {
			src_path: request.src_path,
			dst_path: request.dst_path.clone(),
			src_namenode,
			dst_namenode: dst_namenode.clone(),
			shared: self.shared.clone(),
		};

		match job.run().await {
			Ok(()) => {
				self.shared.metrics.files_committed.add(&Context::current(), 1, &[]);
				Ok(())
			}
			Err(e) => {
				self.shared.metrics.files_failed.add(&Context::current(), 1, &[]);
				warn!("aborting copy to {}: {}, deleting partial destination", request.dst_path, e);
				if let Err(delete_err) = dst_namenode.delete(&request.dst_path, true).await {
					warn!("best-effort delete of {} also failed: {}", request.dst_path, delete_err);
				}
				self.shared.file_status.remove(&request.dst_path).await;
				Err(e)
			}
		}
	}

	pub async fn status(&self, dst_path: &str) -> Option<FileStatus> {
		self.shared.file_status.status(dst_path).await
	}

	/// Stops lease renewal, closes every cached RPC handle (namenodes and
	/// all cached datanodes), and clears the datanode cache. Safe to call
	/// more than once.
	pub async fn shutdown(&self) {
		let _ = self.stop_send.send(true);
		self.shared.datanode_cache.shutdown().await;
		let mut namenodes = self.namenodes.lock().await;
		for (_, namenode) in namenodes.drain() {
			namenode.close().await;
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use fastcopy_rpc::types::{AddBlockShape, DatanodeRef, FileAttrs, LocatedBlock, OpenShape};
	use fastcopy_rpc::namenode::{AllocateOutcome, CompleteOutcome};
	use std::collections::HashMap as StdHashMap;
	use tokio::sync::Mutex as TokioMutex;

	struct FakeNamenode {
		files: TokioMutex<StdHashMap<String, (FileAttrs, Vec<LocatedBlock>)>>,
		created: TokioMutex<Vec<String>>,
		deleted: TokioMutex<Vec<String>>,
		next_block_id: TokioMutex<u64>,
		federation: bool,
		/// Number of times remaining `addBlock` should answer "not
		/// replicated yet" before allocating for real.
		not_replicated_remaining: TokioMutex<u32>,
	}

	impl FakeNamenode {
		fn new() -> Self {
			Self {
				files: TokioMutex::new(StdHashMap::new()),
				created: TokioMutex::new(Vec::new()),
				deleted: TokioMutex::new(Vec::new()),
				next_block_id: TokioMutex::new(100),
				federation: false,
				not_replicated_remaining: TokioMutex::new(0),
			}
		}

		fn federated() -> Self {
			Self {
				federation: true,
				..Self::new()
			}
		}

		async fn seed(&self, path: &str, attrs: FileAttrs, blocks: Vec<LocatedBlock>) {
			self.files.lock().await.insert(path.to_string(), (attrs, blocks));
		}

		async fn fail_not_replicated_times(&self, n: u32) {
			*self.not_replicated_remaining.lock().await = n;
		}
	}

	#[async_trait]
	impl Closeable for FakeNamenode {
		async fn close(&self) {}
	}

	#[async_trait]
	impl NamenodeClient for FakeNamenode {
		fn add_block_shape(&self) -> AddBlockShape {
			if self.federation {
				AddBlockShape::FetchMetaInfoWithStart
			} else {
				AddBlockShape::Legacy
			}
		}
		fn open_shape(&self) -> OpenShape {
			if self.federation {
				OpenShape::Federation
			} else {
				OpenShape::Legacy
			}
		}
		async fn get_file_info(&self, path: &str) -> Result<Option<FileAttrs>, Error> {
			Ok(self.files.lock().await.get(path).map(|(a, _)| a.clone()))
		}
		async fn get_located_blocks(&self, path: &str) -> Result<Vec<LocatedBlock>, Error> {
			Ok(self.files.lock().await.get(path).map(|(_, b)| b.clone()).unwrap_or_default())
		}
		async fn create(&self, path: &str, _client_name: &str, _attrs: &FileAttrs) -> Result<(), Error> {
			self.created.lock().await.push(path.to_string());
			Ok(())
		}
		async fn add_block(
			&self,
			_path: &str,
			_client_name: &str,
			favored_nodes: &[DatanodeRef],
			_start_pos: u64,
		) -> Result<AllocateOutcome, Error> {
			{
				let mut remaining = self.not_replicated_remaining.lock().await;
				if *remaining > 0 {
					*remaining -= 1;
					return Ok(AllocateOutcome::NotReplicatedYet);
				}
			}
			let mut next_id = self.next_block_id.lock().await;
			let id = *next_id;
			*next_id += 1;
			Ok(AllocateOutcome::Allocated(LocatedBlock {
				block: fastcopy_rpc::types::BlockId {
					id,
					generation_stamp: 0,
					num_bytes: 1024,
				},
				namespace_id: None,
				replicas: favored_nodes.to_vec(),
				offset: 0,
				length: 1024,
			}))
		}
		async fn complete(&self, _path: &str, _client_name: &str) -> Result<CompleteOutcome, Error> {
			Ok(CompleteOutcome::Completed)
		}
		async fn delete(&self, path: &str, _recursive: bool) -> Result<(), Error> {
			self.deleted.lock().await.push(path.to_string());
			Ok(())
		}
		async fn renew_lease(&self, _client_name: &str) -> Result<(), Error> {
			Ok(())
		}
	}

	/// A source datanode handle that fails (locally or remotely) for
	/// specific destination-node identities, configured by the test.
	struct FakeDatanode {
		fail_for_dst: Vec<String>,
		remote: bool,
	}
	#[async_trait]
	impl DatanodeClient for FakeDatanode {
		async fn copy_block(
			&self,
			_sns: Option<i64>,
			_sb: fastcopy_rpc::types::BlockId,
			_dns: Option<i64>,
			_db: fastcopy_rpc::types::BlockId,
			dst_node: &DatanodeRef,
		) -> Result<(), Error> {
			if self.fail_for_dst.contains(&dst_node.identity()) {
				if self.remote {
					Err(Error::remote_rpc("simulated remote failure"))
				} else {
					Err(Error::local_rpc("simulated local failure"))
				}
			} else {
				Ok(())
			}
		}
	}
	#[async_trait]
	impl Closeable for FakeDatanode {
		async fn close(&self) {}
	}

	struct FakeResolver {
		namenode: Arc<FakeNamenode>,
	}
	#[async_trait]
	impl NamenodeResolver<FakeNamenode> for FakeResolver {
		async fn resolve(&self, _uri: &str) -> Result<Arc<FakeNamenode>, Error> {
			Ok(self.namenode.clone())
		}
	}

	/// Connects every source node to a handle that fails towards the
	/// configured destination identities, all others succeed.
	struct FakeConnector {
		fail_for_dst: Vec<String>,
		remote: bool,
	}
	impl FakeConnector {
		fn always_succeeds() -> Self {
			Self {
				fail_for_dst: Vec::new(),
				remote: false,
			}
		}
	}
	#[async_trait]
	impl DatanodeConnector<FakeDatanode> for FakeConnector {
		async fn connect(&self, _node: DatanodeRef) -> Result<FakeDatanode, Error> {
			Ok(FakeDatanode {
				fail_for_dst: self.fail_for_dst.clone(),
				remote: self.remote,
			})
		}
	}

	fn dn(name: &str) -> DatanodeRef {
		DatanodeRef {
			hostname: name.to_string(),
			transfer_port: 50010,
			storage_id: format!("{}-storage", name),
		}
	}

	#[tokio::test]
	async fn happy_path_single_block_three_replicas() {
		let namenode = Arc::new(FakeNamenode::new());
		namenode
			.seed(
				"/src/file",
				FileAttrs {
					permission: 0o644,
					replication: 3,
					block_size: 1024,
				},
				vec![LocatedBlock {
					block: fastcopy_rpc::types::BlockId {
						id: 1,
						generation_stamp: 0,
						num_bytes: 1024,
					},
					namespace_id: None,
					replicas: vec![dn("a"), dn("b"), dn("c")],
					offset: 0,
					length: 1024,
				}],
			)
			.await;

		let orchestrator = FastCopy::<FakeNamenode, FakeDatanode>::new(
			Config::default(),
			Arc::new(FakeResolver { namenode }),
			Arc::new(FakeConnector::always_succeeds()),
		);

		orchestrator
			.copy_one(CopyRequest {
				src_uri: "hdfs://nn".to_string(),
				src_path: "/src/file".to_string(),
				dst_uri: "hdfs://nn".to_string(),
				dst_path: "/dst/file".to_string(),
			})
			.await
			.expect("copy should succeed");

		let status = orchestrator.status("/dst/file").await.unwrap();
		assert_eq!(status.total_blocks, 1);
		assert_eq!(status.blocks_done, 1);

		orchestrator.shutdown().await;
		assert_eq!(orchestrator.shared.datanode_cache.len().await, 0);
	}

	#[tokio::test]
	async fn batch_with_one_missing_source_isolates_failure() {
		let namenode = Arc::new(FakeNamenode::new());
		namenode
			.seed(
				"/src/ok",
				FileAttrs {
					permission: 0o644,
					replication: 1,
					block_size: 1024,
				},
				vec![LocatedBlock {
					block: fastcopy_rpc::types::BlockId {
						id: 1,
						generation_stamp: 0,
						num_bytes: 1024,
					},
					namespace_id: None,
					replicas: vec![dn("a")],
					offset: 0,
					length: 1024,
				}],
			)
			.await;

		let orchestrator = FastCopy::<FakeNamenode, FakeDatanode>::new(
			Config::default(),
			Arc::new(FakeResolver { namenode }),
			Arc::new(FakeConnector::always_succeeds()),
		);

		let result = orchestrator
			.copy(vec![
				CopyRequest {
					src_uri: "hdfs://nn".to_string(),
					src_path: "/src/ok".to_string(),
					dst_uri: "hdfs://nn".to_string(),
					dst_path: "/dst/ok".to_string(),
				},
				CopyRequest {
					src_uri: "hdfs://nn".to_string(),
					src_path: "/src/missing".to_string(),
					dst_uri: "hdfs://nn".to_string(),
					dst_path: "/dst/missing".to_string(),
				},
			])
			.await;

		assert!(result.is_err());
		assert!(orchestrator.status("/dst/ok").await.unwrap().is_complete());
		assert!(orchestrator.status("/dst/missing").await.is_none());
	}

	fn one_block_three_replicas() -> Vec<LocatedBlock> {
		vec![LocatedBlock {
			block: fastcopy_rpc::types::BlockId {
				id: 1,
				generation_stamp: 0,
				num_bytes: 1024,
			},
			namespace_id: None,
			replicas: vec![dn("a"), dn("b"), dn("c")],
			offset: 0,
			length: 1024,
		}]
	}

	fn default_attrs() -> FileAttrs {
		FileAttrs {
			permission: 0o644,
			replication: 3,
			block_size: 1024,
		}
	}

	#[tokio::test]
	async fn partial_replica_failure_still_commits() {
		let namenode = Arc::new(FakeNamenode::new());
		namenode.seed("/src/file", default_attrs(), one_block_three_replicas()).await;

		let orchestrator = FastCopy::<FakeNamenode, FakeDatanode>::new(
			Config::default(),
			Arc::new(FakeResolver { namenode }),
			Arc::new(FakeConnector {
				fail_for_dst: vec![dn("c").identity()],
				remote: true,
			}),
		);

		orchestrator
			.copy_one(CopyRequest {
				src_uri: "hdfs://nn".to_string(),
				src_path: "/src/file".to_string(),
				dst_uri: "hdfs://nn".to_string(),
				dst_path: "/dst/file".to_string(),
			})
			.await
			.expect("block should still reach GOOD with 2/3 replicas and minReplication=1");

		assert!(orchestrator.status("/dst/file").await.unwrap().is_complete());
		assert_eq!(orchestrator.shared.datanode_errors.get(&dn("c")).await, 1);
	}

	#[tokio::test]
	async fn all_replicas_failing_aborts_and_deletes_destination() {
		let namenode = Arc::new(FakeNamenode::new());
		namenode.seed("/src/file", default_attrs(), one_block_three_replicas()).await;

		let orchestrator = FastCopy::<FakeNamenode, FakeDatanode>::new(
			Config::default(),
			Arc::new(FakeResolver { namenode: namenode.clone() }),
			Arc::new(FakeConnector {
				fail_for_dst: vec![dn("a").identity(), dn("b").identity(), dn("c").identity()],
				remote: false,
			}),
		);

		let result = orchestrator
			.copy_one(CopyRequest {
				src_uri: "hdfs://nn".to_string(),
				src_path: "/src/file".to_string(),
				dst_uri: "hdfs://nn".to_string(),
				dst_path: "/dst/file".to_string(),
			})
			.await;

		assert!(result.is_err());
		assert!(namenode.deleted.lock().await.contains(&"/dst/file".to_string()));
		assert!(orchestrator.status("/dst/file").await.is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn not_replicated_yet_backs_off_then_succeeds() {
		let namenode = Arc::new(FakeNamenode::new());
		namenode.seed("/src/file", default_attrs(), one_block_three_replicas()).await;
		namenode.fail_not_replicated_times(3).await;

		let orchestrator = FastCopy::<FakeNamenode, FakeDatanode>::new(
			Config::default(),
			Arc::new(FakeResolver { namenode }),
			Arc::new(FakeConnector::always_succeeds()),
		);

		orchestrator
			.copy_one(CopyRequest {
				src_uri: "hdfs://nn".to_string(),
				src_path: "/src/file".to_string(),
				dst_uri: "hdfs://nn".to_string(),
				dst_path: "/dst/file".to_string(),
			})
			.await
			.expect("allocate should succeed once the namenode stops reporting not-replicated-yet");

		assert!(orchestrator.status("/dst/file").await.unwrap().is_complete());
	}

	#[tokio::test]
	async fn cross_federation_mismatch_is_rejected_before_create() {
		let src_namenode = Arc::new(FakeNamenode::federated());
		src_namenode.seed("/src/file", default_attrs(), one_block_three_replicas()).await;
		let dst_namenode = Arc::new(FakeNamenode::new());

		struct TwoNamenodeResolver {
			src: Arc<FakeNamenode>,
			dst: Arc<FakeNamenode>,
		}
		#[async_trait]
		impl NamenodeResolver<FakeNamenode> for TwoNamenodeResolver {
			async fn resolve(&self, uri: &str) -> Result<Arc<FakeNamenode>, Error> {
				match uri {
					"hdfs://src" => Ok(self.src.clone()),
					"hdfs://dst" => Ok(self.dst.clone()),
					other => panic!("unexpected uri {}", other),
				}
			}
		}

		let orchestrator = FastCopy::<FakeNamenode, FakeDatanode>::new(
			Config::default(),
			Arc::new(TwoNamenodeResolver {
				src: src_namenode,
				dst: dst_namenode.clone(),
			}),
			Arc::new(FakeConnector::always_succeeds()),
		);

		let result = orchestrator
			.copy_one(CopyRequest {
				src_uri: "hdfs://src".to_string(),
				src_path: "/src/file".to_string(),
				dst_uri: "hdfs://dst".to_string(),
				dst_path: "/dst/file".to_string(),
			})
			.await;

		assert!(result.is_err());
		assert!(dst_namenode.created.lock().await.is_empty());
	}
}
