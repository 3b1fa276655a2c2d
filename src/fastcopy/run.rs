//! Process wiring: load configuration, stand up the netapp transport,
//! build the orchestrator, drive the requested copy to completion, and
//! translate the result into a CLI exit code.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use netapp::{NetApp, NetworkKey, NodeID};

use fastcopy_core::{CopyRequest, FastCopy, NamenodeResolver};
use fastcopy_core::expansion;
use fastcopy_core::shared::DatanodeConnector;
use fastcopy_rpc::transport::{NetappDatanodeClient, NetappNamenodeClient};
use fastcopy_rpc::types::DatanodeRef;
use fastcopy_util::config::Config;
use fastcopy_util::error::Error;

use crate::cli::Opt;

/// Every copy in a single invocation talks to the one configured namenode,
/// on both ends: FastCopy only ever does intra-cluster copies, so
/// `CopyRequest::src_uri`/`dst_uri` are always this sentinel.
const NAMENODE_URI: &str = "namenode";

/// Resolves the single configured namenode, ignoring the requested URI
/// (always [`NAMENODE_URI`] in this binary — `FastCopy` still dedupes by
/// URI on its side, this resolver just has nothing further to do).
struct SingleNamenodeResolver {
	netapp: Arc<NetApp>,
	target: NodeID,
}

#[async_trait]
impl NamenodeResolver<NetappNamenodeClient> for SingleNamenodeResolver {
	async fn resolve(&self, _uri: &str) -> Result<Arc<NetappNamenodeClient>, Error> {
		let client = NetappNamenodeClient::connect(self.netapp.clone(), self.target).await?;
		Ok(Arc::new(client))
	}
}

/// Maps an HDFS datanode identity (`hostname:transfer_port`, as reported by
/// the namenode in located-block responses) to the netapp peer it must be
/// dialed at. Datanode identities are not netapp node IDs, so this table is
/// how the client bridges the two namespaces (see `fastcopy_util::config`).
struct ConfiguredDatanodeConnector {
	netapp: Arc<NetApp>,
	peers: HashMap<String, NodeID>,
}

#[async_trait]
impl DatanodeConnector<NetappDatanodeClient> for ConfiguredDatanodeConnector {
	async fn connect(&self, node: DatanodeRef) -> Result<NetappDatanodeClient, Error> {
		let identity = format!("{}:{}", node.hostname, node.transfer_port);
		let target = *self
			.peers
			.get(&identity)
			.ok_or_else(|| Error::message(format!("no netapp peer configured for datanode {}", identity)))?;
		NetappDatanodeClient::connect(self.netapp.clone(), target).await
	}
}

fn network_key(config: &Config) -> Result<NetworkKey, Error> {
	let bytes = hex::decode(&config.rpc_secret)
		.map_err(|e| Error::message(format!("invalid rpc_secret (must be hex): {}", e)))?;
	NetworkKey::from_slice(&bytes).ok_or_else(|| Error::message("rpc_secret must decode to 32 bytes"))
}

async fn wait_for_exit(mut chan: watch::Receiver<bool>) {
	while !*chan.borrow() {
		if chan.changed().await.is_err() {
			return;
		}
	}
}

pub async fn run(opt: Opt) -> Result<(), Error> {
	info!("Loading configuration...");
	let mut config = fastcopy_util::config::read_config(opt.config_file.clone())?;
	if let Some(threads) = opt.threads {
		config.file_pool_size = threads;
	}

	let (sources, dst) = opt.sources_and_dst();
	let pairs = expansion::expand(&sources, &dst)?;
	if opt.dry_run {
		for pair in &pairs {
			println!("{} -> {}", pair.src.display(), pair.dst.display());
		}
		return Ok(());
	}

	let (namenode_pubkey, namenode_addr) = config
		.namenode_peer
		.ok_or_else(|| Error::message("no namenode configured (set `namenode_peer` in the config file)"))?;

	info!("Initializing netapp transport...");
	let netid = network_key(&config)?;
	let (_pubkey, privkey) = sodiumoxide::crypto::sign::ed25519::gen_keypair();
	let netapp = NetApp::new(netid, privkey);
	netapp.clone().try_connect(namenode_addr, namenode_pubkey).await.map_err(|e| Error::message(e.to_string()))?;

	let datanode_peers: HashMap<String, NodeID> = config
		.datanode_peers
		.iter()
		.map(|(identity, (pubkey, _addr))| (identity.clone(), *pubkey))
		.collect();
	for (pubkey, addr) in config.datanode_peers.values() {
		let _ = netapp.clone().try_connect(*addr, *pubkey).await;
	}

	let resolver = Arc::new(SingleNamenodeResolver {
		netapp: netapp.clone(),
		target: namenode_pubkey,
	});
	let connector = Arc::new(ConfiguredDatanodeConnector {
		netapp: netapp.clone(),
		peers: datanode_peers,
	});

	let orchestrator = FastCopy::new(config, resolver, connector);
	orchestrator.keep_lease_alive(NAMENODE_URI).await?;

	let watch_cancel = watch_shutdown_signal();
	let requests: Vec<CopyRequest> = pairs
		.into_iter()
		.map(|pair| CopyRequest {
			src_uri: NAMENODE_URI.to_string(),
			src_path: pair.src.to_string_lossy().into_owned(),
			dst_uri: NAMENODE_URI.to_string(),
			dst_path: pair.dst.to_string_lossy().into_owned(),
		})
		.collect();
	let file_count = requests.len();

	let result = tokio::select! {
		result = orchestrator.copy(requests) => result,
		_ = wait_for_exit(watch_cancel) => Err(Error::message("interrupted")),
	};

	match &result {
		Ok(()) => info!("copied {} file(s) successfully", file_count),
		Err(e) => error!("copy failed: {}", e),
	}

	info!("Shutting down...");
	orchestrator.shutdown().await;

	result
}

#[cfg(unix)]
fn watch_shutdown_signal() -> watch::Receiver<bool> {
	use tokio::signal::unix::*;

	let (send_cancel, watch_cancel) = watch::channel(false);
	tokio::spawn(async move {
		let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
		let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
		tokio::select! {
			_ = sigint.recv() => info!("received SIGINT, shutting down"),
			_ = sigterm.recv() => info!("received SIGTERM, shutting down"),
		}
		send_cancel.send(true).unwrap();
	});
	watch_cancel
}

#[cfg(windows)]
fn watch_shutdown_signal() -> watch::Receiver<bool> {
	use tokio::signal::windows::*;

	let (send_cancel, watch_cancel) = watch::channel(false);
	tokio::spawn(async move {
		let mut sigint = ctrl_c().expect("failed to install Ctrl-C handler");
		tokio::select! {
			_ = sigint.recv() => info!("received Ctrl-C, shutting down"),
		}
		send_cancel.send(true).unwrap();
	});
	watch_cancel
}
