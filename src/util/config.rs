//! Contains type and functions related to FastCopy configuration file
use std::collections::HashMap;
use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::Error as SerdeError;
use serde::{de, Deserialize};

use netapp::util::parse_and_resolve_peer_addr;
use netapp::NodeID;

use crate::error::Error;

/// Represents the whole configuration, as read from `fastcopy.toml` (or
/// whichever path is passed with `-c`). Every key has a sensible default,
/// so an empty file (or no file at all) is valid.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
	/// `dfs.fastcopy.file.wait_time`: per-file drain/commit timeout
	pub file_wait_time_ms: u64,

	/// `dfs.replication.min`: minimum good replicas for a block verdict
	pub min_replication: usize,

	/// `dfs.fastcopy.max.datanode.errors`: per-datanode error threshold
	pub max_datanode_errors: u64,

	/// `dfs.fastcopy.blockRPC.pool_size`: per-file block fan-out concurrency
	pub block_rpc_pool_size: usize,

	/// File-level pool size; the CLI `-t`/`--threads` flag overrides this
	pub file_pool_size: usize,

	/// Cadence at which the client's write lease on destination files is
	/// renewed at the destination namenode
	pub lease_renew_interval_ms: u64,

	/// Network key shared with every cluster member, hex encoded. FastCopy
	/// never joins the cluster as a member, but netapp requires it to
	/// authenticate the connections it originates.
	#[serde(default)]
	pub rpc_secret: String,

	/// Namenode to dial, as a netapp peer address (`pubkey@host:port`).
	#[serde(deserialize_with = "deserialize_peer_addr", default)]
	pub namenode_peer: Option<(NodeID, SocketAddr)>,

	/// Maps a datanode's HDFS identity (`hostname:transfer_port`, as
	/// reported in located-block responses) to the netapp peer address
	/// used to dial it. Datanode identities are not netapp node IDs, so
	/// this table is how the client bridges the two namespaces.
	#[serde(deserialize_with = "deserialize_peer_map", default)]
	pub datanode_peers: HashMap<String, (NodeID, SocketAddr)>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			file_wait_time_ms: 1_800_000,
			min_replication: 1,
			max_datanode_errors: 5,
			block_rpc_pool_size: 5,
			file_pool_size: 5,
			lease_renew_interval_ms: 30_000,
			rpc_secret: String::new(),
			namenode_peer: None,
			datanode_peers: HashMap::new(),
		}
	}
}

impl Config {
	pub fn file_wait_time(&self) -> Duration {
		Duration::from_millis(self.file_wait_time_ms)
	}

	pub fn lease_renew_interval(&self) -> Duration {
		Duration::from_millis(self.lease_renew_interval_ms)
	}
}

/// Read and parse configuration. A missing path is not an error: callers
/// that only pass `-t` on the command line can run with defaults alone.
pub fn read_config(config_file: Option<PathBuf>) -> Result<Config, Error> {
	let config_file = match config_file {
		Some(p) => p,
		None => return Ok(Config::default()),
	};

	let mut file = std::fs::OpenOptions::new().read(true).open(&config_file)?;

	let mut config = String::new();
	file.read_to_string(&mut config)?;

	toml::from_str(&config).map_err(|e| Error::Message(format!("invalid config file: {}", e)))
}

fn deserialize_peer_addr<'de, D>(deserializer: D) -> Result<Option<(NodeID, SocketAddr)>, D::Error>
where
	D: de::Deserializer<'de>,
{
	let peer = match Option::<&str>::deserialize(deserializer)? {
		Some(p) => p,
		None => return Ok(None),
	};
	let (pubkey, mut addrs) = parse_and_resolve_peer_addr(peer)
		.ok_or_else(|| D::Error::custom(format!("unable to parse or resolve peer: {}", peer)))?;
	let addr = addrs
		.pop()
		.ok_or_else(|| D::Error::custom(format!("peer resolved to no address: {}", peer)))?;
	Ok(Some((pubkey, addr)))
}

/// `"identity=pubkey@host:port"` entries, e.g. `"dn1.local:50010=ab12...@10.0.0.1:7870"`.
fn deserialize_peer_map<'de, D>(deserializer: D) -> Result<HashMap<String, (NodeID, SocketAddr)>, D::Error>
where
	D: de::Deserializer<'de>,
{
	let mut ret = HashMap::new();
	for entry in <Vec<&str>>::deserialize(deserializer)? {
		let (identity, peer) = entry
			.split_once('=')
			.ok_or_else(|| D::Error::custom(format!("malformed datanode peer entry: {}", entry)))?;
		let (pubkey, mut addrs) = parse_and_resolve_peer_addr(peer)
			.ok_or_else(|| D::Error::custom(format!("unable to parse or resolve peer: {}", peer)))?;
		let addr = addrs
			.pop()
			.ok_or_else(|| D::Error::custom(format!("peer resolved to no address: {}", peer)))?;
		ret.insert(identity.to_string(), (pubkey, addr));
	}
	Ok(ret)
}
