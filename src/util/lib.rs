//! Utility crate for FastCopy: error type, background worker runner, config

#[macro_use]
extern crate tracing;

pub mod background;
pub mod config;
pub mod error;

/// Generate a client identity unique to this orchestrator instance. This is
/// the name under which the destination namenode's write lease is held;
/// two concurrent orchestrators in the same process must not collide, so
/// the random suffix is part of the contract, not an implementation detail.
pub fn random_client_name() -> String {
	use rand::Rng;
	format!("FastCopy{}", rand::thread_rng().gen::<u32>())
}
