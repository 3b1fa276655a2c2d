//! Error type shared by all FastCopy crates
use std::io;

use err_derive::Error;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// The error type returned by all fallible FastCopy operations.
///
/// Variants are deliberately coarse: callers mostly propagate with `?` and
/// log the resulting message; only the orchestrator needs to distinguish
/// the classes described below (precondition / transient / fatal).
#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "IO error: {}", _0)]
	Io(#[error(source)] io::Error),

	#[error(display = "{}", _0)]
	Message(String),

	/// A namenode or datanode RPC returned an application-level error.
	/// `remote` is true when the error originated on the far end of the
	/// call (used to attribute datanode errors, see DatanodeErrorRegistry).
	#[error(display = "RPC error ({}): {}", "if *remote { \"remote\" } else { \"local\" }", message)]
	Rpc { remote: bool, message: String },

	/// Source path does not exist, destination type mismatches, or a glob
	/// expanded to nothing: fatal, no destination is created.
	#[error(display = "precondition failed: {}", _0)]
	Precondition(String),

	/// One side of the copy speaks the federation RPC dialect and the
	/// other does not.
	#[error(display = "cross-federation copy is not supported: {}", _0)]
	CrossFederation(String),

	/// `MAX_WAIT_TIME` elapsed while draining the block pool or polling
	/// for commit.
	#[error(display = "timed out waiting for {}", _0)]
	Timeout(String),
}

impl Error {
	pub fn message<S: Into<String>>(msg: S) -> Self {
		Error::Message(msg.into())
	}

	pub fn remote_rpc<S: Into<String>>(msg: S) -> Self {
		Error::Rpc {
			remote: true,
			message: msg.into(),
		}
	}

	pub fn local_rpc<S: Into<String>>(msg: S) -> Self {
		Error::Rpc {
			remote: false,
			message: msg.into(),
		}
	}

	/// True if this error originated on the remote end of an RPC (as
	/// opposed to a local failure constructing/sending the request).
	pub fn is_remote(&self) -> bool {
		matches!(self, Error::Rpc { remote: true, .. })
	}
}

// `netapp` RPC responses carry `Result<_, Error>`, so `Error` must round-trip
// through the wire. It never needs to preserve its variant on the far end,
// only its message: serialize to its `Display` string, deserialize back into
// a plain `Error::Message`.
impl Serialize for Error {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		self.to_string().serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for Error {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let msg = String::deserialize(deserializer).map_err(de::Error::custom)?;
		Ok(Error::Message(msg))
	}
}

pub trait OkOrMessage<T> {
	fn ok_or_message<S: Into<String>>(self, msg: S) -> Result<T, Error>;
}

impl<T> OkOrMessage<T> for Option<T> {
	fn ok_or_message<S: Into<String>>(self, msg: S) -> Result<T, Error> {
		self.ok_or_else(|| Error::Message(msg.into()))
	}
}
