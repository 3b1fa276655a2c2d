//! Command-line surface: `fastcopy [options] <src…> <dst>`.
use std::path::PathBuf;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "fastcopy")]
pub struct Opt {
	/// Configuration file (namenode/datanode connection info, pool sizes,
	/// timeouts). Missing file is not an error: compiled-in defaults apply.
	#[structopt(short = "c", long = "config")]
	pub config_file: Option<PathBuf>,

	/// File-level pool size, overrides `file_pool_size` from the config file.
	#[structopt(short = "t", long = "threads")]
	pub threads: Option<usize>,

	/// Resolve sources and print the (src, dst) pairs that would be copied,
	/// without copying anything.
	#[structopt(long = "dry-run")]
	pub dry_run: bool,

	/// Source path(s) or glob pattern(s) to copy, followed by the
	/// destination path. More than one source requires the destination to
	/// already exist and be a directory. clap only allows the last
	/// positional argument to be variadic, so sources and destination are
	/// collected together here and split in `run`.
	#[structopt(name = "src... dst", required = true, min_values = 2)]
	pub paths: Vec<PathBuf>,
}

impl Opt {
	/// Split the trailing positional argument into (sources, destination).
	pub fn sources_and_dst(&self) -> (Vec<String>, PathBuf) {
		let (dst, sources) = self.paths.split_last().expect("min_values = 2 guarantees at least one element");
		let sources = sources.iter().map(|p| p.to_string_lossy().into_owned()).collect();
		(sources, dst.clone())
	}
}
