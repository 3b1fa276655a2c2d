//! Directory/glob expansion: turns CLI source patterns and a destination
//! into concrete (source, destination) path pairs.
//!
//! This is plain synchronous filesystem walking, run once at startup before
//! any namenode RPC is made; it only ever runs against local path strings
//! (the URI/filesystem-handle resolution that turns those into cluster
//! coordinates is an external collaborator, see [`crate::orchestrator`]).
use std::path::{Path, PathBuf};

use fastcopy_util::error::Error;

/// One resolved (source, destination) pair to copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPair {
	pub src: PathBuf,
	pub dst: PathBuf,
}

/// Expand `patterns` against `destination`, producing one [`PathPair`] per
/// file to copy.
///
/// - Each pattern is glob-expanded; a pattern matching nothing is fatal.
/// - A matched file pairs with `destination` itself (if `destination` is
///   file-typed or does not exist) or with `destination/basename`.
/// - A matched directory is walked recursively; every contained file pairs
///   under `destination` (if it doesn't exist) or `destination/basename(dir)`.
/// - If more than one source ultimately expands, `destination` must already
///   exist and be a directory.
pub fn expand(patterns: &[String], destination: &Path) -> Result<Vec<PathPair>, Error> {
	let mut sources = Vec::new();
	for pattern in patterns {
		let matches: Vec<PathBuf> = glob::glob(pattern)
			.map_err(|e| Error::Precondition(format!("invalid glob pattern {}: {}", pattern, e)))?
			.collect::<Result<Vec<_>, _>>()
			.map_err(|e| Error::Precondition(format!("error reading glob matches for {}: {}", pattern, e)))?;
		if matches.is_empty() {
			return Err(Error::Precondition(format!("pattern matched no files: {}", pattern)));
		}
		sources.extend(matches);
	}

	let mut pairs = Vec::new();
	for source in &sources {
		collect_pairs(source, destination, &mut pairs)?;
	}

	if pairs.len() > 1 && !destination.is_dir() {
		return Err(Error::Precondition(format!(
			"destination must be an existing directory when multiple sources are given: {}",
			destination.display()
		)));
	}

	Ok(pairs)
}

fn collect_pairs(source: &Path, destination: &Path, out: &mut Vec<PathPair>) -> Result<(), Error> {
	let metadata = std::fs::metadata(source).map_err(|e| Error::Precondition(format!("cannot stat {}: {}", source.display(), e)))?;

	if metadata.is_dir() {
		let root = if destination.exists() {
			destination.join(basename(source)?)
		} else {
			destination.to_path_buf()
		};
		walk_directory(source, &root, out)
	} else {
		let dst = if !destination.exists() || destination.is_file() {
			destination.to_path_buf()
		} else {
			destination.join(basename(source)?)
		};
		out.push(PathPair {
			src: source.to_path_buf(),
			dst,
		});
		Ok(())
	}
}

fn walk_directory(dir: &Path, dst_root: &Path, out: &mut Vec<PathPair>) -> Result<(), Error> {
	let entries = std::fs::read_dir(dir).map_err(|e| Error::Precondition(format!("cannot list {}: {}", dir.display(), e)))?;
	for entry in entries {
		let entry = entry.map_err(|e| Error::Precondition(format!("cannot read entry in {}: {}", dir.display(), e)))?;
		let path = entry.path();
		let name = basename(&path)?;
		let dst = dst_root.join(name);
		if path.is_dir() {
			walk_directory(&path, &dst, out)?;
		} else {
			out.push(PathPair { src: path, dst });
		}
	}
	Ok(())
}

fn basename(path: &Path) -> Result<String, Error> {
	path.file_name()
		.and_then(|n| n.to_str())
		.map(|n| n.to_string())
		.ok_or_else(|| Error::Precondition(format!("path has no file name: {}", path.display())))
}
