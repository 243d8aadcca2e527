use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
#[error("cannot read environment file {}: {source}", path.display())]
pub struct EnvFileError {
	pub path: PathBuf,
	#[source]
	pub source: dotenvy::Error,
}

/// Read a dotenv file (`export` prefixes, quoting, escapes and inline
/// comments as dotenvy understands them).
///
/// Entries come back in file order, so a later duplicate wins once applied to
/// a command. Lines that fail to parse are skipped with a warning.
pub fn read_env_file(path: &Path) -> Result<Vec<(String, String)>, EnvFileError> {
	let iter = dotenvy::from_path_iter(path).map_err(|source| EnvFileError {
		path: path.to_path_buf(),
		source,
	})?;
	Ok(collect(iter, &path.display().to_string()))
}

pub fn parse_env(contents: &str) -> Vec<(String, String)> {
	collect(dotenvy::from_read_iter(contents.as_bytes()), "<inline>")
}

fn collect<R: Read>(iter: dotenvy::Iter<R>, origin: &str) -> Vec<(String, String)> {
	let mut vars = Vec::new();
	for item in iter {
		match item {
			Ok(pair) => vars.push(pair),
			Err(e) => tracing::warn!("skipping env entry in {}: {}", origin, e),
		}
	}
	vars
}
