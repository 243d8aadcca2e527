use std::io;
use std::path::PathBuf;

use crate::env::EnvFileError;

/// Why a single launch attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
	#[error("working directory does not exist: {}", .0.display())]
	WorkingDirectoryMissing(PathBuf),
	#[error("executable not found: {}", .0.display())]
	ExecutableNotFound(PathBuf),
	#[error("not an executable file: {}", .0.display())]
	NotExecutable(PathBuf),
	#[error(transparent)]
	EnvironmentFile(#[from] EnvFileError),
	#[error("cannot open log file {}: {source}", path.display())]
	LogOpen {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("spawn failed: {0}")]
	Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
	#[error("unknown app: {0}")]
	UnknownApp(String),
	#[error("{0}: already running")]
	AlreadyRunning(String),
	#[error("{0}: not running")]
	NotRunning(String),
	#[error("{app}: {source}")]
	Spawn {
		app: String,
		#[source]
		source: SpawnError,
	},
	#[error("duplicate app name: {0}")]
	DuplicateApp(String),
	#[error("invalid app spec: {0}")]
	InvalidSpec(String),
	#[error("{0}: supervisor task unavailable")]
	Unavailable(String),
}

impl SupervisorError {
	/// Stable machine-readable identifier, used on the wire.
	pub fn code(&self) -> &'static str {
		match self {
			SupervisorError::UnknownApp(_) => "unknown_app",
			SupervisorError::AlreadyRunning(_) => "already_running",
			SupervisorError::NotRunning(_) => "not_running",
			SupervisorError::Spawn { .. } => "spawn_error",
			SupervisorError::DuplicateApp(_) => "duplicate_app",
			SupervisorError::InvalidSpec(_) => "invalid_spec",
			SupervisorError::Unavailable(_) => "unavailable",
		}
	}
}

pub type Result<T, E = SupervisorError> = std::result::Result<T, E>;
