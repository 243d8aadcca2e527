use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Immutable description of one supervised app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppSpec {
	pub name: String,
	pub working_directory: PathBuf,
	/// Binary to run, or the script handed to `interpreter`.
	pub executable_path: PathBuf,
	#[serde(default)]
	pub interpreter: Option<PathBuf>,
	#[serde(default)]
	pub arguments: Vec<String>,
	#[serde(default)]
	pub environment_file_path: Option<PathBuf>,
	#[serde(default)]
	pub env: BTreeMap<String, String>,
	#[serde(default)]
	pub watch_enabled: bool,
	#[serde(default = "default_true")]
	pub auto_restart: bool,
	#[serde(default)]
	pub max_restarts: u32,
	#[serde(default, with = "duration_ms")]
	pub restart_delay: Duration,
	pub stdout_log_path: PathBuf,
	pub stderr_log_path: PathBuf,
}

fn default_true() -> bool {
	true
}

impl AppSpec {
	/// Minimal spec running `executable` directly with no restarts. Mostly useful in tests
	/// and for callers that build specs field by field.
	pub fn new(
		name: impl Into<String>,
		working_directory: impl Into<PathBuf>,
		executable: impl Into<PathBuf>,
		stdout_log_path: impl Into<PathBuf>,
		stderr_log_path: impl Into<PathBuf>,
	) -> Self {
		Self {
			name: name.into(),
			working_directory: working_directory.into(),
			executable_path: executable.into(),
			interpreter: None,
			arguments: Vec::new(),
			environment_file_path: None,
			env: BTreeMap::new(),
			watch_enabled: false,
			auto_restart: false,
			max_restarts: 0,
			restart_delay: Duration::ZERO,
			stdout_log_path: stdout_log_path.into(),
			stderr_log_path: stderr_log_path.into(),
		}
	}

	pub fn with_args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.arguments = args.into_iter().map(Into::into).collect();
		self
	}

	pub fn with_restarts(mut self, max_restarts: u32) -> Self {
		self.auto_restart = true;
		self.max_restarts = max_restarts;
		self
	}

	fn resolve(&self, path: &Path) -> PathBuf {
		if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.working_directory.join(path)
		}
	}

	/// The file actually exec'd: the interpreter when set, otherwise the executable.
	pub fn program(&self) -> PathBuf {
		match &self.interpreter {
			Some(interp) => self.resolve(interp),
			None => self.resolve(&self.executable_path),
		}
	}

	/// Script path passed as the interpreter's first argument, if any.
	pub fn script(&self) -> Option<PathBuf> {
		self.interpreter
			.as_ref()
			.map(|_| self.resolve(&self.executable_path))
	}

	pub fn shares_log_file(&self) -> bool {
		self.stdout_log_path == self.stderr_log_path
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
	Stopped,
	Starting,
	Running,
	Restarting,
	Stopping,
	Crashed,
}

impl LifecyclePhase {
	pub fn has_pid(self) -> bool {
		matches!(self, LifecyclePhase::Starting | LifecyclePhase::Running)
	}

	/// Phases a manual `start` may leave from.
	pub fn is_idle(self) -> bool {
		matches!(self, LifecyclePhase::Stopped | LifecyclePhase::Crashed)
	}
}

impl fmt::Display for LifecyclePhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			LifecyclePhase::Stopped => "stopped",
			LifecyclePhase::Starting => "starting",
			LifecyclePhase::Running => "running",
			LifecyclePhase::Restarting => "restarting",
			LifecyclePhase::Stopping => "stopping",
			LifecyclePhase::Crashed => "crashed",
		};
		f.write_str(s)
	}
}

/// Snapshot of one app as published by its actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRuntimeState {
	pub name: String,
	pub pid: Option<u32>,
	pub restart_count: u32,
	pub last_exit_code: Option<i32>,
	pub last_exit_signal: Option<i32>,
	/// Milliseconds since the UNIX epoch.
	pub last_exit_timestamp: Option<u64>,
	pub lifecycle_phase: LifecyclePhase,
	pub last_error: Option<String>,
}

impl ProcessRuntimeState {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			pid: None,
			restart_count: 0,
			last_exit_code: None,
			last_exit_signal: None,
			last_exit_timestamp: None,
			lifecycle_phase: LifecyclePhase::Stopped,
			last_error: None,
		}
	}

	pub fn is_running(&self) -> bool {
		self.lifecycle_phase == LifecyclePhase::Running
	}

	pub(crate) fn record_exit(&mut self, outcome: &ExitOutcome) {
		self.pid = None;
		self.last_exit_code = outcome.code;
		self.last_exit_signal = outcome.signal;
		self.last_exit_timestamp = Some(outcome.timestamp);
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitOutcome {
	pub code: Option<i32>,
	pub signal: Option<i32>,
	pub timestamp: u64,
}

impl ExitOutcome {
	pub fn from_status(status: std::process::ExitStatus) -> Self {
		use std::os::unix::process::ExitStatusExt;
		Self {
			code: status.code(),
			signal: status.signal(),
			timestamp: now_millis(),
		}
	}

	/// Outcome for a child whose status could not be collected.
	pub fn unknown() -> Self {
		Self {
			code: None,
			signal: None,
			timestamp: now_millis(),
		}
	}

	pub fn success(&self) -> bool {
		self.code == Some(0)
	}
}

impl fmt::Display for ExitOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match (self.code, self.signal) {
			(Some(code), _) => write!(f, "exit {}", code),
			(None, Some(sig)) => write!(f, "signal {}", sig),
			(None, None) => write!(f, "unknown status"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
	Stdout,
	Stderr,
}

impl fmt::Display for StreamKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StreamKind::Stdout => f.write_str("stdout"),
			StreamKind::Stderr => f.write_str("stderr"),
		}
	}
}

/// Lifecycle notifications broadcast by every app actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorEvent {
	Started { app: String, pid: u32 },
	Exited { app: String, code: Option<i32>, signal: Option<i32> },
	Restarting { app: String, attempt: u32, delay_ms: u64 },
	SpawnFailed { app: String, message: String },
	MaxRestartsExceeded { app: String, restarts: u32 },
	StabilityReset { app: String },
	Stopped { app: String },
	LogWriteFailed { app: String, stream: StreamKind, message: String },
}

impl SupervisorEvent {
	pub fn app(&self) -> &str {
		match self {
			SupervisorEvent::Started { app, .. }
			| SupervisorEvent::Exited { app, .. }
			| SupervisorEvent::Restarting { app, .. }
			| SupervisorEvent::SpawnFailed { app, .. }
			| SupervisorEvent::MaxRestartsExceeded { app, .. }
			| SupervisorEvent::StabilityReset { app }
			| SupervisorEvent::Stopped { app }
			| SupervisorEvent::LogWriteFailed { app, .. } => app,
		}
	}
}

pub(crate) fn now_millis() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or(0)
}

pub(crate) mod duration_ms {
	use serde::{Deserialize, Deserializer, Serializer};
	use std::time::Duration;

	pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_u64(d.as_millis() as u64)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
		Ok(Duration::from_millis(u64::deserialize(d)?))
	}
}
