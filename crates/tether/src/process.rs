use std::os::unix::fs::PermissionsExt;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::env;
use crate::error::SpawnError;
use crate::output::OutputCapture;
use crate::types::{AppSpec, ExitOutcome, StreamKind};

/// How long to wait for output pumps after the child is gone. Grandchildren
/// that inherited the pipes can keep them open indefinitely.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A launched child together with the tasks copying its output.
pub struct ProcessHandle {
	name: String,
	pid: u32,
	child: Child,
	pumps: Vec<JoinHandle<()>>,
	outcome: Option<ExitOutcome>,
}

/// Check that `spec` can be launched at all.
pub fn validate(spec: &AppSpec) -> Result<(), SpawnError> {
	if !spec.working_directory.is_dir() {
		return Err(SpawnError::WorkingDirectoryMissing(spec.working_directory.clone()));
	}

	let program = spec.program();
	let meta = std::fs::metadata(&program).map_err(|_| SpawnError::ExecutableNotFound(program.clone()))?;
	if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
		return Err(SpawnError::NotExecutable(program));
	}

	if let Some(script) = spec.script() {
		if !script.exists() {
			return Err(SpawnError::ExecutableNotFound(script));
		}
	}
	Ok(())
}

/// Spawn the app described by `spec`, wiring its output into `output`.
///
/// The child runs in its own process group so that `stop` reaches anything it
/// forks. Inherited environment comes first, then the env file, then `spec.env`.
pub fn start(spec: &AppSpec, output: &OutputCapture) -> Result<ProcessHandle, SpawnError> {
	validate(spec)?;

	let mut cmd = Command::new(spec.program());
	if let Some(script) = spec.script() {
		cmd.arg(script);
	}
	cmd.args(&spec.arguments)
		.current_dir(&spec.working_directory)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.process_group(0)
		.kill_on_drop(true);

	if let Some(path) = &spec.environment_file_path {
		cmd.envs(env::read_env_file(path)?);
	}
	cmd.envs(&spec.env);

	let files = output.open(spec)?;
	let mut child = cmd.spawn()?;
	let pid = child.id().unwrap_or(0);

	let mut pumps = Vec::with_capacity(2);
	if let Some(stdout) = child.stdout.take() {
		pumps.push(output.pump(stdout, StreamKind::Stdout, files.stdout));
	}
	if let Some(stderr) = child.stderr.take() {
		pumps.push(output.pump(stderr, StreamKind::Stderr, files.stderr));
	}

	tracing::info!(app = %spec.name, pid, "spawned {}", spec.program().display());
	Ok(ProcessHandle {
		name: spec.name.clone(),
		pid,
		child,
		pumps,
		outcome: None,
	})
}

impl ProcessHandle {
	pub fn pid(&self) -> u32 {
		self.pid
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Wait for the child to terminate and its output to be flushed.
	///
	/// Cancel-safe: dropping the future before completion loses nothing, and
	/// calling it again after completion returns the same outcome.
	pub async fn await_exit(&mut self) -> ExitOutcome {
		if let Some(outcome) = &self.outcome {
			return outcome.clone();
		}

		let outcome = match self.child.wait().await {
			Ok(status) => ExitOutcome::from_status(status),
			Err(e) => {
				tracing::warn!(app = %self.name, pid = self.pid, "wait failed: {}", e);
				ExitOutcome::unknown()
			}
		};
		self.drain().await;

		tracing::info!(app = %self.name, pid = self.pid, "exited ({})", outcome);
		self.outcome = Some(outcome.clone());
		outcome
	}

	/// A pump leaves `self.pumps` only once it has finished or been aborted, so
	/// an interrupted drain resumes on the next call.
	async fn drain(&mut self) {
		while let Some(pump) = self.pumps.last_mut() {
			if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, &mut *pump).await.is_err() {
				tracing::warn!(app = %self.name, "output still open after exit, detaching");
				pump.abort();
			}
			self.pumps.pop();
		}
	}

	/// SIGTERM the process group, then SIGKILL if it outlives `grace`.
	pub async fn stop(&mut self, grace: Duration) -> ExitOutcome {
		if let Some(outcome) = &self.outcome {
			return outcome.clone();
		}

		self.signal_group(nix::sys::signal::Signal::SIGTERM);
		if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
			tracing::warn!(
				app = %self.name,
				pid = self.pid,
				"still running after {}ms, sending SIGKILL",
				grace.as_millis()
			);
			self.signal_group(nix::sys::signal::Signal::SIGKILL);
			// The leader may have left the group or already be reaped.
			let _ = self.child.start_kill();
		}
		self.await_exit().await
	}

	fn signal_group(&self, signal: nix::sys::signal::Signal) {
		use nix::sys::signal::killpg;
		use nix::unistd::Pid;
		if self.pid == 0 {
			return;
		}
		if let Err(e) = killpg(Pid::from_raw(self.pid as i32), signal) {
			tracing::debug!(app = %self.name, pid = self.pid, "killpg {} failed: {}", signal, e);
		}
	}
}
