use std::fs::OpenOptions;
use std::future::Future;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{de::DeserializeOwned, Serialize};
use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;

use crate::client;
use crate::paths::DaemonPaths;
use crate::server;

const STARTUP_POLL: Duration = Duration::from_millis(100);
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
	#[error("daemon already running")]
	AlreadyRunning,
	#[error("daemon not running")]
	NotRunning,
	#[error("failed to bind {}: {source}", path.display())]
	Bind { path: PathBuf, source: io::Error },
	#[error("failed to start daemon: {0}")]
	Spawn(io::Error),
	#[error("daemon did not come up within {}s", STARTUP_TIMEOUT.as_secs())]
	StartTimeout,
	#[error("daemon (pid {0}) did not exit")]
	StopTimeout(u32),
	#[error(transparent)]
	Io(#[from] io::Error),
}

pub struct Daemon {
	pub paths: DaemonPaths,
	shutdown: Arc<Notify>,
}

impl Daemon {
	pub fn new(paths: DaemonPaths) -> Self {
		Self {
			paths,
			shutdown: Arc::new(Notify::new()),
		}
	}

	/// Handle that makes [`Daemon::run`] return, e.g. from a `shutdown` request.
	pub fn shutdown_handle(&self) -> Arc<Notify> {
		Arc::clone(&self.shutdown)
	}

	/// Serve requests on the daemon socket until SIGINT, SIGTERM or the
	/// shutdown handle fires. Socket and PID file are removed on return.
	pub async fn run<Req, Resp, F, Fut, E>(&self, handler: F, on_error: Option<E>) -> Result<(), DaemonError>
	where
		Req: DeserializeOwned + Send + 'static,
		Resp: Serialize + Send + 'static,
		F: Fn(Req) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Resp> + Send + 'static,
		E: Fn(String) -> Resp + Send + Sync + 'static,
	{
		std::fs::create_dir_all(self.paths.state_dir())?;

		let socket_path = self.paths.socket_path();
		if client::is_running(&self.paths) {
			return Err(DaemonError::AlreadyRunning);
		}
		if socket_path.exists() {
			let _ = std::fs::remove_file(&socket_path);
		}

		let listener = UnixListener::bind(&socket_path).map_err(|source| DaemonError::Bind {
			path: socket_path.clone(),
			source,
		})?;
		std::fs::write(self.paths.pid_path(), std::process::id().to_string())?;

		tracing::info!("daemon started (pid {}), listening on {}", std::process::id(), socket_path.display());

		let mut terminate = signal(SignalKind::terminate())?;
		let server_handle = tokio::spawn(server::serve(listener, handler, on_error));

		tokio::select! {
			_ = tokio::signal::ctrl_c() => tracing::info!("interrupted, shutting down"),
			_ = terminate.recv() => tracing::info!("terminated, shutting down"),
			_ = self.shutdown.notified() => tracing::info!("shutdown requested"),
		}

		server_handle.abort();
		self.cleanup();
		Ok(())
	}

	pub fn cleanup(&self) {
		let _ = std::fs::remove_file(self.paths.socket_path());
		let _ = std::fs::remove_file(self.paths.pid_path());
	}

	/// Re-exec the current binary with `args` as a detached background daemon
	/// and wait for its socket to accept connections.
	pub fn start_background(&self, args: &[&str]) -> Result<(), DaemonError> {
		if client::is_running(&self.paths) {
			return Err(DaemonError::AlreadyRunning);
		}

		let log_path = self.paths.daemon_log_path();
		if let Some(parent) = log_path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let log = OpenOptions::new().create(true).append(true).open(&log_path)?;

		let mut cmd = std::process::Command::new(find_current_binary());
		cmd.args(args)
			.stdin(Stdio::null())
			.stdout(log.try_clone()?)
			.stderr(log)
			.process_group(0);
		cmd.spawn().map_err(DaemonError::Spawn)?;

		let deadline = Instant::now() + STARTUP_TIMEOUT;
		while Instant::now() < deadline {
			std::thread::sleep(STARTUP_POLL);
			if client::is_running(&self.paths) {
				return Ok(());
			}
		}
		Err(DaemonError::StartTimeout)
	}

	/// SIGTERM the daemon and wait up to `timeout` for it to exit.
	pub fn stop(&self, timeout: Duration) -> Result<(), DaemonError> {
		let pid = client::read_pid(&self.paths).ok_or(DaemonError::NotRunning)?;
		let pid_ref = Pid::from_raw(pid as i32);
		if kill(pid_ref, Signal::SIGTERM).is_err() {
			// Stale PID file.
			self.cleanup();
			return Err(DaemonError::NotRunning);
		}

		let deadline = Instant::now() + timeout;
		while Instant::now() < deadline {
			if kill(pid_ref, None).is_err() {
				self.cleanup();
				return Ok(());
			}
			std::thread::sleep(STARTUP_POLL);
		}
		Err(DaemonError::StopTimeout(pid))
	}
}

fn find_current_binary() -> PathBuf {
	std::env::current_exe().unwrap_or_else(|_| PathBuf::from("tether"))
}
