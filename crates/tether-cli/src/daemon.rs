use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tether::{Supervisor, SupervisorEvent};
use tether_ipc::Daemon;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, Notify};

use crate::config;
use crate::protocol::{self, Request, Response};

/// `tether daemon run`: supervise every configured app and serve requests on
/// the daemon socket until told to stop.
pub async fn run(config_path: &Path) -> Result<()> {
	let paths = protocol::daemon_paths();
	if tether_ipc::client::is_running(&paths) {
		bail!("daemon already running");
	}

	let supervisor = load_supervisor(config_path, &paths.log_dir())?;
	start_all(&supervisor).await;

	let daemon = Daemon::new(paths);
	let shutdown = daemon.shutdown_handle();
	let sup = Arc::clone(&supervisor);
	let result = daemon
		.run(
			move |req: Request| {
				let sup = Arc::clone(&sup);
				let shutdown = Arc::clone(&shutdown);
				async move { handle_request(&sup, &shutdown, req).await }
			},
			Some(Response::invalid_request),
		)
		.await;

	supervisor.shutdown().await;
	tracing::info!("all apps stopped");
	result.context("daemon failed")
}

/// `tether run`: same supervision in the foreground, no socket.
pub async fn run_foreground(config_path: &Path) -> Result<()> {
	let paths = protocol::daemon_paths();
	let supervisor = load_supervisor(config_path, &paths.log_dir())?;
	start_all(&supervisor).await;

	let mut terminate = signal(SignalKind::terminate())?;
	tokio::select! {
		_ = tokio::signal::ctrl_c() => tracing::info!("interrupted, stopping apps"),
		_ = terminate.recv() => tracing::info!("terminated, stopping apps"),
	}

	supervisor.shutdown().await;
	tracing::info!("all apps stopped");
	Ok(())
}

fn load_supervisor(config_path: &Path, log_dir: &Path) -> Result<Arc<Supervisor>> {
	let config = config::load(config_path, log_dir)?;
	if config.apps.is_empty() {
		tracing::warn!("no apps configured in {}", config_path.display());
	}
	let supervisor = Supervisor::new(config.supervisor, config.apps).context("failed to register apps")?;
	tokio::spawn(log_events(supervisor.subscribe()));
	Ok(supervisor)
}

async fn start_all(supervisor: &Supervisor) {
	for (name, result) in supervisor.start_all().await {
		match result {
			Ok(state) => tracing::debug!(app = %name, "{} (pid {:?})", state.lifecycle_phase, state.pid),
			Err(e) => tracing::error!(app = %name, "failed to start: {}", e),
		}
	}
}

async fn log_events(mut events: broadcast::Receiver<SupervisorEvent>) {
	loop {
		match events.recv().await {
			Ok(SupervisorEvent::MaxRestartsExceeded { app, restarts }) => {
				tracing::error!(app = %app, restarts, "gave up restarting");
			}
			Ok(SupervisorEvent::LogWriteFailed { app, stream, message }) => {
				tracing::warn!(app = %app, %stream, "log write failed: {}", message);
			}
			Ok(event) => {
				tracing::debug!(app = %event.app(), ?event, "event");
			}
			Err(broadcast::error::RecvError::Lagged(n)) => {
				tracing::warn!("event log lagged, {} events dropped", n);
			}
			Err(broadcast::error::RecvError::Closed) => break,
		}
	}
}

pub(crate) async fn handle_request(supervisor: &Supervisor, shutdown: &Notify, request: Request) -> Response {
	let state = match request {
		Request::Ping => return Response::Pong,
		Request::Start { name } => supervisor.start(&name).await,
		Request::Stop { name } => supervisor.stop(&name).await,
		Request::Restart { name } => supervisor.restart(&name).await,
		Request::Status { name: Some(name) } => {
			return match supervisor.status(&name) {
				Ok(state) => Response::Status { apps: vec![state] },
				Err(e) => e.into(),
			};
		}
		Request::Status { name: None } => {
			return Response::Status {
				apps: supervisor.status_all(),
			};
		}
		Request::Logs { name } => {
			return match supervisor.logs(&name).await {
				Ok(output) => Response::Log {
					name,
					output: String::from_utf8_lossy(&output).into_owned(),
				},
				Err(e) => e.into(),
			};
		}
		Request::Shutdown => {
			shutdown.notify_one();
			return Response::Ok {
				state: None,
				message: Some("shutting down".to_string()),
			};
		}
	};

	match state {
		Ok(state) => Response::Ok {
			state: Some(state),
			message: None,
		},
		Err(e) => e.into(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;
	use tether::{AppSpec, LifecyclePhase, SupervisorConfig};

	fn sleeper(dir: &Path) -> AppSpec {
		AppSpec::new("sleeper", dir, "/bin/sh", dir.join("out.log"), dir.join("err.log"))
			.with_args(["-c", "echo ready; exec sleep 60"])
	}

	fn test_dir(name: &str) -> std::path::PathBuf {
		let dir = std::env::temp_dir().join(format!("tether-cli-{}-{}", std::process::id(), name));
		let _ = std::fs::remove_dir_all(&dir);
		std::fs::create_dir_all(&dir).unwrap();
		dir
	}

	#[tokio::test]
	async fn requests_map_to_supervisor_calls() {
		let dir = test_dir("handle");
		let sup = Supervisor::new(SupervisorConfig::default(), vec![sleeper(&dir)]).unwrap();
		let shutdown = Notify::new();

		assert_eq!(handle_request(&sup, &shutdown, Request::Ping).await, Response::Pong);

		match handle_request(&sup, &shutdown, Request::Start { name: "sleeper".into() }).await {
			Response::Ok { state: Some(state), .. } => assert!(state.pid.is_some()),
			other => panic!("unexpected {:?}", other),
		}

		match handle_request(&sup, &shutdown, Request::Start { name: "sleeper".into() }).await {
			Response::Error { code, .. } => assert_eq!(code, "already_running"),
			other => panic!("unexpected {:?}", other),
		}

		match handle_request(&sup, &shutdown, Request::Status { name: None }).await {
			Response::Status { apps } => {
				assert_eq!(apps.len(), 1);
				assert_eq!(apps[0].lifecycle_phase, LifecyclePhase::Running);
			}
			other => panic!("unexpected {:?}", other),
		}

		tokio::time::sleep(Duration::from_millis(200)).await;
		match handle_request(&sup, &shutdown, Request::Logs { name: "sleeper".into() }).await {
			Response::Log { output, .. } => assert!(output.contains("ready")),
			other => panic!("unexpected {:?}", other),
		}

		match handle_request(&sup, &shutdown, Request::Stop { name: "sleeper".into() }).await {
			Response::Ok { state: Some(state), .. } => assert_eq!(state.pid, None),
			other => panic!("unexpected {:?}", other),
		}

		match handle_request(&sup, &shutdown, Request::Restart { name: "sleeper".into() }).await {
			Response::Error { code, .. } => assert_eq!(code, "not_running"),
			other => panic!("unexpected {:?}", other),
		}

		match handle_request(&sup, &shutdown, Request::Status { name: Some("ghost".into()) }).await {
			Response::Error { code, message } => {
				assert_eq!(code, "unknown_app");
				assert!(message.contains("ghost"));
			}
			other => panic!("unexpected {:?}", other),
		}

		let _ = std::fs::remove_dir_all(&dir);
	}

	#[tokio::test]
	async fn shutdown_request_fires_notify() {
		let sup = Supervisor::new(SupervisorConfig::default(), Vec::new()).unwrap();
		let shutdown = Notify::new();
		let resp = handle_request(&sup, &shutdown, Request::Shutdown).await;
		assert!(matches!(resp, Response::Ok { state: None, .. }));
		tokio::time::timeout(Duration::from_secs(1), shutdown.notified())
			.await
			.unwrap();
	}
}
