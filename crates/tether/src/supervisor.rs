use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::actor::{AppActor, AppCommand, Reply};
use crate::error::{Result, SupervisorError};
use crate::output::OutputCapture;
use crate::policy::{RestartPolicy, RestartTracker};
use crate::types::{AppSpec, LifecyclePhase, ProcessRuntimeState, SupervisorEvent};

const COMMAND_QUEUE: usize = 16;
const EVENT_QUEUE: usize = 256;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
	/// Time between SIGTERM and SIGKILL when stopping.
	pub grace_timeout: Duration,
	/// Continuous uptime after which the restart count goes back to zero.
	pub stability_window: Duration,
	/// Upper bound for exponential restart backoff.
	pub max_restart_delay: Duration,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		let grace_timeout = Duration::from_secs(3);
		Self {
			grace_timeout,
			stability_window: grace_timeout,
			max_restart_delay: Duration::from_secs(30),
		}
	}
}

/// Caller's side of one app actor.
struct AppHandle {
	commands: mpsc::Sender<AppCommand>,
	state: watch::Receiver<ProcessRuntimeState>,
	output: OutputCapture,
}

/// Registry of supervised apps, one actor task each.
///
/// The set of apps is fixed at construction. Dropping the supervisor stops
/// every app.
pub struct Supervisor {
	apps: HashMap<String, AppHandle>,
	order: Vec<String>,
	events: broadcast::Sender<SupervisorEvent>,
	config: SupervisorConfig,
}

impl Supervisor {
	/// Register `specs` and spawn their actors. Nothing is launched yet.
	///
	/// Must be called from within a tokio runtime.
	pub fn new(config: SupervisorConfig, specs: Vec<AppSpec>) -> Result<Arc<Self>> {
		let mut seen = HashSet::new();
		for spec in &specs {
			if spec.name.trim().is_empty() {
				return Err(SupervisorError::InvalidSpec("app name must not be empty".into()));
			}
			if !seen.insert(spec.name.clone()) {
				return Err(SupervisorError::DuplicateApp(spec.name.clone()));
			}
		}

		let (events, _) = broadcast::channel(EVENT_QUEUE);
		let mut apps = HashMap::new();
		let mut order = Vec::with_capacity(specs.len());

		for spec in specs {
			if spec.watch_enabled {
				tracing::warn!(app = %spec.name, "watch is enabled but file watching is external; ignoring");
			}
			let name = spec.name.clone();
			let policy = RestartPolicy::for_app(&spec, config.stability_window, config.max_restart_delay);
			let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
			let (state_tx, state_rx) = watch::channel(ProcessRuntimeState::new(&name));
			let output = OutputCapture::new(&name, events.clone());

			let actor = AppActor::new(
				spec,
				config.grace_timeout,
				RestartTracker::new(policy),
				state_tx,
				cmd_rx,
				events.clone(),
				output.clone(),
			);
			tokio::spawn(actor.run());

			order.push(name.clone());
			apps.insert(
				name,
				AppHandle {
					commands: cmd_tx,
					state: state_rx,
					output,
				},
			);
		}

		Ok(Arc::new(Self {
			apps,
			order,
			events,
			config,
		}))
	}

	pub fn config(&self) -> &SupervisorConfig {
		&self.config
	}

	/// App names in registration order.
	pub fn app_names(&self) -> &[String] {
		&self.order
	}

	fn app(&self, name: &str) -> Result<&AppHandle> {
		self.apps
			.get(name)
			.ok_or_else(|| SupervisorError::UnknownApp(name.to_string()))
	}

	async fn request(&self, name: &str, make: impl FnOnce(Reply) -> AppCommand) -> Result<ProcessRuntimeState> {
		let app = self.app(name)?;
		let (tx, rx) = oneshot::channel();
		app.commands
			.send(make(tx))
			.await
			.map_err(|_| SupervisorError::Unavailable(name.to_string()))?;
		rx.await
			.map_err(|_| SupervisorError::Unavailable(name.to_string()))?
	}

	/// Launch a stopped or crashed app. Resets its restart count.
	pub async fn start(&self, name: &str) -> Result<ProcessRuntimeState> {
		self.request(name, |resp| AppCommand::Start { resp }).await
	}

	/// Stop an app, waiting at most the grace timeout before killing it.
	/// Stopping a stopped app succeeds without doing anything.
	pub async fn stop(&self, name: &str) -> Result<ProcessRuntimeState> {
		self.request(name, |resp| AppCommand::Stop { resp }).await
	}

	/// Stop and relaunch a live app.
	pub async fn restart(&self, name: &str) -> Result<ProcessRuntimeState> {
		self.request(name, |resp| AppCommand::Restart { resp }).await
	}

	pub fn status(&self, name: &str) -> Result<ProcessRuntimeState> {
		Ok(self.app(name)?.state.borrow().clone())
	}

	pub fn status_all(&self) -> Vec<ProcessRuntimeState> {
		self.order
			.iter()
			.filter_map(|name| self.apps.get(name))
			.map(|app| app.state.borrow().clone())
			.collect()
	}

	/// Receiver that sees every state change of `name`.
	pub fn watch(&self, name: &str) -> Result<watch::Receiver<ProcessRuntimeState>> {
		Ok(self.app(name)?.state.clone())
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
		self.events.subscribe()
	}

	/// Recent combined output of `name`.
	pub async fn logs(&self, name: &str) -> Result<Vec<u8>> {
		Ok(self.app(name)?.output.snapshot().await)
	}

	/// Start every app that is not already running. One failure does not
	/// prevent the others from starting.
	pub async fn start_all(&self) -> Vec<(String, Result<ProcessRuntimeState>)> {
		let mut results = Vec::with_capacity(self.order.len());
		for name in &self.order {
			let result = match self.start(name).await {
				Err(SupervisorError::AlreadyRunning(_)) => self.status(name),
				other => other,
			};
			results.push((name.clone(), result));
		}
		results
	}

	/// Stop every app concurrently.
	pub async fn shutdown(&self) {
		let mut pending = Vec::new();
		for (name, app) in &self.apps {
			let (tx, rx) = oneshot::channel();
			if app.commands.send(AppCommand::Stop { resp: tx }).await.is_ok() {
				pending.push((name, rx));
			}
		}
		for (name, rx) in pending {
			match rx.await {
				Ok(Ok(state)) if state.lifecycle_phase == LifecyclePhase::Stopped => {}
				_ => tracing::warn!(app = %name, "did not confirm stop during shutdown"),
			}
		}
	}
}
