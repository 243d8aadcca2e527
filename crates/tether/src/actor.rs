//! Per-app task. The actor is the only writer of its app's runtime state; the
//! rest of the world sends commands and reads snapshots from a watch channel.

use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};

use crate::error::{Result, SpawnError, SupervisorError};
use crate::output::OutputCapture;
use crate::policy::{RestartDecision, RestartTracker};
use crate::process::{self, ProcessHandle};
use crate::types::{AppSpec, ExitOutcome, LifecyclePhase, ProcessRuntimeState, SupervisorEvent};

pub(crate) type Reply = oneshot::Sender<Result<ProcessRuntimeState>>;

pub(crate) enum AppCommand {
	Start { resp: Reply },
	Stop { resp: Reply },
	Restart { resp: Reply },
}

pub(crate) struct AppActor {
	spec: AppSpec,
	grace_timeout: Duration,
	tracker: RestartTracker,
	state: ProcessRuntimeState,
	state_tx: watch::Sender<ProcessRuntimeState>,
	commands: mpsc::Receiver<AppCommand>,
	events: broadcast::Sender<SupervisorEvent>,
	output: OutputCapture,
	current: Option<ProcessHandle>,
	relaunch_at: Option<Instant>,
}

enum Wake {
	Exited(ExitOutcome),
	Stable,
	Relaunch,
	Command(Option<AppCommand>),
}

impl AppActor {
	pub(crate) fn new(
		spec: AppSpec,
		grace_timeout: Duration,
		tracker: RestartTracker,
		state_tx: watch::Sender<ProcessRuntimeState>,
		commands: mpsc::Receiver<AppCommand>,
		events: broadcast::Sender<SupervisorEvent>,
		output: OutputCapture,
	) -> Self {
		let state = state_tx.borrow().clone();
		Self {
			spec,
			grace_timeout,
			tracker,
			state,
			state_tx,
			commands,
			events,
			output,
			current: None,
			relaunch_at: None,
		}
	}

	pub(crate) async fn run(mut self) {
		loop {
			match self.next_wake().await {
				Wake::Exited(outcome) => self.on_exit(outcome),
				Wake::Stable => self.on_stable(),
				Wake::Relaunch => self.relaunch(),
				Wake::Command(Some(cmd)) => self.on_command(cmd).await,
				Wake::Command(None) => {
					// Supervisor dropped.
					self.stop_process().await;
					return;
				}
			}
		}
	}

	async fn next_wake(&mut self) -> Wake {
		let stable_at = self.tracker.stable_at();
		let relaunch_at = self.relaunch_at;
		match self.current.as_mut() {
			Some(process) => tokio::select! {
				outcome = process.await_exit() => Wake::Exited(outcome),
				_ = sleep_until_opt(stable_at) => Wake::Stable,
				cmd = self.commands.recv() => Wake::Command(cmd),
			},
			None => tokio::select! {
				_ = sleep_until_opt(relaunch_at) => Wake::Relaunch,
				cmd = self.commands.recv() => Wake::Command(cmd),
			},
		}
	}

	async fn on_command(&mut self, cmd: AppCommand) {
		match cmd {
			AppCommand::Start { resp } => {
				let result = if self.state.lifecycle_phase.is_idle() {
					self.manual_start()
				} else {
					Err(SupervisorError::AlreadyRunning(self.spec.name.clone()))
				};
				let _ = resp.send(result);
			}
			AppCommand::Stop { resp } => {
				self.stop_process().await;
				let _ = resp.send(Ok(self.state.clone()));
			}
			AppCommand::Restart { resp } => {
				let result = if self.state.lifecycle_phase.is_idle() {
					Err(SupervisorError::NotRunning(self.spec.name.clone()))
				} else {
					self.stop_process().await;
					self.manual_start()
				};
				let _ = resp.send(result);
			}
		}
	}

	fn manual_start(&mut self) -> Result<ProcessRuntimeState> {
		self.tracker.reset();
		self.state.last_error = None;
		match self.launch() {
			Ok(()) => Ok(self.state.clone()),
			Err(source) => {
				self.spawn_failed(&source);
				self.set_phase(LifecyclePhase::Crashed);
				Err(SupervisorError::Spawn {
					app: self.spec.name.clone(),
					source,
				})
			}
		}
	}

	fn launch(&mut self) -> std::result::Result<(), SpawnError> {
		let process = process::start(&self.spec, &self.output)?;
		let pid = process.pid();
		self.current = Some(process);

		self.state.pid = Some(pid);
		self.set_phase(LifecyclePhase::Starting);
		self.tracker.on_running(Instant::now());
		self.set_phase(LifecyclePhase::Running);
		self.emit(SupervisorEvent::Started {
			app: self.spec.name.clone(),
			pid,
		});
		Ok(())
	}

	fn on_exit(&mut self, outcome: ExitOutcome) {
		self.current = None;
		self.state.record_exit(&outcome);
		self.emit(SupervisorEvent::Exited {
			app: self.spec.name.clone(),
			code: outcome.code,
			signal: outcome.signal,
		});

		match self.tracker.on_exit(outcome.success(), Instant::now()) {
			RestartDecision::Restart { attempt, delay } => {
				tracing::warn!(
					app = %self.spec.name,
					"exited ({}), restarting ({}/{}) in {}ms",
					outcome,
					attempt,
					self.tracker.policy().max_restarts,
					delay.as_millis()
				);
				self.relaunch_at = Some(Instant::now() + delay);
				self.set_phase(LifecyclePhase::Restarting);
				self.emit(SupervisorEvent::Restarting {
					app: self.spec.name.clone(),
					attempt,
					delay_ms: delay.as_millis() as u64,
				});
			}
			RestartDecision::GiveUp { restarts } => self.give_up(restarts),
			RestartDecision::Settle { clean } => {
				let phase = if clean {
					LifecyclePhase::Stopped
				} else {
					LifecyclePhase::Crashed
				};
				tracing::info!(app = %self.spec.name, "exited ({}), not restarting", outcome);
				self.set_phase(phase);
			}
		}
	}

	fn on_stable(&mut self) {
		if self.tracker.check_stability(Instant::now()) {
			tracing::info!(app = %self.spec.name, "running stably, restart count reset");
			self.publish();
			self.emit(SupervisorEvent::StabilityReset {
				app: self.spec.name.clone(),
			});
		}
	}

	/// Pending relaunch is due. Spawn failures are retried immediately until the
	/// budget runs out.
	fn relaunch(&mut self) {
		self.relaunch_at = None;
		loop {
			let err = match self.launch() {
				Ok(()) => return,
				Err(e) => e,
			};
			self.spawn_failed(&err);
			match self.tracker.on_spawn_failure() {
				RestartDecision::Restart { attempt, .. } => {
					tracing::warn!(app = %self.spec.name, "relaunch failed, retrying ({})", attempt);
					self.publish();
				}
				RestartDecision::GiveUp { restarts } => return self.give_up(restarts),
				RestartDecision::Settle { .. } => return self.set_phase(LifecyclePhase::Crashed),
			}
		}
	}

	fn give_up(&mut self, restarts: u32) {
		tracing::error!(app = %self.spec.name, restarts, "max restarts exceeded, giving up");
		self.state.last_error = Some(format!("max restarts exceeded ({})", restarts));
		self.set_phase(LifecyclePhase::Crashed);
		self.emit(SupervisorEvent::MaxRestartsExceeded {
			app: self.spec.name.clone(),
			restarts,
		});
	}

	fn spawn_failed(&mut self, err: &SpawnError) {
		tracing::error!(app = %self.spec.name, "spawn failed: {}", err);
		self.state.pid = None;
		self.state.last_error = Some(err.to_string());
		self.emit(SupervisorEvent::SpawnFailed {
			app: self.spec.name.clone(),
			message: err.to_string(),
		});
	}

	/// Bring the app to STOPPED from any phase, cancelling a pending relaunch.
	async fn stop_process(&mut self) {
		self.relaunch_at = None;
		let was_stopped = self.state.lifecycle_phase == LifecyclePhase::Stopped;

		if let Some(mut process) = self.current.take() {
			self.state.pid = None;
			self.set_phase(LifecyclePhase::Stopping);
			let outcome = process.stop(self.grace_timeout).await;
			self.state.record_exit(&outcome);
		}

		self.tracker.reset();
		self.set_phase(LifecyclePhase::Stopped);
		if !was_stopped {
			tracing::info!(app = %self.spec.name, "stopped");
			self.emit(SupervisorEvent::Stopped {
				app: self.spec.name.clone(),
			});
		}
	}

	fn set_phase(&mut self, phase: LifecyclePhase) {
		self.state.lifecycle_phase = phase;
		if !phase.has_pid() {
			self.state.pid = None;
		}
		self.publish();
	}

	fn publish(&mut self) {
		self.state.restart_count = self.tracker.restart_count();
		self.state_tx.send_replace(self.state.clone());
	}

	fn emit(&self, event: SupervisorEvent) {
		let _ = self.events.send(event);
	}
}

async fn sleep_until_opt(deadline: Option<Instant>) {
	match deadline {
		Some(at) => sleep_until(at).await,
		None => std::future::pending().await,
	}
}
