//! Restart policy: decides what happens after every unrequested exit.
//!
//! ```text
//! RUNNING --exit, auto_restart, count < max--> RESTARTING --relaunch--> RUNNING
//! RUNNING --exit, auto_restart, count >= max--> CRASHED
//! RUNNING --exit, no auto_restart--> STOPPED (code 0) | CRASHED
//! ```
//!
//! The count resets after the process stays up for the stability window, so a
//! flapping app exhausts its budget while a long-lived one that dies once does not.

use std::time::Duration;
use tokio::time::Instant;

use crate::types::AppSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
	pub auto_restart: bool,
	pub max_restarts: u32,
	pub stability_window: Duration,
	pub restart_delay: Duration,
	pub max_restart_delay: Duration,
}

impl RestartPolicy {
	pub fn for_app(spec: &AppSpec, stability_window: Duration, max_restart_delay: Duration) -> Self {
		Self {
			auto_restart: spec.auto_restart,
			max_restarts: spec.max_restarts,
			stability_window,
			restart_delay: spec.restart_delay,
			max_restart_delay,
		}
	}

	/// Delay before the given attempt (1-based): `restart_delay * 2^(attempt-1)`, capped.
	pub fn backoff(&self, attempt: u32) -> Duration {
		if self.restart_delay.is_zero() {
			return Duration::ZERO;
		}
		let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
		self.restart_delay
			.checked_mul(factor)
			.unwrap_or(self.max_restart_delay)
			.min(self.max_restart_delay.max(self.restart_delay))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
	/// Relaunch after `delay`; `attempt` is the new restart count.
	Restart { attempt: u32, delay: Duration },
	/// Budget exhausted after `restarts` attempts.
	GiveUp { restarts: u32 },
	/// Restarts disabled; `clean` when the exit code was 0.
	Settle { clean: bool },
}

#[derive(Debug)]
pub struct RestartTracker {
	policy: RestartPolicy,
	restart_count: u32,
	healthy_since: Option<Instant>,
}

impl RestartTracker {
	pub fn new(policy: RestartPolicy) -> Self {
		Self {
			policy,
			restart_count: 0,
			healthy_since: None,
		}
	}

	pub fn policy(&self) -> &RestartPolicy {
		&self.policy
	}

	pub fn restart_count(&self) -> u32 {
		self.restart_count
	}

	pub fn on_running(&mut self, now: Instant) {
		self.healthy_since = Some(now);
	}

	/// When the current run will have proven itself stable. `None` when there is
	/// nothing to reset.
	pub fn stable_at(&self) -> Option<Instant> {
		if self.restart_count == 0 {
			return None;
		}
		self.healthy_since.map(|since| since + self.policy.stability_window)
	}

	/// Reset the count if the current run has lasted the stability window.
	/// Returns true when a reset happened.
	pub fn check_stability(&mut self, now: Instant) -> bool {
		match self.stable_at() {
			Some(at) if now >= at => {
				self.restart_count = 0;
				true
			}
			_ => false,
		}
	}

	pub fn on_exit(&mut self, success: bool, now: Instant) -> RestartDecision {
		self.check_stability(now);
		self.healthy_since = None;

		if !self.policy.auto_restart {
			return RestartDecision::Settle { clean: success };
		}
		self.next_attempt(true)
	}

	/// A relaunch failed before the process ran; retried without delay.
	pub fn on_spawn_failure(&mut self) -> RestartDecision {
		self.healthy_since = None;
		if !self.policy.auto_restart {
			return RestartDecision::GiveUp { restarts: self.restart_count };
		}
		self.next_attempt(false)
	}

	fn next_attempt(&mut self, with_backoff: bool) -> RestartDecision {
		if self.restart_count >= self.policy.max_restarts {
			return RestartDecision::GiveUp { restarts: self.restart_count };
		}
		self.restart_count += 1;
		let delay = if with_backoff {
			self.policy.backoff(self.restart_count)
		} else {
			Duration::ZERO
		};
		RestartDecision::Restart {
			attempt: self.restart_count,
			delay,
		}
	}

	/// Forget history after an intentional stop or a manual start.
	pub fn reset(&mut self) {
		self.restart_count = 0;
		self.healthy_since = None;
	}
}
