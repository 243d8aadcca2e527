use owo_colors::OwoColorize;
use tether::{LifecyclePhase, ProcessRuntimeState};

pub fn print_status(apps: &[ProcessRuntimeState]) {
	if apps.is_empty() {
		eprintln!("no apps configured");
		return;
	}
	let width = apps.iter().map(|s| s.name.len()).max().unwrap_or(0);
	for state in apps {
		println!("{}", status_line(state, width));
	}
}

pub fn status_line(state: &ProcessRuntimeState, name_width: usize) -> String {
	let (circle, label) = match state.lifecycle_phase {
		LifecyclePhase::Running => ("●".green().to_string(), "running".green().to_string()),
		LifecyclePhase::Starting => ("●".cyan().to_string(), "starting".cyan().to_string()),
		LifecyclePhase::Restarting => ("●".yellow().to_string(), "restarting".yellow().to_string()),
		LifecyclePhase::Stopping => ("●".yellow().to_string(), "stopping".yellow().to_string()),
		LifecyclePhase::Stopped => ("○".dimmed().to_string(), "stopped".dimmed().to_string()),
		LifecyclePhase::Crashed => ("●".red().to_string(), "crashed".red().to_string()),
	};
	let pid = state.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
	let last_exit = match (state.last_exit_code, state.last_exit_signal) {
		(Some(code), _) => format!("exit {}", code),
		(None, Some(sig)) => format!("signal {}", sig),
		(None, None) => "-".to_string(),
	};

	let mut line = format!(
		"{} {:<width$} {:<8} {:<8} restarts {:<3} {}",
		circle,
		state.name,
		pid,
		last_exit,
		state.restart_count,
		label,
		width = name_width
	);
	if let Some(err) = &state.last_error {
		line.push_str(&format!("  {}", err.dimmed()));
	}
	line
}
