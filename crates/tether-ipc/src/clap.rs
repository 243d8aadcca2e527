use std::time::Duration;

use clap::Subcommand;

use crate::daemon::{Daemon, DaemonError};
use crate::paths::DaemonPaths;

#[derive(Debug, Clone, Subcommand)]
pub enum DaemonCommand {
	/// Run the daemon in the foreground (used internally)
	Run,
	/// Start the daemon in the background
	Start,
	/// Stop the running daemon
	Stop {
		/// Seconds to wait for the daemon to stop its apps and exit
		#[arg(long, default_value_t = 30)]
		timeout: u64,
	},
	/// Show daemon status
	Status,
}

impl DaemonCommand {
	/// Handle everything but `run`, which needs the application's request handler.
	/// `start_args` is the argument list that makes the binary run the daemon.
	pub fn execute(&self, paths: &DaemonPaths, start_args: &[&str]) -> Result<(), DaemonError> {
		let daemon = Daemon::new(paths.clone());
		match self {
			DaemonCommand::Run => {
				eprintln!("the 'run' subcommand must be handled by the application");
			}
			DaemonCommand::Start => {
				daemon.start_background(start_args)?;
				match crate::client::read_pid(paths) {
					Some(pid) => eprintln!("daemon started (pid {})", pid),
					None => eprintln!("daemon started"),
				}
			}
			DaemonCommand::Stop { timeout } => {
				daemon.stop(Duration::from_secs(*timeout))?;
				eprintln!("daemon stopped");
			}
			DaemonCommand::Status => {
				if crate::client::is_running(paths) {
					match crate::client::read_pid(paths) {
						Some(pid) => eprintln!("daemon running (pid {})", pid),
						None => eprintln!("daemon running"),
					}
				} else {
					eprintln!("daemon not running");
				}
			}
		}
		Ok(())
	}
}
