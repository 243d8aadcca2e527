mod config;
mod daemon;
mod protocol;
mod render;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use tether_ipc::clap::DaemonCommand;
use tether_ipc::{ClientError, DaemonClient};
use tracing_subscriber::EnvFilter;

use protocol::{Request, Response};

#[derive(Debug, Parser)]
#[command(name = "tether", version, about = "Keep long-running apps alive: restart on crash, append output to log files")]
struct Cli {
	/// Config file (TOML, or JSON with a .json extension). Defaults to
	/// $TETHER_CONFIG, then ~/.config/tether/tether.toml
	#[arg(short, long, global = true)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Manage the background daemon
	Daemon {
		#[command(subcommand)]
		command: DaemonCommand,
	},
	/// Supervise every configured app in the foreground until interrupted
	Run,
	/// Start a stopped or crashed app
	Start { name: String },
	/// Stop an app (SIGTERM, then SIGKILL after the grace timeout)
	Stop { name: String },
	/// Stop and relaunch a running app
	Restart { name: String },
	/// Show one app, or all of them
	#[command(alias = "st")]
	Status { name: Option<String> },
	/// Print recent output captured by the daemon
	Logs { name: String },
}

fn main() -> ExitCode {
	let cli = Cli::parse();
	match run(cli) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			eprintln!("{} {:#}", "error:".red().bold(), e);
			ExitCode::FAILURE
		}
	}
}

fn run(cli: Cli) -> Result<()> {
	let config_path = config_path(cli.config)?;
	match cli.command {
		Command::Daemon { command: DaemonCommand::Run } => {
			init_tracing();
			tokio::runtime::Runtime::new()?.block_on(daemon::run(&config_path))
		}
		Command::Daemon { command } => {
			let config_arg = config_path.to_string_lossy();
			let start_args = ["--config", config_arg.as_ref(), "daemon", "run"];
			command.execute(&protocol::daemon_paths(), &start_args)?;
			Ok(())
		}
		Command::Run => {
			init_tracing();
			tokio::runtime::Runtime::new()?.block_on(daemon::run_foreground(&config_path))
		}
		Command::Start { name } => print_state(send(&Request::Start { name })?),
		Command::Stop { name } => print_state(send(&Request::Stop { name })?),
		Command::Restart { name } => print_state(send(&Request::Restart { name })?),
		Command::Status { name } => match send(&Request::Status { name })? {
			Response::Status { apps } => {
				render::print_status(&apps);
				Ok(())
			}
			other => unexpected(other),
		},
		Command::Logs { name } => match send(&Request::Logs { name })? {
			Response::Log { output, .. } => {
				let mut stdout = std::io::stdout().lock();
				stdout.write_all(output.as_bytes())?;
				stdout.flush()?;
				Ok(())
			}
			other => unexpected(other),
		},
	}
}

fn init_tracing() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn config_path(arg: Option<PathBuf>) -> Result<PathBuf> {
	let path = arg.unwrap_or_else(|| protocol::daemon_paths().config_file(config::CONFIG_FILE));
	if path.is_absolute() {
		Ok(path)
	} else {
		Ok(std::env::current_dir()?.join(path))
	}
}

/// One request to the running daemon. `Error` responses become errors.
fn send(request: &Request) -> Result<Response> {
	let mut client = DaemonClient::<Request, Response>::connect(&protocol::daemon_paths()).map_err(|e| match e {
		ClientError::NotRunning => anyhow!("daemon not running (start it with `tether daemon start`)"),
		other => other.into(),
	})?;
	match client.send(request)? {
		Response::Error { code, message } => {
			tracing::debug!(code = %code, "daemon returned error");
			bail!("{}", message)
		}
		response => Ok(response),
	}
}

fn print_state(response: Response) -> Result<()> {
	match response {
		Response::Ok { state: Some(state), .. } => {
			render::print_status(std::slice::from_ref(&state));
			Ok(())
		}
		Response::Ok { message, .. } => {
			if let Some(message) = message {
				eprintln!("{}", message);
			}
			Ok(())
		}
		other => unexpected(other),
	}
}

fn unexpected(response: Response) -> Result<()> {
	bail!("unexpected response from daemon: {:?}", response)
}
