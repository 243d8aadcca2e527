use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tether::{AppSpec, SupervisorConfig};

pub const CONFIG_FILE: &str = "tether.toml";

const DEFAULT_GRACE_MS: u64 = 3000;
const DEFAULT_MAX_RESTART_DELAY_MS: u64 = 30_000;
const DEFAULT_MAX_RESTARTS: u32 = 15;

/// Everything the supervisor needs, read once at startup.
#[derive(Debug)]
pub struct Config {
	pub supervisor: SupervisorConfig,
	pub apps: Vec<AppSpec>,
}

// ── file format ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawConfig {
	#[serde(default)]
	supervisor: RawSupervisor,
	#[serde(default)]
	apps: Vec<AppEntry>,
}

#[derive(Debug, Deserialize)]
struct RawSupervisor {
	#[serde(default = "default_grace_ms")]
	grace_timeout_ms: u64,
	stability_window_ms: Option<u64>,
	#[serde(default = "default_max_restart_delay_ms")]
	max_restart_delay_ms: u64,
}

impl Default for RawSupervisor {
	fn default() -> Self {
		Self {
			grace_timeout_ms: default_grace_ms(),
			stability_window_ms: None,
			max_restart_delay_ms: default_max_restart_delay_ms(),
		}
	}
}

fn default_grace_ms() -> u64 { DEFAULT_GRACE_MS }
fn default_max_restart_delay_ms() -> u64 { DEFAULT_MAX_RESTART_DELAY_MS }
fn default_max_restarts() -> u32 { DEFAULT_MAX_RESTARTS }
fn default_true() -> bool { true }

/// `args` as a single command-line string or as a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Args {
	Line(String),
	List(Vec<String>),
}

/// One `[[apps]]` entry, using pm2 ecosystem key names.
#[derive(Debug, Clone, Deserialize)]
struct AppEntry {
	name: String,
	cwd: Option<String>,
	script: String,
	args: Option<Args>,
	interpreter: Option<String>,
	#[serde(default)]
	watch: bool,
	#[serde(default = "default_true")]
	autorestart: bool,
	#[serde(default = "default_max_restarts")]
	max_restarts: u32,
	#[serde(default)]
	restart_delay: u64,
	env_file: Option<String>,
	out_file: Option<String>,
	error_file: Option<String>,
	#[serde(default)]
	env: BTreeMap<String, String>,
}

// ── loading ─────────────────────────────────────────────────────────────────

/// Read a TOML config, or JSON when the file ends in `.json`. Relative paths
/// inside resolve against the file's directory; logs default to `log_dir`.
pub fn load(path: &Path, log_dir: &Path) -> Result<Config> {
	let content = std::fs::read_to_string(path)
		.with_context(|| format!("failed to read config {}", path.display()))?;
	let base_dir = path
		.parent()
		.filter(|p| !p.as_os_str().is_empty())
		.map(Path::to_path_buf)
		.unwrap_or_else(|| PathBuf::from("."));
	let is_json = path.extension().map(|e| e == "json").unwrap_or(false);
	parse(&content, is_json, &base_dir, log_dir)
		.with_context(|| format!("invalid config {}", path.display()))
}

pub fn parse(content: &str, is_json: bool, base_dir: &Path, log_dir: &Path) -> Result<Config> {
	let raw: RawConfig = if is_json {
		serde_json::from_str(content)?
	} else {
		toml::from_str(content)?
	};

	let grace_timeout = Duration::from_millis(raw.supervisor.grace_timeout_ms);
	let supervisor = SupervisorConfig {
		grace_timeout,
		stability_window: raw
			.supervisor
			.stability_window_ms
			.map(Duration::from_millis)
			.unwrap_or(grace_timeout),
		max_restart_delay: Duration::from_millis(raw.supervisor.max_restart_delay_ms),
	};

	let mut seen = HashSet::new();
	let mut apps = Vec::with_capacity(raw.apps.len());
	for entry in raw.apps {
		let spec = into_spec(entry, base_dir, log_dir)?;
		if !seen.insert(spec.name.clone()) {
			bail!("duplicate app name: {}", spec.name);
		}
		apps.push(spec);
	}

	Ok(Config { supervisor, apps })
}

fn into_spec(entry: AppEntry, base_dir: &Path, log_dir: &Path) -> Result<AppSpec> {
	let name = entry.name.trim().to_string();
	if name.is_empty() {
		bail!("app with empty name");
	}
	if entry.script.trim().is_empty() {
		bail!("{}: script must not be empty", name);
	}

	let cwd = match &entry.cwd {
		Some(dir) => resolve(base_dir, dir),
		None => base_dir.to_path_buf(),
	};

	let arguments = match entry.args {
		None => Vec::new(),
		Some(Args::List(list)) => list,
		Some(Args::Line(line)) => {
			shell_words::split(&line).with_context(|| format!("{}: cannot split args {:?}", name, line))?
		}
	};

	let interpreter = match entry.interpreter.as_deref().map(str::trim) {
		None | Some("") | Some("none") => None,
		Some(interp) => Some(command_path(&cwd, interp)),
	};
	let executable_path = if interpreter.is_some() {
		resolve(&cwd, &entry.script)
	} else {
		command_path(&cwd, &entry.script)
	};

	let stdout_log_path = match &entry.out_file {
		Some(p) => resolve(&cwd, p),
		None => log_dir.join(format!("{}-out.log", name)),
	};
	let stderr_log_path = match &entry.error_file {
		Some(p) => resolve(&cwd, p),
		None => log_dir.join(format!("{}-error.log", name)),
	};

	Ok(AppSpec {
		name,
		environment_file_path: entry.env_file.as_deref().map(|p| resolve(&cwd, p)),
		working_directory: cwd,
		executable_path,
		interpreter,
		arguments,
		env: entry.env,
		watch_enabled: entry.watch,
		auto_restart: entry.autorestart,
		max_restarts: entry.max_restarts,
		restart_delay: Duration::from_millis(entry.restart_delay),
		stdout_log_path,
		stderr_log_path,
	})
}

fn expand_home(path: &str) -> PathBuf {
	if let Some(rest) = path.strip_prefix("~/") {
		if let Ok(home) = std::env::var("HOME") {
			return PathBuf::from(home).join(rest);
		}
	}
	PathBuf::from(path)
}

fn resolve(base: &Path, path: &str) -> PathBuf {
	let path = expand_home(path);
	if path.is_absolute() {
		path
	} else {
		base.join(path)
	}
}

/// A bare program name (`node`, `python3`) is looked up on `PATH`; anything
/// with a slash is a path relative to `cwd`.
fn command_path(cwd: &Path, program: &str) -> PathBuf {
	if !program.contains('/') {
		if let Some(found) = find_in_path(program) {
			return found;
		}
	}
	resolve(cwd, program)
}

fn find_in_path(program: &str) -> Option<PathBuf> {
	let path = std::env::var_os("PATH")?;
	std::env::split_paths(&path)
		.map(|dir| dir.join(program))
		.find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse_toml(content: &str) -> Result<Config> {
		parse(content, false, Path::new("/etc/tether"), Path::new("/var/log/tether"))
	}

	#[test]
	fn parses_full_app_entry() {
		let config = parse_toml(
			r#"
[supervisor]
grace_timeout_ms = 5000

[[apps]]
name = "talas-be"
cwd = "/home/ubuntu/TALAS-BE"
script = "/home/ubuntu/TALAS-BE/.venv/bin/python3"
args = "run.py --port 8000"
interpreter = "none"
max_restarts = 5
restart_delay = 250
env_file = ".env"
out_file = "/home/ubuntu/.pm2/logs/talas-be-out.log"
error_file = "/home/ubuntu/.pm2/logs/talas-be-error.log"

[apps.env]
PYTHONUNBUFFERED = "1"
"#,
		)
		.unwrap();

		assert_eq!(config.supervisor.grace_timeout, Duration::from_secs(5));
		assert_eq!(config.supervisor.stability_window, Duration::from_secs(5));
		assert_eq!(config.supervisor.max_restart_delay, Duration::from_secs(30));

		let app = &config.apps[0];
		assert_eq!(app.name, "talas-be");
		assert_eq!(app.working_directory, PathBuf::from("/home/ubuntu/TALAS-BE"));
		assert_eq!(app.executable_path, PathBuf::from("/home/ubuntu/TALAS-BE/.venv/bin/python3"));
		assert_eq!(app.interpreter, None);
		assert_eq!(app.arguments, vec!["run.py", "--port", "8000"]);
		assert!(app.auto_restart);
		assert_eq!(app.max_restarts, 5);
		assert_eq!(app.restart_delay, Duration::from_millis(250));
		assert_eq!(app.environment_file_path, Some(PathBuf::from("/home/ubuntu/TALAS-BE/.env")));
		assert_eq!(app.stdout_log_path, PathBuf::from("/home/ubuntu/.pm2/logs/talas-be-out.log"));
		assert_eq!(app.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
	}

	#[test]
	fn defaults_fill_missing_keys() {
		let config = parse_toml(
			r#"
[[apps]]
name = "worker"
script = "./worker.sh"
"#,
		)
		.unwrap();

		let app = &config.apps[0];
		assert_eq!(app.working_directory, PathBuf::from("/etc/tether"));
		assert_eq!(app.executable_path, PathBuf::from("/etc/tether/./worker.sh"));
		assert!(app.arguments.is_empty());
		assert!(app.auto_restart);
		assert!(!app.watch_enabled);
		assert_eq!(app.max_restarts, DEFAULT_MAX_RESTARTS);
		assert_eq!(app.restart_delay, Duration::ZERO);
		assert_eq!(app.stdout_log_path, PathBuf::from("/var/log/tether/worker-out.log"));
		assert_eq!(app.stderr_log_path, PathBuf::from("/var/log/tether/worker-error.log"));
		assert_eq!(config.supervisor.grace_timeout, Duration::from_millis(DEFAULT_GRACE_MS));
	}

	#[test]
	fn args_accept_quoted_string_or_list() {
		let config = parse_toml(
			r#"
[[apps]]
name = "quoted"
script = "/bin/echo"
args = "--greeting 'hello world' \"a b\""

[[apps]]
name = "list"
script = "/bin/echo"
args = ["--greeting", "hello world"]
"#,
		)
		.unwrap();
		assert_eq!(config.apps[0].arguments, vec!["--greeting", "hello world", "a b"]);
		assert_eq!(config.apps[1].arguments, vec!["--greeting", "hello world"]);
	}

	#[test]
	fn interpreter_makes_script_an_argument() {
		let config = parse_toml(
			r#"
[[apps]]
name = "py"
cwd = "srv/py"
script = "app.py"
interpreter = "/usr/bin/python3"
"#,
		)
		.unwrap();
		let app = &config.apps[0];
		assert_eq!(app.working_directory, PathBuf::from("/etc/tether/srv/py"));
		assert_eq!(app.interpreter, Some(PathBuf::from("/usr/bin/python3")));
		assert_eq!(app.script(), Some(PathBuf::from("/etc/tether/srv/py/app.py")));
	}

	#[test]
	fn json_ecosystem_file() {
		let config = parse(
			r#"{
				"supervisor": { "stability_window_ms": 10000 },
				"apps": [
					{ "name": "api", "script": "/usr/bin/env", "args": ["node", "server.js"], "autorestart": false }
				]
			}"#,
			true,
			Path::new("/srv"),
			Path::new("/tmp/logs"),
		)
		.unwrap();
		assert_eq!(config.supervisor.stability_window, Duration::from_secs(10));
		assert_eq!(config.apps[0].arguments, vec!["node", "server.js"]);
		assert!(!config.apps[0].auto_restart);
	}

	#[test]
	fn rejects_invalid_entries() {
		let empty_name = parse_toml("[[apps]]\nname = \"  \"\nscript = \"/bin/true\"\n");
		assert!(empty_name.unwrap_err().to_string().contains("empty name"));

		let empty_script = parse_toml("[[apps]]\nname = \"a\"\nscript = \"\"\n");
		assert!(empty_script.unwrap_err().to_string().contains("script must not be empty"));

		let bad_args = parse_toml("[[apps]]\nname = \"a\"\nscript = \"/bin/true\"\nargs = \"'unterminated\"\n");
		assert!(bad_args.unwrap_err().to_string().contains("cannot split args"));

		let dupes = parse_toml(
			"[[apps]]\nname = \"a\"\nscript = \"/bin/true\"\n[[apps]]\nname = \"a\"\nscript = \"/bin/true\"\n",
		);
		assert!(dupes.unwrap_err().to_string().contains("duplicate app name: a"));

		assert!(parse_toml("[[apps]]\nname = \"a\"\n").is_err());
	}

	#[test]
	fn load_reports_missing_file() {
		let err = load(Path::new("/nonexistent/tether.toml"), Path::new("/tmp")).unwrap_err();
		assert!(format!("{:#}", err).contains("failed to read config /nonexistent/tether.toml"));
	}
}
