use std::ffi::OsString;
use std::path::PathBuf;

/// Filesystem layout of a daemon: socket, PID file and logs under the state
/// dir, config under the config dir.
///
/// With an env prefix set, `<PREFIX>_STATE_DIR` and `<PREFIX>_CONFIG` override
/// the XDG locations.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
	pub app_name: String,
	env_prefix: Option<String>,
}

impl DaemonPaths {
	pub fn new(app_name: impl Into<String>) -> Self {
		Self {
			app_name: app_name.into(),
			env_prefix: None,
		}
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = Some(prefix.into());
		self
	}

	fn env_override(&self, suffix: &str) -> Option<PathBuf> {
		let prefix = self.env_prefix.as_ref()?;
		non_empty_var(&format!("{}_{}", prefix, suffix)).map(PathBuf::from)
	}

	/// `<PREFIX>_STATE_DIR`, else `$XDG_STATE_HOME/<app>`, else `~/.local/state/<app>`.
	pub fn state_dir(&self) -> PathBuf {
		self.env_override("STATE_DIR")
			.unwrap_or_else(|| base_dir("XDG_STATE_HOME", &[".local", "state"]).join(&self.app_name))
	}

	/// `$XDG_CONFIG_HOME/<app>`, else `~/.config/<app>`.
	pub fn config_dir(&self) -> PathBuf {
		base_dir("XDG_CONFIG_HOME", &[".config"]).join(&self.app_name)
	}

	/// Config file used when none is named explicitly: `<PREFIX>_CONFIG`, else
	/// `file_name` inside the config dir.
	pub fn config_file(&self, file_name: &str) -> PathBuf {
		self.env_override("CONFIG")
			.unwrap_or_else(|| self.config_dir().join(file_name))
	}

	pub fn socket_path(&self) -> PathBuf {
		self.state_dir().join("daemon.sock")
	}

	pub fn pid_path(&self) -> PathBuf {
		self.state_dir().join("daemon.pid")
	}

	/// Default directory for app stdout/stderr files.
	pub fn log_dir(&self) -> PathBuf {
		self.state_dir().join("logs")
	}

	/// The daemon's own output when started in the background.
	pub fn daemon_log_path(&self) -> PathBuf {
		self.log_dir().join("daemon.log")
	}
}

fn non_empty_var(key: &str) -> Option<OsString> {
	std::env::var_os(key).filter(|v| !v.is_empty())
}

/// An XDG base directory, falling back to `$HOME/<fallback>` and finally the
/// system temp dir.
fn base_dir(xdg_var: &str, fallback: &[&str]) -> PathBuf {
	if let Some(dir) = non_empty_var(xdg_var) {
		return PathBuf::from(dir);
	}
	match non_empty_var("HOME") {
		Some(home) => fallback.iter().fold(PathBuf::from(home), |p, part| p.join(part)),
		None => std::env::temp_dir(),
	}
}
