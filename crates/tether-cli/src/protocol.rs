use serde::{Deserialize, Serialize};
use tether::{ProcessRuntimeState, SupervisorError};
use tether_ipc::DaemonPaths;

pub const APP_NAME: &str = "tether";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
	Start { name: String },
	Stop { name: String },
	Restart { name: String },
	/// One app, or every app when `name` is absent.
	Status {
		#[serde(default)]
		name: Option<String>,
	},
	Logs { name: String },
	Ping,
	Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
	Ok {
		#[serde(default)]
		state: Option<ProcessRuntimeState>,
		#[serde(default)]
		message: Option<String>,
	},
	Status { apps: Vec<ProcessRuntimeState> },
	Log { name: String, output: String },
	Error { code: String, message: String },
	Pong,
}

impl Response {
	pub fn invalid_request(message: String) -> Self {
		Response::Error {
			code: "invalid_request".to_string(),
			message,
		}
	}
}

impl From<SupervisorError> for Response {
	fn from(e: SupervisorError) -> Self {
		Response::Error {
			code: e.code().to_string(),
			message: e.to_string(),
		}
	}
}

pub fn daemon_paths() -> DaemonPaths {
	DaemonPaths::new(APP_NAME).with_env_prefix("TETHER")
}
