use std::io::{self, BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::os::unix::net::UnixStream;

use serde::{de::DeserializeOwned, Serialize};

use crate::paths::DaemonPaths;

/// Errors from daemon client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
	/// Socket missing or refusing connections.
	#[error("daemon not running")]
	NotRunning,
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("serialize error: {0}")]
	Serialize(String),
	#[error("deserialize error: {0}")]
	Deserialize(String),
	/// Daemon closed the connection without answering.
	#[error("daemon closed the connection")]
	Closed,
}

/// Blocking client speaking JSON lines to a running daemon.
pub struct DaemonClient<Req, Resp> {
	stream: UnixStream,
	_phantom: PhantomData<(Req, Resp)>,
}

impl<Req, Resp> DaemonClient<Req, Resp>
where
	Req: Serialize,
	Resp: DeserializeOwned,
{
	/// Connect to an already-running daemon.
	pub fn connect(paths: &DaemonPaths) -> Result<Self, ClientError> {
		let stream = UnixStream::connect(paths.socket_path()).map_err(|_| ClientError::NotRunning)?;
		Ok(Self {
			stream,
			_phantom: PhantomData,
		})
	}

	/// Send a request and wait for its response.
	pub fn send(&mut self, request: &Req) -> Result<Resp, ClientError> {
		let mut data = serde_json::to_vec(request).map_err(|e| ClientError::Serialize(e.to_string()))?;
		data.push(b'\n');
		self.stream.write_all(&data)?;

		let mut reader = BufReader::new(&self.stream);
		let mut line = String::new();
		if reader.read_line(&mut line)? == 0 {
			return Err(ClientError::Closed);
		}

		serde_json::from_str(&line).map_err(|e| ClientError::Deserialize(e.to_string()))
	}
}

/// Check if a daemon is running (socket is connectable).
pub fn is_running(paths: &DaemonPaths) -> bool {
	UnixStream::connect(paths.socket_path()).is_ok()
}

/// Read the PID of a running daemon from its PID file.
pub fn read_pid(paths: &DaemonPaths) -> Option<u32> {
	std::fs::read_to_string(paths.pid_path())
		.ok()
		.and_then(|s| s.trim().parse().ok())
}
