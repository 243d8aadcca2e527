use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::error::SpawnError;
use crate::types::{AppSpec, StreamKind, SupervisorEvent};

const RING_BUFFER_SIZE: usize = 64 * 1024;
/// Longest chunk written in one piece when a line has no newline yet.
const MAX_LINE: u64 = 64 * 1024;

/// Per-app output sink. Survives restarts; log files are reopened per launch.
#[derive(Clone)]
pub struct OutputCapture {
	app: String,
	ring: Arc<Mutex<VecDeque<u8>>>,
	events: broadcast::Sender<SupervisorEvent>,
}

pub(crate) type LogFile = Arc<Mutex<File>>;

/// Destinations for one launch. When both paths are equal the streams share a
/// handle, so their lock serializes whole lines.
pub(crate) struct LogFiles {
	pub stdout: LogFile,
	pub stderr: LogFile,
}

impl OutputCapture {
	pub fn new(app: &str, events: broadcast::Sender<SupervisorEvent>) -> Self {
		Self {
			app: app.to_string(),
			ring: Arc::new(Mutex::new(VecDeque::with_capacity(RING_BUFFER_SIZE))),
			events,
		}
	}

	pub(crate) fn open(&self, spec: &AppSpec) -> Result<LogFiles, SpawnError> {
		let stdout = Arc::new(Mutex::new(open_append(&spec.stdout_log_path)?));
		let stderr = if spec.shares_log_file() {
			Arc::clone(&stdout)
		} else {
			Arc::new(Mutex::new(open_append(&spec.stderr_log_path)?))
		};
		Ok(LogFiles { stdout, stderr })
	}

	/// Copy `reader` into `file` line by line until EOF. The file handle is
	/// released when the task ends.
	pub(crate) fn pump<R>(&self, reader: R, stream: StreamKind, file: LogFile) -> JoinHandle<()>
	where
		R: AsyncRead + Unpin + Send + 'static,
	{
		let capture = self.clone();
		tokio::spawn(async move {
			let mut reader = BufReader::new(reader);
			let mut line = Vec::with_capacity(256);
			let mut failing = false;
			loop {
				line.clear();
				match (&mut reader).take(MAX_LINE).read_until(b'\n', &mut line).await {
					Ok(0) => break,
					Ok(_) => {}
					Err(e) => {
						tracing::debug!(app = %capture.app, %stream, "pipe read error: {}", e);
						break;
					}
				}

				match write_line(&file, &line).await {
					Ok(()) => failing = false,
					// Keep draining so the child never blocks on a full pipe.
					Err(e) if !failing => {
						failing = true;
						capture.report_write_error(stream, &e);
					}
					Err(_) => {}
				}
				capture.remember(&line).await;
			}
		})
	}

	fn report_write_error(&self, stream: StreamKind, err: &io::Error) {
		tracing::warn!(app = %self.app, %stream, "log write failed: {}", err);
		let _ = self.events.send(SupervisorEvent::LogWriteFailed {
			app: self.app.clone(),
			stream,
			message: err.to_string(),
		});
	}

	async fn remember(&self, data: &[u8]) {
		let mut ring = self.ring.lock().await;
		ring.extend(data);
		if ring.len() > RING_BUFFER_SIZE {
			let excess = ring.len() - RING_BUFFER_SIZE;
			ring.drain(..excess);
		}
	}

	/// Most recent output of the app, both streams, across restarts.
	pub async fn snapshot(&self) -> Vec<u8> {
		let ring = self.ring.lock().await;
		ring.iter().copied().collect()
	}
}

async fn write_line(file: &LogFile, data: &[u8]) -> io::Result<()> {
	let mut file = file.lock().await;
	file.write_all(data)?;
	file.flush()
}

fn open_append(path: &Path) -> Result<File, SpawnError> {
	let log_open = |source| SpawnError::LogOpen {
		path: path.to_path_buf(),
		source,
	};
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).map_err(log_open)?;
	}
	OpenOptions::new()
		.create(true)
		.append(true)
		.open(path)
		.map_err(log_open)
}
