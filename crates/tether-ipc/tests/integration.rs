use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tether_ipc::client::{self, ClientError, DaemonClient};
use tether_ipc::paths::DaemonPaths;
use tether_ipc::{Daemon, DaemonError};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum Req {
	Ping,
	Status { name: String },
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Resp {
	Pong,
	Status { name: String, running: bool },
	Error { message: String },
}

async fn handle(req: Req) -> Resp {
	match req {
		Req::Ping => Resp::Pong,
		Req::Status { name } => Resp::Status {
			running: name == "web",
			name,
		},
	}
}

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_paths(name: &str) -> DaemonPaths {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	// Short socket paths (SUN_LEN).
	std::env::set_var("XDG_STATE_HOME", "/tmp");
	DaemonPaths::new(format!("tt{}{}-{}", std::process::id(), n, name))
}

fn cleanup_paths(paths: &DaemonPaths) {
	let _ = std::fs::remove_file(paths.socket_path());
	let _ = std::fs::remove_file(paths.pid_path());
	let _ = std::fs::remove_dir_all(paths.state_dir());
}

fn spawn_server(paths: &DaemonPaths) -> tokio::task::JoinHandle<()> {
	let _ = std::fs::create_dir_all(paths.state_dir());
	let server_paths = paths.clone();
	tokio::spawn(async move {
		tether_ipc::server::run_socket_server_with_error(
			&server_paths,
			handle,
			Some(|message: String| Resp::Error { message }),
		)
		.await;
	})
}

// --- Paths ---

#[test]
fn paths_live_under_state_dir() {
	let paths = temp_paths("layout");
	let state = paths.state_dir();
	assert!(state.starts_with("/tmp"));
	assert_eq!(paths.socket_path(), state.join("daemon.sock"));
	assert_eq!(paths.pid_path(), state.join("daemon.pid"));
	assert_eq!(paths.log_dir(), state.join("logs"));
	assert!(paths.daemon_log_path().starts_with(paths.log_dir()));
}

#[test]
fn prefixed_env_overrides_state_dir_and_config_file() {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	let prefix = format!("TTPATHS{}", n);
	let paths = DaemonPaths::new("tether").with_env_prefix(prefix.clone());

	std::env::set_var(format!("{}_STATE_DIR", prefix), "/tmp/tt-override");
	std::env::set_var(format!("{}_CONFIG", prefix), "/srv/tether/apps.toml");
	assert_eq!(paths.state_dir(), std::path::PathBuf::from("/tmp/tt-override"));
	assert_eq!(paths.socket_path(), std::path::PathBuf::from("/tmp/tt-override/daemon.sock"));
	assert_eq!(paths.config_file("tether.toml"), std::path::PathBuf::from("/srv/tether/apps.toml"));

	std::env::set_var(format!("{}_CONFIG", prefix), "");
	assert_eq!(paths.config_file("tether.toml"), paths.config_dir().join("tether.toml"));
	assert!(paths.config_dir().ends_with("tether"));
}

// --- Client helpers ---

#[test]
fn nothing_running_without_socket() {
	let paths = temp_paths("no-socket");
	assert!(!client::is_running(&paths));
	assert_eq!(client::read_pid(&paths), None);
	match DaemonClient::<Req, Resp>::connect(&paths) {
		Err(ClientError::NotRunning) => {}
		Err(other) => panic!("expected NotRunning, got {:?}", other),
		Ok(_) => panic!("expected error, got Ok"),
	}
	cleanup_paths(&paths);
}

#[test]
fn read_pid_parses_file_and_ignores_garbage() {
	let paths = temp_paths("pid-file");
	std::fs::create_dir_all(paths.state_dir()).unwrap();
	std::fs::write(paths.pid_path(), "12345\n").unwrap();
	assert_eq!(client::read_pid(&paths), Some(12345));
	std::fs::write(paths.pid_path(), "not-a-number").unwrap();
	assert_eq!(client::read_pid(&paths), None);
	cleanup_paths(&paths);
}

#[test]
fn stop_without_pid_file_reports_not_running() {
	let paths = temp_paths("stop-none");
	let daemon = Daemon::new(paths.clone());
	assert!(matches!(daemon.stop(Duration::from_secs(1)), Err(DaemonError::NotRunning)));
	cleanup_paths(&paths);
}

// --- Server ---

#[tokio::test]
async fn server_client_roundtrip() {
	let paths = temp_paths("roundtrip");
	let server = spawn_server(&paths);
	tokio::time::sleep(Duration::from_millis(100)).await;

	let client_paths = paths.clone();
	tokio::task::spawn_blocking(move || {
		let mut client = DaemonClient::<Req, Resp>::connect(&client_paths).unwrap();
		assert_eq!(client.send(&Req::Ping).unwrap(), Resp::Pong);
		assert_eq!(
			client.send(&Req::Status { name: "web".into() }).unwrap(),
			Resp::Status {
				name: "web".into(),
				running: true
			}
		);
	})
	.await
	.unwrap();

	server.abort();
	cleanup_paths(&paths);
}

#[tokio::test]
async fn server_handles_multiple_clients() {
	let paths = temp_paths("multi");
	let server = spawn_server(&paths);
	tokio::time::sleep(Duration::from_millis(100)).await;

	let mut handles = vec![];
	for i in 0..5 {
		let cp = paths.clone();
		handles.push(tokio::task::spawn_blocking(move || {
			let mut client = DaemonClient::<Req, Resp>::connect(&cp).unwrap();
			let name = format!("app{}", i);
			let resp = client.send(&Req::Status { name: name.clone() }).unwrap();
			assert_eq!(resp, Resp::Status { name, running: false });
		}));
	}
	for h in handles {
		h.await.unwrap();
	}

	server.abort();
	cleanup_paths(&paths);
}

#[tokio::test]
async fn malformed_request_gets_error_response() {
	let paths = temp_paths("parse-error");
	let server = spawn_server(&paths);
	tokio::time::sleep(Duration::from_millis(100)).await;

	let client_paths = paths.clone();
	tokio::task::spawn_blocking(move || {
		let mut stream = UnixStream::connect(client_paths.socket_path()).unwrap();
		stream.write_all(b"this is not json\n").unwrap();

		let mut reader = BufReader::new(&stream);
		let mut line = String::new();
		reader.read_line(&mut line).unwrap();

		match serde_json::from_str::<Resp>(&line).unwrap() {
			Resp::Error { message } => assert!(message.contains("invalid request"), "got: {}", message),
			other => panic!("expected Error, got {:?}", other),
		}
	})
	.await
	.unwrap();

	server.abort();
	cleanup_paths(&paths);
}

#[tokio::test]
async fn without_error_callback_bad_lines_are_dropped() {
	let paths = temp_paths("no-error-cb");
	let _ = std::fs::create_dir_all(paths.state_dir());
	let server_paths = paths.clone();
	let server = tokio::spawn(async move {
		tether_ipc::server::run_socket_server(&server_paths, handle).await;
	});
	tokio::time::sleep(Duration::from_millis(100)).await;

	let client_paths = paths.clone();
	tokio::task::spawn_blocking(move || {
		let mut stream = UnixStream::connect(client_paths.socket_path()).unwrap();
		stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

		stream.write_all(b"garbage\n").unwrap();
		let req = serde_json::to_string(&Req::Ping).unwrap();
		stream.write_all(format!("{}\n", req).as_bytes()).unwrap();

		let mut reader = BufReader::new(&stream);
		let mut line = String::new();
		reader.read_line(&mut line).unwrap();
		assert_eq!(serde_json::from_str::<Resp>(&line).unwrap(), Resp::Pong);
	})
	.await
	.unwrap();

	server.abort();
	cleanup_paths(&paths);
}

// --- Daemon ---

#[tokio::test]
async fn daemon_run_serves_until_shutdown_and_cleans_up() {
	let paths = temp_paths("daemon-run");
	let daemon = Daemon::new(paths.clone());
	let shutdown = daemon.shutdown_handle();

	let run = tokio::spawn(async move {
		daemon
			.run(handle, Some(|message: String| Resp::Error { message }))
			.await
	});
	tokio::time::sleep(Duration::from_millis(200)).await;

	assert!(client::is_running(&paths));
	assert_eq!(client::read_pid(&paths), Some(std::process::id()));

	let client_paths = paths.clone();
	tokio::task::spawn_blocking(move || {
		let mut client = DaemonClient::<Req, Resp>::connect(&client_paths).unwrap();
		assert_eq!(client.send(&Req::Ping).unwrap(), Resp::Pong);
	})
	.await
	.unwrap();

	shutdown.notify_one();
	let result = tokio::time::timeout(Duration::from_secs(2), run).await.unwrap().unwrap();
	assert!(result.is_ok());
	assert!(!paths.socket_path().exists());
	assert!(!paths.pid_path().exists());
	cleanup_paths(&paths);
}

#[test]
fn daemon_cleanup_removes_files() {
	let paths = temp_paths("cleanup");
	std::fs::create_dir_all(paths.state_dir()).unwrap();
	std::fs::write(paths.socket_path(), "fake").unwrap();
	std::fs::write(paths.pid_path(), "99999").unwrap();

	Daemon::new(paths.clone()).cleanup();

	assert!(!paths.socket_path().exists());
	assert!(!paths.pid_path().exists());
	cleanup_paths(&paths);
}

#[test]
fn client_error_display() {
	assert_eq!(ClientError::NotRunning.to_string(), "daemon not running");
	assert_eq!(ClientError::Serialize("bad".into()).to_string(), "serialize error: bad");
	assert_eq!(ClientError::Deserialize("bad".into()).to_string(), "deserialize error: bad");
}
