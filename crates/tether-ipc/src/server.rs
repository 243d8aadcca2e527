use std::future::Future;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::paths::DaemonPaths;

/// Builds a response for a line that did not parse as a request.
pub type ErrorHandler<Resp> = fn(String) -> Resp;

/// Bind the daemon socket and serve requests until the task is dropped.
/// Malformed lines are logged and skipped.
pub async fn run_socket_server<Req, Resp, F, Fut>(paths: &DaemonPaths, handler: F)
where
	Req: DeserializeOwned + Send + 'static,
	Resp: Serialize + Send + 'static,
	F: Fn(Req) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Resp> + Send,
{
	run_socket_server_with_error(paths, handler, None::<ErrorHandler<Resp>>).await
}

/// Like [`run_socket_server`], but a malformed line is answered with
/// `on_error("invalid request: ...")` instead of being dropped.
pub async fn run_socket_server_with_error<Req, Resp, F, Fut, E>(
	paths: &DaemonPaths,
	handler: F,
	on_error: Option<E>,
) where
	Req: DeserializeOwned + Send + 'static,
	Resp: Serialize + Send + 'static,
	F: Fn(Req) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Resp> + Send,
	E: Fn(String) -> Resp + Send + Sync + 'static,
{
	let socket_path = paths.socket_path();
	let listener = match UnixListener::bind(&socket_path) {
		Ok(l) => l,
		Err(e) => {
			tracing::error!("failed to bind socket {}: {}", socket_path.display(), e);
			return;
		}
	};
	tracing::info!("listening on {}", socket_path.display());
	serve(listener, handler, on_error).await
}

/// Accept loop over an already bound listener. One task per connection.
pub async fn serve<Req, Resp, F, Fut, E>(listener: UnixListener, handler: F, on_error: Option<E>)
where
	Req: DeserializeOwned + Send + 'static,
	Resp: Serialize + Send + 'static,
	F: Fn(Req) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Resp> + Send,
	E: Fn(String) -> Resp + Send + Sync + 'static,
{
	let handler = Arc::new(handler);
	let on_error = on_error.map(Arc::new);

	loop {
		let (stream, _) = match listener.accept().await {
			Ok(s) => s,
			Err(e) => {
				tracing::error!("accept error: {}", e);
				continue;
			}
		};

		let handler = Arc::clone(&handler);
		let on_error = on_error.clone();
		tokio::spawn(async move {
			handle_connection(stream, handler, on_error).await;
		});
	}
}

async fn handle_connection<Req, Resp, F, Fut, E>(
	stream: UnixStream,
	handler: Arc<F>,
	on_error: Option<Arc<E>>,
) where
	Req: DeserializeOwned + Send + 'static,
	Resp: Serialize + Send + 'static,
	F: Fn(Req) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Resp> + Send,
	E: Fn(String) -> Resp + Send + Sync + 'static,
{
	let (reader, mut writer) = stream.into_split();
	let mut lines = BufReader::new(reader).lines();

	while let Ok(Some(line)) = lines.next_line().await {
		if line.trim().is_empty() {
			continue;
		}
		let response = match serde_json::from_str::<Req>(&line) {
			Ok(request) => handler(request).await,
			Err(e) => {
				tracing::warn!("invalid request: {}", e);
				match &on_error {
					Some(on_error) => on_error(format!("invalid request: {}", e)),
					None => continue,
				}
			}
		};

		let mut data = match serde_json::to_vec(&response) {
			Ok(d) => d,
			Err(e) => {
				tracing::error!("failed to serialize response: {}", e);
				continue;
			}
		};
		data.push(b'\n');

		if writer.write_all(&data).await.is_err() {
			break;
		}
	}
}
