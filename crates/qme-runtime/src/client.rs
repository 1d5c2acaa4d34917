//! UDS JSON-RPC transport to the authority daemon.
//!
//! One connection per request, newline-delimited JSON. Push is a separate
//! long-lived `subscribe` connection streaming one row change per line;
//! it reconnects in the background until nobody listens anymore.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use qme_authority::{AuthorityError, RowChange, RpcTransport};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::broadcast;

const PUSH_CAPACITY: usize = 256;
const PUSH_RETRY: Duration = Duration::from_secs(2);

pub(crate) const SUBSCRIBE_METHOD: &str = "subscribe";

pub(crate) async fn rpc_call(
    socket_path: &Path,
    method: &str,
    params: Value,
) -> Result<Value, AuthorityError> {
    let stream = UnixStream::connect(socket_path).await.map_err(|e| {
        AuthorityError::Transport(format!(
            "cannot connect to authority at {}: {e}",
            socket_path.display()
        ))
    })?;

    let (reader, mut writer) = stream.into_split();

    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    if line.trim().is_empty() {
        return Err(AuthorityError::Transport("authority closed the connection".into()));
    }

    let response: Value = serde_json::from_str(line.trim())?;
    if let Some(error) = response.get("error") {
        return Err(AuthorityError::Rpc {
            code: error["code"].as_i64().unwrap_or(qme_authority::error::CODE_GENERIC),
            message: error["message"].as_str().unwrap_or("unknown error").to_string(),
        });
    }

    Ok(response["result"].clone())
}

#[derive(Debug)]
pub struct UnixTransport {
    socket_path: PathBuf,
    push: broadcast::Sender<RowChange>,
    push_started: Arc<AtomicBool>,
}

impl UnixTransport {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        let (push, _) = broadcast::channel(PUSH_CAPACITY);
        Self {
            socket_path: socket_path.into(),
            push,
            push_started: Arc::new(AtomicBool::new(false)),
        }
    }

    fn start_push(&self) {
        if self.push_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.push_started.store(false, Ordering::Release);
            return;
        };
        let socket_path = self.socket_path.clone();
        let push = self.push.clone();
        let started = Arc::clone(&self.push_started);
        handle.spawn(async move {
            while push.receiver_count() > 0 {
                if let Err(e) = stream_changes(&socket_path, &push).await {
                    tracing::debug!("push stream ended: {e}");
                }
                tokio::time::sleep(PUSH_RETRY).await;
            }
            started.store(false, Ordering::Release);
        });
    }
}

/// Read row changes off one `subscribe` connection until it closes.
async fn stream_changes(
    socket_path: &Path,
    push: &broadcast::Sender<RowChange>,
) -> Result<(), AuthorityError> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| AuthorityError::Transport(e.to_string()))?;
    let (reader, mut writer) = stream.into_split();
    let request = serde_json::json!({"jsonrpc": "2.0", "method": SUBSCRIBE_METHOD, "id": 1});
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        match serde_json::from_str::<RowChange>(line.trim()) {
            Ok(change) => {
                if push.send(change).is_err() {
                    break;
                }
            }
            Err(e) => tracing::debug!("ignoring push line: {e}"),
        }
    }
    Ok(())
}

impl RpcTransport for UnixTransport {
    fn call(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, AuthorityError>> + Send {
        rpc_call(&self.socket_path, method, params)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<RowChange>> {
        let rx = self.push.subscribe();
        self.start_push();
        Some(rx)
    }
}
