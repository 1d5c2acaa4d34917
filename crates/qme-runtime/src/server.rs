//! UDS JSON-RPC server for the reference authority.
//! Connection-per-request, newline-delimited JSON. The `subscribe` method
//! keeps its connection open and streams row changes, one per line.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use qme_authority::{
    AuthorityError, AuthorityState, LocalTransport, PersistedState, ReplyFormat, RpcMethod,
    RpcTransport,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::broadcast::error::RecvError;

use crate::cli::AuthorityOpts;
use crate::client::SUBSCRIBE_METHOD;

/// Run the authority daemon until ctrl-c or SIGTERM.
pub async fn run_authority(opts: AuthorityOpts, socket_path: &str) -> anyhow::Result<()> {
    let format = if opts.legacy_replies {
        ReplyFormat::Legacy
    } else {
        ReplyFormat::Structured
    };
    let state_file = opts.state_file.map(StateFile::new);
    let state = match &state_file {
        Some(file) => AuthorityState::from_persisted(load_state(file.path()), format),
        None => AuthorityState::new(format),
    };
    let authority = LocalTransport::new(state);

    let server_socket = socket_path.to_string();
    let server_authority = authority.clone();
    let server_state_file = state_file.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = run_server(&server_socket, server_authority, server_state_file).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        _ = server_handle => {
            tracing::warn!("server exited unexpectedly");
        }
    }

    if let Some(file) = &state_file {
        file.save(&authority);
    }
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("authority stopped");
    Ok(())
}

/// Accept connections on `socket_path` and answer them from `authority`.
pub async fn run_server(
    socket_path: &str,
    authority: LocalTransport,
    state_file: Option<StateFile>,
) -> anyhow::Result<()> {
    // Create socket directory with mode 0700
    let socket_dir = Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another authority is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("authority listening on {socket_path}");

    loop {
        let (stream, _) = listener.accept().await?;
        let authority = authority.clone();
        let state_file = state_file.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, authority, state_file).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: tokio::net::UnixStream,
    authority: LocalTransport,
    state_file: Option<StateFile>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let request: Value = serde_json::from_str(line.trim())?;
    let method = request["method"].as_str().unwrap_or("");
    let id = request["id"].clone();

    if method == SUBSCRIBE_METHOD {
        return stream_changes(&authority, writer).await;
    }

    let params = request.get("params").cloned().unwrap_or(Value::Null);
    let response = match authority.call(method, params).await {
        Ok(result) => {
            let mutated = RpcMethod::parse(method).is_some_and(|(m, _)| m.is_mutation());
            if let (true, Some(file)) = (mutated, &state_file) {
                file.save(&authority);
            }
            serde_json::json!({
                "jsonrpc": "2.0",
                "result": result,
                "id": id,
            })
        }
        Err(e) => {
            tracing::debug!("{method} failed: {e}");
            error_response(&e, id)
        }
    };
    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;

    Ok(())
}

fn error_response(error: &AuthorityError, id: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "error": {"code": error.code(), "message": error.to_string()},
        "id": id,
    })
}

async fn stream_changes(authority: &LocalTransport, mut writer: OwnedWriteHalf) -> anyhow::Result<()> {
    let Some(mut changes) = authority.subscribe() else {
        return Ok(());
    };
    loop {
        match changes.recv().await {
            Ok(change) => {
                let mut line = serde_json::to_string(&change)?;
                line.push('\n');
                writer.write_all(line.as_bytes()).await?;
            }
            Err(RecvError::Lagged(n)) => tracing::debug!("subscriber lagged by {n} changes"),
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

// ─── State file ──────────────────────────────────────────────────────

/// The authority's state file, shared by every connection. Each save takes
/// its snapshot under the lock, so the newest state is written last.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl StateFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, authority: &LocalTransport) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        save_state(&self.path, &authority.with_state(|s| s.persisted()));
    }
}

/// Best-effort load; a missing or unreadable file starts from scratch.
pub(crate) fn load_state(path: &Path) -> PersistedState {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!("ignoring unreadable state file {}: {e}", path.display());
            PersistedState::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
        Err(e) => {
            tracing::warn!("cannot read state file {}: {e}", path.display());
            PersistedState::default()
        }
    }
}

/// Best-effort save through a temp file and rename.
pub(crate) fn save_state(path: &Path, state: &PersistedState) {
    let result = serde_json::to_vec_pretty(state)
        .map_err(std::io::Error::other)
        .and_then(|bytes| {
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, bytes)?;
            std::fs::rename(&tmp, path)
        });
    if let Err(e) = result {
        tracing::warn!("cannot save state file {}: {e}", path.display());
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
