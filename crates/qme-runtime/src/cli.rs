//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use qme_core::QueueScope;

#[derive(Parser)]
#[command(name = "qme", about = "queue ticket guest runtime")]
pub struct Cli {
    /// Authority socket path (default: $XDG_RUNTIME_DIR/qme/authority.sock)
    #[arg(long, short = 's', global = true, env = "QME_SOCKET")]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve the reference ticket authority
    Authority(AuthorityOpts),
    /// Run guest tabs sharing one storage profile
    Guest(GuestOpts),
    /// Show or set "now serving"
    NowServing(NowServingOpts),
    /// Queue counts and last issued number
    Status(StatusOpts),
    /// Forget every ticket of a queue and restart numbering
    Reset(QueueOpts),
}

#[derive(clap::Args)]
pub struct AuthorityOpts {
    /// Where counters and "now serving" survive restarts
    #[arg(long, env = "QME_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Answer claims with bare integers (legacy backend)
    #[arg(long)]
    pub legacy_replies: bool,
}

#[derive(clap::Args)]
pub struct GuestOpts {
    #[command(flatten)]
    pub queue: QueueOpts,

    /// Number of tabs to open
    #[arg(long, default_value = "1")]
    pub tabs: usize,

    /// Persist the storage profile here (default: in memory)
    #[arg(long, env = "QME_PROFILE_DIR")]
    pub profile_dir: Option<PathBuf>,

    /// Poll interval in milliseconds
    #[arg(long, default_value = "2000")]
    pub poll_interval_ms: u64,
}

#[derive(clap::Args)]
pub struct NowServingOpts {
    #[command(flatten)]
    pub queue: QueueOpts,

    /// New value; non-numeric or non-positive input stores 1
    #[arg(long, allow_hyphen_values = true)]
    pub set: Option<String>,
}

#[derive(clap::Args)]
pub struct StatusOpts {
    #[command(flatten)]
    pub queue: QueueOpts,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Default)]
pub struct QueueOpts {
    /// Queue id; omit for the legacy single queue
    #[arg(long, short = 'q')]
    pub queue: Option<String>,
}

impl QueueOpts {
    pub fn scope(&self) -> anyhow::Result<QueueScope> {
        match self.queue.as_deref() {
            None => Ok(QueueScope::Legacy),
            Some(id) => Ok(QueueScope::queue(id)?),
        }
    }
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/qme/authority.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/qme-{user}/authority.sock")
}
