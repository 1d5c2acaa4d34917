//! qme: queue ticket guest runtime and reference ticket authority.

use clap::Parser;
use qme_authority::IssuanceClient;

mod cli;
mod client;
mod cmd_admin;
mod cmd_guest;
mod server;

fn init_tracing() {
    let filter = std::env::var("QME_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);
    let admin = || IssuanceClient::new(client::UnixTransport::new(&socket_path));

    match args.command {
        cli::Command::Authority(opts) => {
            init_tracing();
            tracing::info!("qme authority starting");
            server::run_authority(opts, &socket_path).await?;
        }
        cli::Command::Guest(opts) => {
            init_tracing();
            cmd_guest::cmd_guest(opts, &socket_path).await?;
            // The blocking stdin reader cannot be cancelled; don't wait for it.
            std::process::exit(0);
        }
        cli::Command::NowServing(opts) => {
            let scope = opts.queue.scope()?;
            let out = cmd_admin::now_serving(&admin(), &scope, opts.set.as_deref()).await?;
            println!("{out}");
        }
        cli::Command::Status(opts) => {
            let scope = opts.queue.scope()?;
            println!("{}", cmd_admin::status(&admin(), &scope, opts.json).await?);
        }
        cli::Command::Reset(opts) => {
            let scope = opts.scope()?;
            println!("{}", cmd_admin::reset(&admin(), &scope).await?);
        }
    }

    Ok(())
}
