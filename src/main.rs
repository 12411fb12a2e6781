//! artifact-rsyncd: sender-only rsync daemon (protocol 30)
//!
//! Serves published artifacts from a content backend to stock rsync
//! clients, without accepting uploads.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};

mod backend;
mod cli;
mod config;
mod error;
mod heartbeat;
mod protocol;

use backend::{Backend, FsBackend};
use cli::Args;
use config::DaemonConfig;
use protocol::transport::TcpTransport;

#[compio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let config = DaemonConfig::from(&args);
    info!(port = config.listen_port, media_root = %config.media_root.display(), "starting artifact-rsyncd");

    let backend: Arc<dyn Backend> = Arc::new(
        FsBackend::load(&config.modules_file, &config.media_root)
            .await
            .context("loading modules manifest")?,
    );

    compio::runtime::spawn({
        let backend = backend.clone();
        let interval = Duration::from_secs(config.heartbeat_interval_sec);
        async move {
            heartbeat::run(backend, interval).await;
        }
    })
    .detach();

    let listener = compio::net::TcpListener::bind(("0.0.0.0", config.listen_port))
        .await
        .with_context(|| format!("binding TCP listener on port {}", config.listen_port))?;

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };

        let backend = backend.clone();
        compio::runtime::spawn(async move {
            let peer = addr.to_string();
            let transport = TcpTransport::new(stream, peer.clone());
            if let Err(e) = protocol::session::run(backend.as_ref(), transport, &peer).await {
                error!(peer, error = %e, "connection ended with an error");
            }
        })
        .detach();
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let max_level = if args.quiet {
        Level::ERROR
    } else {
        match args.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
