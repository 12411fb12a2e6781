//! Command-line interface definitions

use clap::Parser;
use std::path::PathBuf;

/// Sender-only rsync daemon (protocol 30) serving published artifacts.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TCP port to listen on
    #[arg(long, default_value = "1234")]
    pub listen_port: u16,

    /// Seconds between heartbeat upserts into the backend
    #[arg(long, default_value = "60")]
    pub heartbeat_interval_secs: u64,

    /// Filesystem root the reference backend resolves artifact bytes under
    #[arg(long, default_value = "/srv/artifacts")]
    pub media_root: PathBuf,

    /// Path to the JSON manifest describing modules and their artifacts
    #[arg(long, default_value = "/srv/artifacts/modules.json")]
    pub modules_file: PathBuf,

    /// Increase log verbosity (repeatable: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log errors only
    #[arg(long)]
    pub quiet: bool,
}
