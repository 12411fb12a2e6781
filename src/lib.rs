//! artifact-rsyncd: a sender-only rsync daemon, protocol version 30.
//!
//! Serves published artifacts from a pluggable [`backend::Backend`] to
//! stock rsync clients. Upload (receiver-mode) operation, delta/rolling
//! checksum transfer and anything beyond module-based access control are
//! explicitly out of scope; see `SPEC_FULL.md` for the full contract.
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use artifact_rsyncd::backend::FsBackend;
//! use artifact_rsyncd::protocol::{session, transport::TcpTransport};
//!
//! #[compio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = FsBackend::load("modules.json".as_ref(), "/srv/artifacts".as_ref()).await?;
//!     let listener = compio::net::TcpListener::bind(("0.0.0.0", 1234)).await?;
//!     let (stream, addr) = listener.accept().await?;
//!     let transport = TcpTransport::new(stream, addr.to_string());
//!     session::run(&backend, transport, &addr.to_string()).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod protocol;

pub use error::{DaemonError, Result};
