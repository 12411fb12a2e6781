//! Error handling and types

use thiserror::Error;

/// Everything that can go wrong while [`crate::protocol::session::run`] drives
/// a connection through the daemon protocol.
///
/// Each call site decides for itself what a given error means for the
/// connection; there is no central dispatch on these variants. Handshake
/// rejections (`UnknownCommand`, `UnknownModule`) are already reported to
/// the client over the raw banner by the time they're returned, so
/// `session::run` treats them as a plain close rather than a failure.
/// Everything else propagates up to the caller, who logs it and drops the
/// connection.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer closed connection")]
    ConnectionClosedByPeer,

    #[error("client sent MSG_ERROR_EXIT")]
    ClientErrorExit,

    #[error("unknown daemon command {0:?}")]
    UnknownCommand(String),

    #[error("unknown module {0:?}")]
    UnknownModule(String),

    #[error("argument parse failure: {0}")]
    ArgumentParse(String),

    #[error("negative block-transfer index is not supported")]
    NegativeIndex,

    #[error("invalid block-transfer index {0}")]
    InvalidIndex(i64),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("protocol framing error: {0}")]
    Framing(String),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
