//! Daemon handshake: banner exchange and module selection.
//!
//! ```text
//! INIT --send "@RSYNCD: 30.0"--> AWAIT_VER
//! AWAIT_VER --recv line--> AWAIT_CMD          (discard banner)
//! AWAIT_CMD:
//!    cmd == "" or "#list" -> send module list, close
//!    cmd[0] == '#'        -> send "@ERROR: Unknown command '<cmd>'", close
//!    cmd looks up a module:
//!        not found or gated -> send "@ERROR: Unknown module '<cmd>'", close
//!        found, ungated     -> send "@RSYNCD: OK", enter SETUP
//! ```
//!
//! All banner lines are LF-terminated ASCII.

use crate::backend::{Backend, Module};
use crate::error::{DaemonError, Result};
use crate::protocol::transport::{read_line, write_all, Transport};
use tracing::info;

/// Protocol version this daemon speaks. Only version 30 is supported.
pub const PROTOCOL_VERSION_LINE: &str = "@RSYNCD: 30.0";

/// Outcome of a completed handshake.
pub enum HandshakeOutcome {
    /// The client asked to list modules; the connection is already closed.
    ModuleListed,
    /// The client selected a module and the daemon replied `OK`.
    ModuleSelected(Module),
}

/// Drive the handshake state machine to completion.
///
/// On `ModuleListed` or any rejection, the caller should simply drop the
/// connection; this function has already written the closing banner line.
pub async fn run<T: Transport + ?Sized>(
    transport: &mut T,
    backend: &dyn Backend,
) -> Result<HandshakeOutcome> {
    write_all(transport, format!("{PROTOCOL_VERSION_LINE}\n").as_bytes()).await?;

    // AWAIT_VER: the client's own version line, discarded.
    let client_version = read_line(transport).await?;
    info!(client_version, "received client version banner");

    let cmd = read_line(transport).await?;

    if cmd.is_empty() || cmd == "#list" {
        send_module_list(transport, backend).await?;
        return Ok(HandshakeOutcome::ModuleListed);
    }

    if cmd.starts_with('#') {
        write_all(
            transport,
            format!("@ERROR: Unknown command '{cmd}'\n").as_bytes(),
        )
        .await?;
        return Err(DaemonError::UnknownCommand(cmd));
    }

    match backend.get_module(&cmd).await? {
        Some(module) if !module.gated => {
            write_all(transport, b"@RSYNCD: OK\n").await?;
            Ok(HandshakeOutcome::ModuleSelected(module))
        }
        _ => {
            // Gated and missing modules are rejected identically so a
            // client can't tell the difference between "no such module"
            // and "module exists but you can't see it".
            write_all(
                transport,
                format!("@ERROR: Unknown module '{cmd}'\n").as_bytes(),
            )
            .await?;
            Err(DaemonError::UnknownModule(cmd))
        }
    }
}

async fn send_module_list<T: Transport + ?Sized>(
    transport: &mut T,
    backend: &dyn Backend,
) -> Result<()> {
    for name in backend.list_module_names().await? {
        write_all(transport, format!("{name}\t\n").as_bytes()).await?;
    }
    write_all(transport, b"@RSYNCD: EXIT\n").await
}
