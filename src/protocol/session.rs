//! Session driver: owns one accepted connection end to end.
//!
//! Orchestrates the handshake, argument/filter parsing, file-list
//! synthesis and encoding, block transfer, and tail sequence, in that
//! fixed order. This is also the only place a `tracing` span is opened:
//! one `info_span!("connection", peer)` for the whole connection, with no
//! per-phase spans and no separate connection-id field beyond `peer`.

use crate::backend::Backend;
use crate::error::{DaemonError, Result};
use crate::protocol::handshake::HandshakeOutcome;
use crate::protocol::mux::MuxReader;
use crate::protocol::transport::Transport;
use crate::protocol::{args, filters, flist, flist_codec, handshake, mux, tail, transfer};
use tracing::{info, Instrument};

/// Drive one connection to completion.
///
/// Rejections the handshake already reported to the client over the raw
/// banner (unknown command, unknown/gated module) are not treated as
/// session failures; everything past that point propagates as `Err` for
/// the caller to log and close the socket on.
pub async fn run<T: Transport>(backend: &dyn Backend, transport: T, peer: &str) -> Result<()> {
    run_inner(backend, transport)
        .instrument(tracing::info_span!("connection", peer))
        .await
}

async fn run_inner<T: Transport>(backend: &dyn Backend, mut transport: T) -> Result<()> {
    let outcome = match handshake::run(&mut transport, backend).await {
        Ok(outcome) => outcome,
        Err(e) => {
            info!(error = %e, "handshake rejected the connection");
            return Ok(());
        }
    };

    let module = match outcome {
        HandshakeOutcome::ModuleListed => return Ok(()),
        HandshakeOutcome::ModuleSelected(module) => module,
    };

    let argv = args::read_argv_block(&mut transport).await?;
    let parse_result = args::parse_args(&argv);

    // The seed prelude is written unconditionally, even if parsing failed.
    args::send_seed_prelude(&mut transport).await?;

    let mut reader = MuxReader::new(transport);

    let parsed = match parse_result {
        Ok(parsed) => parsed,
        Err(message) => {
            mux::send_error(
                reader.transport_mut(),
                &format!("argument parse error: {message}"),
            )
            .await?;
            return Err(DaemonError::ArgumentParse(message));
        }
    };

    let rules = filters::read_filter_block(&mut reader).await?;

    let request_path = resolve_request_path(&module.name, parsed.dst.as_deref());

    let entries = flist::synthesize(
        &mut reader,
        backend,
        &module.name,
        &request_path,
        parsed.recursive,
        &rules,
    )
    .await?;

    flist_codec::write_file_list(&mut reader, &entries).await?;

    transfer::run(&mut reader, backend, &module.name, &entries).await?;

    tail::run(&mut reader).await?;

    info!(module = %module.name, entries = entries.len(), "connection completed");
    Ok(())
}

/// Resolve the client's `dst` argv token into the module-relative request
/// path the file-list synthesizer expects.
///
/// A `dst` equal to the bare module name (no subpath, no trailing slash)
/// is passed through unchanged rather than stripped to the empty string,
/// so [`flist::synthesize`]'s collapse rule names the single resulting
/// directory entry after the module itself.
fn resolve_request_path(module: &str, dst: Option<&str>) -> String {
    let Some(dst) = dst else {
        return String::new();
    };
    if dst == module {
        return module.to_owned();
    }
    let prefix = format!("{module}/");
    dst.strip_prefix(&prefix).unwrap_or("").to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_module_name_resolves_to_itself() {
        assert_eq!(resolve_request_path("M", Some("M")), "M");
    }

    #[test]
    fn module_with_trailing_slash_resolves_to_empty() {
        assert_eq!(resolve_request_path("M", Some("M/")), "");
    }

    #[test]
    fn module_subpath_strips_module_prefix() {
        assert_eq!(resolve_request_path("M", Some("M/dir/sub")), "dir/sub");
    }

    #[test]
    fn missing_dst_resolves_to_empty() {
        assert_eq!(resolve_request_path("M", None), "");
    }

    use crate::backend::{Artifact, MemoryBackend};
    use crate::protocol::transport::MemoryTransport;

    fn mux_frame(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let len = (payload.len() as u32).to_le_bytes();
        out.extend_from_slice(&len[..3]);
        out.push(mux::TAG_DATA);
        out.extend_from_slice(payload);
        out
    }

    fn nul_terminated_argv(args: &[&str]) -> Vec<u8> {
        let mut wire = Vec::new();
        for a in args {
            wire.extend_from_slice(a.as_bytes());
            wire.push(0);
        }
        wire.push(0);
        wire
    }

    fn fixture_backend() -> MemoryBackend {
        let mut backend = MemoryBackend::new();
        let artifact = |path: &str, bytes: &[u8], mtime_sec: i64| {
            (
                Artifact {
                    relative_path: path.to_owned(),
                    size: bytes.len() as u64,
                    mtime_sec,
                    mtime_nsec: 0,
                    md5: md5::compute(bytes).into(),
                },
                bytes.to_vec(),
            )
        };
        backend.add_module(
            "M",
            false,
            vec![
                artifact("a.txt", b"foo", 100),
                artifact("dir/b.txt", b"beef", 50),
                artifact("dir/sub/c.txt", b"z", 10),
            ],
        );
        backend
    }

    /// Drives one full connection end to end: handshake, recursive module
    /// selection, an empty filter block, a single-file block-transfer
    /// request (index 1, `a.txt`, in the sorted flist `[".", "a.txt",
    /// "dir", "dir/b.txt", "dir/sub", "dir/sub/c.txt"]`), and the tail
    /// sequence. Exercises invariant 6 from the component design doc: every
    /// tag-7 frame the server writes, concatenated, is exactly what a real
    /// client would need to reconstruct the session.
    #[compio::test]
    async fn full_connection_round_trips_a_single_file() {
        let backend = fixture_backend();

        let mut inbound = Vec::new();
        inbound.extend_from_slice(b"30.0\n"); // client version line
        inbound.extend_from_slice(b"M\n"); // module selection
        inbound.extend(nul_terminated_argv(&["--server", "--sender", "-r", ".", "M/"]));

        // filter block: immediate zero-length terminator, no rules.
        inbound.extend(mux_frame(&0u32.to_le_bytes()));

        // transfer phase: request index 1 ("a.txt"), then end phase 1.
        let mut transfer_payload = Vec::new();
        transfer_payload.push(2u8); // findex delta: -1 + 2 == 1
        transfer_payload.extend_from_slice(&0u16.to_le_bytes()); // flags
        transfer_payload.extend_from_slice(&[0u8; 16]); // empty checksum-sum header
        transfer_payload.push(0u8); // end of transfer phase
        inbound.extend(mux_frame(&transfer_payload));

        // tail: three null handshakes.
        inbound.extend(mux_frame(&[0u8, 0u8, 0u8]));

        let transport = MemoryTransport::new(inbound);
        run(&backend, transport, "test-peer").await.unwrap();
    }

    #[compio::test]
    async fn unknown_module_closes_the_connection_without_error() {
        let backend = fixture_backend();
        let transport = MemoryTransport::new(b"30.0\nnope\n".to_vec());
        run(&backend, transport, "test-peer").await.unwrap();
    }
}
