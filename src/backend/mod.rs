//! The content-object store this daemon serves artifacts from.
//!
//! `Backend` is the seam between the protocol engine and whatever actually
//! owns published artifacts. The one implementation that ships for real use
//! is [`FsBackend`], a reference implementation driven by a JSON manifest
//! rooted at a filesystem path. A second, test-only implementation,
//! `MemoryBackend`, is compiled in under `#[cfg(test)]` so the session
//! driver can run end to end without a filesystem fixture; it is not part
//! of the public API.

mod fs_backend;
#[cfg(test)]
mod memory_backend;

pub use fs_backend::FsBackend;
#[cfg(test)]
pub use memory_backend::MemoryBackend;

use crate::error::{DaemonError, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// A named view onto a set of artifacts.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub gated: bool,
}

/// An immutable, fully-materialized file published under a module.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Slash-separated, no leading slash.
    pub relative_path: String,
    pub size: u64,
    pub mtime_sec: i64,
    pub mtime_nsec: u32,
    pub md5: [u8; 16],
}

/// A byte stream for one artifact's contents, read in order.
#[async_trait]
pub trait ArtifactReader: Send {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// The external content-object store the daemon serves from.
///
/// Implementations are shared across connections (`Arc<dyn Backend>`) and
/// must be safe to query concurrently; nothing here is mutable except the
/// heartbeat upsert, which is expected to be independently safe for
/// concurrent callers (a single process-scoped heartbeat task and,
/// incidentally, any number of connection tasks).
#[async_trait]
pub trait Backend: Send + Sync {
    /// All module names this backend knows about, in a stable order.
    async fn list_module_names(&self) -> Result<Vec<String>>;

    /// Look up a module by name. `Ok(None)` means "no such module" and is
    /// handled identically to a gated module by the handshake: both refuse
    /// without distinguishing the reason to the client.
    async fn get_module(&self, name: &str) -> Result<Option<Module>>;

    /// All artifacts published under `module`. The core filters this by
    /// `relative_path` prefix itself; a real backend may choose to push
    /// prefix filtering down to its own index, but is not required to.
    async fn list_artifacts(&self, module: &str) -> Result<Vec<Artifact>>;

    /// Open a byte stream for one artifact's contents.
    async fn open_artifact(
        &self,
        module: &str,
        relative_path: &str,
    ) -> Result<Box<dyn ArtifactReader>>;

    /// Record that this process is alive, under `key`.
    async fn upsert_heartbeat(&self, key: &str) -> Result<()>;
}

/// Parse a lowercase hex-encoded MD5 digest into its 16 raw bytes.
pub(crate) fn parse_md5_hex(hex: &str) -> Result<[u8; 16]> {
    if hex.len() != 32 {
        return Err(DaemonError::Backend(format!(
            "md5 {hex:?} is not 32 hex characters"
        )));
    }
    let mut out = [0u8; 16];
    for (i, chunk) in out.iter_mut().enumerate() {
        let byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|e| DaemonError::Backend(format!("md5 {hex:?} invalid: {e}")))?;
        *chunk = byte;
    }
    Ok(out)
}

/// Resolve a manifest-relative file path against the backend's media root,
/// rejecting any component that would escape it.
pub(crate) fn resolve_under_root(root: &std::path::Path, relative: &str) -> Result<PathBuf> {
    use std::path::Component;
    let candidate = std::path::Path::new(relative);
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
    {
        return Err(DaemonError::Backend(format!(
            "refusing to resolve path outside media root: {relative:?}"
        )));
    }
    Ok(root.join(candidate))
}
