//! In-memory `Backend` double used by the test suite.

use super::{Artifact, ArtifactReader, Backend, Module};
use crate::error::{DaemonError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

struct StoredModule {
    gated: bool,
    artifacts: Vec<(Artifact, Vec<u8>)>,
}

/// A `Backend` that holds everything in memory, built up with
/// [`MemoryBackend::add_module`]. Used by tests to drive the full session
/// driver without a filesystem fixture.
#[derive(Default)]
pub struct MemoryBackend {
    modules: HashMap<String, StoredModule>,
    heartbeats: Mutex<Vec<String>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module with its artifacts' bytes.
    pub fn add_module(&mut self, name: &str, gated: bool, artifacts: Vec<(Artifact, Vec<u8>)>) {
        self.modules.insert(
            name.to_owned(),
            StoredModule { gated, artifacts },
        );
    }

    /// Heartbeat keys recorded so far, in call order.
    #[must_use]
    pub fn recorded_heartbeats(&self) -> Vec<String> {
        self.heartbeats.lock().expect("heartbeat log poisoned").clone()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn list_module_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get_module(&self, name: &str) -> Result<Option<Module>> {
        Ok(self.modules.get(name).map(|m| Module {
            name: name.to_owned(),
            gated: m.gated,
        }))
    }

    async fn list_artifacts(&self, module: &str) -> Result<Vec<Artifact>> {
        Ok(self
            .modules
            .get(module)
            .map(|m| m.artifacts.iter().map(|(a, _)| a.clone()).collect())
            .unwrap_or_default())
    }

    async fn open_artifact(
        &self,
        module: &str,
        relative_path: &str,
    ) -> Result<Box<dyn ArtifactReader>> {
        let bytes = self
            .modules
            .get(module)
            .and_then(|m| {
                m.artifacts
                    .iter()
                    .find(|(a, _)| a.relative_path == relative_path)
            })
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| {
                DaemonError::Backend(format!("no such artifact {relative_path:?} in {module:?}"))
            })?;
        Ok(Box::new(MemoryArtifactReader { bytes, pos: 0 }))
    }

    async fn upsert_heartbeat(&self, key: &str) -> Result<()> {
        self.heartbeats
            .lock()
            .expect("heartbeat log poisoned")
            .push(key.to_owned());
        Ok(())
    }
}

struct MemoryArtifactReader {
    bytes: Vec<u8>,
    pos: usize,
}

#[async_trait]
impl ArtifactReader for MemoryArtifactReader {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = (self.bytes.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(path: &str, bytes: &[u8]) -> (Artifact, Vec<u8>) {
        (
            Artifact {
                relative_path: path.to_owned(),
                size: bytes.len() as u64,
                mtime_sec: 1_000,
                mtime_nsec: 0,
                md5: md5::compute(bytes).into(),
            },
            bytes.to_vec(),
        )
    }

    #[compio::test]
    async fn open_artifact_reads_registered_bytes() {
        let mut backend = MemoryBackend::new();
        backend.add_module("M", false, vec![artifact("a.txt", b"foo")]);

        let mut reader = backend.open_artifact("M", "a.txt").await.unwrap();
        let mut buf = [0u8; 3];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf, b"foo");
    }

    #[compio::test]
    async fn heartbeat_upserts_are_recorded_in_order() {
        let backend = MemoryBackend::new();
        backend.upsert_heartbeat("rsync-1@host").await.unwrap();
        backend.upsert_heartbeat("rsync-1@host").await.unwrap();
        assert_eq!(
            backend.recorded_heartbeats(),
            vec!["rsync-1@host".to_owned(), "rsync-1@host".to_owned()]
        );
    }

    #[compio::test]
    async fn gated_module_is_still_visible_to_get_module() {
        let mut backend = MemoryBackend::new();
        backend.add_module("secret", true, vec![]);
        let module = backend.get_module("secret").await.unwrap().unwrap();
        assert!(module.gated);
    }
}
