//! Reference `Backend` implementation: a JSON manifest rooted at a
//! filesystem path.

use super::{parse_md5_hex, resolve_under_root, Artifact, ArtifactReader, Backend, Module};
use crate::error::{DaemonError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct ManifestArtifact {
    relative_path: String,
    size: u64,
    mtime_sec: i64,
    #[serde(default)]
    mtime_nsec: u32,
    md5: String,
    /// Path to the bytes under `media_root`; defaults to `relative_path`.
    #[serde(default)]
    file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ManifestModule {
    #[serde(default)]
    gated: bool,
    #[serde(default)]
    artifacts: Vec<ManifestArtifact>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    modules: HashMap<String, ManifestModule>,
}

struct LoadedArtifact {
    artifact: Artifact,
    file: String,
}

struct LoadedModule {
    gated: bool,
    artifacts: Vec<LoadedArtifact>,
}

/// Serves artifacts described by a JSON manifest, with file bytes read
/// from ordinary files under `media_root`.
pub struct FsBackend {
    media_root: PathBuf,
    modules: HashMap<String, LoadedModule>,
}

impl FsBackend {
    /// Load the manifest at `modules_file` and root artifact bytes at
    /// `media_root`.
    pub async fn load(modules_file: &Path, media_root: &Path) -> Result<Self> {
        let raw = compio::fs::read(modules_file)
            .await
            .map_err(DaemonError::Io)?;
        let manifest: Manifest = serde_json::from_slice(&raw)
            .map_err(|e| DaemonError::Backend(format!("invalid modules manifest: {e}")))?;

        let mut modules = HashMap::with_capacity(manifest.modules.len());
        for (name, module) in manifest.modules {
            let mut artifacts = Vec::with_capacity(module.artifacts.len());
            for a in module.artifacts {
                let md5 = parse_md5_hex(&a.md5)?;
                let file = a.file.clone().unwrap_or_else(|| a.relative_path.clone());
                artifacts.push(LoadedArtifact {
                    artifact: Artifact {
                        relative_path: a.relative_path,
                        size: a.size,
                        mtime_sec: a.mtime_sec,
                        mtime_nsec: a.mtime_nsec,
                        md5,
                    },
                    file,
                });
            }
            modules.insert(
                name,
                LoadedModule {
                    gated: module.gated,
                    artifacts,
                },
            );
        }

        Ok(Self {
            media_root: media_root.to_path_buf(),
            modules,
        })
    }
}

#[async_trait]
impl Backend for FsBackend {
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
            .map(|m| m.artifacts.iter().map(|a| a.artifact.clone()).collect())
            .unwrap_or_default())
    }

    async fn open_artifact(
        &self,
        module: &str,
        relative_path: &str,
    ) -> Result<Box<dyn ArtifactReader>> {
        let entry = self
            .modules
            .get(module)
            .and_then(|m| m.artifacts.iter().find(|a| a.artifact.relative_path == relative_path))
            .ok_or_else(|| {
                DaemonError::Backend(format!("no such artifact {relative_path:?} in {module:?}"))
            })?;

        let path = resolve_under_root(&self.media_root, &entry.file)?;
        let file = compio::fs::File::open(&path).await.map_err(DaemonError::Io)?;
        Ok(Box::new(FsArtifactReader { file, pos: 0 }))
    }

    async fn upsert_heartbeat(&self, key: &str) -> Result<()> {
        tracing::debug!(key, "heartbeat (filesystem backend has no liveness table)");
        Ok(())
    }
}

struct FsArtifactReader {
    file: compio::fs::File,
    pos: u64,
}

#[async_trait]
impl ArtifactReader for FsArtifactReader {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        use compio::io::AsyncReadAt;
        let scratch = vec![0u8; buf.len()];
        let (n, scratch) = self.file.read_at(scratch, self.pos).await.into_inner();
        let n = n?;
        buf[..n].copy_from_slice(&scratch[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}
