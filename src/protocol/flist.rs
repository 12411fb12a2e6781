//! File-list synthesis: turn a flat namespace of artifact relative paths
//! into the directory/file entries a request actually names.
//!
//! The source stores directories and files in one mapping by stuffing a
//! float (mtime) for directories and a domain object for files. Here that
//! becomes a tagged [`Entry`] enum carried in a single, later-sorted
//! `Vec`.

use crate::backend::{Artifact, Backend};
use crate::error::Result;
use crate::protocol::filters::{is_excluded, FilterRule};
use crate::protocol::mux;
use crate::protocol::mux::MuxReader;
use crate::protocol::transport::Transport;
use std::collections::HashMap;

pub const DIRECTORY_MODE: u32 = 0o040_755;
pub const FILE_MODE: u32 = 0o100_644;
pub const DIRECTORY_SIZE: u64 = 4096;

/// One entry in the file list actually sent to the client.
#[derive(Debug, Clone)]
pub enum Entry {
    Directory {
        name: String,
        mtime_sec: i64,
        mtime_nsec: u32,
    },
    File {
        name: String,
        artifact: Artifact,
    },
}

impl Entry {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Directory { name, .. } | Self::File { name, .. } => name,
        }
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }

    #[must_use]
    pub fn mtime_sec(&self) -> i64 {
        match self {
            Self::Directory { mtime_sec, .. } => *mtime_sec,
            Self::File { artifact, .. } => artifact.mtime_sec,
        }
    }

    #[must_use]
    pub fn mtime_nsec(&self) -> u32 {
        match self {
            Self::Directory { mtime_nsec, .. } => *mtime_nsec,
            Self::File { artifact, .. } => artifact.mtime_nsec,
        }
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        match self {
            Self::Directory { .. } => DIRECTORY_SIZE,
            Self::File { artifact, .. } => artifact.size,
        }
    }

    #[must_use]
    pub fn mode(&self) -> u32 {
        match self {
            Self::Directory { .. } => DIRECTORY_MODE,
            Self::File { .. } => FILE_MODE,
        }
    }
}

fn mtime_key(sec: i64, nsec: u32) -> i128 {
    i128::from(sec) * 1_000_000_000 + i128::from(nsec)
}

fn unkey(key: i128) -> (i64, u32) {
    ((key / 1_000_000_000) as i64, (key.rem_euclid(1_000_000_000)) as u32)
}

fn fold_min(dirs: &mut HashMap<String, i128>, name: String, key: i128) {
    dirs.entry(name)
        .and_modify(|existing| *existing = (*existing).min(key))
        .or_insert(key);
}

/// Synthesize the ordered file list for one request.
///
/// `request_path` is already resolved relative to the module (module name
/// prefix stripped), except for the one case where the client asked for
/// the module root without a trailing slash, in which case callers pass
/// the bare module name through unchanged so the collapse rule in step 5
/// below names the single resulting directory entry correctly.
pub async fn synthesize<T: Transport>(
    reader: &mut MuxReader<T>,
    backend: &dyn Backend,
    module: &str,
    request_path: &str,
    recursive: bool,
    filters: &[FilterRule],
) -> Result<Vec<Entry>> {
    let artifacts = backend.list_artifacts(module).await?;

    // Step 1: an exact artifact match is always a single file, never a
    // directory listing.
    if let Some(artifact) = artifacts.iter().find(|a| a.relative_path == request_path) {
        return Ok(vec![Entry::File {
            name: request_path.to_owned(),
            artifact: artifact.clone(),
        }]);
    }

    // Step 2: normalize the directory prefix we're matching against.
    let q = if request_path.is_empty() || request_path.ends_with('/') {
        request_path.to_owned()
    } else {
        format!("{request_path}/")
    };

    // Step 3: bucket every artifact under Q into direct children or
    // nested directories (folding each directory's mtime to the minimum
    // of its descendants as we go).
    let mut dirs: HashMap<String, i128> = HashMap::new();
    let mut files: HashMap<String, Artifact> = HashMap::new();
    for artifact in &artifacts {
        let Some(tail) = artifact.relative_path.strip_prefix(q.as_str()) else {
            continue;
        };
        let key = mtime_key(artifact.mtime_sec, artifact.mtime_nsec);

        match tail.rfind('/') {
            None => {
                files.insert(tail.to_owned(), artifact.clone());
            }
            Some(lastsep) => {
                let subdirs: Vec<&str> = tail[..lastsep].split('/').collect();
                fold_min(&mut dirs, subdirs[0].to_owned(), key);
                if recursive {
                    let mut acc = subdirs[0].to_owned();
                    for part in &subdirs[1..] {
                        acc.push('/');
                        acc.push_str(part);
                        fold_min(&mut dirs, acc.clone(), key);
                    }
                    files.insert(tail.to_owned(), artifact.clone());
                }
            }
        }
    }

    // Step 4: nothing under Q means the request doesn't resolve.
    if dirs.is_empty() && files.is_empty() {
        mux::send_error(
            reader.transport_mut(),
            &format!(
                "rsync: link_stat \"/{request_path}\" (in {module}) failed: No such file or directory (2)"
            ),
        )
        .await?;
        return Ok(Vec::new());
    }

    let dir_min = dirs.values().copied().min();
    let file_min = files
        .values()
        .map(|a| mtime_key(a.mtime_sec, a.mtime_nsec))
        .min();
    let dot_key = match (dir_min, file_min) {
        (Some(d), Some(f)) => d.min(f),
        (Some(d), None) => d,
        (None, Some(f)) => f,
        (None, None) => unreachable!("guarded above: dirs and files can't both be empty"),
    };
    dirs.insert(".".to_owned(), dot_key);

    // Step 5: a bare (non-trailing-slash) request collapses to a single
    // directory entry named after the request itself.
    let (dirs, files) = if !request_path.is_empty() && !request_path.ends_with('/') {
        let mut collapsed = HashMap::new();
        collapsed.insert(request_path.to_owned(), dot_key);
        (collapsed, HashMap::new())
    } else {
        (dirs, files)
    };

    let mut entries = Vec::with_capacity(dirs.len() + files.len());

    for (name, key) in dirs {
        let candidate = format!("{name}/");
        if is_excluded(filters, &candidate) {
            continue;
        }
        if name.len() > 255 {
            mux::send_error(reader.transport_mut(), "No long path support! Files are missing!")
                .await?;
            continue;
        }
        let (mtime_sec, mtime_nsec) = unkey(key);
        entries.push(Entry::Directory {
            name,
            mtime_sec,
            mtime_nsec,
        });
    }

    for (name, artifact) in files {
        if is_excluded(filters, &name) {
            continue;
        }
        if name.len() > 255 {
            mux::send_error(reader.transport_mut(), "No long path support! Files are missing!")
                .await?;
            continue;
        }
        entries.push(Entry::File { name, artifact });
    }

    entries.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(entries)
}
