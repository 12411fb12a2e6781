//! Process-scoped liveness heartbeat.
//!
//! Independent of any connection: upserts a record into the backend under
//! `rsync-<pid>@<hostname>` on a fixed interval until the process exits.

use crate::backend::Backend;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Build this process's heartbeat key.
#[must_use]
pub fn heartbeat_key() -> String {
    let pid = std::process::id();
    let hostname = hostname();
    format!("rsync-{pid}@{hostname}")
}

fn hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_owned())
}

/// Run the heartbeat loop forever, upserting every `interval`.
///
/// Intended to be spawned as its own task at process scope; cancelling
/// that task (e.g. at shutdown) is the only way this returns early.
pub async fn run(backend: Arc<dyn Backend>, interval: Duration) {
    let key = heartbeat_key();
    loop {
        match backend.upsert_heartbeat(&key).await {
            Ok(()) => debug!(key, "heartbeat upserted"),
            Err(e) => warn!(key, error = %e, "heartbeat upsert failed"),
        }
        compio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_key_has_expected_shape() {
        let key = heartbeat_key();
        assert!(key.starts_with("rsync-"));
        assert!(key.contains('@'));
    }
}
