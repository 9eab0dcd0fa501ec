//! Shared application state.

use crate::auth::NonceTracker;
use crate::config::Config;
use crate::error::Result;
use duplex_engine::{CallContext, Endpoint, Request, Response, StoreSnapshot, SyncHost};
use duplex_library::Library;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// The sync host of the server replica.
pub type SharedHost = Arc<Mutex<SyncHost<Library>>>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub host: SharedHost,
    pub config: Arc<Config>,
    pub nonces: Arc<NonceTracker>,
    /// Held across apply and snapshot write, so snapshots land in apply order.
    persistence: Arc<Mutex<()>>,
}

impl AppState {
    /// State around an empty library.
    pub fn new(config: Config) -> Self {
        Self::with_library(Library::new(config.replica_id.clone()), config)
    }

    /// State around an existing library.
    pub fn with_library(library: Library, config: Config) -> Self {
        let host = SyncHost::new(library)
            .with_config(config.host_config())
            .with_session_ids(|| uuid::Uuid::new_v4().to_string());

        Self {
            host: Arc::new(Mutex::new(host)),
            config: Arc::new(config),
            nonces: Arc::new(NonceTracker::new()),
            persistence: Arc::new(Mutex::new(())),
        }
    }

    /// State restored from the configured snapshot file, if one exists.
    pub async fn load(config: Config) -> Result<Self> {
        let mut library = Library::new(config.replica_id.clone());

        if let Some(path) = &config.snapshot_path {
            match tokio::fs::read_to_string(path).await {
                Ok(json) => {
                    let snapshot = StoreSnapshot::from_json(&json)?;
                    library.import_state(snapshot)?;
                    tracing::info!(path = %path.display(), "Restored library snapshot");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::info!(path = %path.display(), "No snapshot yet, starting empty");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Self::with_library(library, config))
    }

    /// Run one protocol request against the host.
    ///
    /// A successful `applyChanges` is followed by a snapshot write before
    /// any other apply can start. A failed write is logged; the changes are
    /// committed in memory and the next apply writes them again.
    pub async fn handle(&self, ctx: &CallContext, request: Request) -> Result<Response> {
        if request.endpoint() != Endpoint::ApplyChanges {
            let mut host = self.host.lock().await;
            return Ok(host.handle(ctx, request)?);
        }

        let _persisting = self.persistence.lock().await;
        let (response, json) = {
            let mut host = self.host.lock().await;
            let response = host.handle(ctx, request)?;
            let json = match &self.config.snapshot_path {
                Some(_) => Some(host.store().export_state()?.to_json_pretty()?),
                None => None,
            };
            (response, json)
        };

        if let (Some(path), Some(json)) = (&self.config.snapshot_path, json) {
            match write_atomically(path, &json).await {
                Ok(()) => tracing::debug!(path = %path.display(), "Library snapshot written"),
                Err(e) => tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "Failed to write library snapshot"
                ),
            }
        }
        Ok(response)
    }
}

/// Temporary file next to `path`, so the final rename stays on one filesystem.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `contents` to a sibling temporary file, then rename it over `path`.
async fn write_atomically(path: &Path, contents: &str) -> std::io::Result<()> {
    let temp = temp_path(path);
    if let Err(e) = tokio::fs::write(&temp, contents).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }
    tokio::fs::rename(&temp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_file_sits_next_to_the_snapshot() {
        let temp = temp_path(Path::new("/var/lib/duplex/library.json"));
        assert_eq!(temp, PathBuf::from("/var/lib/duplex/library.json.tmp"));
    }

    #[tokio::test]
    async fn atomic_write_replaces_the_previous_snapshot() {
        let path = std::env::temp_dir().join(format!("duplex-atomic-{}.json", uuid::Uuid::new_v4()));
        write_atomically(&path, "{\"old\":true}").await.unwrap();
        write_atomically(&path, "{\"new\":true}").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"new\":true}");
        assert!(!temp_path(&path).exists());
        let _ = std::fs::remove_file(path);
    }
}
