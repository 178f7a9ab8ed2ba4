//! Last-read timestamps backing the read-before-write guard.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::sync::RwLock;

/// Why a write to an existing file was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StaleWrite {
    #[error("file was not read before write attempt")]
    NotRead,

    #[error("file was modified after last read")]
    ModifiedAfterRead,
}

/// Path → time the tool last read (or wrote) it.
///
/// The lock is held only for the map access, never across file I/O. Two
/// writers that both read before either writes can both pass
/// [`ReadRegistry::check_write`]; the later write wins.
#[derive(Debug, Default)]
pub struct ReadRegistry {
    reads: RwLock<HashMap<PathBuf, SystemTime>>,
}

impl ReadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `path` was read (or written) just now.
    pub async fn record(&self, path: &Path) {
        self.record_at(path, SystemTime::now()).await;
    }

    pub async fn record_at(&self, path: &Path, at: SystemTime) {
        self.reads.write().await.insert(path.to_path_buf(), at);
    }

    pub async fn last_read(&self, path: &Path) -> Option<SystemTime> {
        self.reads.read().await.get(path).copied()
    }

    /// Check a write to an existing file whose on-disk mtime is `modified`.
    ///
    /// A platform without mtimes passes once the path has been read.
    pub async fn check_write(&self, path: &Path, modified: Option<SystemTime>) -> Result<(), StaleWrite> {
        let last_read = self.last_read(path).await.ok_or(StaleWrite::NotRead)?;
        match modified {
            Some(modified) if modified > last_read => Err(StaleWrite::ModifiedAfterRead),
            _ => Ok(()),
        }
    }

    pub async fn forget(&self, path: &Path) {
        self.reads.write().await.remove(path);
    }

    pub async fn len(&self) -> usize {
        self.reads.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.reads.read().await.is_empty()
    }
}
