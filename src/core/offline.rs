//! app_offline.htm snapshots

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

/// Marker file that takes an application offline
pub const APP_OFFLINE_FILE_NAME: &str = "app_offline.htm";

/// Full path of the marker file for an application root
pub fn app_offline_path(physical_path: &Path) -> PathBuf {
    physical_path.join(APP_OFFLINE_FILE_NAME)
}

/// Immutable content of the marker file at one point in time.
///
/// Shared through `Arc`; a replaced snapshot stays valid for readers that
/// still hold it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppOfflineSnapshot {
    path: PathBuf,
    content: Vec<u8>,
    loaded_at: DateTime<Utc>,
}

impl AppOfflineSnapshot {
    pub fn new(path: impl Into<PathBuf>, content: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            content,
            loaded_at: Utc::now(),
        }
    }

    /// Read the marker file.
    ///
    /// Returns `Ok(None)` when the file disappeared between the existence
    /// check and the read.
    pub fn load(path: &Path) -> std::io::Result<Option<Self>> {
        match std::fs::read(path) {
            Ok(content) => {
                debug!("Loaded {} bytes from {:?}", content.len(), path);
                Ok(Some(Self::new(path, content)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes to serve verbatim while offline
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}
