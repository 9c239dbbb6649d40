//! JSON file storage for host settings and the configured applications

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::{Configuration, HostError, HostResult, HostSettings};

/// Everything the host reads at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfigFile {
    pub settings: HostSettings,
    pub applications: Vec<Configuration>,
}

/// Reads and writes the host configuration file
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default per-user location
    pub fn open_default() -> Self {
        Self::new(HostSettings::get_config_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file; a missing file yields the defaults
    pub fn load(&self) -> HostResult<HostConfigFile> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No host configuration at {:?}, using defaults", self.path);
                return Ok(HostConfigFile::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut file: HostConfigFile = serde_json::from_str(&text)
            .map_err(|e| HostError::Config(format!("{}: {}", self.path.display(), e)))?;
        file.settings.validate();
        info!(
            "Loaded host configuration from {:?} ({} application(s))",
            self.path,
            file.applications.len()
        );
        Ok(file)
    }

    /// Save the file, creating the parent directory if needed
    pub fn save(&self, file: &HostConfigFile) -> HostResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(file)
            .map_err(|e| HostError::Config(e.to_string()))?;
        std::fs::write(&self.path, json)?;
        debug!("Saved host configuration to {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::WatcherBackend;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("apphost.json"));
        let file = store.load().unwrap();
        assert!(file.applications.is_empty());
        assert_eq!(file.settings.watcher_backend, WatcherBackend::Native);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("nested").join("apphost.json"));

        let mut file = HostConfigFile::default();
        file.settings.watcher_backend = WatcherBackend::Poll;
        file.applications.push(
            Configuration::new("MACHINE/WEBROOT/APPHOST/Site", "/srv/site")
                .with_arguments(vec!["app.dll".to_string()]),
        );
        store.save(&file).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.settings.watcher_backend, WatcherBackend::Poll);
        assert_eq!(loaded.applications.len(), 1);
        assert_eq!(loaded.applications[0].arguments, vec!["app.dll".to_string()]);
    }

    #[test]
    fn test_partial_file_and_clamped_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("apphost.json");
        std::fs::write(
            &path,
            r#"{ "settings": { "poll_interval_ms": 1 },
                 "applications": [ { "config_path": "site", "physical_path": "/srv/site" } ] }"#,
        )
        .unwrap();

        let file = ConfigStore::new(&path).load().unwrap();
        assert_eq!(file.settings.poll_interval_ms, 100);
        assert_eq!(file.applications[0].config_path, "site");
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("apphost.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = ConfigStore::new(&path).load().unwrap_err();
        assert!(matches!(err, HostError::Config(_)));
    }
}
