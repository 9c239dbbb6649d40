//! Application configuration - Settings of one hosted application

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Identity of a hosted application, derived from its configuration path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationKey(String);

impl ApplicationKey {
    /// Normalize a configuration path into a key.
    ///
    /// Configuration paths compare case-insensitively and ignore trailing
    /// separators, so `MACHINE/WEBROOT/APPHOST/Site/` and
    /// `machine/webroot/apphost/site` name the same application.
    pub fn new(config_path: &str) -> Self {
        let trimmed = config_path.trim().trim_end_matches(['/', '\\']);
        Self(trimmed.to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ApplicationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable snapshot of one application's settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Configuration path, the source of the application identity
    pub config_path: String,
    /// Physical root directory of the application
    pub physical_path: PathBuf,
    /// Process that hosts the runtime (`dotnet` or the application executable)
    #[serde(default)]
    pub process_path: PathBuf,
    /// Arguments passed to the hosting runtime
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Explicit location of the hosting runtime library
    #[serde(default)]
    pub hostfxr_path: Option<PathBuf>,
    /// Root of the runtime installation
    #[serde(default)]
    pub dotnet_root: Option<PathBuf>,
}

impl Configuration {
    pub fn new(config_path: impl Into<String>, physical_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            physical_path: physical_path.into(),
            process_path: PathBuf::new(),
            arguments: Vec::new(),
            hostfxr_path: None,
            dotnet_root: None,
        }
    }

    pub fn with_process_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.process_path = path.into();
        self
    }

    pub fn with_arguments(mut self, args: Vec<String>) -> Self {
        self.arguments = args;
        self
    }

    pub fn with_hostfxr_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.hostfxr_path = Some(path.into());
        self
    }

    pub fn with_dotnet_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.dotnet_root = Some(path.into());
        self
    }

    /// Normalized identity key
    pub fn key(&self) -> ApplicationKey {
        ApplicationKey::new(&self.config_path)
    }

    pub fn physical_path(&self) -> &Path {
        &self.physical_path
    }
}

/// Everything needed to start the hosting runtime for one application.
///
/// Owned by exactly one `ApplicationInfo` and replaced wholesale whenever a
/// new application is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeParameters {
    /// Location of the hosting runtime library
    pub hostfxr_location: PathBuf,
    /// Process arguments; the first one names the host process
    pub arguments: Vec<String>,
}

impl RuntimeParameters {
    pub fn new(hostfxr_location: impl Into<PathBuf>, arguments: Vec<String>) -> Self {
        Self {
            hostfxr_location: hostfxr_location.into(),
            arguments,
        }
    }

    pub fn argc(&self) -> usize {
        self.arguments.len()
    }
}
