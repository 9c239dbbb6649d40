//! Host settings management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::platform;

/// How directory change notifications are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatcherBackend {
    /// The operating system's native notification mechanism
    #[default]
    Native,
    /// Periodic directory scans, for network shares that deliver no events
    Poll,
}

impl WatcherBackend {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Native => "Native",
            Self::Poll => "Poll",
        }
    }
}

/// Process-wide host settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// File name of the native request handler
    pub request_handler_name: String,
    /// File name of the hosting runtime library
    pub hostfxr_name: String,
    /// Change notification backend
    pub watcher_backend: WatcherBackend,
    /// Poll interval when the poll backend is selected
    pub poll_interval_ms: u32,
    /// Default tracing filter
    pub log_filter: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            request_handler_name: platform::REQUEST_HANDLER_NAME.to_string(),
            hostfxr_name: platform::HOSTFXR_NAME.to_string(),
            watcher_backend: WatcherBackend::Native,
            poll_interval_ms: 1000,
            log_filter: "apphost=info".to_string(),
        }
    }
}

impl HostSettings {
    /// Get the configuration directory
    pub fn get_config_directory() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("apphost")
    }

    /// Get the default configuration file
    pub fn get_config_file() -> PathBuf {
        Self::get_config_directory().join("apphost.json")
    }

    /// Validate settings and fix any invalid values
    pub fn validate(&mut self) {
        self.poll_interval_ms = self.poll_interval_ms.clamp(100, 60_000);
        if self.request_handler_name.trim().is_empty() {
            self.request_handler_name = platform::REQUEST_HANDLER_NAME.to_string();
        }
        if self.hostfxr_name.trim().is_empty() {
            self.hostfxr_name = platform::HOSTFXR_NAME.to_string();
        }
        if self.log_filter.trim().is_empty() {
            self.log_filter = "apphost=info".to_string();
        }
    }
}
