//! Application manager - Central registry of application lifecycles

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{error, info, warn};

use super::application::{HostedApplication, ServerContext};
use super::application_info::{ApplicationInfo, RequestTarget};
use super::configuration::{ApplicationKey, Configuration};
use super::error::HostResult;
use super::locator::RuntimeLocator;
use super::monitor::{FileWatcher, StopCompletion};

/// One `ApplicationInfo` per configuration key
pub struct ApplicationManager {
    /// All known applications
    pub applications: Arc<RwLock<HashMap<ApplicationKey, Arc<ApplicationInfo>>>>,
    locator: Arc<RuntimeLocator>,
    watcher: Arc<dyn FileWatcher>,
    server: ServerContext,
}

impl ApplicationManager {
    pub fn new(
        locator: Arc<RuntimeLocator>,
        watcher: Arc<dyn FileWatcher>,
        server: ServerContext,
    ) -> Self {
        Self {
            applications: Arc::new(RwLock::new(HashMap::new())),
            locator,
            watcher,
            server,
        }
    }

    pub fn locator(&self) -> &Arc<RuntimeLocator> {
        &self.locator
    }

    /// The lifecycle for `configuration`, initialized and monitoring on
    /// first sight
    pub fn get_or_create(&self, configuration: Arc<Configuration>) -> HostResult<Arc<ApplicationInfo>> {
        let key = configuration.key();
        if let Some(info) = self.get(&key) {
            return Ok(info);
        }

        let mut applications = self
            .applications
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(info) = applications.get(&key) {
            return Ok(Arc::clone(info));
        }

        let info = ApplicationInfo::new(self.server, Arc::clone(&self.locator));
        info.initialize(configuration, Arc::clone(&self.watcher))?;
        if let Err(e) = info.start_monitoring_app_offline() {
            // Requests can still be served; only marker changes go unnoticed
            warn!("Failed to watch app_offline.htm for '{}': {}", key, e);
        }

        applications.insert(key.clone(), Arc::clone(&info));
        info!("Registered application '{}'", key);
        Ok(info)
    }

    pub fn get(&self, key: &ApplicationKey) -> Option<Arc<ApplicationInfo>> {
        self.applications
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Route a request for the application at `key`
    pub fn acquire(&self, key: &ApplicationKey) -> Option<HostResult<RequestTarget>> {
        self.get(key).map(|info| info.acquire())
    }

    /// Create the application for `key` now rather than on first request
    pub fn start(&self, key: &ApplicationKey) -> Option<HostResult<Arc<HostedApplication>>> {
        self.get(key).map(|info| info.ensure_application_created())
    }

    /// Recycle one application
    pub fn recycle(&self, key: &ApplicationKey) -> bool {
        match self.get(key) {
            Some(info) => {
                info.recycle_application();
                true
            }
            None => false,
        }
    }

    /// Forget an application whose configuration was removed
    pub fn remove(&self, key: &ApplicationKey) -> Option<StopCompletion> {
        let info = self
            .applications
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)?;
        info!("Removing application '{}'", key);
        Some(info.shutdown())
    }

    /// Tear down every application, returning the watcher completions
    pub fn shutdown_all(&self) -> Vec<StopCompletion> {
        let drained: Vec<(ApplicationKey, Arc<ApplicationInfo>)> = self
            .applications
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        info!("Shutting down {} application(s)", drained.len());
        drained
            .into_iter()
            .map(|(key, info)| {
                let completion = info.shutdown();
                if Arc::strong_count(&info) > 1 {
                    error!("Application '{}' still referenced at shutdown", key);
                }
                completion
            })
            .collect()
    }

    pub fn keys(&self) -> Vec<ApplicationKey> {
        self.applications
            .read()
            .map(|a| a.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Get count of applications
    pub fn len(&self) -> usize {
        self.applications.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get count of applications with a live hosted runtime
    pub fn running_count(&self) -> usize {
        self.applications
            .read()
            .map(|a| a.values().filter(|info| info.application().is_some()).count())
            .unwrap_or(0)
    }

    /// Get count of applications currently serving app_offline.htm
    pub fn offline_count(&self) -> usize {
        self.applications
            .read()
            .map(|a| a.values().filter(|info| info.app_offline().is_some()).count())
            .unwrap_or(0)
    }
}

impl Clone for ApplicationManager {
    fn clone(&self) -> Self {
        Self {
            applications: Arc::clone(&self.applications),
            locator: Arc::clone(&self.locator),
            watcher: Arc::clone(&self.watcher),
            server: self.server,
        }
    }
}
