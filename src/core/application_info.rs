//! Application lifecycle - One hosted application, its configuration and its
//! offline marker

use std::ffi::OsStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use arc_swap::ArcSwapOption;
use tracing::{debug, error, info, warn};

use super::application::{HostedApplication, RequestHandlerModule, ServerContext};
use super::configuration::{ApplicationKey, Configuration, RuntimeParameters};
use super::error::{HostError, HostResult};
use super::locator::RuntimeLocator;
use super::monitor::{
    EntryState, FileWatcher, OfflineMarkerListener, StopCompletion, WatcherEntry,
};
use super::offline::{app_offline_path, AppOfflineSnapshot, APP_OFFLINE_FILE_NAME};

/// Where a request for the application should go
#[derive(Debug, Clone)]
pub enum RequestTarget {
    /// Serve the marker file content verbatim
    Offline(Arc<AppOfflineSnapshot>),
    /// Dispatch into the running application
    Application(Arc<HostedApplication>),
}

impl RequestTarget {
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline(_))
    }
}

/// Lifecycle of one hosted application, keyed by its configuration path
pub struct ApplicationInfo {
    server: ServerContext,
    locator: Arc<RuntimeLocator>,
    self_ref: Weak<ApplicationInfo>,
    configuration: OnceLock<Arc<Configuration>>,
    key: OnceLock<ApplicationKey>,
    watcher_entry: Mutex<Option<Arc<WatcherEntry>>>,
    entry_points: OnceLock<Arc<dyn RequestHandlerModule>>,
    parameters: Mutex<Option<RuntimeParameters>>,
    application: ArcSwapOption<HostedApplication>,
    /// Serializes creation and recycling of `application`
    create_lock: Mutex<()>,
    app_offline: ArcSwapOption<AppOfflineSnapshot>,
    app_offline_found: AtomicBool,
}

impl ApplicationInfo {
    pub fn new(server: ServerContext, locator: Arc<RuntimeLocator>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            server,
            locator,
            self_ref: self_ref.clone(),
            configuration: OnceLock::new(),
            key: OnceLock::new(),
            watcher_entry: Mutex::new(None),
            entry_points: OnceLock::new(),
            parameters: Mutex::new(None),
            application: ArcSwapOption::empty(),
            create_lock: Mutex::new(()),
            app_offline: ArcSwapOption::empty(),
            app_offline_found: AtomicBool::new(false),
        })
    }

    /// Take a reference to `configuration`, prepare the marker watch and
    /// check for the marker once.
    ///
    /// A second call keeps the first configuration and watcher entry.
    pub fn initialize(
        &self,
        configuration: Arc<Configuration>,
        watcher: Arc<dyn FileWatcher>,
    ) -> HostResult<()> {
        let mut entry = self
            .watcher_entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = self.configuration.get() {
            if existing.config_path != configuration.config_path {
                warn!(
                    "Application '{}' already initialized; ignoring configuration '{}'",
                    existing.config_path, configuration.config_path
                );
            }
            return Ok(());
        }

        let key = configuration.key();
        info!(
            "Initializing application '{}' at {:?}",
            key,
            configuration.physical_path()
        );
        let _ = self.key.set(key);
        let _ = self.configuration.set(configuration);
        *entry = Some(WatcherEntry::new(watcher));
        drop(entry);

        self.update_app_offline();
        Ok(())
    }

    /// Register the marker watch in the application's physical root.
    ///
    /// Does nothing before `initialize` or once monitoring has started.
    pub fn start_monitoring_app_offline(&self) -> HostResult<()> {
        let entry = self
            .watcher_entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let (Some(entry), Some(configuration)) = (entry, self.configuration.get()) else {
            return Ok(());
        };
        if entry.state() != EntryState::Created {
            return Ok(());
        }

        let owner: Weak<dyn OfflineMarkerListener> = self.self_ref.clone();
        entry.create(
            configuration.physical_path(),
            OsStr::new(APP_OFFLINE_FILE_NAME),
            owner,
        )
    }

    /// The live application, created on first use.
    ///
    /// Creation failures are not remembered; the next call tries again.
    /// Fails with `ApplicationOffline` while an offline snapshot is published.
    pub fn ensure_application_created(&self) -> HostResult<Arc<HostedApplication>> {
        match self.application_or_offline()? {
            RequestTarget::Application(application) => Ok(application),
            RequestTarget::Offline(_) => Err(HostError::ApplicationOffline),
        }
    }

    fn application_or_offline(&self) -> HostResult<RequestTarget> {
        if let Some(application) = self.application.load_full() {
            return Ok(RequestTarget::Application(application));
        }

        let configuration = self
            .configuration
            .get()
            .cloned()
            .ok_or(HostError::InvalidFunctionState)?;
        // Resolution may be slow; stay outside the creation lock
        let resolved = self.locator.resolve(&configuration)?;

        let _guard = self.create_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(application) = self.application.load_full() {
            return Ok(RequestTarget::Application(application));
        }
        // The snapshot is published before the recycle that takes this lock
        if let Some(snapshot) = self.app_offline.load_full() {
            debug!("'{}' went offline during creation", configuration.config_path);
            return Ok(RequestTarget::Offline(snapshot));
        }

        let entry_points = self
            .entry_points
            .get_or_init(|| Arc::clone(&resolved.entry_points))
            .clone();
        let key = configuration.key();

        let inner = entry_points
            .create_application(&self.server, &configuration, resolved.parameters.as_ref())
            .map_err(|e| {
                error!("Failed to create application '{}': {}", key, e);
                e
            })?;
        let application = Arc::new(HostedApplication::new(key, inner, entry_points));

        *self.parameters.lock().unwrap_or_else(PoisonError::into_inner) = resolved.parameters;
        self.application.store(Some(Arc::clone(&application)));
        info!(
            "Created application {} for '{}'",
            application.id(),
            application.key()
        );
        Ok(RequestTarget::Application(application))
    }

    /// Re-read the marker file and publish the result
    pub fn update_app_offline(&self) {
        let Some(configuration) = self.configuration.get() else {
            return;
        };
        let path = app_offline_path(configuration.physical_path());

        match std::fs::metadata(&path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.app_offline_found.store(false, Ordering::Release);
                if self.app_offline.swap(None).is_some() {
                    info!("'{}' is back online", configuration.config_path);
                }
                return;
            }
            // Anything but a missing file counts as present
            Err(e) => debug!("Cannot inspect {:?}: {}", path, e),
            Ok(_) => {}
        }

        self.app_offline_found.store(true, Ordering::Release);
        match AppOfflineSnapshot::load(&path) {
            Ok(Some(snapshot)) => {
                info!(
                    "'{}' taken offline ({} bytes from {:?})",
                    configuration.config_path,
                    snapshot.len(),
                    path
                );
                let previous = self.app_offline.swap(Some(Arc::new(snapshot)));
                drop(previous);
            }
            Ok(None) => debug!("{:?} vanished while loading", path),
            Err(e) => warn!("Failed to read {:?}: {}", path, e),
        }

        self.recycle_application();
    }

    /// Shut the live application down; the next request creates a new one
    pub fn recycle_application(&self) {
        let _guard = self.create_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(application) = self.application.swap(None) {
            info!(
                "Recycling application {} for '{}'",
                application.id(),
                application.key()
            );
            application.shutdown();
        }
    }

    /// Route a request: the offline snapshot when present, otherwise the
    /// live application.
    ///
    /// Routing follows the published snapshot, not `is_app_offline_found`.
    /// A marker that exists but could not be read yet has no snapshot, so
    /// requests keep reaching a (recycled) application until a read succeeds.
    pub fn acquire(&self) -> HostResult<RequestTarget> {
        if let Some(snapshot) = self.app_offline.load_full() {
            return Ok(RequestTarget::Offline(snapshot));
        }
        self.application_or_offline()
    }

    pub fn app_offline(&self) -> Option<Arc<AppOfflineSnapshot>> {
        self.app_offline.load_full()
    }

    pub fn is_app_offline_found(&self) -> bool {
        self.app_offline_found.load(Ordering::Acquire)
    }

    pub fn application(&self) -> Option<Arc<HostedApplication>> {
        self.application.load_full()
    }

    /// Parameters the live application was created with
    pub fn runtime_parameters(&self) -> Option<RuntimeParameters> {
        self.parameters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entry points for the request dispatch path
    pub fn request_handler_factory(&self) -> HostResult<Arc<dyn RequestHandlerModule>> {
        self.entry_points
            .get()
            .cloned()
            .ok_or(HostError::InvalidFunctionState)
    }

    pub fn watcher_entry(&self) -> Option<Arc<WatcherEntry>> {
        self.watcher_entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn key(&self) -> Option<&ApplicationKey> {
        self.key.get()
    }

    pub fn configuration(&self) -> Option<Arc<Configuration>> {
        self.configuration.get().cloned()
    }

    /// Release everything but the configuration, which is released when the
    /// lifecycle itself is dropped
    pub fn shutdown(&self) -> StopCompletion {
        self.teardown()
    }

    fn teardown(&self) -> StopCompletion {
        drop(self.app_offline.swap(None));

        let entry = self
            .watcher_entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let completion = match entry {
            Some(entry) => {
                entry.mark_invalid();
                entry.stop_monitor()
            }
            None => StopCompletion::completed(),
        };

        if let Some(application) = self.application.swap(None) {
            application.shutdown();
        }

        self.parameters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        completion
    }
}

impl OfflineMarkerListener for ApplicationInfo {
    fn on_app_offline_changed(&self) {
        debug!(
            "Marker change for '{}'",
            self.key.get().map(ApplicationKey::as_str).unwrap_or("?")
        );
        self.update_app_offline();
    }
}

impl Drop for ApplicationInfo {
    fn drop(&mut self) {
        let _ = self.teardown();
        // Application shutdown may still read the configuration
        if let Some(configuration) = self.configuration.take() {
            debug!("Releasing configuration '{}'", configuration.config_path);
        }
    }
}

impl std::fmt::Debug for ApplicationInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationInfo")
            .field("key", &self.key.get())
            .field("application", &self.application.load_full().map(|a| a.id()))
            .field("app_offline_found", &self.is_app_offline_found())
            .finish()
    }
}
