//! Shared stubs for the integration tests.
//!
//! Every stub counts what it is asked to do so the tests can assert on the
//! work performed, not only on the results.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use apphost::core::{
    Application, Configuration, FileWatcher, HostError, HostResult, HostedApplication,
    RequestContext, RequestHandle, RequestHandlerModule, RuntimeHost, RuntimeLocator,
    RuntimeParameters, ServerContext, WatchId, WatcherEntry,
};

pub const HANDLER_NAME: &str = "rh.dll";

// ============================================================================
// Runtime host
// ============================================================================

/// What a `StubHost` was asked to do
#[derive(Default)]
pub struct HostProbe {
    pub parameter_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    pub executable_calls: AtomicUsize,
    pub load_calls: AtomicUsize,
    pub exists_probes: Mutex<Vec<String>>,
    pub loaded_paths: Mutex<Vec<PathBuf>>,
}

impl HostProbe {
    pub fn total_calls(&self) -> usize {
        self.parameter_calls.load(Ordering::SeqCst)
            + self.search_calls.load(Ordering::SeqCst)
            + self.executable_calls.load(Ordering::SeqCst)
            + self.load_calls.load(Ordering::SeqCst)
            + self.exists_probes.lock().unwrap().len()
    }

    pub fn loaded_paths(&self) -> Vec<PathBuf> {
        self.loaded_paths.lock().unwrap().clone()
    }
}

/// Scripted runtime host using Windows-style paths
pub struct StubHost {
    pub probe: Arc<HostProbe>,
    pub parameters: Option<RuntimeParameters>,
    pub search_paths: String,
    pub search_exit_code: i32,
    pub existing: HashSet<String>,
    pub executable: String,
    pub module: Option<Arc<StubModule>>,
    /// Export the loaded library lacks, if any
    pub missing_export: Option<&'static str>,
    pub load_delay: Duration,
}

impl StubHost {
    /// A host whose search directories contain the handler under `C:\b`
    pub fn new(module: Arc<StubModule>) -> Self {
        Self {
            probe: Arc::new(HostProbe::default()),
            parameters: Some(default_parameters()),
            search_paths: "C:\\a;C:\\b;C:\\c".to_string(),
            search_exit_code: 0,
            existing: HashSet::from(["C:\\b\\rh.dll".to_string()]),
            executable: "C:\\Site\\w3wp.exe".to_string(),
            module: Some(module),
            missing_export: None,
            load_delay: Duration::ZERO,
        }
    }

    pub fn probe(&self) -> Arc<HostProbe> {
        Arc::clone(&self.probe)
    }

    pub fn into_locator(self) -> Arc<RuntimeLocator> {
        Arc::new(RuntimeLocator::new(self, HANDLER_NAME))
    }
}

impl RuntimeHost for StubHost {
    fn runtime_parameters(&self, _configuration: &Configuration) -> HostResult<RuntimeParameters> {
        self.probe.parameter_calls.fetch_add(1, Ordering::SeqCst);
        self.parameters
            .clone()
            .ok_or_else(|| HostError::HostfxrUnavailable("no runtime installed".to_string()))
    }

    fn native_search_directories(&self, _parameters: &RuntimeParameters) -> HostResult<String> {
        self.probe.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.search_exit_code != 0 {
            return Err(HostError::SearchDirectories {
                exit_code: self.search_exit_code,
            });
        }
        Ok(self.search_paths.clone())
    }

    fn file_exists(&self, path: &Path) -> bool {
        let path = path.to_string_lossy().into_owned();
        let exists = self.existing.contains(&path);
        self.probe.exists_probes.lock().unwrap().push(path);
        exists
    }

    fn current_executable(&self) -> HostResult<String> {
        self.probe.executable_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.executable.clone())
    }

    fn load_request_handler(&self, path: &Path) -> HostResult<Arc<dyn RequestHandlerModule>> {
        self.probe.load_calls.fetch_add(1, Ordering::SeqCst);
        self.probe.loaded_paths.lock().unwrap().push(path.to_path_buf());
        std::thread::sleep(self.load_delay);
        if let Some(symbol) = self.missing_export {
            return Err(HostError::EntryPointMissing {
                symbol: symbol.to_string(),
            });
        }
        match &self.module {
            Some(module) => Ok(Arc::clone(module) as Arc<dyn RequestHandlerModule>),
            None => Err(HostError::LibraryLoad {
                path: path.to_path_buf(),
                reason: "image is corrupt".to_string(),
            }),
        }
    }

    fn path_separator(&self) -> char {
        '\\'
    }
}

pub fn default_parameters() -> RuntimeParameters {
    RuntimeParameters::new(
        "C:\\Program Files\\dotnet\\host\\fxr\\8.0.0\\hostfxr.dll",
        vec!["C:\\Program Files\\dotnet\\dotnet.exe".to_string(), "app.dll".to_string()],
    )
}

// ============================================================================
// Request handler module and application
// ============================================================================

/// Request handler whose factory counts creations and shutdowns
pub struct StubModule {
    location: PathBuf,
    pub created: AtomicUsize,
    pub shutdowns: Arc<AtomicUsize>,
    pub fail: AtomicBool,
    pub delay: Duration,
    /// For each shutdown: whether the configuration was still alive
    pub config_alive_at_shutdown: Arc<Mutex<Vec<bool>>>,
    pub seen_parameters: Mutex<Vec<Option<RuntimeParameters>>>,
    pub handlers: AtomicUsize,
}

impl StubModule {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            location: PathBuf::from("C:\\b\\rh.dll"),
            created: AtomicUsize::new(0),
            shutdowns: Arc::new(AtomicUsize::new(0)),
            fail: AtomicBool::new(false),
            delay,
            config_alive_at_shutdown: Arc::new(Mutex::new(Vec::new())),
            seen_parameters: Mutex::new(Vec::new()),
            handlers: AtomicUsize::new(0),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn handlers(&self) -> usize {
        self.handlers.load(Ordering::SeqCst)
    }
}

impl RequestHandlerModule for StubModule {
    fn create_application(
        &self,
        _server: &ServerContext,
        configuration: &Arc<Configuration>,
        parameters: Option<&RuntimeParameters>,
    ) -> HostResult<Box<dyn Application>> {
        std::thread::sleep(self.delay);
        self.created.fetch_add(1, Ordering::SeqCst);
        self.seen_parameters
            .lock()
            .unwrap()
            .push(parameters.cloned());
        if self.fail.load(Ordering::SeqCst) {
            return Err(HostError::CreateApplication { code: -1 });
        }
        Ok(Box::new(StubApplication {
            configuration: Arc::downgrade(configuration),
            shutdowns: Arc::clone(&self.shutdowns),
            config_alive_at_shutdown: Arc::clone(&self.config_alive_at_shutdown),
        }))
    }

    /// Hands the request back as its own handler
    fn create_request_handler(
        &self,
        application: &HostedApplication,
        request: RequestContext,
    ) -> HostResult<RequestHandle> {
        if application.is_shut_down() {
            return Err(HostError::InvalidFunctionState);
        }
        self.handlers.fetch_add(1, Ordering::SeqCst);
        Ok(RequestHandle::from_raw(request.as_raw()))
    }

    fn location(&self) -> &Path {
        &self.location
    }
}

pub struct StubApplication {
    configuration: Weak<Configuration>,
    shutdowns: Arc<AtomicUsize>,
    config_alive_at_shutdown: Arc<Mutex<Vec<bool>>>,
}

impl Application for StubApplication {
    fn shutdown(&self) {
        self.config_alive_at_shutdown
            .lock()
            .unwrap()
            .push(self.configuration.upgrade().is_some());
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// File watcher
// ============================================================================

/// Watcher that delivers notifications only when told to
#[derive(Default)]
pub struct RecordingWatcher {
    entries: Mutex<HashMap<WatchId, Arc<WatcherEntry>>>,
    pub registrations: AtomicUsize,
    pub unregistrations: AtomicUsize,
}

impl RecordingWatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver one change notification to every registered entry
    pub fn fire(&self) {
        let entries: Vec<_> = self.entries.lock().unwrap().values().cloned().collect();
        for entry in entries {
            entry.deliver();
        }
    }

    pub fn active(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl FileWatcher for RecordingWatcher {
    fn register(&self, entry: Arc<WatcherEntry>) -> HostResult<()> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().insert(entry.id(), entry);
        Ok(())
    }

    fn unregister(&self, id: WatchId) {
        self.unregistrations.fetch_add(1, Ordering::SeqCst);
        let entry = self.entries.lock().unwrap().remove(&id);
        if let Some(entry) = entry {
            entry.release();
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn site_configuration(physical_path: &Path) -> Arc<Configuration> {
    Arc::new(Configuration::new(
        "MACHINE/WEBROOT/APPHOST/Default Web Site",
        physical_path,
    ))
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}
