//! Request handler discovery - Locates and loads the native request handler
//! once per process

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{debug, error, info, warn};

use super::application::RequestHandlerModule;
use super::configuration::{Configuration, RuntimeParameters};
use super::error::{HostError, HostResult};
use super::native::NativeRuntimeHost;
use super::settings::HostSettings;

/// Capacity of the native search directory buffer, in characters
pub const SEARCH_DIRECTORIES_CAPACITY: usize = 10 * 1024;

/// Operating-system and runtime services the locator drives
pub trait RuntimeHost: Send + Sync {
    /// Build the runtime parameters for a configuration
    fn runtime_parameters(&self, configuration: &Configuration) -> HostResult<RuntimeParameters>;

    /// Ask the hosting runtime for its `;`-delimited native search directories
    fn native_search_directories(&self, parameters: &RuntimeParameters) -> HostResult<String>;

    fn file_exists(&self, path: &Path) -> bool;

    /// Full path of the running host executable
    fn current_executable(&self) -> HostResult<String>;

    /// Load the request handler and resolve its entry points
    fn load_request_handler(&self, path: &Path) -> HostResult<Arc<dyn RequestHandlerModule>>;

    /// Separator used when composing candidate paths
    fn path_separator(&self) -> char {
        std::path::MAIN_SEPARATOR
    }
}

/// Process-wide outcome of the one resolution attempt
enum Resolution {
    Loaded(Arc<dyn RequestHandlerModule>),
    Failed(String),
}

/// Entry points plus the parameters computed for the caller's configuration
pub struct Resolved {
    pub entry_points: Arc<dyn RequestHandlerModule>,
    pub parameters: Option<RuntimeParameters>,
}

/// Resolves the request handler at most once; success and failure are both
/// permanent for the locator's lifetime
pub struct RuntimeLocator {
    host: Box<dyn RuntimeHost>,
    handler_name: String,
    state: OnceLock<Resolution>,
    init_lock: Mutex<()>,
}

static GLOBAL_LOCATOR: OnceLock<Arc<RuntimeLocator>> = OnceLock::new();

impl RuntimeLocator {
    pub fn new(host: impl RuntimeHost + 'static, handler_name: impl Into<String>) -> Self {
        Self {
            host: Box::new(host),
            handler_name: handler_name.into(),
            state: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// The process-wide locator backed by the native host.
    ///
    /// Settings only take effect on the first call; the locator is never
    /// torn down, so the loaded library stays mapped for the process.
    pub fn global(settings: &HostSettings) -> Arc<RuntimeLocator> {
        GLOBAL_LOCATOR
            .get_or_init(|| {
                Arc::new(RuntimeLocator::new(
                    NativeRuntimeHost::new(settings),
                    settings.request_handler_name.clone(),
                ))
            })
            .clone()
    }

    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state.get(), Some(Resolution::Loaded(_)))
    }

    pub fn has_failed(&self) -> bool {
        matches!(self.state.get(), Some(Resolution::Failed(_)))
    }

    /// Resolve the request handler for `configuration`.
    ///
    /// Once resolved, the cached entry points are returned without taking
    /// any lock. A failed resolution is never retried.
    pub fn resolve(&self, configuration: &Configuration) -> HostResult<Resolved> {
        if let Some(state) = self.state.get() {
            return self.from_cache(state, configuration);
        }

        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = self.state.get() {
            return self.from_cache(state, configuration);
        }

        info!(
            "Resolving request handler '{}' for '{}'",
            self.handler_name, configuration.config_path
        );

        match self.load(configuration) {
            Ok((entry_points, parameters)) => {
                info!("Request handler loaded from {:?}", entry_points.location());
                let _ = self.state.set(Resolution::Loaded(Arc::clone(&entry_points)));
                Ok(Resolved {
                    entry_points,
                    parameters,
                })
            }
            Err(e) => {
                error!("Failed to load request handler: {}", e);
                let _ = self.state.set(Resolution::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Reason recorded for a failed resolution
    pub fn failure_reason(&self) -> Option<&str> {
        match self.state.get() {
            Some(Resolution::Failed(reason)) => Some(reason),
            _ => None,
        }
    }

    fn from_cache(&self, state: &Resolution, configuration: &Configuration) -> HostResult<Resolved> {
        match state {
            Resolution::Loaded(entry_points) => {
                let parameters = match self.host.runtime_parameters(configuration) {
                    Ok(parameters) => Some(parameters),
                    Err(e) => {
                        debug!(
                            "No runtime parameters for '{}': {}",
                            configuration.config_path, e
                        );
                        None
                    }
                };
                Ok(Resolved {
                    entry_points: Arc::clone(entry_points),
                    parameters,
                })
            }
            Resolution::Failed(_) => Err(HostError::RuntimeLoadPreviouslyFailed),
        }
    }

    fn load(
        &self,
        configuration: &Configuration,
    ) -> HostResult<(Arc<dyn RequestHandlerModule>, Option<RuntimeParameters>)> {
        let parameters = match self.host.runtime_parameters(configuration) {
            Ok(parameters) => Some(parameters),
            Err(e) => {
                debug!("Runtime parameters unavailable: {}", e);
                None
            }
        };

        let discovered = match &parameters {
            Some(parameters) => match self.find_from_hostfxr(parameters) {
                Ok(location) => Some(location),
                Err(e) => {
                    debug!("Hosting runtime discovery failed: {}", e);
                    None
                }
            },
            None => None,
        };

        let location = match discovered {
            Some(location) => location,
            None => {
                let location = self.find_from_global_location().map_err(|e| {
                    warn!("Global request handler location unavailable: {}", e);
                    HostError::RequestHandlerNotFound
                })?;
                info!("Falling back to request handler next to host: {}", location);
                location
            }
        };

        let entry_points = self.host.load_request_handler(&PathBuf::from(&location))?;
        Ok((entry_points, parameters))
    }

    /// First existing candidate across the runtime's native search directories
    fn find_from_hostfxr(&self, parameters: &RuntimeParameters) -> HostResult<String> {
        let search_paths = self.host.native_search_directories(parameters)?;
        let separator = self.host.path_separator();

        search_candidates(&search_paths, separator, &self.handler_name)
            .into_iter()
            .find(|candidate| self.host.file_exists(Path::new(candidate)))
            .ok_or(HostError::NotFoundInSearchPaths)
    }

    /// Request handler beside the host executable; trusted without a probe
    fn find_from_global_location(&self) -> HostResult<String> {
        let executable = self.host.current_executable()?;
        fallback_location(&executable, self.host.path_separator(), &self.handler_name)
    }
}

/// Candidate request handler paths, one per search directory, in order
pub fn search_candidates(search_paths: &str, separator: char, file_name: &str) -> Vec<String> {
    search_paths
        .split(';')
        .filter(|dir| !dir.is_empty())
        .map(|dir| {
            let mut candidate = String::with_capacity(dir.len() + file_name.len() + 1);
            candidate.push_str(dir);
            if !candidate.ends_with(separator) {
                candidate.push(separator);
            }
            candidate.push_str(file_name);
            candidate
        })
        .collect()
}

/// Replace the executable's file name with `file_name`
pub fn fallback_location(executable: &str, separator: char, file_name: &str) -> HostResult<String> {
    let position = executable
        .rfind(separator)
        .ok_or(HostError::RequestHandlerNotFound)?;
    Ok(format!("{}{}{}", &executable[..position], separator, file_name))
}
