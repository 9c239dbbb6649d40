//! Native runtime host - Loads the hosting runtime and the request handler
//! through `libloading`

use std::ffi::{c_void, CString};
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::{Arc, Mutex, PoisonError};

use libloading::{Library, Symbol};
use tracing::{debug, info};

use super::application::{
    Application, HostedApplication, RequestContext, RequestHandle, RequestHandlerModule,
    ServerContext,
};
use super::configuration::{Configuration, RuntimeParameters};
use super::error::{HostError, HostResult};
use super::hostfxr;
use super::locator::{RuntimeHost, SEARCH_DIRECTORIES_CAPACITY};
use super::settings::HostSettings;
use crate::platform::{self, PalChar};

pub const SEARCH_DIRECTORIES_SYMBOL: &str = "hostfxr_get_native_search_directories";
pub const CREATE_APPLICATION_SYMBOL: &str = "CreateApplication";
pub const CREATE_REQUEST_HANDLER_SYMBOL: &str = "CreateRequestHandler";

/// `E_POINTER`, reported when a factory succeeds without producing an object
const E_POINTER: i32 = 0x8000_4003u32 as i32;

type SearchDirectoriesFn = unsafe extern "C" fn(
    argc: c_int,
    argv: *const *const PalChar,
    buffer: *mut PalChar,
    buffer_size: c_int,
) -> c_int;

/// Configuration as seen by the request handler
#[repr(C)]
pub struct NativeConfiguration {
    pub config_path: *const c_char,
    pub physical_path: *const c_char,
}

/// Runtime parameters as seen by the request handler
#[repr(C)]
pub struct NativeRuntimeParameters {
    pub hostfxr_location: *const c_char,
    pub argc: c_int,
    pub argv: *const *const c_char,
}

/// Functions every native application object exposes
#[repr(C)]
pub struct ApplicationVTable {
    pub shutdown: unsafe extern "C" fn(application: *mut RawApplication),
    pub release: unsafe extern "C" fn(application: *mut RawApplication),
}

/// Native application object; begins with its vtable pointer
#[repr(C)]
pub struct RawApplication {
    pub vtable: *const ApplicationVTable,
}

pub type CreateApplicationFn = unsafe extern "C" fn(
    server: *mut c_void,
    configuration: *const NativeConfiguration,
    parameters: *const NativeRuntimeParameters,
    application: *mut *mut RawApplication,
) -> i32;

pub type CreateRequestHandlerFn = unsafe extern "C" fn(
    application: *mut RawApplication,
    request: *mut c_void,
    handler: *mut *mut c_void,
) -> i32;

fn to_c_string(value: &str) -> HostResult<CString> {
    CString::new(value).map_err(|_| HostError::Config(format!("embedded NUL in {:?}", value)))
}

/// Runtime host backed by the real operating system
pub struct NativeRuntimeHost {
    hostfxr_name: String,
    // Hosting runtime libraries stay mapped once loaded
    pinned: Mutex<Vec<Library>>,
}

impl NativeRuntimeHost {
    pub fn new(settings: &HostSettings) -> Self {
        Self {
            hostfxr_name: settings.hostfxr_name.clone(),
            pinned: Mutex::new(Vec::new()),
        }
    }
}

impl RuntimeHost for NativeRuntimeHost {
    fn runtime_parameters(&self, configuration: &Configuration) -> HostResult<RuntimeParameters> {
        hostfxr::runtime_parameters(configuration, &self.hostfxr_name)
    }

    fn native_search_directories(&self, parameters: &RuntimeParameters) -> HostResult<String> {
        let library = unsafe { Library::new(&parameters.hostfxr_location) }.map_err(|e| {
            HostError::LibraryLoad {
                path: parameters.hostfxr_location.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut buffer: Vec<PalChar> = vec![0; SEARCH_DIRECTORIES_CAPACITY];
        let exit_code = {
            let search: Symbol<SearchDirectoriesFn> =
                unsafe { library.get(SEARCH_DIRECTORIES_SYMBOL.as_bytes()) }.map_err(|_| {
                    HostError::EntryPointMissing {
                        symbol: SEARCH_DIRECTORIES_SYMBOL.to_string(),
                    }
                })?;

            let args: Vec<Vec<PalChar>> = parameters
                .arguments
                .iter()
                .map(|arg| platform::to_pal_string(arg))
                .collect();
            let argv: Vec<*const PalChar> = args.iter().map(|arg| arg.as_ptr()).collect();

            unsafe {
                search(
                    argv.len() as c_int,
                    argv.as_ptr(),
                    buffer.as_mut_ptr(),
                    buffer.len() as c_int,
                )
            }
        };

        self.pinned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(library);

        if exit_code != 0 {
            return Err(HostError::SearchDirectories { exit_code });
        }

        let directories = platform::from_pal_buffer(&buffer);
        debug!("Native search directories: {}", directories);
        Ok(directories)
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn current_executable(&self) -> HostResult<String> {
        platform::current_executable_path()
    }

    fn load_request_handler(&self, path: &Path) -> HostResult<Arc<dyn RequestHandlerModule>> {
        Ok(Arc::new(NativeRequestHandler::load(path)?))
    }
}

/// A loaded request handler library and its two entry points
pub struct NativeRequestHandler {
    path: PathBuf,
    create_application: CreateApplicationFn,
    create_request_handler: CreateRequestHandlerFn,
    // Must outlive the function pointers above
    _library: Library,
}

impl NativeRequestHandler {
    pub fn load(path: &Path) -> HostResult<Self> {
        info!("Loading request handler {:?}", path);
        let library = unsafe { Library::new(path) }.map_err(|e| HostError::LibraryLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let create_application = unsafe {
            *library
                .get::<CreateApplicationFn>(CREATE_APPLICATION_SYMBOL.as_bytes())
                .map_err(|_| HostError::EntryPointMissing {
                    symbol: CREATE_APPLICATION_SYMBOL.to_string(),
                })?
        };
        let create_request_handler = unsafe {
            *library
                .get::<CreateRequestHandlerFn>(CREATE_REQUEST_HANDLER_SYMBOL.as_bytes())
                .map_err(|_| HostError::EntryPointMissing {
                    symbol: CREATE_REQUEST_HANDLER_SYMBOL.to_string(),
                })?
        };

        Ok(Self {
            path: path.to_path_buf(),
            create_application,
            create_request_handler,
            _library: library,
        })
    }
}

impl RequestHandlerModule for NativeRequestHandler {
    fn create_application(
        &self,
        server: &ServerContext,
        configuration: &Arc<Configuration>,
        parameters: Option<&RuntimeParameters>,
    ) -> HostResult<Box<dyn Application>> {
        let config_path = to_c_string(&configuration.config_path)?;
        let physical_path = to_c_string(&configuration.physical_path.to_string_lossy())?;
        let native_config = NativeConfiguration {
            config_path: config_path.as_ptr(),
            physical_path: physical_path.as_ptr(),
        };

        // Backing storage for the pointers in NativeRuntimeParameters
        let hostfxr_location;
        let arguments: Vec<CString>;
        let argv: Vec<*const c_char>;
        let native_params;
        let params_ptr = match parameters {
            Some(parameters) => {
                hostfxr_location =
                    to_c_string(&parameters.hostfxr_location.to_string_lossy())?;
                arguments = parameters
                    .arguments
                    .iter()
                    .map(|arg| to_c_string(arg))
                    .collect::<HostResult<_>>()?;
                argv = arguments.iter().map(|arg| arg.as_ptr()).collect();
                native_params = NativeRuntimeParameters {
                    hostfxr_location: hostfxr_location.as_ptr(),
                    argc: argv.len() as c_int,
                    argv: argv.as_ptr(),
                };
                &native_params as *const NativeRuntimeParameters
            }
            None => ptr::null(),
        };

        let mut raw: *mut RawApplication = ptr::null_mut();
        let code = unsafe {
            (self.create_application)(server.as_raw(), &native_config, params_ptr, &mut raw)
        };
        if code != 0 {
            return Err(HostError::CreateApplication { code });
        }

        let application = NonNull::new(raw)
            .and_then(|raw| unsafe { NativeApplication::from_raw(raw) })
            .ok_or(HostError::CreateApplication { code: E_POINTER })?;
        Ok(Box::new(application))
    }

    fn create_request_handler(
        &self,
        application: &HostedApplication,
        request: RequestContext,
    ) -> HostResult<RequestHandle> {
        let raw = application.native_handle().cast::<RawApplication>();
        if raw.is_null() || application.is_shut_down() {
            return Err(HostError::InvalidFunctionState);
        }

        let mut handler: *mut c_void = ptr::null_mut();
        let code = unsafe { (self.create_request_handler)(raw, request.as_raw(), &mut handler) };
        if code != 0 {
            return Err(HostError::CreateRequestHandler { code });
        }
        if handler.is_null() {
            return Err(HostError::CreateRequestHandler { code: E_POINTER });
        }
        Ok(RequestHandle::from_raw(handler))
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

/// Owning wrapper around an application object returned by `CreateApplication`
pub struct NativeApplication {
    raw: NonNull<RawApplication>,
}

// The native application is required to be callable from any worker thread.
unsafe impl Send for NativeApplication {}
unsafe impl Sync for NativeApplication {}

impl NativeApplication {
    /// # Safety
    /// `raw` must point to a live application object whose first field is a
    /// valid vtable pointer; ownership of one reference moves to the wrapper.
    pub unsafe fn from_raw(raw: NonNull<RawApplication>) -> Option<Self> {
        if raw.as_ref().vtable.is_null() {
            return None;
        }
        Some(Self { raw })
    }

    fn vtable(&self) -> &ApplicationVTable {
        unsafe { &*self.raw.as_ref().vtable }
    }
}

impl Application for NativeApplication {
    fn shutdown(&self) {
        unsafe { (self.vtable().shutdown)(self.raw.as_ptr()) }
    }

    fn native_handle(&self) -> *mut c_void {
        self.raw.as_ptr().cast()
    }
}

impl Drop for NativeApplication {
    fn drop(&mut self) {
        unsafe { (self.vtable().release)(self.raw.as_ptr()) }
    }
}
