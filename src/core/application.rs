//! Hosted application - A running instance of the hosted runtime

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::configuration::{ApplicationKey, Configuration, RuntimeParameters};
use super::error::HostResult;

/// A running hosted-runtime instance, produced by the request handler's
/// `CreateApplication` factory
pub trait Application: Send + Sync {
    /// Stop the hosted runtime. Called exactly once, before the last
    /// reference is released.
    fn shutdown(&self);

    /// Native object handed to `CreateRequestHandler`; null when there is none
    fn native_handle(&self) -> *mut c_void {
        std::ptr::null_mut()
    }
}

/// Entry points exported by the loaded request handler
pub trait RequestHandlerModule: Send + Sync {
    /// Invoke `CreateApplication`
    fn create_application(
        &self,
        server: &ServerContext,
        configuration: &Arc<Configuration>,
        parameters: Option<&RuntimeParameters>,
    ) -> HostResult<Box<dyn Application>>;

    /// Invoke `CreateRequestHandler` for one request dispatched into
    /// `application`
    fn create_request_handler(
        &self,
        application: &HostedApplication,
        request: RequestContext,
    ) -> HostResult<RequestHandle>;

    /// Where the module was loaded from
    fn location(&self) -> &std::path::Path;
}

/// Opaque handle of the hosting server, passed through to the factory
#[derive(Debug, Clone, Copy)]
pub struct ServerContext {
    raw: *mut c_void,
}

// The handle is only ever passed through to the native factory, which owns
// its synchronization.
unsafe impl Send for ServerContext {}
unsafe impl Sync for ServerContext {}

impl ServerContext {
    pub fn from_raw(raw: *mut c_void) -> Self {
        Self { raw }
    }

    /// A context for hosts that have no native server object
    pub fn detached() -> Self {
        Self {
            raw: std::ptr::null_mut(),
        }
    }

    pub fn as_raw(&self) -> *mut c_void {
        self.raw
    }
}

impl Default for ServerContext {
    fn default() -> Self {
        Self::detached()
    }
}

/// Opaque handle of one in-flight request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    raw: *mut c_void,
}

unsafe impl Send for RequestContext {}
unsafe impl Sync for RequestContext {}

impl RequestContext {
    pub fn from_raw(raw: *mut c_void) -> Self {
        Self { raw }
    }

    pub fn as_raw(&self) -> *mut c_void {
        self.raw
    }
}

/// Request handler object produced by `CreateRequestHandler`, owned by the
/// dispatch path from here on
#[derive(Debug, PartialEq, Eq)]
pub struct RequestHandle {
    raw: *mut c_void,
}

unsafe impl Send for RequestHandle {}

impl RequestHandle {
    pub fn from_raw(raw: *mut c_void) -> Self {
        Self { raw }
    }

    pub fn as_raw(&self) -> *mut c_void {
        self.raw
    }
}

/// Unique identifier for a hosted application instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub Uuid);

impl ApplicationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ApplicationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live application owned by one `ApplicationInfo` and shared with the
/// requests dispatched into it
pub struct HostedApplication {
    id: ApplicationId,
    key: ApplicationKey,
    created_at: DateTime<Utc>,
    shut_down: AtomicBool,
    inner: Box<dyn Application>,
    // Keeps the request handler library mapped while the application lives
    _module: Arc<dyn RequestHandlerModule>,
}

impl HostedApplication {
    pub fn new(
        key: ApplicationKey,
        inner: Box<dyn Application>,
        module: Arc<dyn RequestHandlerModule>,
    ) -> Self {
        Self {
            id: ApplicationId::new(),
            key,
            created_at: Utc::now(),
            shut_down: AtomicBool::new(false),
            inner,
            _module: module,
        }
    }

    pub fn id(&self) -> ApplicationId {
        self.id
    }

    pub fn key(&self) -> &ApplicationKey {
        &self.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Format uptime as human-readable string
    pub fn uptime_string(&self) -> String {
        let secs = (Utc::now() - self.created_at).num_seconds();
        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        }
    }

    /// Native application object for the request dispatch path
    pub fn native_handle(&self) -> *mut c_void {
        self.inner.native_handle()
    }

    /// Shut the hosted runtime down; later calls are no-ops
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(
            "Shutting down application {} for '{}' after {}",
            self.id,
            self.key,
            self.uptime_string()
        );
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for HostedApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedApplication")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("created_at", &self.created_at)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    struct CountingApplication(Arc<AtomicUsize>);

    impl Application for CountingApplication {
        fn shutdown(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NoModule;

    impl RequestHandlerModule for NoModule {
        fn create_application(
            &self,
            _: &ServerContext,
            _: &Arc<Configuration>,
            _: Option<&RuntimeParameters>,
        ) -> HostResult<Box<dyn Application>> {
            unreachable!()
        }

        fn create_request_handler(
            &self,
            _: &HostedApplication,
            _: RequestContext,
        ) -> HostResult<RequestHandle> {
            unreachable!()
        }

        fn location(&self) -> &Path {
            Path::new("none")
        }
    }

    #[test]
    fn test_shutdown_reaches_runtime_once() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let app = HostedApplication::new(
            ApplicationKey::new("site"),
            Box::new(CountingApplication(shutdowns.clone())),
            Arc::new(NoModule),
        );

        app.shutdown();
        app.shutdown();

        assert!(app.is_shut_down());
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_native_handle_is_null() {
        let app = HostedApplication::new(
            ApplicationKey::new("site"),
            Box::new(CountingApplication(Arc::new(AtomicUsize::new(0)))),
            Arc::new(NoModule),
        );
        assert!(app.native_handle().is_null());
    }

    #[test]
    fn test_detached_server_context_is_null() {
        assert!(ServerContext::detached().as_raw().is_null());
    }
}
