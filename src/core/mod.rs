//! Core module - Runtime discovery, application lifecycles and offline monitoring

mod application;
mod application_info;
mod configuration;
mod error;
pub mod hostfxr;
pub mod locator;
mod manager;
mod monitor;
pub mod native;
mod notify_watcher;
pub mod offline;
pub mod settings;

pub use application::{
    Application, ApplicationId, HostedApplication, RequestContext, RequestHandle,
    RequestHandlerModule, ServerContext,
};
pub use application_info::{ApplicationInfo, RequestTarget};
pub use configuration::{ApplicationKey, Configuration, RuntimeParameters};
pub use error::{HostError, HostResult};
pub use locator::{Resolved, RuntimeHost, RuntimeLocator};
pub use manager::ApplicationManager;
pub use monitor::{
    EntryState, FileWatcher, OfflineMarkerListener, StopCompletion, WatchId, WatchTarget,
    WatcherEntry,
};
pub use notify_watcher::NotifyFileWatcher;
pub use offline::{AppOfflineSnapshot, APP_OFFLINE_FILE_NAME};
pub use settings::{HostSettings, WatcherBackend};
