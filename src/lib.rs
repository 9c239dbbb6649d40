//! apphost - Hosted application lifecycle core
//!
//! Locates and loads the native request handler once per process, lazily
//! creates the hosted application for each configured site and watches the
//! `app_offline.htm` marker that takes an application offline and back.

pub mod core;
pub mod persistence;
pub mod platform;

pub use crate::core::{
    AppOfflineSnapshot, Application, ApplicationInfo, ApplicationKey, ApplicationManager,
    Configuration, FileWatcher, HostError, HostSettings, HostedApplication, NotifyFileWatcher,
    RequestHandlerModule, RequestTarget, RuntimeHost, RuntimeLocator, RuntimeParameters,
    ServerContext, WatcherEntry,
};

/// Application name constant
pub const APP_NAME: &str = "apphost";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
