//! apphost - Hosts native request-handler applications and watches their
//! offline markers
//!
//! Loads every configured application, keeps its `app_offline.htm` watch
//! active and tears everything down on Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use apphost::core::{ApplicationManager, NotifyFileWatcher, RuntimeLocator, ServerContext};
use apphost::persistence::ConfigStore;
use apphost::{APP_NAME, APP_VERSION};

#[derive(Debug, Parser)]
#[command(name = "apphost", version, about = "Hosted application lifecycle service")]
struct Args {
    /// Host configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Create every application at startup instead of on first request
    #[arg(long)]
    eager: bool,

    /// Tracing filter, overriding the configured one
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let store = match &args.config {
        Some(path) => ConfigStore::new(path),
        None => ConfigStore::open_default(),
    };
    let config = store
        .load()
        .with_context(|| format!("Failed to load host configuration from {:?}", store.path()))?;

    // Initialize logging
    init_logging(args.log_filter.as_deref().unwrap_or(&config.settings.log_filter));

    info!("{} v{} starting...", APP_NAME, APP_VERSION);

    let watcher =
        NotifyFileWatcher::new(&config.settings).context("Failed to start the file watcher")?;
    let locator = RuntimeLocator::global(&config.settings);
    let manager = ApplicationManager::new(locator, watcher, ServerContext::detached());

    for configuration in config.applications {
        let config_path = configuration.config_path.clone();
        match manager.get_or_create(Arc::new(configuration)) {
            Ok(info) => {
                if args.eager && info.app_offline().is_none() {
                    if let Err(e) = info.ensure_application_created() {
                        error!("Failed to start application '{}': {}", config_path, e);
                    }
                }
            }
            Err(e) => error!("Failed to register application '{}': {}", config_path, e),
        }
    }

    if manager.is_empty() {
        warn!("No applications configured in {:?}", store.path());
    }
    info!(
        "Hosting {} application(s), {} offline",
        manager.len(),
        manager.offline_count()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("{} shutting down", APP_NAME);
    for completion in manager.shutdown_all() {
        completion.wait().await;
    }
    if let Some(reason) = manager.locator().failure_reason() {
        warn!("Request handler was never loaded: {}", reason);
    }

    Ok(())
}

/// Initialize the logging system
fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
