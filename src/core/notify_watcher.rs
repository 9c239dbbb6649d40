//! Directory change notifications backed by `notify`
//!
//! The `notify` callback only forwards events into a channel. A single
//! dispatcher thread drains that channel together with registrations and
//! unregistrations, so an entry's final release is always processed after
//! every event that was queued before its stop request.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use notify::{Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, trace, warn};

use super::error::{HostError, HostResult};
use super::monitor::{FileWatcher, WatchId, WatcherEntry};
use super::settings::{HostSettings, WatcherBackend};

enum Command {
    Register(Arc<WatcherEntry>),
    Unregister(WatchId),
    /// Drop a registration that never became active, without releasing it
    Forget(WatchId),
    Event(Event),
}

struct WatchState {
    watcher: Box<dyn Watcher + Send>,
    /// Entries per watched directory
    directories: HashMap<PathBuf, usize>,
    targets: HashMap<WatchId, PathBuf>,
}

/// Watcher subsystem over the operating system's change notifications
pub struct NotifyFileWatcher {
    commands: Sender<Command>,
    state: Mutex<WatchState>,
}

impl NotifyFileWatcher {
    pub fn new(settings: &HostSettings) -> HostResult<Arc<Self>> {
        let (commands, receiver) = mpsc::channel();

        let events = commands.clone();
        let handler = move |result: notify::Result<Event>| match result {
            Ok(event) => {
                let _ = events.send(Command::Event(event));
            }
            Err(e) => warn!("File watcher error: {}", e),
        };

        let watcher: Box<dyn Watcher + Send> = match settings.watcher_backend {
            WatcherBackend::Native => {
                Box::new(notify::recommended_watcher(handler).map_err(|e| HostError::Watch {
                    path: PathBuf::new(),
                    source: e,
                })?)
            }
            WatcherBackend::Poll => {
                let config = notify::Config::default()
                    .with_poll_interval(Duration::from_millis(settings.poll_interval_ms as u64));
                Box::new(PollWatcher::new(handler, config).map_err(|e| HostError::Watch {
                    path: PathBuf::new(),
                    source: e,
                })?)
            }
        };

        std::thread::Builder::new()
            .name("apphost-watcher".to_string())
            .spawn(move || dispatch(receiver))?;

        info!("File watcher started ({})", settings.watcher_backend.label());
        Ok(Arc::new(Self {
            commands,
            state: Mutex::new(WatchState {
                watcher,
                directories: HashMap::new(),
                targets: HashMap::new(),
            }),
        }))
    }

    /// Number of directories with an active OS watch
    pub fn watched_directories(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .directories
            .len()
    }
}

impl FileWatcher for NotifyFileWatcher {
    fn register(&self, entry: Arc<WatcherEntry>) -> HostResult<()> {
        let directory = entry
            .target()
            .map(|target| target.directory.clone())
            .ok_or_else(|| HostError::Config(format!("watcher entry {} has no target", entry.id())))?;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // Queue the entry first so events from the new watch find it
        if self.commands.send(Command::Register(entry.clone())).is_err() {
            return Err(HostError::Config("file watcher dispatcher has stopped".to_string()));
        }

        let watchers = state.directories.get(&directory).copied().unwrap_or(0);
        if watchers == 0 {
            if let Err(e) = state.watcher.watch(&directory, RecursiveMode::NonRecursive) {
                let _ = self.commands.send(Command::Forget(entry.id()));
                return Err(HostError::Watch {
                    path: directory,
                    source: e,
                });
            }
            debug!("Watching directory {:?}", directory);
        }

        state.directories.insert(directory.clone(), watchers + 1);
        state.targets.insert(entry.id(), directory);
        Ok(())
    }

    fn unregister(&self, id: WatchId) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(directory) = state.targets.remove(&id) {
                let remaining = state
                    .directories
                    .get(&directory)
                    .copied()
                    .unwrap_or(1)
                    .saturating_sub(1);
                if remaining == 0 {
                    state.directories.remove(&directory);
                    // The directory may already be gone; nothing to undo then
                    if let Err(e) = state.watcher.unwatch(&directory) {
                        debug!("Unwatch of {:?} failed: {}", directory, e);
                    }
                } else {
                    state.directories.insert(directory, remaining);
                }
            }
        }

        let _ = self.commands.send(Command::Unregister(id));
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}

fn dispatch(receiver: Receiver<Command>) {
    let mut entries: HashMap<WatchId, Arc<WatcherEntry>> = HashMap::new();

    while let Ok(command) = receiver.recv() {
        match command {
            Command::Register(entry) => {
                entries.insert(entry.id(), entry);
            }
            Command::Unregister(id) => {
                if let Some(entry) = entries.remove(&id) {
                    trace!("Releasing watcher entry {}", id);
                    entry.release();
                }
            }
            Command::Forget(id) => {
                entries.remove(&id);
            }
            Command::Event(event) => {
                if !is_relevant(&event.kind) {
                    continue;
                }
                for entry in entries.values() {
                    let hit = entry
                        .target()
                        .map(|target| event.paths.iter().any(|path| target.matches(path)))
                        .unwrap_or(false);
                    if hit {
                        trace!("Change {:?} for entry {}", event.kind, entry.id());
                        entry.deliver();
                    }
                }
            }
        }
    }

    for (_, entry) in entries.drain() {
        entry.release();
    }
    debug!("File watcher dispatcher exited");
}
