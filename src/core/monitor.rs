//! File monitoring - Watcher entries for a single file in one directory
//!
//! An entry moves through `Created -> Monitoring -> Invalidated -> Stopped`.
//! After `create` the watcher subsystem holds a strong reference to the
//! entry; the owner only keeps its own handle. Teardown is two-step: the
//! owner marks the entry invalid, which turns every later notification into
//! a no-op, then asks it to stop. The subsystem answers the stop with one
//! final completion, after which it drops its reference and the entry is
//! freed. The owner never has to synchronize with in-flight notifications.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use tokio::sync::oneshot;
use tracing::{debug, trace};
use uuid::Uuid;

use super::error::{HostError, HostResult};

/// Receives change notifications for a watched file
pub trait OfflineMarkerListener: Send + Sync {
    fn on_app_offline_changed(&self);
}

/// Delivers directory change notifications to registered entries
pub trait FileWatcher: Send + Sync {
    /// Start delivering notifications for the entry's target. The watcher
    /// keeps the entry alive until it has been stopped.
    fn register(&self, entry: Arc<WatcherEntry>) -> HostResult<()>;

    /// Stop watching. Implementations must eventually call
    /// [`WatcherEntry::release`] on their reference, after any notification
    /// already queued for the entry.
    fn unregister(&self, id: WatchId);
}

/// Unique identifier for a watcher entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub Uuid);

impl WatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a watcher entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryState {
    Created = 0,
    Monitoring = 1,
    Invalidated = 2,
    Stopped = 3,
}

impl EntryState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Monitoring,
            2 => Self::Invalidated,
            _ => Self::Stopped,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Monitoring => "Monitoring",
            Self::Invalidated => "Invalidated",
            Self::Stopped => "Stopped",
        }
    }
}

/// Directory and file name an entry watches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub directory: PathBuf,
    pub file_name: OsString,
    canonical_directory: PathBuf,
}

impl WatchTarget {
    pub fn new(directory: &Path, file_name: &OsStr) -> Self {
        let canonical_directory =
            std::fs::canonicalize(directory).unwrap_or_else(|_| directory.to_path_buf());
        Self {
            directory: directory.to_path_buf(),
            file_name: file_name.to_os_string(),
            canonical_directory,
        }
    }

    /// Whether a changed path is the watched file
    pub fn matches(&self, path: &Path) -> bool {
        let name_matches = path
            .file_name()
            .map(|name| names_equal(name, &self.file_name))
            .unwrap_or(false);
        if !name_matches {
            return false;
        }
        match path.parent() {
            Some(parent) => parent == self.directory || parent == self.canonical_directory,
            None => false,
        }
    }
}

#[cfg(windows)]
fn names_equal(a: &OsStr, b: &OsStr) -> bool {
    a.to_string_lossy()
        .eq_ignore_ascii_case(&b.to_string_lossy())
}

#[cfg(not(windows))]
fn names_equal(a: &OsStr, b: &OsStr) -> bool {
    a == b
}

/// Resolves once the watcher subsystem has released a stopped entry
pub struct StopCompletion {
    receiver: Option<oneshot::Receiver<()>>,
}

impl StopCompletion {
    /// A completion that is already finished
    pub fn completed() -> Self {
        Self { receiver: None }
    }

    /// Wait asynchronously for the final notification
    pub async fn wait(self) {
        if let Some(receiver) = self.receiver {
            let _ = receiver.await;
        }
    }

    /// Block the current thread until the final notification.
    ///
    /// Must not be called from inside an async runtime.
    pub fn blocking_wait(self) {
        if let Some(receiver) = self.receiver {
            let _ = receiver.blocking_recv();
        }
    }
}

/// One watch for a single file name in one directory
pub struct WatcherEntry {
    id: WatchId,
    watcher: Arc<dyn FileWatcher>,
    state: AtomicU8,
    registered: AtomicBool,
    target: OnceLock<WatchTarget>,
    owner: OnceLock<Weak<dyn OfflineMarkerListener>>,
    stopped_tx: Mutex<Option<oneshot::Sender<()>>>,
    stopped_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl WatcherEntry {
    pub fn new(watcher: Arc<dyn FileWatcher>) -> Arc<Self> {
        let (tx, rx) = oneshot::channel();
        Arc::new(Self {
            id: WatchId::new(),
            watcher,
            state: AtomicU8::new(EntryState::Created as u8),
            registered: AtomicBool::new(false),
            target: OnceLock::new(),
            owner: OnceLock::new(),
            stopped_tx: Mutex::new(Some(tx)),
            stopped_rx: Mutex::new(Some(rx)),
        })
    }

    pub fn id(&self) -> WatchId {
        self.id
    }

    pub fn state(&self) -> EntryState {
        EntryState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn target(&self) -> Option<&WatchTarget> {
        self.target.get()
    }

    /// Begin watching `file_name` in `directory` on behalf of `owner`.
    ///
    /// `owner` is not kept alive by the entry.
    pub fn create(
        self: &Arc<Self>,
        directory: &Path,
        file_name: &OsStr,
        owner: Weak<dyn OfflineMarkerListener>,
    ) -> HostResult<()> {
        if self.state() != EntryState::Created {
            return Err(HostError::Config(format!(
                "watcher entry {} is {}",
                self.id,
                self.state().label()
            )));
        }

        let target = self.target.get_or_init(|| WatchTarget::new(directory, file_name));
        if target.directory != directory || target.file_name != file_name {
            return Err(HostError::Config(format!(
                "watcher entry {} already targets {:?}",
                self.id, target.directory
            )));
        }
        let _ = self.owner.set(owner);

        // Monitoring before registration so the first event is not dropped
        self.state
            .store(EntryState::Monitoring as u8, Ordering::Release);
        if let Err(e) = self.watcher.register(Arc::clone(self)) {
            let _ = self.state.compare_exchange(
                EntryState::Monitoring as u8,
                EntryState::Created as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            return Err(e);
        }
        self.registered.store(true, Ordering::Release);
        debug!(
            "Watching {:?} in {:?} ({})",
            target.file_name, target.directory, self.id
        );
        Ok(())
    }

    /// Turn later notifications into no-ops; the OS registration is kept
    pub fn mark_invalid(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state != EntryState::Stopped as u8).then_some(EntryState::Invalidated as u8)
            });
    }

    /// Cancel the OS registration. The returned completion resolves when the
    /// subsystem has processed the final notification for this entry.
    pub fn stop_monitor(&self) -> StopCompletion {
        let receiver = self
            .stopped_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(receiver) = receiver else {
            return StopCompletion::completed();
        };

        if self.registered.swap(false, Ordering::AcqRel) {
            self.watcher.unregister(self.id);
        } else {
            self.finish();
        }
        StopCompletion {
            receiver: Some(receiver),
        }
    }

    /// Forward a change notification to the owner unless invalidated
    pub fn deliver(&self) {
        if self.state() != EntryState::Monitoring {
            trace!("Dropping notification for {} ({})", self.id, self.state().label());
            return;
        }
        if let Some(owner) = self.owner.get().and_then(Weak::upgrade) {
            owner.on_app_offline_changed();
        }
    }

    /// Final notification from the subsystem: consumes its reference and
    /// signals the stop completion once that reference is gone.
    pub fn release(self: Arc<Self>) {
        let sender = self.take_sender();
        self.state.store(EntryState::Stopped as u8, Ordering::Release);
        drop(self);
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    fn finish(&self) {
        self.state.store(EntryState::Stopped as u8, Ordering::Release);
        if let Some(sender) = self.take_sender() {
            let _ = sender.send(());
        }
    }

    fn take_sender(&self) -> Option<oneshot::Sender<()>> {
        self.stopped_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for WatcherEntry {
    fn drop(&mut self) {
        trace!("Watcher entry {} freed", self.id);
    }
}

impl std::fmt::Debug for WatcherEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherEntry")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("target", &self.target.get())
            .finish()
    }
}
