//! The watcher thread.
//!
//! One dedicated thread owns the [`WatchTree`] and the `notify` watcher.
//! OS notifications and registration requests arrive on the same channel,
//! so they are applied one at a time in arrival order. The wait on that
//! channel is bounded, which lets the thread notice shutdown.

use crate::error::{RegisterOutcome, UnregisterOutcome, WatchError};
use crate::tree::WatchTree;
use notify::Event;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Type of file change detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
}

impl FileChange {
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(path) | Self::Modified(path) | Self::Deleted(path) => path,
        }
    }
}

/// Receives the file changes a watcher detects.
///
/// Called on the watcher thread; implementations should hand work off
/// rather than block.
pub trait ChangeSink: Send + 'static {
    fn on_change(&self, change: FileChange);
}

impl ChangeSink for Sender<FileChange> {
    fn on_change(&self, change: FileChange) {
        // A dropped receiver means nobody is interested anymore.
        let _ = self.send(change);
    }
}

/// Watcher settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Longest time the watcher thread blocks before checking for shutdown.
    pub poll_interval_ms: u64,

    /// Follow symbolic links when walking directories.
    pub follow_symlinks: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            follow_symlinks: false,
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

enum WatcherInput {
    Notify(notify::Result<Event>),
    Register {
        path: PathBuf,
        reply: oneshot::Sender<RegisterOutcome>,
    },
    Unregister {
        path: PathBuf,
        reply: oneshot::Sender<UnregisterOutcome>,
    },
}

/// Sends requests to the watcher thread.
#[derive(Clone)]
pub struct WatcherHandle {
    inbox: Sender<WatcherInput>,
}

impl WatcherHandle {
    /// Starts watching the tree rooted at `path`.
    pub async fn register(&self, path: PathBuf) -> RegisterOutcome {
        let (reply, answer) = oneshot::channel();
        if self.inbox.send(WatcherInput::Register { path, reply }).is_err() {
            return RegisterOutcome::Error(WatchError::Stopped);
        }
        answer
            .await
            .unwrap_or(RegisterOutcome::Error(WatchError::Stopped))
    }

    /// Stops watching the tree rooted at `path`.
    pub async fn unregister(&self, path: PathBuf) -> UnregisterOutcome {
        let (reply, answer) = oneshot::channel();
        if self.inbox.send(WatcherInput::Unregister { path, reply }).is_err() {
            return UnregisterOutcome::Error(WatchError::Stopped);
        }
        answer
            .await
            .unwrap_or(UnregisterOutcome::Error(WatchError::Stopped))
    }
}

/// Watches directory trees for file changes.
pub struct FileWatcher {
    handle: WatcherHandle,
    thread: JoinHandle<()>,
}

impl FileWatcher {
    /// Creates the OS watcher and starts the watcher thread.
    ///
    /// Nothing is watched until [`WatcherHandle::register`] is called.
    /// The thread runs until `shutdown` is cancelled.
    pub fn spawn<S: ChangeSink>(
        sink: S,
        config: &WatcherConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, WatchError> {
        let (tx, rx) = channel();

        let notify_tx = tx.clone();
        let backend = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = notify_tx.send(WatcherInput::Notify(res));
        })?;

        let tree = WatchTree::new(backend, sink, config.follow_symlinks);
        let poll_interval = config.poll_interval();
        let thread = std::thread::Builder::new()
            .name("sift-watcher".to_string())
            .spawn(move || run(tree, rx, poll_interval, shutdown))
            .map_err(WatchError::Spawn)?;

        Ok(Self {
            handle: WatcherHandle { inbox: tx },
            thread,
        })
    }

    pub fn handle(&self) -> WatcherHandle {
        self.handle.clone()
    }

    /// Blocks until the watcher thread has exited.
    pub fn join(self) {
        if self.thread.join().is_err() {
            error!("Watcher thread panicked");
        }
    }
}

fn run<B, S>(
    mut tree: WatchTree<B, S>,
    inbox: Receiver<WatcherInput>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) where
    B: crate::tree::WatchBackend,
    S: ChangeSink,
{
    debug!("Watcher thread started");

    while !shutdown.is_cancelled() {
        match inbox.recv_timeout(poll_interval) {
            Ok(WatcherInput::Notify(Ok(event))) => tree.handle_event(event),
            Ok(WatcherInput::Notify(Err(e))) => tree.handle_error(e),
            Ok(WatcherInput::Register { path, reply }) => {
                let _ = reply.send(tree.register_tree(&path));
            }
            Ok(WatcherInput::Unregister { path, reply }) => {
                let _ = reply.send(tree.unregister_tree(&path));
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let released = tree.release();
    info!("Watcher stopped, released {} directory watches", released);
}
