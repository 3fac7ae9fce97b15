//! Watch errors and the outcomes of watch requests.
//!
//! "Already watched" and friends are ordinary answers, not failures, so
//! they show up as outcome variants. Only real failures become a
//! [`WatchError`].

use std::path::PathBuf;
use thiserror::Error;

/// Things that can go wrong while watching a directory tree.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The path exists but is not a directory, or does not exist at all.
    #[error("'{0}' is not a directory")]
    NotADirectory(PathBuf),

    /// Filesystem access failed.
    #[error("failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Walking the directory tree failed at its root.
    #[error("failed to walk directory tree: {0}")]
    Walk(#[from] walkdir::Error),

    /// The OS notification subsystem refused or lost a watch.
    #[error("watch subsystem error: {0}")]
    Notify(#[from] notify::Error),

    /// The watcher thread could not be started.
    #[error("failed to start watcher thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The watcher thread is gone.
    #[error("watcher has stopped")]
    Stopped,
}

impl WatchError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Answer to a request to watch a directory tree.
#[derive(Debug)]
pub enum RegisterOutcome {
    Ok,
    AlreadyWatched,
    Error(WatchError),
}

impl RegisterOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Answer to a request to stop watching a directory tree.
#[derive(Debug)]
pub enum UnregisterOutcome {
    Ok,
    /// The directory is part of a larger watched tree; unwatch that instead.
    ParentAlreadyWatched,
    WasNotWatched,
    Error(WatchError),
}

impl UnregisterOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}
