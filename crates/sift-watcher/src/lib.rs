//! Sift Watcher - directory tree watching
//!
//! This crate handles the file system side of things:
//! - Walking directory trees and registering every directory with the OS
//! - Turning OS notifications into created/modified/deleted file changes
//! - Remembering which files live in which directory, so deleting a
//!   directory reports every file below it even when the OS does not
//!
//! All watcher state lives on one thread; see [`FileWatcher`].

mod error;
mod tree;
mod watcher;

pub use error::{RegisterOutcome, UnregisterOutcome, WatchError};
pub use tree::{normalize, WatchBackend, WatchTree};
pub use watcher::{ChangeSink, FileChange, FileWatcher, WatcherConfig, WatcherHandle};
