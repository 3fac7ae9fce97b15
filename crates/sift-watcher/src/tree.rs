//! Watched directory trees and their nesting map.
//!
//! The OS does not reliably tell us about every file below a deleted
//! directory: the directory's own delete notification may arrive first,
//! or be the only one. So we remember, for every directory, which child
//! directories and files we have seen, and when a watched directory goes
//! away we walk that record breadth-first to unwatch everything below it
//! and report every file in it as deleted.

use crate::error::{RegisterOutcome, UnregisterOutcome, WatchError};
use crate::watcher::{ChangeSink, FileChange};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Registration of single directories with the OS.
///
/// Implemented for every `notify` watcher; directories are always watched
/// non-recursively because the tree walk registers each one itself.
pub trait WatchBackend {
    fn watch_dir(&mut self, dir: &Path) -> notify::Result<()>;
    fn unwatch_dir(&mut self, dir: &Path) -> notify::Result<()>;
}

impl<W: notify::Watcher> WatchBackend for W {
    fn watch_dir(&mut self, dir: &Path) -> notify::Result<()> {
        notify::Watcher::watch(self, dir, RecursiveMode::NonRecursive)
    }

    fn unwatch_dir(&mut self, dir: &Path) -> notify::Result<()> {
        notify::Watcher::unwatch(self, dir)
    }
}

/// Children recorded for one directory.
#[derive(Debug, Default, Clone)]
struct DirectoryContent {
    dirs: HashSet<PathBuf>,
    files: HashSet<PathBuf>,
}

impl DirectoryContent {
    fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.files.is_empty()
    }
}

/// State of every watched tree. Owned by exactly one thread.
pub struct WatchTree<B, S> {
    backend: B,
    sink: S,
    follow_symlinks: bool,
    /// Directories currently registered with the backend.
    watched: HashSet<PathBuf>,
    /// Directory → children seen so far. May hold entries for unwatched
    /// parents of watched roots, so a later registration of the parent
    /// links up with the existing subtree.
    nesting: HashMap<PathBuf, DirectoryContent>,
}

impl<B: WatchBackend, S: ChangeSink> WatchTree<B, S> {
    pub fn new(backend: B, sink: S, follow_symlinks: bool) -> Self {
        Self {
            backend,
            sink,
            follow_symlinks,
            watched: HashSet::new(),
            nesting: HashMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether `dir` is registered with the backend.
    pub fn is_watched(&self, dir: &Path) -> bool {
        self.watched.contains(dir)
    }

    /// Number of directories registered with the backend.
    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    /// Whether `file` is recorded in the nesting map.
    pub fn is_tracked(&self, file: &Path) -> bool {
        file.parent()
            .and_then(|parent| self.nesting.get(parent))
            .map_or(false, |content| content.files.contains(file))
    }

    /// Starts watching the tree rooted at `path`.
    ///
    /// Every directory below it is registered, every regular file is
    /// reported as created. Subtrees that are already watched are skipped.
    pub fn register_tree(&mut self, path: &Path) -> RegisterOutcome {
        let root = match normalize(path) {
            Ok(root) => root,
            Err(e) => return RegisterOutcome::Error(WatchError::io(path, e)),
        };

        if self.watched.contains(&root) {
            return RegisterOutcome::AlreadyWatched;
        }
        if !root.is_dir() {
            return RegisterOutcome::Error(WatchError::NotADirectory(root));
        }

        let before = self.watched.len();
        match self.walk(&root) {
            Ok(()) => {
                info!(
                    "Watching {} ({} directories)",
                    root.display(),
                    self.watched.len() - before
                );
                RegisterOutcome::Ok
            }
            Err(e) => {
                warn!("Failed to watch {}: {}", root.display(), e);
                RegisterOutcome::Error(e)
            }
        }
    }

    /// Stops watching the tree rooted at `path` and reports every file in
    /// it as deleted.
    ///
    /// Only roots can be unregistered: a directory whose parent is watched
    /// belongs to the parent's tree.
    pub fn unregister_tree(&mut self, path: &Path) -> UnregisterOutcome {
        let root = match normalize(path) {
            Ok(root) => root,
            Err(e) => return UnregisterOutcome::Error(WatchError::io(path, e)),
        };

        if !self.watched.contains(&root) {
            return UnregisterOutcome::WasNotWatched;
        }
        if root.parent().map_or(false, |parent| self.watched.contains(parent)) {
            return UnregisterOutcome::ParentAlreadyWatched;
        }

        match self.cascade(&root) {
            None => {
                info!("Stopped watching {}", root.display());
                UnregisterOutcome::Ok
            }
            Some(e) => UnregisterOutcome::Error(e),
        }
    }

    /// Applies one OS notification.
    pub fn handle_event(&mut self, event: Event) {
        if event.need_rescan() {
            warn!("Watch backend dropped events; some changes may be missed");
        }

        let paths: Vec<PathBuf> = event
            .paths
            .iter()
            .map(|p| normalize(p).unwrap_or_else(|_| p.clone()))
            .collect();

        match event.kind {
            EventKind::Create(_) => paths.iter().for_each(|p| self.path_appeared(p)),
            EventKind::Remove(_) => paths.iter().for_each(|p| self.path_vanished(p)),
            EventKind::Modify(ModifyKind::Name(mode)) => match (mode, paths.as_slice()) {
                (RenameMode::Both, [from, to]) => {
                    self.path_vanished(from);
                    self.path_appeared(to);
                }
                (RenameMode::From, _) => paths.iter().for_each(|p| self.path_vanished(p)),
                (RenameMode::To, _) => paths.iter().for_each(|p| self.path_appeared(p)),
                _ => {
                    for p in &paths {
                        if p.exists() {
                            self.path_appeared(p);
                        } else {
                            self.path_vanished(p);
                        }
                    }
                }
            },
            EventKind::Modify(ModifyKind::Metadata(_)) => {}
            EventKind::Modify(_) => paths.iter().for_each(|p| self.path_modified(p)),
            _ => {}
        }
    }

    /// Applies an error reported by the OS notification subsystem.
    ///
    /// If the error names a watched directory, the tree rooted there is
    /// dropped; everything else keeps being watched.
    pub fn handle_error(&mut self, err: notify::Error) {
        let broken: Vec<PathBuf> = err
            .paths
            .iter()
            .filter_map(|p| normalize(p).ok())
            .filter(|p| self.watched.contains(p))
            .collect();

        if broken.is_empty() {
            warn!("Watch error: {}", err);
            return;
        }

        for dir in broken {
            error!("Watch error on {}, no longer watching it: {}", dir.display(), err);
            if let Some(e) = self.cascade(&dir) {
                warn!("Failed to release {}: {}", dir.display(), e);
            }
        }
    }

    /// Releases every watch and returns how many there were.
    pub fn release(mut self) -> usize {
        let count = self.watched.len();
        for dir in self.watched.drain() {
            if let Err(e) = self.backend.unwatch_dir(&dir) {
                debug!("Failed to unwatch {}: {}", dir.display(), e);
            }
        }
        count
    }

    fn walk(&mut self, root: &Path) -> Result<(), WatchError> {
        let mut entries = WalkDir::new(root).follow_links(self.follow_symlinks).into_iter();

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(e.into()),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                if self.watched.contains(entry.path()) {
                    entries.skip_current_dir();
                    continue;
                }
                self.register_dir(entry.path())?;
            } else if file_type.is_file() {
                self.file_created(entry.path());
            }
        }

        Ok(())
    }

    fn register_dir(&mut self, dir: &Path) -> Result<(), WatchError> {
        self.backend.watch_dir(dir)?;
        self.watched.insert(dir.to_path_buf());
        if let Some(parent) = dir.parent() {
            self.nesting
                .entry(parent.to_path_buf())
                .or_default()
                .dirs
                .insert(dir.to_path_buf());
        }
        debug!("Registered {}", dir.display());
        Ok(())
    }

    fn unregister_dir(&mut self, dir: &Path) -> Result<(), WatchError> {
        if let Some(parent) = dir.parent() {
            if let Some(content) = self.nesting.get_mut(parent) {
                content.dirs.remove(dir);
                if content.is_empty() && !self.watched.contains(parent) {
                    self.nesting.remove(parent);
                }
            }
        }

        if !self.watched.remove(dir) {
            return Ok(());
        }
        match self.backend.unwatch_dir(dir) {
            Ok(()) => Ok(()),
            // The OS drops watches of deleted directories on its own.
            Err(e) if matches!(e.kind, notify::ErrorKind::WatchNotFound) || !dir.exists() => {
                debug!("Watch on {} already gone: {}", dir.display(), e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Breadth-first teardown of everything recorded below `root`.
    /// Returns the first unwatch failure, after finishing the teardown.
    fn cascade(&mut self, root: &Path) -> Option<WatchError> {
        let mut queue = VecDeque::from([root.to_path_buf()]);
        let mut visited = HashSet::from([root.to_path_buf()]);
        let mut order = Vec::new();
        let mut first_error = None;

        while let Some(dir) = queue.pop_front() {
            let content = self.nesting.get(&dir).cloned().unwrap_or_default();

            for child in content.dirs {
                if visited.insert(child.clone()) {
                    queue.push_back(child);
                }
            }
            for file in content.files {
                self.file_deleted(&file);
            }
            if let Err(e) = self.unregister_dir(&dir) {
                warn!("Failed to unwatch {}: {}", dir.display(), e);
                first_error.get_or_insert(e);
            }
            order.push(dir);
        }

        // Entries go only once their whole subtree has been torn down.
        for dir in order.iter().rev() {
            self.nesting.remove(dir);
        }

        debug!("Cascaded {} directories below {}", order.len(), root.display());
        first_error
    }

    fn path_appeared(&mut self, path: &Path) {
        if path.is_file() {
            self.file_created(path);
        } else if path.is_dir() && !self.watched.contains(path) {
            if let Err(e) = self.walk(path) {
                warn!("Failed to watch new directory {}: {}", path.display(), e);
            }
        }
    }

    fn path_vanished(&mut self, path: &Path) {
        if self.watched.contains(path) {
            if let Some(e) = self.cascade(path) {
                warn!("Failed to release {}: {}", path.display(), e);
            }
        } else {
            self.file_deleted(path);
        }
    }

    fn path_modified(&mut self, path: &Path) {
        if self.is_tracked(path) && path.is_file() {
            debug!("File modified: {}", path.display());
            self.sink.on_change(FileChange::Modified(path.to_path_buf()));
        }
    }

    fn file_created(&mut self, path: &Path) {
        if let Some(parent) = path.parent() {
            self.nesting
                .entry(parent.to_path_buf())
                .or_default()
                .files
                .insert(path.to_path_buf());
        }
        debug!("File created: {}", path.display());
        self.sink.on_change(FileChange::Created(path.to_path_buf()));
    }

    fn file_deleted(&mut self, path: &Path) {
        let removed = path
            .parent()
            .and_then(|parent| self.nesting.get_mut(parent))
            .map_or(false, |content| content.files.remove(path));

        if removed {
            debug!("File deleted: {}", path.display());
            self.sink.on_change(FileChange::Deleted(path.to_path_buf()));
        }
    }
}

/// Makes `path` absolute and folds `.` and `..` without touching the
/// filesystem, so paths of deleted entries normalize too.
pub fn normalize(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}
