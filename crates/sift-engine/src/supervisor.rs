//! Per-document indexing jobs.
//!
//! Every change the watcher reports becomes a job. At most one job per
//! document is current; scheduling a new one cancels the old. A job writes
//! its mutations in one batch while holding its entry in the job map, and
//! only if it is still the current job, so a document's index entries
//! always come from exactly one tokenization.

use crate::protocol::CoordinatorMessage;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sift_core::{TokenMap, Tokenizer};
use sift_index::{PlannedMutation, ShardRegistry};
use sift_watcher::{ChangeSink, FileChange};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Index,
    Forget,
}

struct JobEntry {
    id: u64,
    cancel: CancellationToken,
}

struct SupervisorInner<T: Tokenizer> {
    tokenizer: Arc<T>,
    index: Arc<ShardRegistry<T::Position>>,
    coordinator: mpsc::UnboundedSender<CoordinatorMessage<T::Position>>,
    jobs: DashMap<PathBuf, JobEntry>,
    next_id: AtomicU64,
    runtime: Handle,
    shutdown: CancellationToken,
}

/// Turns file changes into indexing jobs.
pub(crate) struct JobSupervisor<T: Tokenizer> {
    inner: Arc<SupervisorInner<T>>,
}

impl<T: Tokenizer> Clone for JobSupervisor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Tokenizer> JobSupervisor<T> {
    pub(crate) fn new(
        tokenizer: Arc<T>,
        index: Arc<ShardRegistry<T::Position>>,
        coordinator: mpsc::UnboundedSender<CoordinatorMessage<T::Position>>,
        runtime: Handle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                tokenizer,
                index,
                coordinator,
                jobs: DashMap::new(),
                next_id: AtomicU64::new(1),
                runtime,
                shutdown,
            }),
        }
    }

    /// Number of documents with a job that has not cleaned up yet.
    #[cfg(test)]
    pub(crate) fn active_jobs(&self) -> usize {
        self.inner.jobs.len()
    }

    fn schedule(&self, document: PathBuf, kind: JobKind) {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return;
        }

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = inner.shutdown.child_token();

        match inner.jobs.entry(document.clone()) {
            Entry::Occupied(mut occupied) => {
                debug!(
                    "Job {} supersedes job {} for {}",
                    id,
                    occupied.get().id,
                    document.display()
                );
                occupied.get().cancel.cancel();
                occupied.insert(JobEntry {
                    id,
                    cancel: cancel.clone(),
                });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(JobEntry {
                    id,
                    cancel: cancel.clone(),
                });
            }
        }

        // Counted before the task exists, so the coordinator can never see
        // the document's change without also seeing the busy job.
        let lease = JobLease::acquire(Arc::clone(inner), document, id);
        inner
            .runtime
            .spawn(run_job(Arc::clone(inner), lease, kind, cancel));
    }
}

impl<T: Tokenizer> ChangeSink for JobSupervisor<T> {
    fn on_change(&self, change: FileChange) {
        match change {
            FileChange::Created(path) | FileChange::Modified(path) => {
                self.schedule(path, JobKind::Index)
            }
            FileChange::Deleted(path) => self.schedule(path, JobKind::Forget),
        }
    }
}

/// Announces a job to the coordinator and retires it on drop, however the
/// job ends.
struct JobLease<T: Tokenizer> {
    inner: Arc<SupervisorInner<T>>,
    document: PathBuf,
    id: u64,
}

impl<T: Tokenizer> JobLease<T> {
    fn acquire(inner: Arc<SupervisorInner<T>>, document: PathBuf, id: u64) -> Self {
        let _ = inner.coordinator.send(CoordinatorMessage::WorkerStart);
        Self {
            inner,
            document,
            id,
        }
    }
}

impl<T: Tokenizer> Drop for JobLease<T> {
    fn drop(&mut self) {
        let _ = self.inner.coordinator.send(CoordinatorMessage::WorkerEnd);
        let id = self.id;
        self.inner
            .jobs
            .remove_if(&self.document, |_, entry| entry.id == id);
    }
}

async fn run_job<T: Tokenizer>(
    inner: Arc<SupervisorInner<T>>,
    lease: JobLease<T>,
    kind: JobKind,
    cancel: CancellationToken,
) {
    let document = lease.document.as_path();

    let tokens = match kind {
        JobKind::Forget => None,
        JobKind::Index => {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Job {} for {} cancelled", lease.id, document.display());
                    return;
                }
                result = inner.tokenizer.tokenize(document) => result,
            };
            match result {
                Ok(tokens) => Some(tokens),
                Err(e) => {
                    warn!("Failed to index {}: {}", document.display(), e);
                    return;
                }
            }
        }
    };

    let Some(applied) = commit(&inner, document, lease.id, &cancel, tokens) else {
        debug!("Job {} for {} superseded before commit", lease.id, document.display());
        return;
    };

    for done in applied {
        let _ = done.await;
    }
    debug!("Job {} for {} done ({:?})", lease.id, document.display(), kind);
}

/// Sends every mutation of a job, or none of them.
///
/// Holding the job map entry keeps a newer job from replacing this one
/// halfway through the batch. `None` means the job is no longer current.
fn commit<T: Tokenizer>(
    inner: &SupervisorInner<T>,
    document: &Path,
    id: u64,
    cancel: &CancellationToken,
    tokens: Option<TokenMap<T::Position>>,
) -> Option<Vec<oneshot::Receiver<()>>> {
    let current = inner.jobs.get(document)?;
    if current.id != id || cancel.is_cancelled() {
        return None;
    }

    let planned = match tokens {
        Some(tokens) => inner.index.plan_update(document, tokens),
        None => inner.index.plan_forget(document),
    };

    let mut applied = Vec::with_capacity(planned.len());
    for PlannedMutation {
        shard,
        mutation,
        applied: done,
    } in planned
    {
        match shard.send(mutation) {
            Ok(()) => applied.push(done),
            Err(e) => warn!("Dropping mutation for {}: {}", document.display(), e),
        }
    }

    drop(current);
    Some(applied)
}
