//! The coordinator owns the quiescence barrier.
//!
//! It counts busy jobs through `WorkerStart`/`WorkerEnd` and holds queries
//! back until the mailbox is drained and no job is running. At that point
//! every lookup is forwarded to its shard. Shard mailboxes are FIFO, so a
//! forwarded lookup is answered after every mutation the finished jobs
//! sent.

use crate::protocol::CoordinatorMessage;
use sift_core::{Position, Postings};
use sift_index::{IndexStats, ShardRegistry};
use sift_watcher::WatcherHandle;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum Pending<P> {
    Query {
        token: String,
        reply: oneshot::Sender<Postings<P>>,
    },
    Stats {
        reply: oneshot::Sender<IndexStats>,
    },
}

pub(crate) struct Coordinator<P> {
    inbox: mpsc::UnboundedReceiver<CoordinatorMessage<P>>,
    watcher: WatcherHandle,
    index: Arc<ShardRegistry<P>>,
    busy_workers: usize,
    pending: Vec<Pending<P>>,
    settles: Vec<oneshot::Sender<()>>,
}

impl<P: Position> Coordinator<P> {
    pub(crate) fn new(
        inbox: mpsc::UnboundedReceiver<CoordinatorMessage<P>>,
        watcher: WatcherHandle,
        index: Arc<ShardRegistry<P>>,
    ) -> Self {
        Self {
            inbox,
            watcher,
            index,
            busy_workers: 0,
            pending: Vec::new(),
            settles: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        debug!("Coordinator started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let message = match self.inbox.try_recv() {
                Ok(message) => message,
                Err(mpsc::error::TryRecvError::Disconnected) => break,
                Err(mpsc::error::TryRecvError::Empty) => {
                    if self.busy_workers == 0 {
                        self.flush();
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        message = self.inbox.recv() => match message {
                            Some(message) => message,
                            None => break,
                        },
                    }
                }
            };

            self.handle(message).await;
        }

        if !self.pending.is_empty() {
            warn!("Coordinator stopping with {} unanswered requests", self.pending.len());
        }
        info!("Coordinator stopped");
    }

    async fn handle(&mut self, message: CoordinatorMessage<P>) {
        match message {
            CoordinatorMessage::WorkerStart => {
                self.busy_workers += 1;
            }
            CoordinatorMessage::WorkerEnd => {
                if self.busy_workers == 0 {
                    warn!("WorkerEnd received with no busy workers");
                }
                self.busy_workers = self.busy_workers.saturating_sub(1);
            }
            CoordinatorMessage::Query { token, reply } => {
                self.pending.push(Pending::Query { token, reply });
            }
            CoordinatorMessage::Stats { reply } => {
                self.pending.push(Pending::Stats { reply });
            }
            CoordinatorMessage::AddWatch {
                path,
                reply,
                settle,
            } => {
                // The watcher reports every initial file to the supervisor,
                // which announces each job before the outcome comes back.
                let outcome = self.watcher.register(path.clone()).await;
                debug!("Add watch {}: {:?}", path.display(), outcome);
                let _ = reply.send(outcome);
                self.settles.push(settle);
            }
            CoordinatorMessage::RemoveWatch {
                path,
                reply,
                settle,
            } => {
                let outcome = self.watcher.unregister(path.clone()).await;
                debug!("Remove watch {}: {:?}", path.display(), outcome);
                let _ = reply.send(outcome);
                self.settles.push(settle);
            }
        }
    }

    /// Runs at a quiescent point: answers everything that was waiting.
    fn flush(&mut self) {
        if !self.pending.is_empty() {
            debug!("Quiescent, answering {} requests", self.pending.len());
        }

        for pending in self.pending.drain(..) {
            match pending {
                Pending::Query { token, reply } => self.index.lookup_into(&token, reply),
                Pending::Stats { reply } => {
                    let index = Arc::clone(&self.index);
                    tokio::spawn(async move {
                        match index.stats().await {
                            Ok(stats) => {
                                let _ = reply.send(stats);
                            }
                            Err(e) => warn!("Failed to collect index stats: {}", e),
                        }
                    });
                }
            }
        }

        for settle in self.settles.drain(..) {
            let _ = settle.send(());
        }
    }
}
