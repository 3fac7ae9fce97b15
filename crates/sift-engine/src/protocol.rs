//! Messages understood by the coordinator.
//!
//! Everything that reaches the coordinator goes through one mailbox, so the
//! order in which messages arrive is the order in which they are handled.

use sift_core::Postings;
use sift_index::IndexStats;
use sift_watcher::{RegisterOutcome, UnregisterOutcome};
use std::path::PathBuf;
use tokio::sync::oneshot;

use crate::error::EngineError;

pub(crate) enum CoordinatorMessage<P> {
    /// A job was scheduled and has not finished yet.
    WorkerStart,

    /// A job finished, whatever the outcome.
    WorkerEnd,

    /// Answered at the next quiescent point.
    Query {
        token: String,
        reply: oneshot::Sender<Postings<P>>,
    },

    /// Answered at the next quiescent point.
    Stats {
        reply: oneshot::Sender<IndexStats>,
    },

    AddWatch {
        path: PathBuf,
        reply: oneshot::Sender<RegisterOutcome>,
        settle: oneshot::Sender<()>,
    },

    RemoveWatch {
        path: PathBuf,
        reply: oneshot::Sender<UnregisterOutcome>,
        settle: oneshot::Sender<()>,
    },
}

/// Resolves once every job scheduled by a watch change has finished.
///
/// Returned next to the outcome of [`Engine::add_watch`](crate::Engine::add_watch)
/// and [`Engine::remove_watch`](crate::Engine::remove_watch). Waiting on it is
/// optional.
#[derive(Debug)]
pub struct Settled(pub(crate) oneshot::Receiver<()>);

impl Settled {
    pub async fn wait(self) -> Result<(), EngineError> {
        self.0.await.map_err(|_| EngineError::ShutDown)
    }
}
