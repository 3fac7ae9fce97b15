//! The public face of the indexer.

use crate::config::EngineConfig;
use crate::coordinator::Coordinator;
use crate::error::{EngineError, Result};
use crate::protocol::{CoordinatorMessage, Settled};
use crate::supervisor::JobSupervisor;
use sift_core::{Postings, Tokenizer};
use sift_index::{IndexStats, ShardRegistry};
use sift_watcher::{FileWatcher, RegisterOutcome, UnregisterOutcome};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{info, warn};

/// A live index over every file under the watched directories.
///
/// Queries see every change that was reported before they were issued.
/// Dropping the engine stops its background tasks; [`Engine::shutdown`]
/// also waits for them.
pub struct Engine<T: Tokenizer> {
    tokenizer: Arc<T>,
    index: Arc<ShardRegistry<T::Position>>,
    coordinator: mpsc::UnboundedSender<CoordinatorMessage<T::Position>>,
    coordinator_task: JoinHandle<()>,
    watcher: FileWatcher,
    shutdown: CancellationToken,
    _stop_on_drop: DropGuard,
    #[cfg(test)]
    supervisor: JobSupervisor<T>,
}

impl<T: Tokenizer> Engine<T> {
    /// Starts the watcher thread, the coordinator and the job supervisor.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn start(tokenizer: T, config: EngineConfig) -> Result<Self> {
        let runtime = Handle::try_current()?;
        let shutdown = CancellationToken::new();
        let tokenizer = Arc::new(tokenizer);
        let index = Arc::new(ShardRegistry::new());
        let (coordinator, inbox) = mpsc::unbounded_channel();

        let supervisor = JobSupervisor::new(
            Arc::clone(&tokenizer),
            Arc::clone(&index),
            coordinator.clone(),
            runtime.clone(),
            shutdown.clone(),
        );
        let watcher = FileWatcher::spawn(supervisor.clone(), &config.watcher, shutdown.clone())?;

        let coordinator_task = runtime.spawn(
            Coordinator::new(inbox, watcher.handle(), Arc::clone(&index)).run(shutdown.clone()),
        );

        info!("Engine started");
        Ok(Self {
            tokenizer,
            index,
            coordinator,
            coordinator_task,
            watcher,
            _stop_on_drop: shutdown.clone().drop_guard(),
            shutdown,
            #[cfg(test)]
            supervisor,
        })
    }

    /// Watches `path` and every directory below it, indexing every file
    /// found.
    ///
    /// The outcome arrives as soon as the watch is set up. The returned
    /// [`Settled`] resolves once the initial files are indexed.
    pub async fn add_watch(&self, path: impl AsRef<Path>) -> Result<(RegisterOutcome, Settled)> {
        let (reply, outcome) = oneshot::channel();
        let (settle, settled) = oneshot::channel();
        self.send(CoordinatorMessage::AddWatch {
            path: path.as_ref().to_path_buf(),
            reply,
            settle,
        })?;
        let outcome = outcome.await.map_err(|_| EngineError::ShutDown)?;
        Ok((outcome, Settled(settled)))
    }

    /// Stops watching the tree rooted at `path`; its files drop out of the
    /// index.
    pub async fn remove_watch(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<(UnregisterOutcome, Settled)> {
        let (reply, outcome) = oneshot::channel();
        let (settle, settled) = oneshot::channel();
        self.send(CoordinatorMessage::RemoveWatch {
            path: path.as_ref().to_path_buf(),
            reply,
            settle,
        })?;
        let outcome = outcome.await.map_err(|_| EngineError::ShutDown)?;
        Ok((outcome, Settled(settled)))
    }

    /// Every position of `token` in every indexed document.
    ///
    /// The token is normalized the way file content is; nothing else about
    /// it is interpreted.
    pub async fn query(&self, token: &str) -> Result<Postings<T::Position>> {
        let token = self.tokenizer.normalize(token.trim());
        if token.is_empty() {
            return Err(EngineError::EmptyQuery);
        }

        let (reply, answer) = oneshot::channel();
        self.send(CoordinatorMessage::Query { token, reply })?;
        answer.await.map_err(|_| EngineError::ShutDown)
    }

    /// Index size at the next quiescent point.
    pub async fn stats(&self) -> Result<IndexStats> {
        let (reply, answer) = oneshot::channel();
        self.send(CoordinatorMessage::Stats { reply })?;
        answer.await.map_err(|_| EngineError::ShutDown)
    }

    /// Stops every background task and waits for the watcher thread.
    pub async fn shutdown(self) {
        let Self {
            index,
            coordinator_task,
            watcher,
            shutdown,
            ..
        } = self;

        shutdown.cancel();
        if let Err(e) = coordinator_task.await {
            warn!("Coordinator task failed: {}", e);
        }
        index.shutdown();
        if tokio::task::spawn_blocking(move || watcher.join()).await.is_err() {
            warn!("Failed to join watcher thread");
        }
        info!("Engine stopped");
    }

    fn send(&self, message: CoordinatorMessage<T::Position>) -> Result<()> {
        self.coordinator
            .send(message)
            .map_err(|_| EngineError::ShutDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sift_core::{
        CaseInsensitiveWordTokenizer, LinePos, RetryPolicy, TokenMap, WordTokenizerConfig,
    };
    use sift_watcher::{normalize, ChangeSink, FileChange};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    const SETTLE: Duration = Duration::from_secs(10);

    fn word_tokenizer() -> CaseInsensitiveWordTokenizer {
        CaseInsensitiveWordTokenizer::new(WordTokenizerConfig {
            retry: RetryPolicy::none(),
            ..WordTokenizerConfig::default()
        })
    }

    /// Sleeps before tokenizing and counts tokenizations that ran to the end.
    struct SlowTokenizer {
        inner: CaseInsensitiveWordTokenizer,
        delay: Duration,
        finished: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tokenizer for SlowTokenizer {
        type Position = LinePos;

        fn normalize(&self, raw: &str) -> String {
            self.inner.normalize(raw)
        }

        async fn tokenize(&self, path: &Path) -> sift_core::Result<TokenMap<LinePos>> {
            tokio::time::sleep(self.delay).await;
            let tokens = self.inner.tokenize(path).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            tokens
        }
    }

    fn slow(delay: Duration) -> (SlowTokenizer, Arc<AtomicUsize>) {
        let finished = Arc::new(AtomicUsize::new(0));
        let tokenizer = SlowTokenizer {
            inner: word_tokenizer(),
            delay,
            finished: Arc::clone(&finished),
        };
        (tokenizer, finished)
    }

    fn pos(line: u32, column: u32) -> LinePos {
        LinePos { line, column }
    }

    #[tokio::test]
    async fn test_add_watch_indexes_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("doc.txt");
        fs::write(&doc, "the Quick fox\nfox jumps\nThe end").unwrap();

        let engine = Engine::start(word_tokenizer(), EngineConfig::default()).unwrap();
        let (outcome, settled) = engine.add_watch(dir.path()).await.unwrap();
        assert!(outcome.is_ok());
        timeout(SETTLE, settled.wait()).await.unwrap().unwrap();

        let doc = normalize(&doc).unwrap();
        let fox = engine.query("fox").await.unwrap();
        assert_eq!(fox.len(), 1);
        assert_eq!(fox[&doc], vec![pos(1, 10), pos(2, 0)]);

        let the = engine.query("THE").await.unwrap();
        assert_eq!(the[&doc], vec![pos(1, 0), pos(3, 0)]);

        assert!(engine.query("cat").await.unwrap().is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_watch_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, "hello").unwrap();

        let engine = Engine::start(word_tokenizer(), EngineConfig::default()).unwrap();
        let (first, _) = engine.add_watch(dir.path()).await.unwrap();
        assert!(first.is_ok());

        let (second, _) = engine.add_watch(dir.path()).await.unwrap();
        assert!(matches!(second, RegisterOutcome::AlreadyWatched));

        let (on_file, _) = engine.add_watch(&file).await.unwrap();
        assert!(matches!(on_file, RegisterOutcome::Error(_)));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_watch_forgets_documents() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        fs::write(sub.join("b.txt"), "alpha beta").unwrap();

        let engine = Engine::start(word_tokenizer(), EngineConfig::default()).unwrap();
        let (_, settled) = engine.add_watch(dir.path()).await.unwrap();
        timeout(SETTLE, settled.wait()).await.unwrap().unwrap();
        assert_eq!(engine.query("alpha").await.unwrap().len(), 2);

        let other = tempfile::tempdir().unwrap();
        let (outcome, _) = engine.remove_watch(other.path()).await.unwrap();
        assert!(matches!(outcome, UnregisterOutcome::WasNotWatched));

        let (outcome, _) = engine.remove_watch(&sub).await.unwrap();
        assert!(matches!(outcome, UnregisterOutcome::ParentAlreadyWatched));

        let (outcome, settled) = engine.remove_watch(dir.path()).await.unwrap();
        assert!(outcome.is_ok());
        timeout(SETTLE, settled.wait()).await.unwrap().unwrap();

        assert!(engine.query("alpha").await.unwrap().is_empty());
        assert!(engine.query("beta").await.unwrap().is_empty());
        assert_eq!(engine.stats().await.unwrap().documents, 0);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let engine = Engine::start(word_tokenizer(), EngineConfig::default()).unwrap();
        assert!(matches!(engine.query("").await, Err(EngineError::EmptyQuery)));
        assert!(matches!(engine.query("   ").await, Err(EngineError::EmptyQuery)));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_replaces_old_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("doc.txt");
        fs::write(&doc, "alpha beta").unwrap();

        let engine = Engine::start(word_tokenizer(), EngineConfig::default()).unwrap();
        engine.supervisor.on_change(FileChange::Created(doc.clone()));
        assert_eq!(engine.query("alpha").await.unwrap()[&doc], vec![pos(1, 0)]);

        fs::write(&doc, "gamma\nbeta").unwrap();
        engine.supervisor.on_change(FileChange::Modified(doc.clone()));

        assert!(engine.query("alpha").await.unwrap().is_empty());
        assert_eq!(engine.query("gamma").await.unwrap()[&doc], vec![pos(1, 0)]);
        assert_eq!(engine.query("beta").await.unwrap()[&doc], vec![pos(2, 0)]);

        // Same content again leaves the same state.
        engine.supervisor.on_change(FileChange::Modified(doc.clone()));
        assert_eq!(engine.query("beta").await.unwrap()[&doc], vec![pos(2, 0)]);
        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.tokens, 2);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_removes_every_token() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("doc.txt");
        let other = dir.path().join("other.txt");
        fs::write(&doc, "apple banana cherry").unwrap();
        fs::write(&other, "banana").unwrap();

        let engine = Engine::start(word_tokenizer(), EngineConfig::default()).unwrap();
        engine.supervisor.on_change(FileChange::Created(doc.clone()));
        engine.supervisor.on_change(FileChange::Created(other.clone()));
        assert_eq!(engine.query("banana").await.unwrap().len(), 2);

        engine.supervisor.on_change(FileChange::Deleted(doc.clone()));
        assert!(engine.query("apple").await.unwrap().is_empty());
        assert!(engine.query("cherry").await.unwrap().is_empty());
        let banana = engine.query("banana").await.unwrap();
        assert_eq!(banana.keys().collect::<Vec<_>>(), vec![&other]);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_tokenization_keeps_previous_entries() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("doc.txt");
        fs::write(&doc, "kept").unwrap();

        let engine = Engine::start(word_tokenizer(), EngineConfig::default()).unwrap();
        engine.supervisor.on_change(FileChange::Created(doc.clone()));
        assert_eq!(engine.query("kept").await.unwrap().len(), 1);

        // The file is gone but only a modification was reported.
        fs::remove_file(&doc).unwrap();
        engine.supervisor.on_change(FileChange::Modified(doc.clone()));
        assert_eq!(engine.query("kept").await.unwrap()[&doc], vec![pos(1, 0)]);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_rapid_changes_commit_latest_content_once() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("doc.txt");
        let (tokenizer, finished) = slow(Duration::from_millis(200));

        let engine = Engine::start(tokenizer, EngineConfig::default()).unwrap();
        for version in 0..10 {
            fs::write(&doc, format!("shared version{}", version)).unwrap();
            engine.supervisor.on_change(FileChange::Modified(doc.clone()));
        }

        let latest = engine.query("version9").await.unwrap();
        assert_eq!(latest[&doc], vec![pos(1, 7)]);
        for version in 0..9 {
            let stale = engine.query(&format!("version{}", version)).await.unwrap();
            assert!(stale.is_empty(), "version{} still indexed", version);
        }
        assert_eq!(finished.load(Ordering::SeqCst), 1);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_cancels_running_index_job() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("doc.txt");
        fs::write(&doc, "ephemeral words").unwrap();
        let (tokenizer, finished) = slow(Duration::from_millis(200));

        let engine = Engine::start(tokenizer, EngineConfig::default()).unwrap();
        engine.supervisor.on_change(FileChange::Created(doc.clone()));
        engine.supervisor.on_change(FileChange::Deleted(doc.clone()));

        assert!(engine.query("ephemeral").await.unwrap().is_empty());
        assert!(engine.query("words").await.unwrap().is_empty());
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert_eq!(engine.stats().await.unwrap().documents, 0);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_query_waits_for_running_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let (tokenizer, finished) = slow(Duration::from_millis(150));
        let docs: Vec<PathBuf> = (0..5).map(|i| dir.path().join(format!("{}.txt", i))).collect();
        for doc in &docs {
            fs::write(doc, "common ground").unwrap();
        }

        let engine = Engine::start(tokenizer, EngineConfig::default()).unwrap();
        for doc in &docs {
            engine.supervisor.on_change(FileChange::Created(doc.clone()));
        }

        let common = engine.query("common").await.unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 5);
        assert_eq!(common.len(), 5);
        for doc in &docs {
            assert_eq!(common[doc], vec![pos(1, 0)]);
        }

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_file_created_under_watch_is_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::start(word_tokenizer(), EngineConfig::default()).unwrap();
        let (_, settled) = engine.add_watch(dir.path()).await.unwrap();
        timeout(SETTLE, settled.wait()).await.unwrap().unwrap();

        let doc = normalize(&dir.path().join("late.txt")).unwrap();
        fs::write(&doc, "arrived").unwrap();

        // OS events arrive asynchronously; poll until the watcher reports it.
        let mut found = false;
        for _ in 0..100 {
            if !engine.query("arrived").await.unwrap().is_empty() {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(found);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_deleted_directory_drops_its_files() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("nested");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("inner.txt"), "buried treasure").unwrap();

        let engine = Engine::start(word_tokenizer(), EngineConfig::default()).unwrap();
        let (_, settled) = engine.add_watch(dir.path()).await.unwrap();
        timeout(SETTLE, settled.wait()).await.unwrap().unwrap();
        assert_eq!(engine.query("treasure").await.unwrap().len(), 1);

        fs::remove_dir_all(&sub).unwrap();

        let mut gone = false;
        for _ in 0..100 {
            if engine.query("treasure").await.unwrap().is_empty() {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(gone);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_finished_jobs_leave_job_map() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("doc.txt");
        fs::write(&doc, "tidy").unwrap();

        let engine = Engine::start(word_tokenizer(), EngineConfig::default()).unwrap();
        engine.supervisor.on_change(FileChange::Created(doc.clone()));
        engine.query("tidy").await.unwrap();

        let mut remaining = engine.supervisor.active_jobs();
        for _ in 0..100 {
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            remaining = engine.supervisor.active_jobs();
        }
        assert_eq!(remaining, 0);

        engine.shutdown().await;
    }
}
