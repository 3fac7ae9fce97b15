//! One partition of the index and the worker that owns it.
//!
//! A shard holds every token whose leading character maps to it. Its trie
//! and per-document token sets live inside a single tokio task; everything
//! else talks to it through the mailbox, so mutations and lookups are
//! applied strictly in the order they were sent.

use crate::error::IndexError;
use crate::trie::Trie;
use serde::Serialize;
use sift_core::{Position, Postings, TokenMap};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Replaces one document's tokens inside one shard.
///
/// An empty token map means "forget this document here".
#[derive(Debug)]
pub struct IndexMutation<P> {
    pub document: PathBuf,
    pub tokens: TokenMap<P>,
    done: oneshot::Sender<()>,
}

impl<P> IndexMutation<P> {
    /// Creates a mutation and the receiver that fires once it was applied.
    pub fn new(document: PathBuf, tokens: TokenMap<P>) -> (Self, oneshot::Receiver<()>) {
        let (done, applied) = oneshot::channel();
        (
            Self {
                document,
                tokens,
                done,
            },
            applied,
        )
    }

    /// A mutation that removes `document` from the shard.
    pub fn forget(document: PathBuf) -> (Self, oneshot::Receiver<()>) {
        Self::new(document, TokenMap::new())
    }

    pub fn is_forget(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Size of a shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShardStats {
    pub documents: usize,
    pub tokens: usize,
}

pub(crate) enum ShardMessage<P> {
    Mutate(IndexMutation<P>),
    Lookup {
        token: String,
        reply: oneshot::Sender<Postings<P>>,
    },
    Stats {
        reply: oneshot::Sender<ShardStats>,
    },
    Documents {
        reply: oneshot::Sender<Vec<PathBuf>>,
    },
}

/// The data a shard worker owns.
pub struct ShardState<P> {
    trie: Trie<P>,
    document_tokens: HashMap<PathBuf, HashSet<String>>,
}

impl<P> Default for ShardState<P> {
    fn default() -> Self {
        Self {
            trie: Trie::new(),
            document_tokens: HashMap::new(),
        }
    }
}

impl<P: Clone> ShardState<P> {
    /// Makes `tokens` the complete set this shard holds for `document`.
    ///
    /// Tokens the document had before but not anymore are removed, the rest
    /// are overwritten. Applying the same map twice is a no-op.
    pub fn apply_update(&mut self, document: &Path, tokens: TokenMap<P>) {
        let previous = self.document_tokens.remove(document).unwrap_or_default();

        for stale in previous.iter().filter(|t| !tokens.contains_key(*t)) {
            self.trie.remove(stale, document);
        }

        if tokens.is_empty() {
            return;
        }

        let mut current = HashSet::with_capacity(tokens.len());
        for (token, positions) in tokens {
            self.trie.insert(&token, document, positions);
            current.insert(token);
        }
        self.document_tokens.insert(document.to_path_buf(), current);
    }

    /// Postings for exactly `token`; empty when nothing matches.
    pub fn lookup(&self, token: &str) -> Postings<P> {
        self.trie.lookup(token).cloned().unwrap_or_default()
    }

    /// Tokens currently recorded for `document`.
    pub fn document_tokens(&self, document: &Path) -> Option<&HashSet<String>> {
        self.document_tokens.get(document)
    }

    /// Every document with at least one token in this shard.
    pub fn documents(&self) -> Vec<PathBuf> {
        self.document_tokens.keys().cloned().collect()
    }

    pub fn stats(&self) -> ShardStats {
        let distinct: HashSet<&String> = self.document_tokens.values().flatten().collect();
        ShardStats {
            documents: self.document_tokens.len(),
            tokens: distinct.len(),
        }
    }
}

/// Cheap, cloneable address of a running shard.
pub struct ShardHandle<P> {
    key: char,
    mailbox: mpsc::UnboundedSender<ShardMessage<P>>,
}

impl<P> Clone for ShardHandle<P> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            mailbox: self.mailbox.clone(),
        }
    }
}

impl<P: Position> ShardHandle<P> {
    /// Spawns the worker for shard `key` on the current tokio runtime.
    ///
    /// The worker runs until every handle is dropped.
    pub fn spawn(key: char) -> Self {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        tokio::spawn(run_shard(key, inbox));
        debug!("Spawned shard '{}'", key);
        Self { key, mailbox }
    }

    /// Queues a mutation. Does not wait for it to be applied.
    pub fn send(&self, mutation: IndexMutation<P>) -> Result<(), IndexError> {
        self.mailbox
            .send(ShardMessage::Mutate(mutation))
            .map_err(|_| IndexError::ShardClosed(self.key))
    }

    /// Queues a lookup whose answer goes straight to `reply`.
    pub fn lookup_into(&self, token: String, reply: oneshot::Sender<Postings<P>>) {
        // A closed shard drops `reply`, which the caller sees as a closed channel.
        let _ = self.mailbox.send(ShardMessage::Lookup { token, reply });
    }

    /// Looks `token` up after every mutation queued so far.
    pub async fn lookup(&self, token: &str) -> Result<Postings<P>, IndexError> {
        let (reply, answer) = oneshot::channel();
        self.lookup_into(token.to_string(), reply);
        answer.await.map_err(|_| IndexError::ShardClosed(self.key))
    }

    pub async fn stats(&self) -> Result<ShardStats, IndexError> {
        let (reply, answer) = oneshot::channel();
        self.request(ShardMessage::Stats { reply }, answer).await
    }

    pub async fn documents(&self) -> Result<Vec<PathBuf>, IndexError> {
        let (reply, answer) = oneshot::channel();
        self.request(ShardMessage::Documents { reply }, answer).await
    }

    async fn request<T>(
        &self,
        message: ShardMessage<P>,
        answer: oneshot::Receiver<T>,
    ) -> Result<T, IndexError> {
        self.mailbox
            .send(message)
            .map_err(|_| IndexError::ShardClosed(self.key))?;
        answer.await.map_err(|_| IndexError::ShardClosed(self.key))
    }
}

async fn run_shard<P: Position>(key: char, mut inbox: mpsc::UnboundedReceiver<ShardMessage<P>>) {
    let mut state = ShardState::default();

    while let Some(message) = inbox.recv().await {
        match message {
            ShardMessage::Mutate(mutation) => {
                let IndexMutation {
                    document,
                    tokens,
                    done,
                } = mutation;
                state.apply_update(&document, tokens);
                let _ = done.send(());
            }
            ShardMessage::Lookup { token, reply } => {
                let _ = reply.send(state.lookup(&token));
            }
            ShardMessage::Stats { reply } => {
                let _ = reply.send(state.stats());
            }
            ShardMessage::Documents { reply } => {
                let _ = reply.send(state.documents());
            }
        }
    }

    debug!("Shard '{}' stopped", key);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(entries: &[(&str, &[u32])]) -> TokenMap<u32> {
        entries
            .iter()
            .map(|(t, p)| (t.to_string(), p.to_vec()))
            .collect()
    }

    fn snapshot(state: &ShardState<u32>, vocabulary: &[&str]) -> Vec<(String, Vec<(PathBuf, Vec<u32>)>)> {
        vocabulary
            .iter()
            .map(|t| {
                let mut postings: Vec<_> = state.lookup(t).into_iter().collect();
                postings.sort();
                (t.to_string(), postings)
            })
            .collect()
    }

    #[test]
    fn test_apply_update_is_idempotent() {
        let doc = Path::new("/d.txt");
        let mut state = ShardState::default();
        state.apply_update(doc, tokens(&[("fox", &[1, 2]), ("fog", &[3])]));
        let before = snapshot(&state, &["fox", "fog"]);

        state.apply_update(doc, tokens(&[("fox", &[1, 2]), ("fog", &[3])]));
        assert_eq!(snapshot(&state, &["fox", "fog"]), before);
        assert_eq!(state.document_tokens(doc).unwrap().len(), 2);
    }

    #[test]
    fn test_apply_update_drops_stale_tokens() {
        let doc = Path::new("/d.txt");
        let mut state = ShardState::default();
        state.apply_update(doc, tokens(&[("fox", &[1]), ("fog", &[2])]));
        state.apply_update(doc, tokens(&[("fog", &[9]), ("fig", &[4])]));

        assert!(state.lookup("fox").is_empty());
        assert_eq!(state.lookup("fog")[doc], vec![9]);
        assert_eq!(state.lookup("fig")[doc], vec![4]);
    }

    #[test]
    fn test_forget_removes_document_only() {
        let a = Path::new("/a.txt");
        let b = Path::new("/b.txt");
        let mut state = ShardState::default();
        state.apply_update(a, tokens(&[("fox", &[1])]));
        state.apply_update(b, tokens(&[("fox", &[2])]));

        state.apply_update(a, TokenMap::new());

        let postings = state.lookup("fox");
        assert_eq!(postings.len(), 1);
        assert!(postings.contains_key(b));
        assert!(state.document_tokens(a).is_none());
        assert_eq!(state.stats(), ShardStats { documents: 1, tokens: 1 });
    }

    #[tokio::test]
    async fn test_worker_applies_in_send_order() {
        let shard = ShardHandle::<u32>::spawn('f');
        let doc = PathBuf::from("/d.txt");

        let (first, _) = IndexMutation::new(doc.clone(), tokens(&[("fox", &[1])]));
        let (second, applied) = IndexMutation::new(doc.clone(), tokens(&[("fig", &[2])]));
        shard.send(first).unwrap();
        shard.send(second).unwrap();
        applied.await.unwrap();

        assert!(shard.lookup("fox").await.unwrap().is_empty());
        assert_eq!(shard.lookup("fig").await.unwrap()[&doc], vec![2]);
        assert_eq!(shard.stats().await.unwrap().documents, 1);
    }
}
