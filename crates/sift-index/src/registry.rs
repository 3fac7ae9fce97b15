//! The index: every shard, keyed by leading character.
//!
//! Shards are spawned lazily the first time a write touches their
//! character. The map itself is a `DashMap`, so concurrent jobs can look up
//! or create shards without a global lock.

use crate::error::IndexError;
use crate::shard::{IndexMutation, ShardHandle};
use dashmap::DashMap;
use serde::Serialize;
use sift_core::{Position, Postings, TokenMap};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::sync::oneshot;

/// A mutation bound to the shard it has to be sent to.
pub struct PlannedMutation<P> {
    pub shard: ShardHandle<P>,
    pub mutation: IndexMutation<P>,
    pub applied: oneshot::Receiver<()>,
}

/// Aggregated index size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub shards: usize,
    pub documents: usize,
    pub tokens: usize,
}

/// Leading character → shard.
pub struct ShardRegistry<P> {
    shards: DashMap<char, ShardHandle<P>>,
}

impl<P: Position> Default for ShardRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Position> ShardRegistry<P> {
    pub fn new() -> Self {
        Self {
            shards: DashMap::new(),
        }
    }

    /// Returns the shard for `key`, spawning it if needed.
    pub fn shard(&self, key: char) -> ShardHandle<P> {
        self.shards
            .entry(key)
            .or_insert_with(|| ShardHandle::spawn(key))
            .clone()
    }

    /// Returns the shard for `key` only if it already exists.
    pub fn get(&self, key: char) -> Option<ShardHandle<P>> {
        self.shards.get(&key).map(|shard| shard.clone())
    }

    /// Characters of every shard spawned so far.
    pub fn keys(&self) -> Vec<char> {
        self.shards.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Splits a document's full token map into one mutation per shard.
    ///
    /// Shards that exist but receive none of the new tokens still get a
    /// forget mutation: a shard cannot know on its own that a document
    /// stopped using it. Empty tokens are dropped.
    pub fn plan_update(&self, document: &Path, tokens: TokenMap<P>) -> Vec<PlannedMutation<P>> {
        let known = self.keys();

        let mut by_shard: HashMap<char, TokenMap<P>> = HashMap::new();
        for (token, positions) in tokens {
            if let Some(first) = token.chars().next() {
                by_shard.entry(first).or_default().insert(token, positions);
            }
        }

        let mut planned = Vec::with_capacity(by_shard.len() + known.len());
        for key in known.into_iter().filter(|k| !by_shard.contains_key(k)) {
            planned.push(self.plan(key, IndexMutation::forget(document.to_path_buf())));
        }
        for (key, shard_tokens) in by_shard {
            planned.push(self.plan(key, IndexMutation::new(document.to_path_buf(), shard_tokens)));
        }
        planned
    }

    /// One forget mutation for every existing shard.
    pub fn plan_forget(&self, document: &Path) -> Vec<PlannedMutation<P>> {
        self.keys()
            .into_iter()
            .map(|key| self.plan(key, IndexMutation::forget(document.to_path_buf())))
            .collect()
    }

    fn plan(
        &self,
        key: char,
        (mutation, applied): (IndexMutation<P>, oneshot::Receiver<()>),
    ) -> PlannedMutation<P> {
        PlannedMutation {
            shard: self.shard(key),
            mutation,
            applied,
        }
    }

    /// Queues a lookup whose answer goes straight to `reply`.
    ///
    /// Never spawns a shard: a token whose leading character was never
    /// written gets an empty answer right away.
    pub fn lookup_into(&self, token: &str, reply: oneshot::Sender<Postings<P>>) {
        match token.chars().next().and_then(|first| self.get(first)) {
            Some(shard) => shard.lookup_into(token.to_string(), reply),
            None => {
                let _ = reply.send(Postings::new());
            }
        }
    }

    /// Looks up `token` in its shard.
    pub async fn lookup(&self, token: &str) -> Result<Postings<P>, IndexError> {
        match token.chars().next().and_then(|first| self.get(first)) {
            Some(shard) => shard.lookup(token).await,
            None => Ok(Postings::new()),
        }
    }

    /// Sums every shard's size. Tokens never span shards, so their counts
    /// add up; documents do, so they are deduplicated.
    pub async fn stats(&self) -> Result<IndexStats, IndexError> {
        let shards: Vec<ShardHandle<P>> = self.shards.iter().map(|e| e.value().clone()).collect();
        let mut documents = HashSet::new();
        let mut tokens = 0;
        for shard in &shards {
            tokens += shard.stats().await?.tokens;
            documents.extend(shard.documents().await?);
        }
        Ok(IndexStats {
            shards: shards.len(),
            documents: documents.len(),
            tokens,
        })
    }

    /// Drops every shard handle. Workers stop once in-flight handles are gone.
    pub fn shutdown(&self) {
        self.shards.clear();
    }
}
