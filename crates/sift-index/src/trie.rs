//! Character trie mapping exact tokens to postings.
//!
//! Only the node that ends a complete token carries postings. Nodes are
//! never pruned when their postings become empty; a re-indexed token
//! reuses the old path.

use sift_core::Postings;
use std::collections::HashMap;
use std::path::Path;

struct Node<P> {
    children: HashMap<char, Node<P>>,
    postings: Postings<P>,
}

impl<P> Default for Node<P> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            postings: HashMap::new(),
        }
    }
}

/// Exact-match token trie.
pub struct Trie<P> {
    root: Node<P>,
}

impl<P> Default for Trie<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Trie<P> {
    /// Creates an empty trie.
    pub fn new() -> Self {
        Self {
            root: Node::default(),
        }
    }

    /// Stores `positions` for `document` under `token`, replacing whatever
    /// that document had there before.
    ///
    /// Existing nodes are followed; from the first missing character on,
    /// a fresh chain is materialized for the rest of the token.
    pub fn insert(&mut self, token: &str, document: &Path, positions: Vec<P>) {
        let mut node = &mut self.root;
        for c in token.chars() {
            node = node.children.entry(c).or_default();
        }
        node.postings.insert(document.to_path_buf(), positions);
    }

    /// Drops `document` from `token`'s postings. Returns whether it was there.
    pub fn remove(&mut self, token: &str, document: &Path) -> bool {
        match self.node_mut(token) {
            Some(node) => node.postings.remove(document).is_some(),
            None => false,
        }
    }

    /// Postings stored for exactly `token`, if any path exists for it.
    pub fn lookup(&self, token: &str) -> Option<&Postings<P>> {
        let mut node = &self.root;
        for c in token.chars() {
            node = node.children.get(&c)?;
        }
        Some(&node.postings)
    }

    fn node_mut(&mut self, token: &str) -> Option<&mut Node<P>> {
        let mut node = &mut self.root;
        for c in token.chars() {
            node = node.children.get_mut(&c)?;
        }
        Some(node)
    }
}
