//! Sift Index - sharded exact-token index
//!
//! The index is split into shards by a token's leading character. Each
//! shard owns a trie and is driven by its own worker task, which is the
//! only code that ever mutates it. Writers send [`IndexMutation`]s and wait
//! for the completion signal; readers send lookups through the same
//! mailbox, so a lookup always sees every mutation queued before it.
//!
//! [`ShardRegistry`] spawns shards on demand and turns a document's token
//! map into the set of per-shard mutations needed to replace it.

mod error;
mod registry;
mod shard;
mod trie;

pub use error::IndexError;
pub use registry::{IndexStats, PlannedMutation, ShardRegistry};
pub use shard::{IndexMutation, ShardHandle, ShardState, ShardStats};
pub use trie::Trie;
