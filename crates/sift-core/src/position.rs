//! Token positions.
//!
//! The index never looks inside a position; it only stores and returns
//! what the tokenizer produced. Any type meeting the [`Position`] bounds
//! can be used.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Bounds every position type has to satisfy to travel through the engine.
pub trait Position: Clone + Send + Sync + fmt::Debug + 'static {}

impl<T> Position for T where T: Clone + Send + Sync + fmt::Debug + 'static {}

/// Normalized token to every position it occurs at, for one document.
pub type TokenMap<P> = HashMap<String, Vec<P>>;

/// Document to positions of one token. This is what a lookup returns.
pub type Postings<P> = HashMap<PathBuf, Vec<P>>;

/// A line/column location inside a text document.
///
/// Lines are 1-based, columns are 0-based and counted in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinePos {
    pub line: u32,
    pub column: u32,
}

impl LinePos {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for LinePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}
