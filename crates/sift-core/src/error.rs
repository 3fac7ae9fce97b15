//! Error types for tokenization.
//!
//! We keep errors simple and actionable. Each variant tells you
//! exactly what went wrong and with which file.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience type for functions that can fail during tokenization.
pub type Result<T> = std::result::Result<T, TokenizeError>;

/// Things that can go wrong when turning a file into tokens.
#[derive(Error, Debug)]
pub enum TokenizeError {
    /// Couldn't read the file from disk.
    #[error("failed to read file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The bytes could not be decoded with the detected or fallback encoding.
    #[error("failed to decode '{path}' as {encoding}")]
    Decode {
        path: PathBuf,
        encoding: &'static str,
    },

    /// Every retry attempt failed. Carries the last failure.
    #[error("tokenization gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<TokenizeError>,
    },
}

impl TokenizeError {
    /// Creates an IO error with the path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Decoding failures are a property of the content, not of the moment
    /// we read it, so they are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}
