//! Error types for the engine.

use sift_watcher::WatchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Query is empty after normalization")]
    EmptyQuery,

    #[error("Engine has shut down")]
    ShutDown,

    #[error("Watcher error: {0}")]
    Watch(#[from] WatchError),

    #[error("Engine must be started inside a tokio runtime: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
