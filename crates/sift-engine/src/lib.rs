//! Sift Engine - live indexing on top of the watcher and the index
//!
//! This crate wires the pieces together:
//! - the watcher thread reports file changes
//! - the job supervisor runs one tokenization job per changed document
//! - the coordinator answers queries only when no job is running
//!
//! ```no_run
//! use sift_core::{CaseInsensitiveWordTokenizer, WordTokenizerConfig};
//! use sift_engine::{Engine, EngineConfig};
//!
//! # async fn demo() -> Result<(), sift_engine::EngineError> {
//! let tokenizer = CaseInsensitiveWordTokenizer::new(WordTokenizerConfig::default());
//! let engine = Engine::start(tokenizer, EngineConfig::default())?;
//!
//! let (outcome, settled) = engine.add_watch("./docs").await?;
//! if outcome.is_ok() {
//!     settled.wait().await?;
//! }
//! for (document, positions) in engine.query("fox").await? {
//!     println!("{}: {:?}", document.display(), positions);
//! }
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod coordinator;
mod engine;
mod error;
mod protocol;
mod supervisor;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use protocol::Settled;
