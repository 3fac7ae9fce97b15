//! Sift Core - tokens and positions
//!
//! This crate defines what the indexing engine needs from the outside world:
//! a [`Tokenizer`] that turns a file into normalized tokens and their
//! positions. It also ships the default [`CaseInsensitiveWordTokenizer`],
//! which detects the file's charset, retries flaky reads and splits text
//! into lowercase words.
//!
//! # Example
//!
//! ```no_run
//! use sift_core::{CaseInsensitiveWordTokenizer, Tokenizer};
//! use std::path::Path;
//!
//! # async fn run() -> sift_core::Result<()> {
//! let tokenizer = CaseInsensitiveWordTokenizer::default();
//! let tokens = tokenizer.tokenize(Path::new("notes.txt")).await?;
//! for (token, positions) in &tokens {
//!     println!("{}: {} occurrences", token, positions.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod position;
pub mod retry;
pub mod tokenizer;

pub use error::{Result, TokenizeError};
pub use position::{LinePos, Position, Postings, TokenMap};
pub use retry::RetryPolicy;
pub use tokenizer::{CaseInsensitiveWordTokenizer, Tokenizer, WordTokenizerConfig};
