//! Tokenizer contract and the default word tokenizer.
//!
//! The engine only depends on [`Tokenizer`]: give it a file, get back every
//! normalized token with the positions it occurs at. Charset detection,
//! decoding and read retries all live behind that trait.

use crate::error::{Result, TokenizeError};
use crate::position::{LinePos, Position, TokenMap};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};

/// Turns a file into a token → positions mapping.
#[async_trait]
pub trait Tokenizer: Send + Sync + 'static {
    /// Position type attached to every token occurrence.
    type Position: Position;

    /// Normalizes a raw word the same way `tokenize` normalizes file content.
    /// Queries go through this before they hit the index.
    fn normalize(&self, raw: &str) -> String;

    /// Reads and tokenizes the file at `path`.
    async fn tokenize(&self, path: &Path) -> Result<TokenMap<Self::Position>>;
}

/// Settings for [`CaseInsensitiveWordTokenizer`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WordTokenizerConfig {
    /// WHATWG label of the encoding used when content is neither
    /// BOM-marked nor valid UTF-8 and the detected encoding cannot decode it.
    pub fallback_encoding: String,

    /// Retry policy for reading the file.
    pub retry: RetryPolicy,
}

impl Default for WordTokenizerConfig {
    fn default() -> Self {
        Self {
            fallback_encoding: "windows-1252".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Splits text into words and lowercases them.
///
/// A word is a maximal run of alphanumeric characters, apostrophes,
/// hyphens and underscores.
#[derive(Debug, Clone)]
pub struct CaseInsensitiveWordTokenizer {
    fallback: &'static Encoding,
    retry: RetryPolicy,
}

impl Default for CaseInsensitiveWordTokenizer {
    fn default() -> Self {
        Self::new(WordTokenizerConfig::default())
    }
}

impl CaseInsensitiveWordTokenizer {
    pub fn new(config: WordTokenizerConfig) -> Self {
        let fallback = match Encoding::for_label(config.fallback_encoding.as_bytes()) {
            Some(encoding) => encoding,
            None => {
                warn!(
                    "Unknown fallback encoding '{}', using {}",
                    config.fallback_encoding,
                    WINDOWS_1252.name()
                );
                WINDOWS_1252
            }
        };

        Self {
            fallback,
            retry: config.retry,
        }
    }

    /// Tokenizes already decoded text.
    pub fn tokenize_text(&self, text: &str) -> TokenMap<LinePos> {
        let mut tokens: TokenMap<LinePos> = TokenMap::new();

        for (line_idx, line) in text.lines().enumerate() {
            let line_no = line_idx as u32 + 1;
            let mut start: Option<usize> = None;
            let mut word = String::new();

            // Trailing sentinel flushes a word that runs to the end of the line.
            for (column, c) in line.chars().map(Some).chain(std::iter::once(None)).enumerate() {
                match c {
                    Some(c) if is_word_char(c) => {
                        start.get_or_insert(column);
                        word.push(c);
                    }
                    _ => {
                        if let Some(s) = start.take() {
                            tokens
                                .entry(self.normalize(&word))
                                .or_default()
                                .push(LinePos::new(line_no, s as u32));
                            word.clear();
                        }
                    }
                }
            }
        }

        tokens
    }

    fn decode(&self, path: &Path, bytes: &[u8]) -> Result<String> {
        if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
            return decode_with(path, encoding, &bytes[bom_len..]);
        }

        if let Ok(text) = std::str::from_utf8(bytes) {
            return Ok(text.to_owned());
        }

        let mut detector = EncodingDetector::new();
        detector.feed(bytes, true);
        let detected = detector.guess(None, false);
        debug!("{} is not UTF-8, detected {}", path.display(), detected.name());

        match decode_with(path, detected, bytes) {
            Ok(text) => Ok(text),
            Err(e) if detected != self.fallback => {
                warn!("{}, retrying as {}", e, self.fallback.name());
                decode_with(path, self.fallback, bytes)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Tokenizer for CaseInsensitiveWordTokenizer {
    type Position = LinePos;

    fn normalize(&self, raw: &str) -> String {
        raw.to_lowercase()
    }

    async fn tokenize(&self, path: &Path) -> Result<TokenMap<LinePos>> {
        let text = self
            .retry
            .run(|| async move {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| TokenizeError::io(path, e))?;
                self.decode(path, &bytes)
            })
            .await?;

        Ok(self.tokenize_text(&text))
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '\'' | '-' | '_')
}

fn decode_with(path: &Path, encoding: &'static Encoding, bytes: &[u8]) -> Result<String> {
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors && encoding != UTF_8 {
        return Err(TokenizeError::Decode {
            path: path.to_path_buf(),
            encoding: encoding.name(),
        });
    }
    Ok(text.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1251;
    use std::fs;
    use tempfile::tempdir;

    fn positions(tokens: &TokenMap<LinePos>, token: &str) -> Vec<(u32, u32)> {
        tokens
            .get(token)
            .map(|p| p.iter().map(|p| (p.line, p.column)).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_three_line_document() {
        let tokenizer = CaseInsensitiveWordTokenizer::default();
        let tokens = tokenizer.tokenize_text("the Quick fox\nfox jumps\nThe end");

        assert_eq!(positions(&tokens, "fox"), vec![(1, 10), (2, 0)]);
        assert_eq!(positions(&tokens, "the"), vec![(1, 0), (3, 0)]);
        assert_eq!(positions(&tokens, "quick"), vec![(1, 4)]);
        assert!(tokens.get("Quick").is_none());
    }

    #[test]
    fn test_word_punctuation() {
        let tokenizer = CaseInsensitiveWordTokenizer::default();
        let tokens = tokenizer.tokenize_text("don't re-use snake_case, ok? (yes)");

        assert!(tokens.contains_key("don't"));
        assert!(tokens.contains_key("re-use"));
        assert!(tokens.contains_key("snake_case"));
        assert_eq!(positions(&tokens, "yes"), vec![(1, 30)]);
        assert_eq!(tokens.len(), 5);
    }

    #[test]
    fn test_columns_count_characters() {
        let tokenizer = CaseInsensitiveWordTokenizer::default();
        let tokens = tokenizer.tokenize_text("Война и мир");

        assert_eq!(positions(&tokens, "война"), vec![(1, 0)]);
        assert_eq!(positions(&tokens, "мир"), vec![(1, 8)]);
    }

    #[tokio::test]
    async fn test_tokenize_windows_1252_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("latin1.txt");
        let (bytes, _, _) = WINDOWS_1252
            .encode("Le café était déjà très épicé, et la crème brûlée aussi.");
        fs::write(&path, &bytes).unwrap();

        let tokenizer = CaseInsensitiveWordTokenizer::default();
        let tokens = tokenizer.tokenize(&path).await.unwrap();
        assert_eq!(positions(&tokens, "café"), vec![(1, 3)]);
        assert!(tokens.contains_key("crème"));
    }

    #[tokio::test]
    async fn test_tokenize_windows_1251_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("war_and_peace.txt");
        let (bytes, _, _) = WINDOWS_1251.encode(
            "Война и мир. Князь Андрей вышел на крыльцо и посмотрел на небо,\n\
             которое было высоким и бесконечным, как и вся его жизнь.",
        );
        fs::write(&path, &bytes).unwrap();

        let tokenizer = CaseInsensitiveWordTokenizer::default();
        let tokens = tokenizer.tokenize(&path).await.unwrap();
        assert_eq!(positions(&tokens, "война"), vec![(1, 0)]);
        assert_eq!(positions(&tokens, "князь"), vec![(1, 13)]);
        assert!(tokens.contains_key("бесконечным"));
    }

    #[tokio::test]
    async fn test_tokenize_file_with_bom() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bom.txt");
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("Hello".as_bytes());
        fs::write(&path, bytes).unwrap();

        let tokenizer = CaseInsensitiveWordTokenizer::default();
        let tokens = tokenizer.tokenize(&path).await.unwrap();
        assert_eq!(positions(&tokens, "hello"), vec![(1, 0)]);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let tokenizer = CaseInsensitiveWordTokenizer::new(WordTokenizerConfig {
            retry: RetryPolicy::none(),
            ..WordTokenizerConfig::default()
        });

        let result = tokenizer.tokenize(&dir.path().join("missing.txt")).await;
        assert!(matches!(result, Err(TokenizeError::Io { .. })));
    }

    #[test]
    fn test_config_from_json() {
        let config: WordTokenizerConfig =
            serde_json::from_str(r#"{"fallback_encoding": "koi8-r", "retry": {"max_attempts": 2}}"#)
                .unwrap();
        assert_eq!(config.fallback_encoding, "koi8-r");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.initial_delay_ms, 1000);
    }
}
