//! Bounded exponential backoff for flaky reads.
//!
//! Files under a watched tree are often read while an editor is still
//! writing them, so a failed read is worth a few more tries before the
//! job gives up.

use crate::error::TokenizeError;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// How often and how patiently to retry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,

    /// Delay after the first failure.
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay.
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after every failure.
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given (0-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay_ms as f64 * self.factor.max(1.0).powi(attempt as i32);
        let capped = scaled.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, TokenizeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TokenizeError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt + 1 >= attempts => {
                    return Err(if attempts == 1 {
                        e
                    } else {
                        TokenizeError::Exhausted {
                            attempts,
                            source: Box::new(e),
                        }
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    debug!("Retrying in {:?}: {}", delay, e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
