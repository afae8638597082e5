use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Bounded exponential backoff for storage operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based count of failures so far).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Run `op` until it succeeds or attempts are exhausted. The closure gets
    /// the 1-based attempt number so it can undo partial work first.
    pub fn run<T>(
        &self,
        operation: &str,
        mut op: impl FnMut(u32) -> std::io::Result<T>,
    ) -> Result<T, CoreError> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(source) if attempt >= max_attempts => {
                    tracing::error!(operation, attempt, error = %source, "storage retries exhausted");
                    return Err(CoreError::StorageUnavailable {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "storage operation failed, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
