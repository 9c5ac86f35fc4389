//! Bounded retry of optimistic transaction conflicts.

use crate::error::{IntervalError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Jittered exponential backoff for conflicting transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Backoff ceiling before the first retry
    pub backoff_base_ms: u64,
    /// Upper bound of any single backoff
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 2,
            backoff_max_ms: 50,
        }
    }
}

impl RetryPolicy {
    /// Random delay in `[0, min(base * 2^(retry-1), max)]` for the given retry (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = self
            .backoff_base_ms
            .saturating_mul(1u64 << retry.saturating_sub(1).min(16));
        let cap = exp.min(self.backoff_max_ms);
        Duration::from_millis(rand::thread_rng().gen_range(0..=cap))
    }

    /// Run `op` until it stops reporting [`IntervalError::Conflict`].
    ///
    /// `on_conflict` sees every conflicting attempt. Once `max_attempts` is
    /// spent the conflict becomes [`IntervalError::WriteContention`]; other
    /// errors are returned unchanged on first sight.
    pub fn run<T, F, C>(&self, mut op: F, mut on_conflict: C) -> Result<T>
    where
        F: FnMut() -> Result<T>,
        C: FnMut(u32),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Err(IntervalError::Conflict) => {
                    on_conflict(attempt);
                    if attempt >= max_attempts {
                        return Err(IntervalError::WriteContention { attempts: attempt });
                    }
                    let delay = self.backoff(attempt);
                    tracing::debug!(attempt, ?delay, "transaction conflict, retrying");
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }
}
