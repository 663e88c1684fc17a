//! Bounded retry for transient return values
//!
//! Some operations legitimately fail while the store catches up: a
//! search folder that is not ready to take criteria yet, a contents table
//! another operation holds locked. [`RetryPolicy`] re-issues such an
//! operation a bounded number of times. When the attempts run out the
//! last result is handed back as-is; judging it is the caller's job.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::status;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `initial * multiplier^n`, capped at `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: u32,
    },
}

impl Backoff {
    /// Delay after the `attempt`-th (1-based) failed attempt.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let factor = multiplier.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Return values worth retrying for `RopSetSearchCriteria`.
pub const SEARCH_TRANSIENT: &[u32] = &[status::SEARCH_NOT_READY];

/// Return values worth retrying when opening a contents table.
pub const TABLE_TRANSIENT: &[u32] = &[status::TABLE_LOCKED];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero behaves as one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// `RetryCount` attempts, `WaitTime` apart.
    #[must_use]
    pub const fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.retry_count, Backoff::Fixed(config.wait_time))
    }

    /// Run `op` until it yields a result `is_transient` rejects, or the
    /// attempts are used up.
    ///
    /// # Errors
    ///
    /// An `Err` from `op` is returned immediately and never retried.
    pub async fn run<T>(
        &self,
        mut op: impl AsyncFnMut() -> Result<T>,
        is_transient: impl Fn(&T) -> bool,
    ) -> Result<T> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = op().await?;
            if !is_transient(&result) {
                return Ok(result);
            }
            if attempt >= attempts {
                warn!("Still transient after {} attempts, giving up", attempt);
                return Ok(result);
            }
            let delay = self.backoff.delay(attempt);
            debug!("Attempt {} transient, retrying in {:?}", attempt, delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
