//! Retry policies for the blocking waits of the startup sequence.
//!
//! Connecting, lock acquisition, and health polling all share the same shape:
//! attempt, and on a retryable failure sleep and try again until an optional
//! attempt limit is reached. [`RetryPolicy`] captures that shape as a `backon`
//! backoff and runs the loop through [`Retryable`]. Sleeping goes through
//! [`tokio::time`], so a paused test runtime advances virtual time instead of
//! waiting, and the whole loop races a [`CancellationToken`].

use std::{future::Future, time::Duration};

use backon::{
    BackoffBuilder, ConstantBackoff, ConstantBuilder, ExponentialBackoff, ExponentialBuilder,
    Retryable,
};
use tokio_util::sync::CancellationToken;

use crate::error::BootstrapError;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// The same delay after every failed attempt.
    Fixed(Duration),
    /// Starts at `initial` and grows by `multiplier` per retry, capped at `max`.
    Exponential {
        /// Delay after the first failure.
        initial: Duration,
        /// Upper bound on any single delay.
        max: Duration,
        /// Growth factor per retry.
        multiplier: f32,
    },
}

/// How many times to attempt an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: Option<u32>,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Retries forever with a fixed delay.
    #[must_use]
    pub const fn unbounded(delay: Duration) -> Self {
        Self { max_attempts: None, backoff: Backoff::Fixed(delay) }
    }

    /// Makes at most `max_attempts` attempts with a fixed delay.
    #[must_use]
    pub const fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts: Some(max_attempts), backoff: Backoff::Fixed(delay) }
    }

    /// Replaces the delay schedule.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Maximum number of attempts, or `None` for unbounded.
    #[must_use]
    pub const fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// The delay schedule.
    #[must_use]
    pub const fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// The delays between consecutive attempts. Ends once no retry is left.
    #[must_use]
    pub fn delays(&self) -> Delays {
        // backon counts retries, not attempts.
        let max_retries = self
            .max_attempts
            .map(|max| usize::try_from(max.saturating_sub(1)).unwrap_or(usize::MAX));

        match self.backoff {
            Backoff::Fixed(delay) => {
                let builder = ConstantBuilder::new().with_delay(delay);
                let builder = match max_retries {
                    Some(times) => builder.with_max_times(times),
                    None => builder.without_max_times(),
                };
                Delays::Fixed(builder.build())
            },
            Backoff::Exponential { initial, max, multiplier } => {
                let builder = ExponentialBuilder::new()
                    .with_min_delay(initial)
                    .with_max_delay(max)
                    .with_factor(multiplier);
                let builder = match max_retries {
                    Some(times) => builder.with_max_times(times),
                    None => builder.without_max_times(),
                };
                Delays::Exponential(builder.build())
            },
        }
    }

    /// Runs `operation` until it succeeds, fails with an error `when` rejects,
    /// or the policy runs out of attempts. `notify` sees every error that is
    /// about to be retried together with the delay before the next attempt.
    ///
    /// # Errors
    ///
    /// Returns the last error from `operation`, or
    /// [`BootstrapError::Cancelled`] if `cancel` fires first. A cancelled
    /// token drops the in-flight attempt.
    pub async fn retry<T, F, Fut, W, N>(
        &self,
        cancel: &CancellationToken,
        operation: F,
        when: W,
        notify: N,
    ) -> Result<T, BootstrapError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BootstrapError>>,
        W: FnMut(&BootstrapError) -> bool,
        N: FnMut(&BootstrapError, Duration),
    {
        if cancel.is_cancelled() {
            return Err(BootstrapError::Cancelled);
        }

        let retrying =
            operation.retry(self.delays()).sleep(tokio::time::sleep).when(when).notify(notify);

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(BootstrapError::Cancelled),
            result = retrying => result,
        }
    }
}

/// Delay iterator built from a [`RetryPolicy`].
#[derive(Debug)]
pub enum Delays {
    /// Constant delays.
    Fixed(ConstantBackoff),
    /// Exponentially growing delays.
    Exponential(ExponentialBackoff),
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        match self {
            Self::Fixed(delays) => delays.next(),
            Self::Exponential(delays) => delays.next(),
        }
    }
}
