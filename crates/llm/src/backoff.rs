use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::warn;

/// Failure classification used by [`BackoffPolicy::run`].
pub trait Retryable {
    fn is_transient(&self) -> bool;

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for crate::EndpointError {
    fn is_transient(&self) -> bool {
        crate::EndpointError::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        crate::EndpointError::retry_after(self)
    }
}

/// Why [`BackoffPolicy::run`] gave up.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub elapsed: Duration,
    pub last: E,
    /// `false` when the last error was not worth retrying.
    pub exhausted: bool,
}

/// Exponential backoff with bounded jitter.
///
/// The delay before retry `k` (1-based) is `base_delay * multiplier^(k-1)`, scaled
/// by a random factor in `[1, 1 + jitter]` and capped at `max_delay`. Jitter is
/// clamped to `multiplier - 1` so successive delays never shrink.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl BackoffPolicy {
    pub fn new(retry_count: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: retry_count.saturating_add(1),
            base_delay,
            multiplier: 2.0,
            jitter: 0.25,
            max_delay: Duration::from_secs(60),
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    fn effective_jitter(&self) -> f64 {
        self.jitter.clamp(0.0, (self.multiplier - 1.0).max(0.0))
    }

    /// Delay before retry number `retry` given a uniform sample `unit` in `[0, 1)`.
    pub fn delay_for(&self, retry: u32, unit: f64) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let scale = 1.0 + self.effective_jitter() * unit.clamp(0.0, 1.0);
        let secs = self.base_delay.as_secs_f64() * factor * scale;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Like [`delay_for`](Self::delay_for) but never shorter than a provider hint.
    ///
    /// Hints are capped at `max_delay` like every other delay.
    pub fn delay_with_hint(&self, retry: u32, unit: f64, hint: Option<Duration>) -> Duration {
        let delay = self.delay_for(retry, unit);
        hint.map_or(delay, |hint| hint.min(self.max_delay).max(delay))
    }

    /// Jitter-free delays for every retry this policy allows.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|retry| self.delay_for(retry, 0.0)).collect()
    }

    /// Runs `attempt` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `attempt` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, mut attempt: F) -> Result<T, RetryFailure<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let max_attempts = self.max_attempts.max(1);
        let mut number = 1u32;
        loop {
            let err = match attempt(number).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_transient() {
                return Err(RetryFailure {
                    attempts: number,
                    elapsed: started.elapsed(),
                    last: err,
                    exhausted: false,
                });
            }
            if number >= max_attempts {
                return Err(RetryFailure {
                    attempts: number,
                    elapsed: started.elapsed(),
                    last: err,
                    exhausted: true,
                });
            }
            let wait = self.delay_with_hint(number, rand::random::<f64>(), err.retry_after());
            warn!(
                attempt = number,
                max_attempts,
                delay_ms = wait.as_millis() as u64,
                error = %err,
                "transient failure, backing off"
            );
            sleep(wait).await;
            number += 1;
        }
    }
}
