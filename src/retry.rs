//! Retry classification and exponential backoff
//!
//! The scheduler and the reporter classify failures through [`IsRetryable`]:
//! a crashed extractor worker and a broken ingest connection are transient,
//! an extractor logic error and a rejected report are not. [`Backoff`] paces
//! the loops that never give up: the reporter (transient ingestion failures)
//! and the coordinator client (registration, fixed delay).

use crate::config::RetryConfig;
use crate::error::{ExtractionError, ReportError};
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (connection reset, peer went away, crashed worker) return `true`.
/// Permanent failures (rejected report, extractor logic error) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ExtractionError {
    fn is_retryable(&self) -> bool {
        self.is_worker_crash()
    }
}

impl IsRetryable for ReportError {
    fn is_retryable(&self) -> bool {
        // Ingestion answered; repeating the same report changes nothing.
        // Everything else (including a TLS connector that failed to build)
        // is retried on the next drain pass.
        !self.is_rejection()
    }
}

/// Stateful exponential backoff
///
/// Each call to [`Backoff::next_delay`] returns the delay to wait before the
/// next attempt and grows the base delay by the configured multiplier, capped
/// at `max_delay`. [`Backoff::reset`] returns to the initial delay after a
/// success.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Create a backoff starting at `config.initial_delay`
    pub fn new(config: RetryConfig) -> Self {
        let current = config.initial_delay.min(config.max_delay);
        Self {
            config,
            current,
            attempts: 0,
        }
    }

    /// Number of delays handed out since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt
    ///
    /// Never panics: a multiplier that is not a finite number or that
    /// overflows the delay pins the backoff at `max_delay`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = if self.config.jitter {
            add_jitter(self.current)
        } else {
            self.current
        };

        self.attempts = self.attempts.saturating_add(1);
        let max_delay = self.config.max_delay;
        self.current = Duration::try_from_secs_f64(
            self.current.as_secs_f64() * self.config.backoff_multiplier,
        )
        .map_or(max_delay, |next| next.min(max_delay));

        delay
    }

    /// Back to the initial delay
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay.min(self.config.max_delay);
        self.attempts = 0;
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor)).unwrap_or(delay)
}
