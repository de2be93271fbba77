//! Retry policy with exponential backoff for failed extraction attempts.
//!
//! A failed attempt carries a [`FailureKind`]; the [`RetryPolicy`] turns
//! that plus the attempt count into a [`RetryDecision`]. Delays follow
//! `min(base * multiplier^(attempt-1), max) + jitter`, so with defaults the
//! schedule is roughly 1s, 2s before the attempt ceiling ends the job.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

/// Default maximum attempts (including the initial attempt).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for the first retry.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default delay cap.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier.
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to each delay.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of a failed extraction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// May succeed on retry: network flakes, extractor hiccups, attempt
    /// timeouts.
    Transient,

    /// Will not succeed regardless of retries: removed or private content,
    /// unsupported URL shapes, malformed extraction plans.
    Permanent,

    /// The platform is throttling us; retryable with backoff.
    RateLimited,
}

impl FailureKind {
    /// Returns true when a retry could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// Decision on whether a failed job should be attempted again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue the job after the delay.
    Retry {
        /// How long to wait before the job becomes claimable again.
        delay: Duration,
        /// Which attempt number comes next (1-indexed).
        attempt: u32,
    },

    /// Resolve the job failed now.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Exponential-backoff retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings.
    ///
    /// `max_attempts` is clamped to at least 1 so the initial attempt
    /// always happens.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy overriding only the attempt ceiling.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the configured attempt ceiling.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether the attempt that just failed should be followed by
    /// another.
    ///
    /// `attempt` is the 1-indexed number of the attempt that failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, kind: FailureKind, attempt: u32) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure, retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "attempt ceiling reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// `min(base * multiplier^(attempt-1), max) + jitter`.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);

        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    /// Random jitter in `0..=MAX_JITTER` to spread out retry bursts.
    #[allow(clippy::unused_self, clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}
