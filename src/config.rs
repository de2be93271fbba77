//! Runtime tunables for the coordination core.
//!
//! `CoreConfig` is built once at process start (deserialized from whatever
//! config source the host application uses) and handed to the components
//! that need it; nothing reads ambient globals.

use std::time::Duration;

use serde::Deserialize;

use crate::worker::RetryPolicy;

/// Tunables for the coordinator, worker pool, queue, and event publisher.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// Number of concurrent worker loops.
    pub worker_count: usize,

    /// Wall-clock ceiling for a single extraction attempt, in seconds.
    pub job_timeout_secs: u64,

    /// Maximum extraction attempts per job, including the first.
    pub max_attempts: u32,

    /// Base retry delay in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Retry delay cap in milliseconds.
    pub retry_max_delay_ms: u64,

    /// How long a resolved job row lingers before removal, in seconds.
    ///
    /// Identical requests arriving inside this window attach to the resolved
    /// job instead of starting a duplicate download.
    pub removal_grace_secs: u64,

    /// Queue delivery lease in seconds; an expired lease makes the delivery
    /// claimable again.
    pub queue_lease_secs: u64,

    /// Worker poll interval when the queue is empty, in milliseconds.
    pub queue_poll_interval_ms: u64,

    /// Analytics channel capacity; events beyond it are dropped.
    pub event_buffer: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            job_timeout_secs: 300,
            max_attempts: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 32_000,
            removal_grace_secs: 60,
            queue_lease_secs: 600,
            queue_poll_interval_ms: 500,
            event_buffer: 256,
        }
    }
}

impl CoreConfig {
    /// Per-attempt extraction timeout.
    #[must_use]
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Grace period before a resolved job row is removed.
    #[must_use]
    pub fn removal_grace(&self) -> Duration {
        Duration::from_secs(self.removal_grace_secs)
    }

    /// Queue delivery lease duration.
    #[must_use]
    pub fn queue_lease(&self) -> Duration {
        Duration::from_secs(self.queue_lease_secs)
    }

    /// Worker poll interval for an empty queue.
    #[must_use]
    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }

    /// Builds the retry policy these tunables describe.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
            2.0,
        )
    }
}
