//! Fire-and-forget analytics events.
//!
//! Events feed usage reporting (cache hit ratios, per-user quota
//! accounting) and are deliberately lossy: publishing never blocks the
//! request path, a full channel drops the event with a warning, and a sink
//! failure is logged and forgotten. Correctness never depends on an event
//! arriving.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::registry::{JobFailureKind, JobId};

/// Default analytics channel capacity.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// One analytics fact, tagged with a unix timestamp at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalyticsEvent {
    /// A request was served straight from the cache.
    CacheHit {
        /// Fingerprint of the request key.
        fingerprint: String,
        /// Hit count after this hit.
        hit_count: i64,
        /// Unix timestamp (seconds).
        timestamp: u64,
    },

    /// A new download job was created and enqueued.
    DownloadQueued {
        /// Fingerprint of the request key.
        fingerprint: String,
        /// The created job.
        job_id: JobId,
        /// Unix timestamp (seconds).
        timestamp: u64,
    },

    /// A job resolved ready.
    DownloadCompleted {
        /// Fingerprint of the request key.
        fingerprint: String,
        /// The resolved job.
        job_id: JobId,
        /// Attempts it took, including the successful one.
        attempt_count: i64,
        /// Unix timestamp (seconds).
        timestamp: u64,
    },

    /// A job resolved failed.
    DownloadFailed {
        /// Fingerprint of the request key.
        fingerprint: String,
        /// The resolved job.
        job_id: JobId,
        /// Terminal failure classification.
        kind: JobFailureKind,
        /// Unix timestamp (seconds).
        timestamp: u64,
    },
}

impl AnalyticsEvent {
    /// Unix timestamp in seconds; 0 if the clock is before the epoch.
    #[must_use]
    pub fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
    }
}

/// Destination for drained analytics events.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Records one event. Errors are logged and dropped by the forwarder.
    async fn record(&self, event: &AnalyticsEvent) -> Result<(), String>;
}

/// Non-blocking publisher over a bounded channel.
///
/// Cloneable; all clones feed the one forwarder task spawned at
/// construction.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: mpsc::Sender<AnalyticsEvent>,
}

impl EventPublisher {
    /// Spawns the forwarder task and returns the publisher plus the task
    /// handle (for shutdown joins; dropping it detaches the forwarder).
    #[must_use]
    pub fn spawn(
        sink: Box<dyn AnalyticsSink>,
        buffer: usize,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<AnalyticsEvent>(buffer.max(1));

        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(message) = sink.record(&event).await {
                    warn!(?event, message, "analytics sink rejected event");
                } else {
                    debug!(?event, "analytics event recorded");
                }
            }
        });

        (Self { sender }, handle)
    }

    /// Publishes an event without waiting.
    ///
    /// A full or closed channel drops the event with a warning.
    pub fn publish(&self, event: AnalyticsEvent) {
        if let Err(error) = self.sender.try_send(event) {
            match error {
                mpsc::error::TrySendError::Full(event) => {
                    warn!(?event, "analytics channel full, event dropped");
                }
                mpsc::error::TrySendError::Closed(event) => {
                    warn!(?event, "analytics channel closed, event dropped");
                }
            }
        }
    }
}
