//! Request coordination: cache check, dedup registration, enqueue.
//!
//! `request` is the single entry point callers use. It either answers
//! immediately from the cache or folds the caller into exactly one
//! in-flight job for the request key; the terminal result then arrives
//! through the caller's [`Notifier`] like every other waiter's.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::cache::{ArtifactCache, ArtifactRef};
use crate::error::{CoreError, Result};
use crate::events::{AnalyticsEvent, EventPublisher};
use crate::platform::{PlatformRegistry, RequestKey, Variant};
use crate::queue::JobQueue;
use crate::registry::{
    JobFailureKind, JobId, JobOutcome, JobRegistry, RegisterOutcome, WaiterToken,
};

/// Side channel delivering terminal outcomes to waiters.
///
/// Implementations send the outcome wherever the waiter token points (a
/// chat reply in the original deployment). Delivery is best-effort; errors
/// are logged and dropped by callers.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one outcome to one waiter.
    async fn notify(&self, waiter: &WaiterToken, outcome: &JobOutcome) -> std::result::Result<(), String>;
}

/// Synchronous answer to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    /// Served from the cache; the artifact is immediately usable.
    Ready(ArtifactRef),
    /// A download is in flight (created by this call or already running);
    /// the outcome will arrive via the notifier.
    Queued(JobId),
}

/// Front door of the coordination core.
pub struct Coordinator {
    platforms: Arc<PlatformRegistry>,
    cache: ArtifactCache,
    registry: JobRegistry,
    queue: Arc<dyn JobQueue>,
    notifier: Arc<dyn Notifier>,
    events: EventPublisher,
}

impl Coordinator {
    /// Creates a coordinator over shared collaborators.
    #[must_use]
    pub fn new(
        platforms: Arc<PlatformRegistry>,
        cache: ArtifactCache,
        registry: JobRegistry,
        queue: Arc<dyn JobQueue>,
        notifier: Arc<dyn Notifier>,
        events: EventPublisher,
    ) -> Self {
        Self {
            platforms,
            cache,
            registry,
            queue,
            notifier,
            events,
        }
    }

    /// Handles one incoming request.
    ///
    /// Identical concurrent requests (same platform, canonical id, and
    /// variant) trigger at most one download between them; every caller is
    /// notified with the one shared outcome.
    ///
    /// # Errors
    ///
    /// - [`CoreError::UnsupportedPlatform`] if the URL resolves to no
    ///   registered platform; nothing is created or enqueued.
    /// - [`CoreError::CacheUnavailable`] / [`CoreError::RegistryUnavailable`]
    ///   if a backing store is unreachable; the request is rejected rather
    ///   than risking an unguarded duplicate download.
    #[instrument(skip(self), fields(waiter = %waiter, url, variant = %variant))]
    pub async fn request(
        &self,
        waiter: &WaiterToken,
        url: &str,
        variant: &Variant,
    ) -> Result<RequestStatus> {
        let identity = self.platforms.resolve(url)?;
        let key = RequestKey::new(identity, variant.clone());

        if let Some(entry) = self.cache.get(&key).await? {
            let hit_count = match self.cache.record_hit(&key).await {
                Ok(count) => count,
                // The entry is already in hand; the counter is
                // observability only.
                Err(error) => {
                    warn!(%error, "hit counter update failed");
                    entry.hit_count + 1
                }
            };
            debug!(key = %key, hit_count, "served from cache");
            self.events.publish(AnalyticsEvent::CacheHit {
                fingerprint: key.fingerprint(),
                hit_count,
                timestamp: AnalyticsEvent::now(),
            });
            return Ok(RequestStatus::Ready(entry.artifact()));
        }

        match self
            .registry
            .register_or_attach(&key, url.trim(), waiter)
            .await?
        {
            RegisterOutcome::Created { job_id } => {
                if let Err(enqueue_error) = self.queue.enqueue(job_id, Duration::ZERO).await {
                    // The job exists but can never be delivered; resolve it
                    // failed so this waiter is not stranded.
                    warn!(job_id, %enqueue_error, "enqueue failed, failing job");
                    self.fail_unqueueable_job(job_id, &enqueue_error.to_string())
                        .await;
                    return Err(CoreError::from(enqueue_error));
                }
                info!(job_id, key = %key, "download queued");
                self.events.publish(AnalyticsEvent::DownloadQueued {
                    fingerprint: key.fingerprint(),
                    job_id,
                    timestamp: AnalyticsEvent::now(),
                });
                Ok(RequestStatus::Queued(job_id))
            }
            RegisterOutcome::Attached { job_id } => {
                debug!(job_id, key = %key, "attached to in-flight job");
                // A job inside its post-resolution grace period is already
                // terminal; its worker has notified everyone attached at
                // resolution time, so this late waiter is notified here.
                match self.registry.outcome(job_id).await {
                    Ok(Some(outcome)) => {
                        if let Err(message) = self.notifier.notify(waiter, &outcome).await {
                            warn!(%waiter, message, "late-attach notification failed");
                        }
                    }
                    Ok(None) => {}
                    Err(error) => warn!(job_id, %error, "terminal outcome lookup failed"),
                }
                Ok(RequestStatus::Queued(job_id))
            }
        }
    }

    /// Resolves a job that could not be enqueued and notifies its waiters.
    async fn fail_unqueueable_job(&self, job_id: JobId, message: &str) {
        let outcome = JobOutcome::Failed {
            kind: JobFailureKind::Internal,
            message: format!("could not enqueue download: {message}"),
        };
        match self.registry.resolve(job_id, &outcome).await {
            Ok(resolution) if resolution.newly_resolved => {
                for waiter in &resolution.waiters {
                    if let Err(notify_error) = self.notifier.notify(waiter, &outcome).await {
                        warn!(%waiter, notify_error, "failure notification failed");
                    }
                }
            }
            Ok(_) => {}
            Err(error) => warn!(job_id, %error, "could not fail unqueueable job"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::db::Database;
    use crate::events::AnalyticsSink;
    use crate::platform::build_default_platform_registry;
    use crate::queue::SqliteJobQueue;

    struct NullSink;

    #[async_trait]
    impl AnalyticsSink for NullSink {
        async fn record(&self, _event: &AnalyticsEvent) -> std::result::Result<(), String> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        delivered: Mutex<Vec<(WaiterToken, JobOutcome)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            waiter: &WaiterToken,
            outcome: &JobOutcome,
        ) -> std::result::Result<(), String> {
            self.delivered
                .lock()
                .unwrap()
                .push((waiter.clone(), outcome.clone()));
            Ok(())
        }
    }

    async fn coordinator() -> (Coordinator, Arc<RecordingNotifier>, Database) {
        let db = Database::new_in_memory().await.unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let (events, _forwarder) = EventPublisher::spawn(Box::new(NullSink), 8);
        let coordinator = Coordinator::new(
            Arc::new(build_default_platform_registry()),
            ArtifactCache::new(db.clone()),
            JobRegistry::new(db.clone()),
            Arc::new(SqliteJobQueue::new(db.clone())),
            notifier.clone(),
            events,
        );
        (coordinator, notifier, db)
    }

    const URL: &str = "https://youtu.be/dQw4w9WgXcQ";

    #[tokio::test]
    async fn test_unsupported_url_touches_nothing() {
        let (coordinator, _, db) = coordinator().await;
        let err = coordinator
            .request(&WaiterToken::new("w"), "http://example.com/x", &Variant::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedPlatform(_)));

        let (jobs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(jobs, 0);
    }

    #[tokio::test]
    async fn test_first_request_creates_and_enqueues() {
        let (coordinator, _, db) = coordinator().await;
        let status = coordinator
            .request(&WaiterToken::new("w"), URL, &Variant::default())
            .await
            .unwrap();
        assert!(matches!(status, RequestStatus::Queued(_)));

        let (queued,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM job_queue")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(queued, 1);
    }

    #[tokio::test]
    async fn test_second_request_attaches_to_same_job() {
        let (coordinator, _, db) = coordinator().await;
        let first = coordinator
            .request(&WaiterToken::new("w1"), URL, &Variant::default())
            .await
            .unwrap();
        let second = coordinator
            .request(
                &WaiterToken::new("w2"),
                "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                &Variant::default(),
            )
            .await
            .unwrap();
        assert_eq!(first, second);

        // Only the creating call enqueues.
        let (queued,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM job_queue")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(queued, 1);
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits() {
        let (coordinator, _, db) = coordinator().await;
        let key = RequestKey::new(
            build_default_platform_registry().resolve(URL).unwrap(),
            Variant::default(),
        );
        ArtifactCache::new(db.clone())
            .put(&key, &ArtifactRef::new("msg:5"))
            .await
            .unwrap();

        let status = coordinator
            .request(&WaiterToken::new("w"), URL, &Variant::default())
            .await
            .unwrap();
        assert_eq!(status, RequestStatus::Ready(ArtifactRef::new("msg:5")));

        let (jobs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(jobs, 0, "cache hit must not create a job");
    }

    #[tokio::test]
    async fn test_attach_to_terminal_job_notifies_immediately() {
        let (coordinator, notifier, db) = coordinator().await;
        let registry = JobRegistry::new(db.clone());

        let first = coordinator
            .request(&WaiterToken::new("w1"), URL, &Variant::default())
            .await
            .unwrap();
        let RequestStatus::Queued(job_id) = first else {
            panic!("expected queued, got {first:?}");
        };

        // Resolve as a worker would, then keep the row (grace period).
        registry.claim(job_id).await.unwrap();
        registry
            .resolve(job_id, &JobOutcome::Ready(ArtifactRef::new("msg:9")))
            .await
            .unwrap();

        let late = coordinator
            .request(&WaiterToken::new("w2"), URL, &Variant::default())
            .await
            .unwrap();
        assert_eq!(late, RequestStatus::Queued(job_id));

        let delivered = notifier.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, WaiterToken::new("w2"));
        assert_eq!(
            delivered[0].1,
            JobOutcome::Ready(ArtifactRef::new("msg:9"))
        );
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed() {
        let (coordinator, _, db) = coordinator().await;
        db.close().await;

        let err = coordinator
            .request(&WaiterToken::new("w"), URL, &Variant::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::CacheUnavailable(_)));
    }
}
