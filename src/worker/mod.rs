//! Worker pool: claims queued jobs and drives them to a terminal outcome.
//!
//! Each worker loop polls the shared queue, executes the job through the
//! registered [`Extractor`], and resolves the job exactly once. Everything
//! that happens after resolution (waiter notification, analytics, delayed
//! row removal) keys off `newly_resolved`, so a late redelivery of an
//! already-resolved job is a no-op.

mod retry;

pub use retry::{DEFAULT_MAX_ATTEMPTS, FailureKind, RetryDecision, RetryPolicy};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::cache::{ArtifactCache, ArtifactRef, CacheError};
use crate::config::CoreConfig;
use crate::coordinator::Notifier;
use crate::events::{AnalyticsEvent, EventPublisher};
use crate::platform::{ExtractionPlan, PlatformRegistry};
use crate::queue::{Delivery, JobQueue, QueueError};
use crate::registry::{
    Job, JobFailureKind, JobId, JobOutcome, JobRegistry, RegistryError, WaiterToken,
};

/// Failure reported by the extraction engine for one attempt.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ExtractError {
    /// Whether a retry could plausibly succeed.
    pub kind: FailureKind,
    /// Engine-reported description.
    pub message: String,
}

impl ExtractError {
    /// A failure that may succeed on retry.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    /// A failure no retry will fix.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    /// A throttling response from the platform.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::RateLimited,
            message: message.into(),
        }
    }
}

/// External extraction engine executing one plan at a time.
///
/// The core never downloads anything itself; the host application plugs in
/// the engine (a yt-dlp subprocess wrapper in the original deployment).
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Runs one extraction attempt and returns the stored artifact handle.
    async fn execute(&self, plan: &ExtractionPlan) -> Result<ArtifactRef, ExtractError>;
}

/// Errors a worker loop can hit outside job execution itself.
///
/// These leave the delivery unacked; the queue lease redelivers it.
#[derive(Debug, Error)]
enum WorkerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Pool of concurrent job executors over the shared queue.
#[derive(Clone)]
pub struct WorkerPool {
    registry: JobRegistry,
    cache: ArtifactCache,
    queue: Arc<dyn JobQueue>,
    platforms: Arc<PlatformRegistry>,
    extractor: Arc<dyn Extractor>,
    notifier: Arc<dyn Notifier>,
    events: EventPublisher,
    retry_policy: RetryPolicy,
    job_timeout: Duration,
    poll_interval: Duration,
    removal_grace: Duration,
    worker_count: usize,
}

impl WorkerPool {
    /// Creates a pool; nothing runs until [`run`](Self::run).
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &CoreConfig,
        registry: JobRegistry,
        cache: ArtifactCache,
        queue: Arc<dyn JobQueue>,
        platforms: Arc<PlatformRegistry>,
        extractor: Arc<dyn Extractor>,
        notifier: Arc<dyn Notifier>,
        events: EventPublisher,
    ) -> Self {
        Self {
            registry,
            cache,
            queue,
            platforms,
            extractor,
            notifier,
            events,
            retry_policy: config.retry_policy(),
            job_timeout: config.job_timeout(),
            poll_interval: config.queue_poll_interval(),
            removal_grace: config.removal_grace(),
            worker_count: config.worker_count.max(1),
        }
    }

    /// Runs the configured number of worker loops until `shutdown` flips to
    /// true. In-flight jobs finish their current step before the loop exits.
    ///
    /// Also runs a sweeper that deletes terminal rows whose grace period
    /// elapsed, once at startup and then periodically. The per-job removal
    /// timers live in process memory; without the sweep, a restart inside
    /// the grace window would leave a terminal row pinning its fingerprint
    /// (a stale failure would then be replayed to every later request).
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let mut workers = JoinSet::new();

        {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            workers.spawn(async move { pool.sweep_loop(shutdown).await });
        }

        for worker_id in 0..self.worker_count {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            workers.spawn(async move { pool.worker_loop(worker_id, shutdown).await });
        }
        while workers.join_next().await.is_some() {}
        info!("worker pool stopped");
    }

    #[instrument(skip(self, shutdown))]
    async fn sweep_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.removal_grace.max(self.poll_interval);
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.registry.remove_expired(self.removal_grace).await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "swept expired terminal jobs"),
                Err(error) => warn!(%error, "terminal job sweep failed"),
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    #[instrument(skip(self, shutdown))]
    async fn worker_loop(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.queue.dequeue().await {
                Ok(Some(delivery)) => {
                    if let Err(error) = self.process_delivery(&delivery).await {
                        // Leave the delivery unacked; the lease redelivers.
                        warn!(
                            worker_id,
                            job_id = delivery.job_id,
                            %error,
                            "delivery processing failed, awaiting redelivery"
                        );
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(error) => {
                    warn!(worker_id, %error, "queue dequeue failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
        info!(worker_id, "worker stopped");
    }

    #[instrument(skip(self, delivery), fields(job_id = delivery.job_id))]
    async fn process_delivery(&self, delivery: &Delivery) -> Result<(), WorkerError> {
        let Some(job) = self.registry.get(delivery.job_id).await? else {
            debug!("job gone, discarding delivery");
            self.queue.ack(delivery.delivery_id).await?;
            return Ok(());
        };

        if job.is_terminal() {
            debug!(status = %job.status(), "job already terminal, discarding delivery");
            self.queue.ack(delivery.delivery_id).await?;
            return Ok(());
        }

        let Some(key) = job.request_key() else {
            self.finish_failed(
                &job,
                JobFailureKind::Internal,
                "stored platform column is corrupt".to_string(),
            )
            .await?;
            self.queue.ack(delivery.delivery_id).await?;
            return Ok(());
        };

        // Another job for the same key may have filled the cache between
        // registration and this delivery. Serve from cache instead of
        // downloading again.
        if let Some(entry) = self.cache.get(&key).await? {
            debug!("cache filled while queued, resolving from cache");
            self.finish_ready(&job, &entry.artifact()).await?;
            self.queue.ack(delivery.delivery_id).await?;
            return Ok(());
        }

        let Some(claimed) = self.registry.claim(job.id).await? else {
            debug!("claim refused, discarding delivery");
            self.queue.ack(delivery.delivery_id).await?;
            return Ok(());
        };

        let plan = match self
            .platforms
            .build_plan(&key.identity, &claimed.source_url, &key.variant)
        {
            Ok(plan) => plan,
            Err(error) => {
                self.finish_failed(&claimed, JobFailureKind::ExtractionFailed, error.to_string())
                    .await?;
                self.queue.ack(delivery.delivery_id).await?;
                return Ok(());
            }
        };

        let attempt_result =
            tokio::time::timeout(self.job_timeout, self.extractor.execute(&plan)).await;

        match attempt_result {
            Ok(Ok(artifact)) => {
                match self.cache.put(&key, &artifact).await {
                    Ok(outcome) => debug!(?outcome, "artifact cached"),
                    // The artifact exists even if the cache write failed;
                    // waiters still get it, only future requests re-download.
                    Err(error) => warn!(%error, "cache write failed after extraction"),
                }
                self.finish_ready(&claimed, &artifact).await?;
            }
            Ok(Err(extract_error)) if !extract_error.kind.is_retryable() => {
                self.finish_failed(
                    &claimed,
                    JobFailureKind::ExtractionFailed,
                    extract_error.message,
                )
                .await?;
            }
            Ok(Err(extract_error)) => {
                self.retry_or_fail(&claimed, extract_error.kind, extract_error.message)
                    .await?;
            }
            Err(_elapsed) => {
                self.retry_or_fail(
                    &claimed,
                    FailureKind::Transient,
                    format!("attempt timed out after {:?}", self.job_timeout),
                )
                .await?;
            }
        }

        self.queue.ack(delivery.delivery_id).await?;
        Ok(())
    }

    /// Applies the retry policy to a retryable failure.
    async fn retry_or_fail(
        &self,
        job: &Job,
        kind: FailureKind,
        message: String,
    ) -> Result<(), WorkerError> {
        let attempt = u32::try_from(job.attempt_count).unwrap_or(u32::MAX);
        match self.retry_policy.should_retry(kind, attempt) {
            RetryDecision::Retry { delay, attempt } => {
                info!(job_id = job.id, attempt, delay_ms = delay.as_millis(), %message, "retrying job");
                match self.registry.requeue(job.id).await {
                    Ok(()) => self.queue.enqueue(job.id, delay).await?,
                    // Resolved under us (cache double-check by a peer);
                    // nothing left to retry.
                    Err(RegistryError::JobNotFound(_)) => {
                        debug!(job_id = job.id, "requeue refused, job no longer in progress");
                    }
                    Err(error) => return Err(error.into()),
                }
                Ok(())
            }
            RetryDecision::DoNotRetry { reason } => {
                self.finish_failed(
                    job,
                    JobFailureKind::Timeout,
                    format!("{message} ({reason})"),
                )
                .await
            }
        }
    }

    /// Resolves a job ready and runs the post-resolution sequence.
    async fn finish_ready(&self, job: &Job, artifact: &ArtifactRef) -> Result<(), WorkerError> {
        let outcome = JobOutcome::Ready(artifact.clone());
        let resolution = self.registry.resolve(job.id, &outcome).await?;
        if !resolution.newly_resolved {
            return Ok(());
        }

        info!(job_id = job.id, waiters = resolution.waiters.len(), "job ready");
        self.notify_waiters(&resolution.waiters, &outcome).await;
        self.events.publish(AnalyticsEvent::DownloadCompleted {
            fingerprint: job.fingerprint.clone(),
            job_id: job.id,
            attempt_count: job.attempt_count,
            timestamp: AnalyticsEvent::now(),
        });
        self.schedule_removal(job.id);
        Ok(())
    }

    /// Resolves a job failed and runs the post-resolution sequence.
    async fn finish_failed(
        &self,
        job: &Job,
        kind: JobFailureKind,
        message: String,
    ) -> Result<(), WorkerError> {
        let outcome = JobOutcome::Failed {
            kind,
            message,
        };
        let resolution = self.registry.resolve(job.id, &outcome).await?;
        if !resolution.newly_resolved {
            return Ok(());
        }

        warn!(job_id = job.id, %kind, waiters = resolution.waiters.len(), "job failed");
        self.notify_waiters(&resolution.waiters, &outcome).await;
        self.events.publish(AnalyticsEvent::DownloadFailed {
            fingerprint: job.fingerprint.clone(),
            job_id: job.id,
            kind,
            timestamp: AnalyticsEvent::now(),
        });
        self.schedule_removal(job.id);
        Ok(())
    }

    /// Delivers the identical outcome to every waiter; delivery failures are
    /// logged and never affect the job.
    async fn notify_waiters(&self, waiters: &[WaiterToken], outcome: &JobOutcome) {
        for waiter in waiters {
            if let Err(message) = self.notifier.notify(waiter, outcome).await {
                warn!(%waiter, message, "waiter notification failed");
            }
        }
    }

    /// Removes the resolved row after the grace period, letting identical
    /// requests attach to it in the meantime.
    fn schedule_removal(&self, job_id: JobId) {
        let registry = self.registry.clone();
        let grace = self.removal_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            match registry.remove(job_id).await {
                Ok(removed) => debug!(job_id, removed, "grace-period removal"),
                Err(error) => warn!(job_id, %error, "grace-period removal failed"),
            }
        });
    }
}
