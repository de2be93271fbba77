//! Durable job transport between the coordinator and the worker pool.
//!
//! The queue is an external collaborator in the architecture, so it is a
//! trait; [`SqliteJobQueue`] is the bundled implementation. Delivery is
//! at-least-once: a claimed delivery holds a lease, and a lease that
//! expires (crashed or wedged worker) makes the delivery claimable again,
//! so no job can be stranded by a dead executor.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::FromRow;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::registry::JobId;

/// Default lease duration for a claimed delivery.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(600);

/// Errors from queue operations.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// The transport rejected or could not serve the operation.
    #[error("job queue unavailable: {message}")]
    Unavailable {
        /// Human-readable transport error text.
        message: String,
    },
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable {
            message: err.to_string(),
        }
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// One claimed delivery of a job id.
///
/// `delivery_count` starts at 1 and grows on redelivery; workers can use it
/// to spot jobs that keep crashing their executor.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Delivery {
    /// Identifies this queue entry for `ack`.
    #[sqlx(rename = "id")]
    pub delivery_id: i64,
    /// The job to execute.
    pub job_id: JobId,
    /// How many times this entry has been claimed.
    pub delivery_count: i64,
}

/// Durable transport contract: enqueue job ids, claim them one at a time,
/// acknowledge when done.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Makes a job id available for claiming after `delay`.
    async fn enqueue(&self, job_id: JobId, delay: Duration) -> Result<()>;

    /// Claims the next available delivery, or None if the queue is empty.
    ///
    /// Claiming must be atomic: one delivery goes to exactly one concurrent
    /// caller until its lease expires.
    async fn dequeue(&self) -> Result<Option<Delivery>>;

    /// Acknowledges a delivery, removing it from the queue.
    async fn ack(&self, delivery_id: i64) -> Result<()>;
}

/// SQLite-backed queue with lease-based redelivery.
#[derive(Debug, Clone)]
pub struct SqliteJobQueue {
    db: Database,
    lease: Duration,
}

impl SqliteJobQueue {
    /// Creates a queue with the default lease.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self::with_lease(db, DEFAULT_LEASE)
    }

    /// Creates a queue with a custom lease duration.
    #[must_use]
    pub fn with_lease(db: Database, lease: Duration) -> Self {
        Self { db, lease }
    }

    /// Counts entries currently in the queue (claimed or not).
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] if the query fails.
    pub async fn len(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(r"SELECT COUNT(*) FROM job_queue")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    /// Returns true when no entries exist.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] if the query fails.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    #[instrument(skip(self), fields(delay_secs = delay.as_secs()))]
    async fn enqueue(&self, job_id: JobId, delay: Duration) -> Result<()> {
        sqlx::query(
            r"INSERT INTO job_queue (job_id, available_at)
              VALUES (?, datetime('now', '+' || ? || ' seconds'))",
        )
        .bind(job_id)
        .bind(i64::try_from(delay.as_secs()).unwrap_or(i64::MAX))
        .execute(self.db.pool())
        .await?;

        debug!(job_id, "job enqueued");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn dequeue(&self) -> Result<Option<Delivery>> {
        // Atomic UPDATE...RETURNING: claiming and leasing happen in one
        // statement, so concurrent workers cannot claim the same entry.
        let delivery = sqlx::query_as::<_, Delivery>(
            r"UPDATE job_queue
              SET lease_expires_at = datetime('now', '+' || ? || ' seconds'),
                  delivery_count = delivery_count + 1
              WHERE id = (
                  SELECT id FROM job_queue
                  WHERE available_at <= datetime('now')
                    AND (lease_expires_at IS NULL
                         OR lease_expires_at <= datetime('now'))
                  ORDER BY id ASC
                  LIMIT 1
              )
              RETURNING id, job_id, delivery_count",
        )
        .bind(i64::try_from(self.lease.as_secs()).unwrap_or(i64::MAX))
        .fetch_optional(self.db.pool())
        .await?;

        Ok(delivery)
    }

    #[instrument(skip(self))]
    async fn ack(&self, delivery_id: i64) -> Result<()> {
        // Idempotent: acknowledging an already-removed delivery is a no-op
        // (redelivery plus a slow first worker can both finish one entry).
        sqlx::query(r"DELETE FROM job_queue WHERE id = ?")
            .bind(delivery_id)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn queue_with_lease(lease: Duration) -> SqliteJobQueue {
        let db = Database::new_in_memory().await.unwrap();
        SqliteJobQueue::with_lease(db, lease)
    }

    #[tokio::test]
    async fn test_dequeue_on_empty_queue_returns_none() {
        let queue = queue_with_lease(DEFAULT_LEASE).await;
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_is_fifo() {
        let queue = queue_with_lease(DEFAULT_LEASE).await;
        queue.enqueue(11, Duration::ZERO).await.unwrap();
        queue.enqueue(22, Duration::ZERO).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap().unwrap().job_id, 11);
        assert_eq!(queue.dequeue().await.unwrap().unwrap().job_id, 22);
    }

    #[tokio::test]
    async fn test_claimed_delivery_is_not_redelivered_while_leased() {
        let queue = queue_with_lease(DEFAULT_LEASE).await;
        queue.enqueue(11, Duration::ZERO).await.unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.delivery_count, 1);
        assert!(
            queue.dequeue().await.unwrap().is_none(),
            "leased delivery must not be claimable"
        );
    }

    #[tokio::test]
    async fn test_expired_lease_makes_delivery_claimable_again() {
        // Zero-second lease expires immediately.
        let queue = queue_with_lease(Duration::ZERO).await;
        queue.enqueue(11, Duration::ZERO).await.unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        let second = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.job_id, second.job_id);
        assert_eq!(second.delivery_count, 2);
    }

    #[tokio::test]
    async fn test_delayed_entry_is_not_available_early() {
        let queue = queue_with_lease(DEFAULT_LEASE).await;
        queue.enqueue(11, Duration::from_secs(3600)).await.unwrap();

        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ack_removes_delivery() {
        let queue = queue_with_lease(Duration::ZERO).await;
        queue.enqueue(11, Duration::ZERO).await.unwrap();

        let delivery = queue.dequeue().await.unwrap().unwrap();
        queue.ack(delivery.delivery_id).await.unwrap();

        assert!(queue.dequeue().await.unwrap().is_none());
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_ack_is_idempotent() {
        let queue = queue_with_lease(DEFAULT_LEASE).await;
        queue.enqueue(11, Duration::ZERO).await.unwrap();
        let delivery = queue.dequeue().await.unwrap().unwrap();

        queue.ack(delivery.delivery_id).await.unwrap();
        queue.ack(delivery.delivery_id).await.unwrap();
    }
}
