//! Job registry: durable mapping from request key to in-flight job.
//!
//! The registry provides the atomic register-if-absent primitive the whole
//! dedup guarantee rests on: under concurrent calls with one key, exactly
//! one caller observes `Created` and every other caller observes `Attached`
//! to that same job. The primitive is the UNIQUE constraint on the job
//! fingerprint driven through `INSERT ... ON CONFLICT DO NOTHING`; no
//! application-level lock is ever held across I/O.
//!
//! Lifecycle: a job is created on cache miss, mutated only by the worker
//! that owns it, resolved exactly once, and removed only after reaching a
//! terminal state, after waiter notification has been dispatched, and after
//! a grace period that catches late-arriving identical requests.

mod error;
mod job;

pub use error::{RegistryDbErrorKind, RegistryError};
pub use job::{
    Job, JobFailureKind, JobId, JobOutcome, JobStatus, RegisterOutcome, WaiterToken,
};

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::db::Database;
use crate::platform::RequestKey;

/// Attempts at the register/attach sequence before giving up.
///
/// A second round is only needed when the job row is deleted between the
/// conflicting insert and the waiter attach (grace-period sweep racing a
/// late request).
const REGISTER_ATTEMPTS: u32 = 3;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Waiters drained by a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// True if this call performed the terminal transition. A false value
    /// means the job was already terminal; no waiters are returned and the
    /// caller must not notify anyone.
    pub newly_resolved: bool,
    /// Every waiter attached before resolution, to be notified exactly once.
    pub waiters: Vec<WaiterToken>,
}

/// Durable job registry over the shared database.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    db: Database,
}

impl JobRegistry {
    /// Creates a new registry over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers a job for the key, or attaches the waiter to the existing
    /// one.
    ///
    /// Atomic under concurrency: the UNIQUE fingerprint constraint makes
    /// exactly one concurrent insert win. The waiter token is recorded in
    /// either branch before this function returns, so it is in the waiter
    /// set before the job can resolve (the owning worker drains waiters
    /// only at resolution).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] if the backing store cannot
    /// be reached. Callers must fail closed on this error.
    #[instrument(skip(self), fields(key = %key, waiter = %waiter))]
    pub async fn register_or_attach(
        &self,
        key: &RequestKey,
        source_url: &str,
        waiter: &WaiterToken,
    ) -> Result<RegisterOutcome> {
        let fingerprint = key.fingerprint();

        for attempt in 0..REGISTER_ATTEMPTS {
            let created: Option<(JobId,)> = sqlx::query_as(
                r"INSERT INTO jobs
                    (fingerprint, platform, canonical_id, variant, source_url)
                  VALUES (?, ?, ?, ?, ?)
                  ON CONFLICT(fingerprint) DO NOTHING
                  RETURNING id",
            )
            .bind(&fingerprint)
            .bind(key.identity.platform.as_str())
            .bind(&key.identity.canonical_id)
            .bind(key.variant.as_str())
            .bind(source_url)
            .fetch_optional(self.db.pool())
            .await?;

            let (job_id, created) = match created {
                Some((job_id,)) => (job_id, true),
                None => {
                    let existing: Option<(JobId,)> =
                        sqlx::query_as(r"SELECT id FROM jobs WHERE fingerprint = ?")
                            .bind(&fingerprint)
                            .fetch_optional(self.db.pool())
                            .await?;
                    match existing {
                        Some((job_id,)) => (job_id, false),
                        // The conflicting row was removed between the two
                        // statements; take another round and create it.
                        None => {
                            debug!(attempt, "registration raced a removal, retrying");
                            continue;
                        }
                    }
                }
            };

            match self.attach_waiter(job_id, waiter).await {
                Ok(()) => {
                    return Ok(if created {
                        RegisterOutcome::Created { job_id }
                    } else {
                        RegisterOutcome::Attached { job_id }
                    });
                }
                // FK violation: the job vanished under us. Retry the round.
                Err(error) if error.is_constraint_violation() => {
                    debug!(job_id, attempt, "waiter attach raced a removal, retrying");
                }
                Err(error) => return Err(error),
            }
        }

        Err(RegistryError::Unavailable {
            kind: RegistryDbErrorKind::Other,
            message: format!("lost registration race {REGISTER_ATTEMPTS} times"),
        })
    }

    async fn attach_waiter(&self, job_id: JobId, waiter: &WaiterToken) -> Result<()> {
        sqlx::query(
            r"INSERT OR IGNORE INTO job_waiters (job_id, waiter_token) VALUES (?, ?)",
        )
        .bind(job_id)
        .bind(waiter.as_str())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Gets a job by id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, job_id: JobId) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(r"SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(job)
    }

    /// Claims a job for execution: marks it `in_progress` and increments
    /// its attempt count.
    ///
    /// Returns None if the job is gone or already terminal (a late queue
    /// redelivery); the caller must skip it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] if the update fails.
    #[instrument(skip(self))]
    pub async fn claim(&self, job_id: JobId) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r"UPDATE jobs
              SET status = ?,
                  attempt_count = attempt_count + 1,
                  updated_at = datetime('now')
              WHERE id = ? AND status IN (?, ?)
              RETURNING *",
        )
        .bind(JobStatus::InProgress.as_str())
        .bind(job_id)
        .bind(JobStatus::Queued.as_str())
        .bind(JobStatus::InProgress.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(job)
    }

    /// Returns an in-progress job to queued state ahead of a retry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::JobNotFound`] if the job is not in
    /// progress, or [`RegistryError::Unavailable`] if the update fails.
    #[instrument(skip(self))]
    pub async fn requeue(&self, job_id: JobId) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE jobs
              SET status = ?, updated_at = datetime('now')
              WHERE id = ? AND status = ?",
        )
        .bind(JobStatus::Queued.as_str())
        .bind(job_id)
        .bind(JobStatus::InProgress.as_str())
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            Err(RegistryError::JobNotFound(job_id))
        } else {
            Ok(())
        }
    }

    /// Resolves a job to its terminal outcome and drains its waiter set.
    ///
    /// The transition happens at most once: a second resolution attempt
    /// (late redelivery, racing workers after a lease expiry) observes
    /// `newly_resolved == false` and receives no waiters, so no one is
    /// notified twice and all waiters see one identical outcome.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] if the store fails.
    #[instrument(skip(self, outcome), fields(status = %outcome.status()))]
    pub async fn resolve(&self, job_id: JobId, outcome: &JobOutcome) -> Result<Resolution> {
        let (artifact_ref, failure_kind, failure_message) = match outcome {
            JobOutcome::Ready(artifact) => (Some(artifact.as_str().to_string()), None, None),
            JobOutcome::Failed { kind, message } => {
                (None, Some(kind.as_str()), Some(message.clone()))
            }
        };

        let result = sqlx::query(
            r"UPDATE jobs
              SET status = ?,
                  artifact_ref = ?,
                  failure_kind = ?,
                  failure_message = ?,
                  resolved_at = datetime('now'),
                  updated_at = datetime('now')
              WHERE id = ? AND status IN (?, ?)",
        )
        .bind(outcome.status().as_str())
        .bind(artifact_ref)
        .bind(failure_kind)
        .bind(failure_message)
        .bind(job_id)
        .bind(JobStatus::Queued.as_str())
        .bind(JobStatus::InProgress.as_str())
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            warn!(job_id, "resolution skipped: job already terminal or gone");
            return Ok(Resolution {
                newly_resolved: false,
                waiters: Vec::new(),
            });
        }

        let waiters = self.waiters(job_id).await?;
        Ok(Resolution {
            newly_resolved: true,
            waiters,
        })
    }

    /// Lists the waiters currently attached to a job.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] if the query fails.
    #[instrument(skip(self))]
    pub async fn waiters(&self, job_id: JobId) -> Result<Vec<WaiterToken>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r"SELECT waiter_token FROM job_waiters
              WHERE job_id = ?
              ORDER BY attached_at ASC, waiter_token ASC",
        )
        .bind(job_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(|(token,)| WaiterToken::new(token)).collect())
    }

    /// Returns the terminal outcome of a job, if it has one.
    ///
    /// Used for callers that attach during the grace period, after the
    /// owning worker has already dispatched notifications.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] if the query fails.
    #[instrument(skip(self))]
    pub async fn outcome(&self, job_id: JobId) -> Result<Option<JobOutcome>> {
        Ok(self.get(job_id).await?.and_then(|job| job.outcome()))
    }

    /// Removes a terminal job (and, via cascade, its waiters).
    ///
    /// Refuses to touch in-flight jobs; returns true if a row was deleted.
    /// Callers invoke this only after the grace period.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn remove(&self, job_id: JobId) -> Result<bool> {
        let result = sqlx::query(r"DELETE FROM jobs WHERE id = ? AND status IN (?, ?)")
            .bind(job_id)
            .bind(JobStatus::Ready.as_str())
            .bind(JobStatus::Failed.as_str())
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Removes every terminal job whose grace period fully elapsed.
    ///
    /// Durability backstop for [`remove`](Self::remove): the per-job
    /// removal timer lives in process memory, so a crash or restart inside
    /// the grace window would otherwise leave the row behind and pin its
    /// fingerprint to a stale outcome forever. Returns the number of rows
    /// swept.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] if the delete fails.
    #[instrument(skip(self), fields(grace_secs = grace.as_secs()))]
    pub async fn remove_expired(&self, grace: Duration) -> Result<u64> {
        let result = sqlx::query(
            r"DELETE FROM jobs
              WHERE status IN (?, ?)
                AND resolved_at IS NOT NULL
                AND resolved_at <= datetime('now', '-' || ? || ' seconds')",
        )
        .bind(JobStatus::Ready.as_str())
        .bind(JobStatus::Failed.as_str())
        .bind(i64::try_from(grace.as_secs()).unwrap_or(i64::MAX))
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Counts jobs by status.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as(r"SELECT COUNT(*) FROM jobs WHERE status = ?")
                .bind(status.as_str())
                .fetch_one(self.db.pool())
                .await?;

        Ok(count)
    }
}
