//! Job types, status definitions, and terminal outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::cache::ArtifactRef;
use crate::platform::{Platform, RequestKey, Variant, VideoIdentity};

/// Unique job identifier.
pub type JobId = i64;

/// Lifecycle states of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue.
    Queued,
    /// Claimed by a worker.
    InProgress,
    /// Resolved successfully; artifact cached.
    Ready,
    /// Resolved with a permanent failure.
    Failed,
}

impl JobStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    /// Returns true for terminal states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid job status: {s}")),
        }
    }
}

/// Why a job resolved FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobFailureKind {
    /// The extraction engine reported a permanent failure.
    ExtractionFailed,
    /// Transient failures (including per-attempt timeouts) exhausted the
    /// retry ceiling.
    Timeout,
    /// Unclassified internal failure.
    Internal,
}

impl JobFailureKind {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtractionFailed => "extraction_failed",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for JobFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobFailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extraction_failed" => Ok(Self::ExtractionFailed),
            "timeout" => Ok(Self::Timeout),
            "internal" => Ok(Self::Internal),
            _ => Err(format!("invalid failure kind: {s}")),
        }
    }
}

/// Opaque caller handle attached to a job and notified on resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaiterToken(String);

impl WaiterToken {
    /// Wraps a caller handle.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WaiterToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The single terminal fact broadcast to every waiter of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Extraction succeeded; the artifact is cached.
    Ready(ArtifactRef),
    /// The job failed permanently.
    Failed {
        /// Failure classification.
        kind: JobFailureKind,
        /// Human-readable description, identical for every waiter.
        message: String,
    },
}

impl JobOutcome {
    /// Returns the status this outcome resolves to.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Ready(_) => JobStatus::Ready,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// Result of `register_or_attach`: exactly one concurrent caller per key
/// observes `Created`; everyone else attaches to that same job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// This call created the job; the caller must enqueue it.
    Created {
        /// The new job's id.
        job_id: JobId,
    },
    /// An in-flight job already existed; the caller is now a waiter.
    Attached {
        /// The existing job's id.
        job_id: JobId,
    },
}

impl RegisterOutcome {
    /// Returns the job id in either case.
    #[must_use]
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Created { job_id } | Self::Attached { job_id } => *job_id,
        }
    }
}

/// One registered unit of work, owned by at most one worker at a time.
#[derive(Debug, Clone, FromRow)]
pub struct Job {
    /// Unique identifier.
    pub id: JobId,
    /// Request fingerprint (unique among live jobs).
    pub fingerprint: String,
    /// Platform, stored as text.
    pub platform: String,
    /// Canonical content id.
    pub canonical_id: String,
    /// Variant selector.
    pub variant: String,
    /// URL to hand to the extraction plan builder.
    pub source_url: String,
    /// Current status (stored as text, parsed via `status()`).
    #[sqlx(rename = "status")]
    pub status_str: String,
    /// Number of extraction attempts started.
    pub attempt_count: i64,
    /// Artifact handle once ready.
    pub artifact_ref: Option<String>,
    /// Failure classification once failed.
    pub failure_kind: Option<String>,
    /// Failure description once failed.
    pub failure_message: Option<String>,
    /// When the job was created.
    pub created_at: String,
    /// When the job was last updated.
    pub updated_at: String,
    /// When the job reached a terminal state.
    pub resolved_at: Option<String>,
}

impl Job {
    /// Returns the parsed status enum.
    ///
    /// Falls back to `Queued` if the status string is invalid.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status_str.parse().unwrap_or(JobStatus::Queued)
    }

    /// Returns true once the job has resolved.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Reconstructs the request key from the stored columns.
    ///
    /// Returns None if the platform column is corrupt.
    #[must_use]
    pub fn request_key(&self) -> Option<RequestKey> {
        let platform: Platform = self.platform.parse().ok()?;
        Some(RequestKey::new(
            VideoIdentity::new(platform, self.canonical_id.clone()),
            Variant::new(self.variant.clone()),
        ))
    }

    /// Returns the terminal outcome, or None while in flight.
    #[must_use]
    pub fn outcome(&self) -> Option<JobOutcome> {
        match self.status() {
            JobStatus::Ready => self
                .artifact_ref
                .as_deref()
                .map(|handle| JobOutcome::Ready(ArtifactRef::new(handle))),
            JobStatus::Failed => {
                let kind = self
                    .failure_kind
                    .as_deref()
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(JobFailureKind::Internal);
                Some(JobOutcome::Failed {
                    kind,
                    message: self.failure_message.clone().unwrap_or_default(),
                })
            }
            JobStatus::Queued | JobStatus::InProgress => None,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job {{ id: {}, key: {}:{}@{}, status: {} }}",
            self.id,
            self.platform,
            self.canonical_id,
            self.variant,
            self.status()
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn job(status: &str) -> Job {
        Job {
            id: 1,
            fingerprint: "f".repeat(64),
            platform: "youtube".to_string(),
            canonical_id: "abc".to_string(),
            variant: "default".to_string(),
            source_url: "https://youtu.be/abc".to_string(),
            status_str: status.to_string(),
            attempt_count: 0,
            artifact_ref: None,
            failure_kind: None,
            failure_message: None,
            created_at: "2026-01-01 00:00:00".to_string(),
            updated_at: "2026-01-01 00:00:00".to_string(),
            resolved_at: None,
        }
    }

    #[test]
    fn test_job_status_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::InProgress,
            JobStatus::Ready,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(JobStatus::Ready.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_invalid_status_falls_back_to_queued() {
        assert_eq!(job("bogus").status(), JobStatus::Queued);
    }

    #[test]
    fn test_outcome_none_while_in_flight() {
        assert!(job("queued").outcome().is_none());
        assert!(job("in_progress").outcome().is_none());
    }

    #[test]
    fn test_outcome_ready_carries_artifact() {
        let mut ready = job("ready");
        ready.artifact_ref = Some("msg:7".to_string());
        let outcome = ready.outcome().unwrap();
        assert_eq!(outcome, JobOutcome::Ready(ArtifactRef::new("msg:7")));
        assert_eq!(outcome.status(), JobStatus::Ready);
    }

    #[test]
    fn test_outcome_failed_defaults_to_internal_kind() {
        let mut failed = job("failed");
        failed.failure_message = Some("boom".to_string());
        let outcome = failed.outcome().unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                kind: JobFailureKind::Internal,
                message: "boom".to_string(),
            }
        );
    }

    #[test]
    fn test_request_key_reconstruction() {
        let key = job("queued").request_key().unwrap();
        assert_eq!(key.identity.canonical_id, "abc");
        assert_eq!(key.variant.as_str(), "default");
    }

    #[test]
    fn test_register_outcome_job_id_accessor() {
        assert_eq!(RegisterOutcome::Created { job_id: 3 }.job_id(), 3);
        assert_eq!(RegisterOutcome::Attached { job_id: 9 }.job_id(), 9);
    }
}
