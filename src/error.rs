//! Top-level error taxonomy surfaced to callers of the coordinator.

use thiserror::Error;

use crate::cache::CacheError;
use crate::platform::ResolveError;
use crate::queue::QueueError;
use crate::registry::RegistryError;

/// Errors a caller of [`Coordinator::request`](crate::Coordinator::request)
/// can observe.
///
/// `UnsupportedPlatform` and `ExtractionFailed` are permanent for a given
/// input; `Timeout`, `RegistryUnavailable`, and `CacheUnavailable` are
/// transient and a later identical request may succeed.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The URL could not be resolved to a supported platform identity.
    #[error("unsupported request: {0}")]
    UnsupportedPlatform(#[from] ResolveError),

    /// The extraction engine reported a permanent failure.
    #[error("extraction failed: {message}")]
    ExtractionFailed {
        /// Engine-reported description.
        message: String,
    },

    /// The retry ceiling was exhausted by transient failures or timeouts.
    #[error("download timed out after {attempts} attempts")]
    Timeout {
        /// Attempts made before giving up.
        attempts: i64,
    },

    /// The job registry could not be reached; the request was rejected
    /// without creating a job.
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(#[from] RegistryError),

    /// The artifact cache could not be reached; the request was rejected.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(#[from] CacheError),

    /// Unclassified internal failure.
    #[error("internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl From<QueueError> for CoreError {
    fn from(err: QueueError) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

impl CoreError {
    /// Maps a terminal failure delivered through the notifier into the
    /// caller-facing taxonomy. Hosts use this when turning a failed
    /// [`JobOutcome`](crate::registry::JobOutcome) into a reply.
    #[must_use]
    pub fn from_failure(
        kind: crate::registry::JobFailureKind,
        message: &str,
        attempts: i64,
    ) -> Self {
        use crate::registry::JobFailureKind;
        match kind {
            JobFailureKind::ExtractionFailed => Self::ExtractionFailed {
                message: message.to_string(),
            },
            JobFailureKind::Timeout => Self::Timeout { attempts },
            JobFailureKind::Internal => Self::Internal {
                message: message.to_string(),
            },
        }
    }
}

/// Result type for coordinator-facing operations.
pub type Result<T> = std::result::Result<T, CoreError>;
