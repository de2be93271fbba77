//! Error types for job registry operations.

use std::fmt;

use thiserror::Error;

/// Structured classification for registry/database failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryDbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/foreign-key/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Expected row was not found.
    RowNotFound,
    /// Filesystem or transport IO failure.
    Io,
    /// SQL protocol/driver error.
    Protocol,
    /// Unclassified database failure.
    Other,
}

impl RegistryDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Protocol(_) => Self::Protocol,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for RegistryDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::RowNotFound => "row_not_found",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> RegistryDbErrorKind {
    let code = database_error.code();
    if matches!(
        code.as_deref(),
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
    ) {
        return RegistryDbErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_foreign_key_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return RegistryDbErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("database is busy")
    {
        return RegistryDbErrorKind::BusyOrLocked;
    }

    RegistryDbErrorKind::Other
}

/// Errors that can occur during registry operations.
///
/// Any backing-store failure surfaces as `Unavailable`; callers must fail
/// closed rather than create jobs unconditionally, since that would defeat
/// the single-execution guarantee.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The backing store rejected or could not serve the operation.
    #[error("job registry unavailable ({kind}): {message}")]
    Unavailable {
        /// Typed classification of the store failure.
        kind: RegistryDbErrorKind,
        /// Human-readable store error text.
        message: String,
    },

    /// Job not found.
    #[error("job not found: id {0}")]
    JobNotFound(i64),
}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable {
            kind: RegistryDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl RegistryError {
    /// Returns the typed store error kind, when this is a store error.
    #[must_use]
    pub fn db_kind(&self) -> Option<RegistryDbErrorKind> {
        match self {
            Self::Unavailable { kind, .. } => Some(*kind),
            Self::JobNotFound(_) => None,
        }
    }

    /// Returns true when the store raced us on a constraint (the caller can
    /// retry the surrounding compare-and-swap sequence).
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        self.db_kind() == Some(RegistryDbErrorKind::ConstraintViolation)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_message_includes_kind() {
        let err = RegistryError::Unavailable {
            kind: RegistryDbErrorKind::PoolClosed,
            message: "pool closed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("unavailable"));
        assert!(msg.contains("pool_closed"));
    }

    #[test]
    fn test_job_not_found_message() {
        let err = RegistryError::JobNotFound(42);
        assert!(err.to_string().contains("42"));
        assert!(err.db_kind().is_none());
    }

    #[test]
    fn test_from_sqlx_pool_closed() {
        let err: RegistryError = sqlx::Error::PoolClosed.into();
        assert_eq!(err.db_kind(), Some(RegistryDbErrorKind::PoolClosed));
    }

    #[test]
    fn test_constraint_violation_flag() {
        let err = RegistryError::Unavailable {
            kind: RegistryDbErrorKind::ConstraintViolation,
            message: "FOREIGN KEY constraint failed".to_string(),
        };
        assert!(err.is_constraint_violation());
    }
}
