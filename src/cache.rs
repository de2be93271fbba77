//! Write-once artifact cache keyed by request fingerprint.
//!
//! Once a key has an entry it is never overwritten, only read; `put` is
//! idempotent with first-writer-wins semantics, which tolerates the rare
//! race where two jobs for one key exist after registry failure recovery.
//! The core never deletes entries; retention is an external policy.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::platform::RequestKey;

/// Opaque handle into the external artifact store.
///
/// The core never inspects its shape; in the original deployment this is a
/// messaging-channel message/file id, but any stable string works.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    /// Wraps a store handle.
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Returns the raw handle string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of an idempotent cache write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// This call created the entry.
    Stored,
    /// An entry already existed; the write was silently discarded.
    AlreadyExists,
}

/// A cached artifact for one request key.
#[derive(Debug, Clone, FromRow)]
pub struct CacheEntry {
    /// Request fingerprint (primary key).
    pub fingerprint: String,
    /// Platform, stored as text.
    pub platform: String,
    /// Canonical content id.
    pub canonical_id: String,
    /// Variant selector.
    pub variant: String,
    /// Opaque artifact handle.
    pub artifact_ref: String,
    /// Number of cache hits served from this entry.
    pub hit_count: i64,
    /// When the entry was written.
    pub stored_at: String,
}

impl CacheEntry {
    /// Returns the artifact handle as a typed reference.
    #[must_use]
    pub fn artifact(&self) -> ArtifactRef {
        ArtifactRef::new(self.artifact_ref.clone())
    }
}

/// Errors from cache operations.
///
/// Every store failure is surfaced as `Unavailable`: the coordinator fails
/// closed rather than risking unguarded duplicate execution.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The backing store rejected or could not serve the operation.
    #[error("cache store unavailable: {message}")]
    Unavailable {
        /// Human-readable store error text.
        message: String,
    },
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable {
            message: err.to_string(),
        }
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Durable mapping from request key to artifact reference.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    db: Database,
}

impl ArtifactCache {
    /// Creates a new cache over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Looks up the entry for a key.
    ///
    /// Reads either see nothing or the fully-written entry; the single
    /// INSERT that creates a row is atomic.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the store cannot be reached.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn get(&self, key: &RequestKey) -> Result<Option<CacheEntry>> {
        let entry = sqlx::query_as::<_, CacheEntry>(
            r"SELECT * FROM artifact_cache WHERE fingerprint = ?",
        )
        .bind(key.fingerprint())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(entry)
    }

    /// Stores an artifact for a key; first writer wins.
    ///
    /// A second write for a key that already has an entry is accepted and
    /// silently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the store cannot be reached.
    #[instrument(skip(self, artifact), fields(key = %key))]
    pub async fn put(&self, key: &RequestKey, artifact: &ArtifactRef) -> Result<PutOutcome> {
        let result = sqlx::query(
            r"INSERT INTO artifact_cache
                (fingerprint, platform, canonical_id, variant, artifact_ref)
              VALUES (?, ?, ?, ?, ?)
              ON CONFLICT(fingerprint) DO NOTHING",
        )
        .bind(key.fingerprint())
        .bind(key.identity.platform.as_str())
        .bind(&key.identity.canonical_id)
        .bind(key.variant.as_str())
        .bind(artifact.as_str())
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            debug!(%key, "cache entry already present, write discarded");
            Ok(PutOutcome::AlreadyExists)
        } else {
            Ok(PutOutcome::Stored)
        }
    }

    /// Increments the hit counter for a key.
    ///
    /// Returns the new count, or 0 if the entry disappeared (external
    /// retention may remove rows under us; the counter is observability,
    /// not correctness).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the store cannot be reached.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn record_hit(&self, key: &RequestKey) -> Result<i64> {
        let row: Option<(i64,)> = sqlx::query_as(
            r"UPDATE artifact_cache
              SET hit_count = hit_count + 1
              WHERE fingerprint = ?
              RETURNING hit_count",
        )
        .bind(key.fingerprint())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map_or(0, |(count,)| count))
    }
}
