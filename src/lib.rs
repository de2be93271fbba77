//! Request Coordination and Caching Core
//!
//! This library is the coordination core of a media download service: it
//! deduplicates concurrent identical download requests into one job, caches
//! the resulting artifact reference, and notifies every interested caller
//! with the one shared outcome.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`platform`] - URL-to-identity resolution and extraction plans
//! - [`cache`] - Write-once artifact cache keyed by request fingerprint
//! - [`registry`] - Durable job registry with atomic register-or-attach
//! - [`queue`] - Lease-based durable job queue
//! - [`coordinator`] - Request entry point and waiter notification seam
//! - [`worker`] - Worker pool, retry policy, extraction engine seam
//! - [`events`] - Fire-and-forget analytics events
//!
//! The download itself is external: the host plugs in an
//! [`Extractor`](worker::Extractor) (the engine), a
//! [`Notifier`](coordinator::Notifier) (the side channel back to callers),
//! and an [`AnalyticsSink`](events::AnalyticsSink).

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod events;
pub mod platform;
pub mod queue;
pub mod registry;
pub mod worker;

// Re-export commonly used types
pub use cache::{ArtifactCache, ArtifactRef, CacheEntry, CacheError, PutOutcome};
pub use config::CoreConfig;
pub use coordinator::{Coordinator, Notifier, RequestStatus};
pub use db::Database;
pub use error::CoreError;
pub use events::{AnalyticsEvent, AnalyticsSink, EventPublisher};
pub use platform::{
    ExtractionPlan, Platform, PlatformRegistry, RequestKey, ResolveError, Variant, VideoIdentity,
    build_default_platform_registry,
};
pub use queue::{Delivery, JobQueue, QueueError, SqliteJobQueue};
pub use registry::{
    Job, JobFailureKind, JobId, JobOutcome, JobRegistry, JobStatus, RegisterOutcome,
    RegistryError, WaiterToken,
};
pub use worker::{
    DEFAULT_MAX_ATTEMPTS, ExtractError, Extractor, FailureKind, RetryDecision, RetryPolicy,
    WorkerPool,
};
