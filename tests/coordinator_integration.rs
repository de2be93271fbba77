//! Integration tests for the coordinator request path.
//!
//! These cover the dedup scenarios end to end: concurrent identical
//! requests, cache short-circuits, variant separation, analytics isolation,
//! and fail-closed behavior on store outages.

use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use vidcache_core::{
    AnalyticsEvent, AnalyticsSink, ArtifactCache, ArtifactRef, Coordinator, CoreError, Database,
    EventPublisher, JobOutcome, JobRegistry, Notifier, RequestKey, RequestStatus, SqliteJobQueue,
    Variant, WaiterToken, build_default_platform_registry,
};

const URL: &str = "https://youtu.be/dQw4w9WgXcQ";

struct NullSink;

#[async_trait]
impl AnalyticsSink for NullSink {
    async fn record(&self, _event: &AnalyticsEvent) -> Result<(), String> {
        Ok(())
    }
}

struct FailingSink;

#[async_trait]
impl AnalyticsSink for FailingSink {
    async fn record(&self, _event: &AnalyticsEvent) -> Result<(), String> {
        Err("analytics backend offline".to_string())
    }
}

struct SilentNotifier;

#[async_trait]
impl Notifier for SilentNotifier {
    async fn notify(&self, _waiter: &WaiterToken, _outcome: &JobOutcome) -> Result<(), String> {
        Ok(())
    }
}

/// Initializes test logging once; `RUST_LOG` controls verbosity.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn setup_with_sink(sink: Box<dyn AnalyticsSink>) -> (Coordinator, Database, TempDir) {
    init_tracing();
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db = Database::new(&temp_dir.path().join("test.db"))
        .await
        .expect("Failed to create database");

    let (events, _forwarder) = EventPublisher::spawn(sink, 8);
    let coordinator = Coordinator::new(
        Arc::new(build_default_platform_registry()),
        ArtifactCache::new(db.clone()),
        JobRegistry::new(db.clone()),
        Arc::new(SqliteJobQueue::new(db.clone())),
        Arc::new(SilentNotifier),
        events,
    );
    (coordinator, db, temp_dir)
}

async fn setup() -> (Coordinator, Database, TempDir) {
    setup_with_sink(Box::new(NullSink)).await
}

async fn count(db: &Database, table: &str) -> i64 {
    let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(db.pool())
        .await
        .expect("count query failed");
    count
}

#[tokio::test]
async fn test_concurrent_identical_requests_coalesce_into_one_job() {
    let (coordinator, db, _temp_dir) = setup().await;
    let coordinator = Arc::new(coordinator);

    let mut handles = Vec::new();
    for n in 0..8 {
        let coordinator = Arc::clone(&coordinator);
        handles.push(tokio::spawn(async move {
            coordinator
                .request(&WaiterToken::new(format!("w{n}")), URL, &Variant::default())
                .await
                .expect("request failed")
        }));
    }

    let mut job_ids = Vec::new();
    for handle in handles {
        match handle.await.expect("task panicked") {
            RequestStatus::Queued(job_id) => job_ids.push(job_id),
            RequestStatus::Ready(artifact) => panic!("unexpected cache hit: {artifact}"),
        }
    }

    assert!(job_ids.iter().all(|id| *id == job_ids[0]));
    assert_eq!(count(&db, "jobs").await, 1);
    assert_eq!(count(&db, "job_queue").await, 1, "only the creator enqueues");
    assert_eq!(count(&db, "job_waiters").await, 8);
}

#[tokio::test]
async fn test_cache_hit_short_circuits_without_queue_interaction() {
    let (coordinator, db, _temp_dir) = setup().await;
    let key = RequestKey::new(
        build_default_platform_registry().resolve(URL).expect("resolve failed"),
        Variant::default(),
    );
    ArtifactCache::new(db.clone())
        .put(&key, &ArtifactRef::new("msg:cached"))
        .await
        .expect("cache put failed");

    for n in 0..3 {
        let status = coordinator
            .request(&WaiterToken::new(format!("w{n}")), URL, &Variant::default())
            .await
            .expect("request failed");
        assert_eq!(status, RequestStatus::Ready(ArtifactRef::new("msg:cached")));
    }

    assert_eq!(count(&db, "jobs").await, 0);
    assert_eq!(count(&db, "job_queue").await, 0);

    // Hits were counted.
    let entry = ArtifactCache::new(db.clone())
        .get(&key)
        .await
        .expect("cache get failed")
        .expect("entry missing");
    assert_eq!(entry.hit_count, 3);
}

#[tokio::test]
async fn test_distinct_variants_queue_distinct_jobs() {
    let (coordinator, db, _temp_dir) = setup().await;

    let default = coordinator
        .request(&WaiterToken::new("w"), URL, &Variant::default())
        .await
        .expect("request failed");
    let hd = coordinator
        .request(&WaiterToken::new("w"), URL, &Variant::new("720p"))
        .await
        .expect("request failed");

    let (RequestStatus::Queued(a), RequestStatus::Queued(b)) = (default, hd) else {
        panic!("both requests should queue");
    };
    assert_ne!(a, b);
    assert_eq!(count(&db, "jobs").await, 2);
}

#[tokio::test]
async fn test_url_formatting_never_splits_a_job() {
    let (coordinator, db, _temp_dir) = setup().await;
    let forms = [
        "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
        "https://m.youtube.com/watch?v=dQw4w9WgXcQ&feature=share",
        "https://youtu.be/dQw4w9WgXcQ?si=AbCdEf",
    ];

    for (n, url) in forms.iter().enumerate() {
        coordinator
            .request(&WaiterToken::new(format!("w{n}")), url, &Variant::default())
            .await
            .expect("request failed");
    }

    assert_eq!(count(&db, "jobs").await, 1);
}

#[tokio::test]
async fn test_failing_analytics_sink_never_changes_the_answer() {
    let (coordinator, db, _temp_dir) = setup_with_sink(Box::new(FailingSink)).await;

    let status = coordinator
        .request(&WaiterToken::new("w"), URL, &Variant::default())
        .await
        .expect("request must succeed despite sink failure");
    assert!(matches!(status, RequestStatus::Queued(_)));

    // Cache-hit path too.
    let key = RequestKey::new(
        build_default_platform_registry().resolve(URL).expect("resolve failed"),
        Variant::new("audio"),
    );
    ArtifactCache::new(db.clone())
        .put(&key, &ArtifactRef::new("msg:a"))
        .await
        .expect("cache put failed");
    let hit = coordinator
        .request(&WaiterToken::new("w"), URL, &Variant::new("audio"))
        .await
        .expect("request must succeed despite sink failure");
    assert_eq!(hit, RequestStatus::Ready(ArtifactRef::new("msg:a")));
}

#[tokio::test]
async fn test_store_outage_rejects_instead_of_duplicating() {
    let (coordinator, db, _temp_dir) = setup().await;
    db.close().await;

    let err = coordinator
        .request(&WaiterToken::new("w"), URL, &Variant::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::CacheUnavailable(_) | CoreError::RegistryUnavailable(_)
    ));
}

#[tokio::test]
async fn test_unsupported_platform_has_no_side_effects() {
    let (coordinator, db, _temp_dir) = setup().await;

    let err = coordinator
        .request(
            &WaiterToken::new("w"),
            "https://vimeo.com/123456",
            &Variant::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UnsupportedPlatform(_)));

    assert_eq!(count(&db, "jobs").await, 0);
    assert_eq!(count(&db, "job_queue").await, 0);
}
