//! E2E ingestion tests.
//!
//! Covers dimension enforcement, idempotent upserts, batching and partial
//! failure reporting through the full service.

use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;

use e2e_tests::{axis_vector, ctx, point, points, test_settings, TestHarness};
use vecguard_filter::content_hash;
use vecguard_service::MAX_POINTS_PER_REQUEST;
use vecguard_types::{IsolationError, PointId, ProjectId, VectorPoint};

const PRODUCTION_DIMENSION: usize = 1536;

/// A 512-dim vector against a 1536-dim collection is rejected and nothing is stored.
#[tokio::test]
async fn test_wrong_dimension_stores_nothing() {
    let harness = TestHarness::with_settings(test_settings(PRODUCTION_DIMENSION)).await;

    let report = harness
        .service
        .upsert_many(
            &ctx("proj-a"),
            vec![point("proj-a", vec![0.1; 512], "short vector").with_id("doc-1")],
        )
        .await
        .unwrap();

    assert_eq!(report.stored(), 0);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].source_id.as_deref(), Some("doc-1"));
    assert_eq!(
        report.rejected[0].error,
        IsolationError::InvalidDimension {
            expected: 1536,
            actual: 512
        }
    );
    assert_eq!(harness.engine.point_count(harness.collection()), 0);

    let err = harness
        .service
        .search(&[0.1; 512], &ctx("proj-a"), 10, None)
        .await
        .unwrap_err();
    assert!(matches!(err, IsolationError::InvalidDimension { .. }));
}

/// Upserting the same content twice keeps one point with the latest vector.
#[tokio::test]
async fn test_upsert_is_idempotent_on_content() {
    let harness = TestHarness::new().await;
    let dim = harness.dimension();

    let first = harness
        .service
        .upsert_many(&ctx("proj-a"), vec![point("proj-a", axis_vector(dim, 0), "deploy runbook")])
        .await
        .unwrap();
    assert_eq!((first.inserted, first.updated), (1, 0));

    let second = harness
        .service
        .upsert_many(
            &ctx("proj-a"),
            vec![point("proj-a", axis_vector(dim, 3), "  deploy   runbook ")],
        )
        .await
        .unwrap();
    assert_eq!((second.inserted, second.updated), (0, 1));
    assert_eq!(harness.engine.point_count(harness.collection()), 1);

    let id = PointId::for_key(
        &ProjectId::parse("proj-a").unwrap(),
        &content_hash("deploy runbook"),
    );
    assert_eq!(
        harness.engine.vector_of(harness.collection(), &id),
        Some(axis_vector(dim, 3))
    );
}

/// Identical content in different projects is stored twice.
#[tokio::test]
async fn test_same_content_in_two_projects_is_two_points() {
    let harness = TestHarness::new().await;
    let dim = harness.dimension();
    for project in ["proj-a", "proj-c"] {
        harness
            .service
            .upsert_many(&ctx(project), vec![point(project, axis_vector(dim, 0), "shared")])
            .await
            .unwrap();
    }
    assert_eq!(harness.engine.point_count(harness.collection()), 2);
}

/// 100 valid points become searchable within the batch latency target.
#[tokio::test]
async fn test_hundred_point_batch() {
    let harness = TestHarness::with_settings(test_settings(PRODUCTION_DIMENSION)).await;
    let batch = points("proj-a", PRODUCTION_DIMENSION, 100, "chunk");
    let vectors: Vec<Vec<f32>> = batch.iter().map(|p| p.vector.clone()).collect();

    let started = Instant::now();
    let report = harness.service.upsert_many(&ctx("proj-a"), batch).await.unwrap();
    let elapsed = started.elapsed();

    assert!(report.is_complete());
    assert_eq!(report.inserted, 100);
    assert!(elapsed < Duration::from_millis(500), "batch took {elapsed:?}");

    for (i, vector) in vectors.iter().enumerate() {
        let hits = harness
            .service
            .search(vector, &ctx("proj-a"), 1, None)
            .await
            .unwrap();
        assert_eq!(hits[0].payload.source_id.as_deref(), Some(format!("chunk-{i}").as_str()));
    }

    let snapshot = harness.service.metrics();
    assert_eq!(snapshot.upsert.inserted, 100);
    assert_eq!(snapshot.upsert.batches, 1);
}

/// Requests larger than a batch are split into several engine batches.
#[tokio::test]
async fn test_large_request_is_split_into_batches() {
    let mut settings = test_settings(8);
    settings.ingest.batch_size = 25;
    let harness = TestHarness::with_settings(settings).await;

    let report = harness
        .service
        .upsert_many(&ctx("proj-b"), points("proj-b", 8, 100, "ru chunk"))
        .await
        .unwrap();

    assert_eq!(report.inserted, 100);
    assert_eq!(harness.service.metrics().upsert.batches, 4);
}

/// Duplicates inside one request collapse to the last occurrence.
#[tokio::test]
async fn test_duplicates_within_request() {
    let harness = TestHarness::new().await;
    let dim = harness.dimension();

    let report = harness
        .service
        .upsert_many(
            &ctx("proj-c"),
            vec![
                point("proj-c", axis_vector(dim, 0), "note").with_id("first"),
                point("proj-c", axis_vector(dim, 1), "note").with_id("second"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.deduplicated, 1);
    let hits = harness
        .service
        .search(&axis_vector(dim, 1), &ctx("proj-c"), 5, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].payload.source_id.as_deref(), Some("second"));
}

/// Oversized requests are refused before anything reaches the engine.
#[tokio::test]
async fn test_oversized_request_rejected() {
    let harness = TestHarness::new().await;
    let before = harness.engine.call_count();
    let batch: Vec<VectorPoint> = (0..=MAX_POINTS_PER_REQUEST)
        .map(|i| point("proj-a", axis_vector(8, i), &format!("p{i}")))
        .collect();

    let err = harness
        .service
        .upsert_many(&ctx("proj-a"), batch)
        .await
        .unwrap_err();

    assert_eq!(err.field(), Some("points"));
    assert_eq!(harness.engine.call_count(), before);
}

/// An engine outage fails the batch without losing track of its points.
#[tokio::test]
async fn test_outage_reports_failed_batch() {
    let harness = TestHarness::new().await;
    harness.engine.set_available(false);

    let report = harness
        .service
        .upsert_many(&ctx("proj-a"), points("proj-a", 8, 3, "lost"))
        .await
        .unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.stored(), 0);
    assert_eq!(report.failed_batches.len(), 1);
    assert_eq!(report.failed_batches[0].point_ids.len(), 3);
    assert_eq!(report.failed_batches[0].error.category(), "engine_unavailable");
    assert_eq!(harness.service.metrics().upsert.failed, 3);
}
