//! E2E isolation tests.
//!
//! Three tenants share one collection: proj-a (en), proj-b (ru) and
//! proj-c (en). Every search must stay inside its own (project, language)
//! pair, even when the engine misbehaves.

use pretty_assertions::assert_eq;
use serde_json::json;

use e2e_tests::{axis_vector, ctx, points, tilted_vector, point, TestHarness};
use vecguard_filter::Refinements;
use vecguard_types::{IsolationContext, IsolationError, PointKind};

/// Load five points into each tenant, all sharing the same vectors.
async fn load_tenants(harness: &TestHarness) -> Vec<Vec<f32>> {
    let dim = harness.dimension();
    let mut vectors = Vec::new();
    for project in ["proj-a", "proj-b", "proj-c"] {
        let batch = points(project, dim, 5, "shared note");
        vectors = batch.iter().map(|p| p.vector.clone()).collect();
        let report = harness
            .service
            .upsert_many(&ctx(project), batch)
            .await
            .unwrap();
        assert_eq!(report.inserted, 5);
    }
    vectors
}

/// Each tenant only ever sees its own points.
#[tokio::test]
async fn test_tenants_never_see_each_other() {
    let harness = TestHarness::new().await;
    let vectors = load_tenants(&harness).await;

    for project in ["proj-a", "proj-b", "proj-c"] {
        let context = ctx(project);
        for vector in &vectors {
            let hits = harness
                .service
                .search(vector, &context, 50, None)
                .await
                .unwrap();
            assert_eq!(hits.len(), 5, "{project} should see exactly its own points");
            for hit in &hits {
                assert_eq!(hit.payload.project_id, *context.project_id());
                assert_eq!(hit.payload.language, *context.language());
            }
        }
    }
    assert_eq!(harness.service.metrics().isolation_violations, 0);
}

/// The same project id under a different language is a different scope.
#[tokio::test]
async fn test_language_is_part_of_scope() {
    let harness = TestHarness::new().await;
    load_tenants(&harness).await;

    let wrong_language = IsolationContext::parse("proj-a", "ru").unwrap();
    let hits = harness
        .service
        .search(&axis_vector(harness.dimension(), 0), &wrong_language, 50, None)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

/// Results come back best first.
#[tokio::test]
async fn test_results_are_ordered_by_score() {
    let harness = TestHarness::new().await;
    let dim = harness.dimension();
    let batch = vec![
        point("proj-a", tilted_vector(dim, 0, 2.0), "far"),
        point("proj-a", tilted_vector(dim, 0, 0.0), "exact"),
        point("proj-a", tilted_vector(dim, 0, 1.0), "further"),
        point("proj-a", tilted_vector(dim, 0, 0.5), "near"),
    ];
    harness.service.upsert_many(&ctx("proj-a"), batch).await.unwrap();

    let hits = harness
        .service
        .search(&axis_vector(dim, 0), &ctx("proj-a"), 10, None)
        .await
        .unwrap();

    let texts: Vec<_> = hits.iter().filter_map(|h| h.payload.text.as_deref()).collect();
    assert_eq!(texts, vec!["exact", "near", "further", "far"]);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

/// Refinements narrow results but never widen the tenant scope.
#[tokio::test]
async fn test_refinements_stay_inside_scope() {
    let harness = TestHarness::new().await;
    let dim = harness.dimension();
    harness
        .service
        .upsert_many(
            &ctx("proj-a"),
            vec![
                point("proj-a", axis_vector(dim, 0), "a memory").with_kind(PointKind::Memory),
                point("proj-a", axis_vector(dim, 0), "a knowledge"),
            ],
        )
        .await
        .unwrap();
    harness
        .service
        .upsert_many(
            &ctx("proj-c"),
            vec![point("proj-c", axis_vector(dim, 0), "c memory").with_kind(PointKind::Memory)],
        )
        .await
        .unwrap();

    let hits = harness
        .service
        .search(
            &axis_vector(dim, 0),
            &ctx("proj-a"),
            10,
            Some(Refinements::new().kind(PointKind::Memory)),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].payload.text.as_deref(), Some("a memory"));
}

/// A tenant cannot write points labelled with another tenant's scope.
#[tokio::test]
async fn test_cross_tenant_write_is_rejected() {
    let harness = TestHarness::new().await;
    let dim = harness.dimension();

    let report = harness
        .service
        .upsert_many(
            &ctx("proj-a"),
            vec![
                point("proj-b", axis_vector(dim, 1), "smuggled"),
                point("proj-a", axis_vector(dim, 1), "own").with_scope("proj-a", "ru"),
                point("proj-a", axis_vector(dim, 1), "legit"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.rejected.len(), 2);
    for rejected in &report.rejected {
        assert_eq!(rejected.error.category(), "invalid_payload");
    }

    let hits = harness
        .service
        .search(&axis_vector(dim, 1), &ctx("proj-b"), 10, None)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

/// Unknown or empty projects fail before the engine is contacted.
#[tokio::test]
async fn test_missing_context_fails_fast() {
    let harness = TestHarness::new().await;
    let dim = harness.dimension();
    let before = harness.engine.call_count();

    for project in ["", "ghost-project", "bad project"] {
        let err = harness
            .service
            .search_project(project, &axis_vector(dim, 0), 5, None)
            .await
            .unwrap_err();
        assert!(
            matches!(err, IsolationError::InvalidIsolationContext { .. }),
            "{project:?} gave {err:?}"
        );

        let err = harness
            .service
            .upsert_project(project, vec![point("proj-a", axis_vector(dim, 0), "x")])
            .await
            .unwrap_err();
        assert_eq!(err.category(), "invalid_isolation_context");
    }

    assert!(IsolationContext::parse("proj-a", "").is_err());
    assert!(IsolationContext::parse("proj-a", "zz").is_err());
    assert_eq!(harness.engine.call_count(), before);
    assert_eq!(
        harness
            .service
            .metrics()
            .errors_by_category
            .get("invalid_isolation_context"),
        Some(&6)
    );
}

/// Points leaked by a misbehaving engine are dropped and counted.
#[tokio::test]
async fn test_engine_leak_is_caught_by_post_validation() {
    let harness = TestHarness::new().await;
    let dim = harness.dimension();
    harness
        .service
        .upsert_many(&ctx("proj-a"), vec![point("proj-a", axis_vector(dim, 2), "mine")])
        .await
        .unwrap();

    harness.engine.insert_raw(
        harness.collection(),
        "00000000-0000-0000-0000-0000000000b1",
        axis_vector(dim, 2),
        json!({
            "project_id": "proj-b",
            "language": "ru",
            "kind": "knowledge",
            "content_hash": "b".repeat(64),
            "created_at": 1_706_529_600_000i64,
            "text": "foreign"
        }),
    );
    harness.engine.set_bypass_filter(true);

    let hits = harness
        .service
        .search(&axis_vector(dim, 2), &ctx("proj-a"), 10, None)
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].payload.text.as_deref(), Some("mine"));
    assert_eq!(harness.service.metrics().isolation_violations, 1);
}
