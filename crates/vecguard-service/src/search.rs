//! Isolated similarity search.
//!
//! Every query goes to the engine with the mandatory `(project_id, language)`
//! filter, and every returned point is checked against that filter again
//! before it reaches the caller. A point that fails the scope check is a
//! cross-tenant leak: it is dropped, logged on the `security` target and
//! counted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error};
use vecguard_engine::{IndexEngine, ResiliencePolicy, ScoredPoint};
use vecguard_filter::{
    build_search_filter, FilterCheck, Refinements, SchemaValidator, SearchFilter,
};
use vecguard_types::{IsolationContext, IsolationError, PointPayload, SearchHit, SearchSettings};

use crate::metrics::ServiceMetrics;

pub struct SearchOrchestrator {
    engine: Arc<dyn IndexEngine>,
    policy: ResiliencePolicy,
    validator: SchemaValidator,
    collection: String,
    settings: SearchSettings,
    metrics: Arc<ServiceMetrics>,
}

impl SearchOrchestrator {
    pub fn new(
        engine: Arc<dyn IndexEngine>,
        policy: ResiliencePolicy,
        validator: SchemaValidator,
        collection: String,
        settings: SearchSettings,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            engine,
            policy,
            validator,
            collection,
            settings,
            metrics,
        }
    }

    /// `0` selects the default limit; anything above the maximum is capped.
    pub fn effective_limit(&self, requested: usize) -> usize {
        if requested == 0 {
            self.settings.default_limit
        } else {
            requested.min(self.settings.max_limit)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.settings.timeout_ms)
    }

    /// Top-`limit` points of `ctx`'s tenant, best first.
    pub async fn search(
        &self,
        vector: &[f32],
        ctx: &IsolationContext,
        limit: usize,
        refinements: Option<Refinements>,
    ) -> Result<Vec<SearchHit>, IsolationError> {
        let start = Instant::now();
        self.metrics.record_search_request();
        match self.run(vector, ctx, limit, refinements).await {
            Ok(hits) => {
                let latency = start.elapsed();
                self.metrics.record_search_completed(latency, hits.len());
                debug!(
                    project = %ctx.project_id(),
                    language = %ctx.language(),
                    results = hits.len(),
                    duration_ms = latency.as_millis() as u64,
                    "Search completed"
                );
                Ok(hits)
            }
            Err(e) => {
                self.metrics.record_error("search", &e);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        vector: &[f32],
        ctx: &IsolationContext,
        limit: usize,
        refinements: Option<Refinements>,
    ) -> Result<Vec<SearchHit>, IsolationError> {
        let filter = build_search_filter(ctx, refinements.unwrap_or_default())?;
        self.validator.validate_query_vector(vector)?;
        let limit = self.effective_limit(limit);
        let collection = self.collection.as_str();

        // Attempts share the search budget; running out counts against the breaker.
        let scored = self
            .policy
            .execute_within("search", self.timeout(), || {
                self.engine.search(collection, vector, &filter, limit)
            })
            .await?;

        Ok(self.post_validate(&filter, scored, limit))
    }

    fn post_validate(
        &self,
        filter: &SearchFilter,
        scored: Vec<ScoredPoint>,
        limit: usize,
    ) -> Vec<SearchHit> {
        let mut hits = Vec::with_capacity(scored.len());
        for point in scored {
            let payload: PointPayload = match serde_json::from_value(point.payload) {
                Ok(p) => p,
                Err(e) => {
                    // Unreadable scope cannot be proven to belong to the caller.
                    self.violation(filter, &point.id, "payload", &e.to_string());
                    continue;
                }
            };
            match filter.check(&payload) {
                FilterCheck::Match => hits.push(SearchHit {
                    id: payload.point_id(),
                    score: point.score,
                    payload,
                }),
                FilterCheck::ScopeMismatch => {
                    let found = format!("{}/{}", payload.project_id, payload.language);
                    self.violation(filter, &point.id, "scope", &found);
                }
                FilterCheck::RefinementMismatch => {}
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.payload.created_at.cmp(&a.payload.created_at))
        });
        hits.truncate(limit);
        hits
    }

    fn violation(&self, filter: &SearchFilter, point_id: &str, check: &str, found: &str) {
        error!(
            target: "security",
            project = %filter.project_id(),
            language = %filter.language(),
            point_id,
            check,
            found,
            "Isolation violation: engine returned a point outside the requested scope"
        );
        self.metrics.record_isolation_violation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use vecguard_engine::{CollectionSpec, EnginePool, InMemoryEngine, RetryPolicy};
    use vecguard_types::{Distance, PointKind, PointMetadata, ResilienceSettings, VectorPoint};

    async fn setup(
        settings: SearchSettings,
    ) -> (SearchOrchestrator, Arc<InMemoryEngine>, Arc<ServiceMetrics>) {
        let engine = Arc::new(InMemoryEngine::new());
        engine
            .create_collection(&CollectionSpec {
                name: "c".into(),
                dimension: 2,
                distance: Distance::Cosine,
                indexes: vec![],
            })
            .await
            .unwrap();
        let metrics = Arc::new(ServiceMetrics::new());
        let policy = ResiliencePolicy::from_settings(
            &ResilienceSettings::default(),
            EnginePool::new(4, Duration::from_millis(100)),
        )
        .with_retry(RetryPolicy::no_retry());
        let search = SearchOrchestrator::new(
            engine.clone(),
            policy,
            SchemaValidator::new(2),
            "c".into(),
            settings,
            metrics.clone(),
        );
        (search, engine, metrics)
    }

    async fn store(
        engine: &InMemoryEngine,
        project: &str,
        language: &str,
        text: &str,
        vector: Vec<f32>,
        importance: f32,
    ) {
        let point = SchemaValidator::new(2)
            .validate(
                &VectorPoint::new(vector)
                    .with_scope(project, language)
                    .with_kind(PointKind::Knowledge)
                    .with_text(text)
                    .with_metadata(PointMetadata {
                        importance: Some(importance),
                        ..Default::default()
                    }),
            )
            .unwrap();
        engine.upsert("c", &[point]).await.unwrap();
    }

    fn ctx(project: &str, language: &str) -> IsolationContext {
        IsolationContext::parse(project, language).unwrap()
    }

    #[tokio::test]
    async fn test_results_stay_in_scope_and_ordered() {
        let (search, engine, _) = setup(SearchSettings::default()).await;
        store(&engine, "a", "en", "near", vec![1.0, 0.0], 0.5).await;
        store(&engine, "a", "en", "far", vec![0.0, 1.0], 0.5).await;
        store(&engine, "a", "ru", "other-lang", vec![1.0, 0.0], 0.5).await;
        store(&engine, "b", "en", "other-project", vec![1.0, 0.0], 0.5).await;

        let hits = search.search(&[1.0, 0.0], &ctx("a", "en"), 10, None).await.unwrap();
        let texts: Vec<_> = hits.iter().map(|h| h.payload.text.clone().unwrap()).collect();
        assert_eq!(texts, vec!["near".to_string(), "far".to_string()]);
    }

    #[tokio::test]
    async fn test_limit_defaults_and_caps() {
        let (search, _, _) = setup(SearchSettings {
            default_limit: 3,
            max_limit: 5,
            timeout_ms: 1000,
        })
        .await;
        assert_eq!(search.effective_limit(0), 3);
        assert_eq!(search.effective_limit(4), 4);
        assert_eq!(search.effective_limit(500), 5);
    }

    #[tokio::test]
    async fn test_refinements_are_additive() {
        let (search, engine, _) = setup(SearchSettings::default()).await;
        store(&engine, "a", "en", "important", vec![1.0, 0.0], 0.9).await;
        store(&engine, "a", "en", "minor", vec![1.0, 0.1], 0.1).await;
        store(&engine, "b", "en", "foreign", vec![1.0, 0.0], 0.9).await;

        let hits = search
            .search(
                &[1.0, 0.0],
                &ctx("a", "en"),
                10,
                Some(Refinements::new().min_importance(0.5)),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.text.as_deref(), Some("important"));
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected_before_engine() {
        let (search, engine, metrics) = setup(SearchSettings::default()).await;
        let before = engine.call_count();
        let err = search
            .search(&[1.0, 0.0, 0.0], &ctx("a", "en"), 10, None)
            .await
            .unwrap_err();
        assert_eq!(err, IsolationError::InvalidDimension { expected: 2, actual: 3 });
        assert_eq!(engine.call_count(), before);
        assert_eq!(metrics.snapshot().errors_by_category.get("invalid_dimension"), Some(&1));
    }

    #[tokio::test]
    async fn test_leaked_points_dropped_and_counted() {
        let (search, engine, metrics) = setup(SearchSettings::default()).await;
        store(&engine, "a", "en", "mine", vec![1.0, 0.0], 0.5).await;
        store(&engine, "b", "en", "theirs", vec![1.0, 0.0], 0.5).await;
        engine.insert_raw("c", "garbage", vec![1.0, 0.0], json!({ "text": "no scope" }));
        engine.set_bypass_filter(true);

        let hits = search.search(&[1.0, 0.0], &ctx("a", "en"), 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.project_id.as_str(), "a");
        assert_eq!(metrics.snapshot().isolation_violations, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_timeout() {
        let (search, engine, metrics) = setup(SearchSettings {
            timeout_ms: 100,
            ..Default::default()
        })
        .await;
        engine.set_latency(Duration::from_secs(5));
        let before = engine.call_count();

        let err = search.search(&[1.0, 0.0], &ctx("a", "en"), 10, None).await.unwrap_err();
        assert_eq!(err, IsolationError::SearchTimeout { timeout_ms: 100 });
        assert_eq!(metrics.snapshot().errors_by_category.get("search_timeout"), Some(&1));
        assert_eq!(engine.call_count() - before, 1);
    }

    #[tokio::test]
    async fn test_failed_searches_are_counted_as_requests() {
        let (search, engine, metrics) = setup(SearchSettings::default()).await;
        store(&engine, "a", "en", "kept", vec![1.0, 0.0], 0.5).await;

        search.search(&[1.0, 0.0], &ctx("a", "en"), 10, None).await.unwrap();
        let _ = search.search(&[1.0], &ctx("a", "en"), 10, None).await.unwrap_err();
        engine.set_available(false);
        let _ = search.search(&[1.0, 0.0], &ctx("a", "en"), 10, None).await.unwrap_err();

        let snap = metrics.snapshot();
        assert_eq!(snap.search_requests, 3);
        assert_eq!(snap.search_results, 1);
        assert_eq!(snap.search_latency.samples, 1);
        assert_eq!(snap.errors_by_category.values().sum::<u64>(), 2);
    }

    #[tokio::test]
    async fn test_equal_scores_prefer_newer() {
        let (search, engine, _) = setup(SearchSettings::default()).await;
        let validator = SchemaValidator::new(2);
        let older = chrono::Utc::now() - chrono::Duration::days(1);
        let points: Vec<_> = [("old", older), ("new", chrono::Utc::now())]
            .into_iter()
            .map(|(text, at)| {
                validator
                    .validate(
                        &VectorPoint::new(vec![1.0, 0.0])
                            .with_scope("a", "en")
                            .with_kind(PointKind::Memory)
                            .with_text(text)
                            .with_created_at(at),
                    )
                    .unwrap()
            })
            .collect();
        engine.upsert("c", &points).await.unwrap();

        let hits = search.search(&[1.0, 0.0], &ctx("a", "en"), 10, None).await.unwrap();
        assert_eq!(hits[0].payload.text.as_deref(), Some("new"));
    }
}
