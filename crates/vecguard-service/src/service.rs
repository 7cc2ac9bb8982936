//! The isolation service facade.
//!
//! Application code talks to `IsolationService` only. It owns the engine
//! handle, the shared resilience policy and every component built on them.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use vecguard_engine::{CircuitState, EnginePool, IndexEngine, ResiliencePolicy};
use vecguard_filter::{Refinements, SchemaValidator};
use vecguard_types::{IsolationContext, IsolationError, SearchHit, Settings, VectorPoint};

use crate::collection::{CollectionManager, CollectionStatus};
use crate::health::{HealthMonitor, HealthReport};
use crate::ingest::{IngestionPipeline, UpsertReport};
use crate::metrics::{MetricsSnapshot, ServiceMetrics};
use crate::project::{ContextResolver, ProjectDirectory};
use crate::search::SearchOrchestrator;

pub struct IsolationService {
    engine: Arc<dyn IndexEngine>,
    policy: ResiliencePolicy,
    resolver: ContextResolver,
    collections: Arc<CollectionManager>,
    ingest: IngestionPipeline,
    search: SearchOrchestrator,
    health: Arc<HealthMonitor>,
    metrics: Arc<ServiceMetrics>,
}

impl IsolationService {
    /// Wire the components without touching the engine.
    pub fn build(
        settings: &Settings,
        engine: Arc<dyn IndexEngine>,
        directory: Arc<dyn ProjectDirectory>,
    ) -> Self {
        let pool = EnginePool::new(
            settings.engine.pool_size,
            Duration::from_millis(settings.engine.pool_wait_ms),
        );
        let policy = ResiliencePolicy::from_settings(&settings.resilience, pool);
        let metrics = Arc::new(ServiceMetrics::new());
        let validator = SchemaValidator::new(settings.collection.dimension);
        let collection = settings.collection.name.clone();

        let collections = Arc::new(CollectionManager::new(
            engine.clone(),
            policy.clone(),
            settings.collection.clone(),
            Duration::from_millis(settings.engine.request_timeout_ms),
        ));

        let ingest = IngestionPipeline::new(
            engine.clone(),
            policy.clone(),
            validator,
            collection.clone(),
            settings.ingest.clone(),
            metrics.clone(),
        );

        let search = SearchOrchestrator::new(
            engine.clone(),
            policy.clone(),
            validator,
            collection,
            settings.search.clone(),
            metrics.clone(),
        );

        let health = Arc::new(HealthMonitor::new(
            engine.clone(),
            policy.clone(),
            collections.clone(),
            metrics.clone(),
            Duration::from_millis(settings.health.check_timeout_ms),
        ));

        Self {
            engine,
            policy,
            resolver: ContextResolver::new(directory),
            collections,
            ingest,
            search,
            health,
            metrics,
        }
    }

    /// Build, make sure the collection is usable and run a first health
    /// check. An incompatible collection fails startup.
    pub async fn start(
        settings: &Settings,
        engine: Arc<dyn IndexEngine>,
        directory: Arc<dyn ProjectDirectory>,
    ) -> Result<Self, IsolationError> {
        let service = Self::build(settings, engine, directory);
        let status = service.collections.ensure_collection_ready().await?;
        match &status {
            CollectionStatus::Created => {
                info!(collection = service.collections.name(), "Collection created")
            }
            CollectionStatus::Ready => {}
            CollectionStatus::Repaired { created_indexes } => warn!(
                collection = service.collections.name(),
                indexes = ?created_indexes,
                "Collection repaired"
            ),
        }

        let report = service.health.check_health().await;
        info!(
            engine = service.engine.name(),
            collection = service.collections.name(),
            health = report.status.as_str(),
            "Isolation service started"
        );
        Ok(service)
    }

    /// Similarity search within `ctx`'s project and language.
    pub async fn search(
        &self,
        vector: &[f32],
        ctx: &IsolationContext,
        limit: usize,
        refinements: Option<Refinements>,
    ) -> Result<Vec<SearchHit>, IsolationError> {
        self.search.search(vector, ctx, limit, refinements).await
    }

    /// Resolve the project's context from the directory, then search.
    pub async fn search_project(
        &self,
        project_id: &str,
        vector: &[f32],
        limit: usize,
        refinements: Option<Refinements>,
    ) -> Result<Vec<SearchHit>, IsolationError> {
        let ctx = self.resolve_for("search", project_id).await?;
        self.search(vector, &ctx, limit, refinements).await
    }

    pub async fn upsert_many(
        &self,
        ctx: &IsolationContext,
        points: Vec<VectorPoint>,
    ) -> Result<UpsertReport, IsolationError> {
        self.ingest.upsert_many(ctx, points).await
    }

    /// Resolve the project's context from the directory, then upsert.
    pub async fn upsert_project(
        &self,
        project_id: &str,
        points: Vec<VectorPoint>,
    ) -> Result<UpsertReport, IsolationError> {
        let ctx = self.resolve_for("upsert", project_id).await?;
        self.upsert_many(&ctx, points).await
    }

    pub async fn resolve_context(
        &self,
        project_id: &str,
    ) -> Result<IsolationContext, IsolationError> {
        self.resolver.resolve(project_id).await
    }

    async fn resolve_for(
        &self,
        operation: &'static str,
        project_id: &str,
    ) -> Result<IsolationContext, IsolationError> {
        self.resolver.resolve(project_id).await.map_err(|e| {
            self.metrics.record_error(operation, &e);
            e
        })
    }

    pub async fn ensure_collection_ready(&self) -> Result<CollectionStatus, IsolationError> {
        self.collections.ensure_collection_ready().await
    }

    pub async fn check_health(&self) -> Arc<HealthReport> {
        self.health.check_health().await
    }

    /// Last published health report, without probing.
    pub fn health(&self) -> Arc<HealthReport> {
        self.health.current()
    }

    pub fn health_monitor(&self) -> Arc<HealthMonitor> {
        self.health.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn collections(&self) -> &CollectionManager {
        &self.collections
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.policy.breaker().state()
    }
}
