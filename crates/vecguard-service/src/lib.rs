//! # vecguard-service
//!
//! Tenant-isolated access to a shared vector collection.
//!
//! `IsolationService` is the entry point. It combines:
//! - `SearchOrchestrator`: filtered search with result post-validation
//! - `IngestionPipeline`: validated, deduplicated, batched upserts
//! - `CollectionManager`: collection creation and schema checks
//! - `HealthMonitor`: periodic health reports, also served over gRPC
//! - `ServiceMetrics`: counters, latency percentiles, violation counts

pub mod collection;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod project;
pub mod search;
pub mod server;
pub mod service;

pub use collection::{required_indexes, CollectionManager, CollectionStatus};
pub use health::{HealthMonitor, HealthReport, HealthStatus};
pub use ingest::{
    FailedBatch, IngestionPipeline, RejectedPoint, UpsertReport, MAX_POINTS_PER_REQUEST,
};
pub use metrics::{LatencyPercentiles, MetricsSnapshot, ServiceMetrics, UpsertCounters};
pub use project::{ContextResolver, ProjectDirectory, StaticProjectDirectory};
pub use search::SearchOrchestrator;
pub use server::{run_health_server, serving_status, SERVICE_NAME};
pub use service::IsolationService;
