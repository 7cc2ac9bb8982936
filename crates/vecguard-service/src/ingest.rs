//! Ingestion pipeline: validate, deduplicate, batch, upsert.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};
use vecguard_engine::{IndexEngine, ResiliencePolicy};
use vecguard_filter::SchemaValidator;
use vecguard_types::{
    payload_fields, IngestSettings, IsolationContext, IsolationError, PointId, ValidatedPoint,
    VectorPoint,
};

use crate::metrics::ServiceMetrics;

/// Upper bound on points accepted by one `upsert_many` call.
pub const MAX_POINTS_PER_REQUEST: usize = 10_000;

/// A point that failed validation. Other points are unaffected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedPoint {
    /// Position in the request.
    pub index: usize,
    pub source_id: Option<String>,
    #[serde(serialize_with = "serialize_error")]
    pub error: IsolationError,
}

/// A batch the engine never acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedBatch {
    pub batch: usize,
    /// Points whose storage was not confirmed.
    pub point_ids: Vec<PointId>,
    #[serde(serialize_with = "serialize_error")]
    pub error: IsolationError,
}

fn serialize_error<S: serde::Serializer>(err: &IsolationError, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&err.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpsertReport {
    pub inserted: usize,
    pub updated: usize,
    /// Points dropped because a later point in the same request had the
    /// same `(project_id, content_hash)`.
    pub deduplicated: usize,
    pub rejected: Vec<RejectedPoint>,
    pub failed_batches: Vec<FailedBatch>,
}

impl UpsertReport {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty() && self.failed_batches.is_empty()
    }

    pub fn stored(&self) -> usize {
        self.inserted + self.updated
    }
}

enum BatchOutcome {
    Stored { inserted: usize, updated: usize },
    Failed(FailedBatch),
}

pub struct IngestionPipeline {
    engine: Arc<dyn IndexEngine>,
    policy: ResiliencePolicy,
    validator: SchemaValidator,
    collection: String,
    settings: IngestSettings,
    metrics: Arc<ServiceMetrics>,
}

impl IngestionPipeline {
    pub fn new(
        engine: Arc<dyn IndexEngine>,
        policy: ResiliencePolicy,
        validator: SchemaValidator,
        collection: String,
        settings: IngestSettings,
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

    /// Validate and store `points` for the tenant in `ctx`.
    ///
    /// Invalid points, including points scoped to another project or
    /// language, are listed in `rejected`; batches that fail after retries
    /// are listed in `failed_batches`. Neither aborts the rest of the call.
    pub async fn upsert_many(
        &self,
        ctx: &IsolationContext,
        points: Vec<VectorPoint>,
    ) -> Result<UpsertReport, IsolationError> {
        if points.len() > MAX_POINTS_PER_REQUEST {
            let err = IsolationError::payload(
                "points",
                format!(
                    "at most {MAX_POINTS_PER_REQUEST} points per request, got {}",
                    points.len()
                ),
            );
            self.metrics.record_error("upsert", &err);
            return Err(err);
        }

        let mut report = UpsertReport::default();
        let received = points.len();

        // Last occurrence of a dedup key wins; order of first appearance is kept.
        let mut accepted: Vec<ValidatedPoint> = Vec::with_capacity(points.len());
        let mut position: HashMap<PointId, usize> = HashMap::new();

        for (index, point) in points.iter().enumerate() {
            match self.validate_in_scope(ctx, point) {
                Ok(valid) => match position.get(&valid.id) {
                    Some(&slot) => {
                        accepted[slot] = valid;
                        report.deduplicated += 1;
                    }
                    None => {
                        position.insert(valid.id, accepted.len());
                        accepted.push(valid);
                    }
                },
                Err(error) => {
                    debug!(index, field = ?error.field(), error = %error, "Rejected point");
                    self.metrics.record_error("upsert", &error);
                    report.rejected.push(RejectedPoint {
                        index,
                        source_id: point.id.clone(),
                        error,
                    });
                }
            }
        }
        self.metrics.record_upsert_rejected(report.rejected.len());

        let batch_size = self.settings.batch_size.max(1);
        let batches: Vec<Vec<ValidatedPoint>> =
            accepted.chunks(batch_size).map(|c| c.to_vec()).collect();
        let batch_count = batches.len();

        let outcomes: Vec<BatchOutcome> = stream::iter(batches.into_iter().enumerate())
            .map(|(batch, points)| self.upsert_batch(batch, points))
            .buffer_unordered(self.settings.max_concurrent_batches.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                BatchOutcome::Stored { inserted, updated } => {
                    report.inserted += inserted;
                    report.updated += updated;
                }
                BatchOutcome::Failed(failed) => report.failed_batches.push(failed),
            }
        }
        report.failed_batches.sort_by_key(|f| f.batch);

        info!(
            project = %ctx.project_id(),
            language = %ctx.language(),
            received,
            batches = batch_count,
            inserted = report.inserted,
            updated = report.updated,
            deduplicated = report.deduplicated,
            rejected = report.rejected.len(),
            failed_batches = report.failed_batches.len(),
            "Upsert completed"
        );
        Ok(report)
    }

    fn validate_in_scope(
        &self,
        ctx: &IsolationContext,
        point: &VectorPoint,
    ) -> Result<ValidatedPoint, IsolationError> {
        let valid = self.validator.validate(point)?;
        if &valid.payload.project_id != ctx.project_id() {
            return Err(IsolationError::payload(
                payload_fields::PROJECT_ID,
                "does not match the request context",
            ));
        }
        if &valid.payload.language != ctx.language() {
            return Err(IsolationError::payload(
                payload_fields::LANGUAGE,
                "does not match the request context",
            ));
        }
        Ok(valid)
    }

    async fn upsert_batch(&self, batch: usize, points: Vec<ValidatedPoint>) -> BatchOutcome {
        let start = Instant::now();
        let ids: Vec<PointId> = points.iter().map(|p| p.id).collect();
        let timeout = Some(Duration::from_millis(self.settings.batch_timeout_ms));
        let collection = self.collection.as_str();

        let result = async {
            let existing = self
                .policy
                .execute("existing_ids", timeout, || {
                    self.engine.existing_ids(collection, &ids)
                })
                .await?;
            self.policy
                .execute("upsert", timeout, || self.engine.upsert(collection, &points))
                .await?;
            // Only ids from this batch count; the engine may answer with more.
            Ok::<_, IsolationError>(ids.iter().filter(|id| existing.contains(id)).count())
        }
        .await;

        match result {
            Ok(updated) => {
                let inserted = points.len() - updated;
                let latency = start.elapsed();
                self.metrics.record_upsert_batch(latency, inserted, updated);
                debug!(
                    batch,
                    inserted,
                    updated,
                    duration_ms = latency.as_millis() as u64,
                    "Batch stored"
                );
                BatchOutcome::Stored { inserted, updated }
            }
            Err(error) => {
                warn!(batch, points = ids.len(), error = %error, "Batch failed");
                self.metrics.record_error("upsert", &error);
                self.metrics.record_upsert_failed(ids.len());
                BatchOutcome::Failed(FailedBatch {
                    batch,
                    point_ids: ids,
                    error,
                })
            }
        }
    }
}
