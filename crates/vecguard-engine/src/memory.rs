//! In-process `IndexEngine` with brute-force scoring.
//!
//! Evaluates the same `SearchFilter` as the remote engine. Outage, latency
//! and filter bypass can be switched on to exercise the resilience and
//! post-validation paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use vecguard_filter::SearchFilter;
use vecguard_types::{Distance, PointId, PointPayload, ValidatedPoint};

use crate::engine::{
    CollectionHealth, CollectionInfo, CollectionSpec, FieldIndex, FieldSchema, IndexEngine,
    ScoredPoint,
};
use crate::error::EngineError;

struct StoredPoint {
    vector: Vec<f32>,
    payload: Value,
}

struct MemCollection {
    dimension: usize,
    distance: Distance,
    indexes: BTreeMap<String, FieldSchema>,
    status: CollectionHealth,
    points: HashMap<String, StoredPoint>,
}

#[derive(Default)]
pub struct InMemoryEngine {
    collections: RwLock<HashMap<String, MemCollection>>,
    unavailable: AtomicBool,
    bypass_filter: AtomicBool,
    latency_ms: AtomicU64,
    calls: AtomicUsize,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the engine going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Delay applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Ignore search filters entirely, like a misconfigured engine would.
    pub fn set_bypass_filter(&self, bypass: bool) {
        self.bypass_filter.store(bypass, Ordering::SeqCst);
    }

    /// Number of calls that reached the engine, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap()
            .get(collection)
            .map(|c| c.points.len())
            .unwrap_or(0)
    }

    /// Stored vector for an id, if any.
    pub fn vector_of(&self, collection: &str, id: &PointId) -> Option<Vec<f32>> {
        self.collections
            .read()
            .unwrap()
            .get(collection)
            .and_then(|c| c.points.get(&id.to_string()))
            .map(|p| p.vector.clone())
    }

    /// Store a point with an arbitrary payload, bypassing validation.
    pub fn insert_raw(&self, collection: &str, id: &str, vector: Vec<f32>, payload: Value) {
        if let Some(c) = self.collections.write().unwrap().get_mut(collection) {
            c.points
                .insert(id.to_string(), StoredPoint { vector, payload });
        }
    }

    pub fn drop_field_index(&self, collection: &str, field: &str) {
        if let Some(c) = self.collections.write().unwrap().get_mut(collection) {
            c.indexes.remove(field);
        }
    }

    pub fn set_collection_status(&self, collection: &str, status: CollectionHealth) {
        if let Some(c) = self.collections.write().unwrap().get_mut(collection) {
            c.status = status;
        }
    }

    async fn enter(&self) -> Result<(), EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::Connect("connection refused".into()));
        }
        Ok(())
    }
}

fn not_found(collection: &str) -> EngineError {
    EngineError::Http {
        status: 404,
        body: format!("collection {collection} not found"),
    }
}

fn score(distance: Distance, a: &[f32], b: &[f32]) -> f32 {
    match distance {
        Distance::Cosine => {
            let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if na == 0.0 || nb == 0.0 {
                0.0
            } else {
                dot / (na * nb)
            }
        }
        Distance::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        // Distances are negated so that higher is always better.
        Distance::Euclid => -a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
        Distance::Manhattan => -a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum::<f32>(),
    }
}

#[async_trait]
impl IndexEngine for InMemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn health(&self) -> Result<(), EngineError> {
        self.enter().await
    }

    async fn collection_info(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionInfo>, EngineError> {
        self.enter().await?;
        Ok(self
            .collections
            .read()
            .unwrap()
            .get(collection)
            .map(|c| CollectionInfo {
                dimension: c.dimension,
                distance: Some(c.distance),
                indexed_fields: c.indexes.clone(),
                points_count: c.points.len() as u64,
                status: c.status,
            }))
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), EngineError> {
        self.enter().await?;
        let mut collections = self.collections.write().unwrap();
        if collections.contains_key(&spec.name) {
            return Err(EngineError::Http {
                status: 409,
                body: format!("collection {} already exists", spec.name),
            });
        }
        collections.insert(
            spec.name.clone(),
            MemCollection {
                dimension: spec.dimension,
                distance: spec.distance,
                indexes: spec
                    .indexes
                    .iter()
                    .map(|i| (i.field.clone(), i.schema))
                    .collect(),
                status: CollectionHealth::Green,
                points: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn create_field_index(
        &self,
        collection: &str,
        index: &FieldIndex,
    ) -> Result<(), EngineError> {
        self.enter().await?;
        let mut collections = self.collections.write().unwrap();
        let c = collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection))?;
        c.indexes.insert(index.field.clone(), index.schema);
        Ok(())
    }

    async fn existing_ids(
        &self,
        collection: &str,
        ids: &[PointId],
    ) -> Result<HashSet<PointId>, EngineError> {
        self.enter().await?;
        let collections = self.collections.read().unwrap();
        let c = collections
            .get(collection)
            .ok_or_else(|| not_found(collection))?;
        Ok(ids
            .iter()
            .filter(|id| c.points.contains_key(&id.to_string()))
            .copied()
            .collect())
    }

    async fn upsert(&self, collection: &str, points: &[ValidatedPoint]) -> Result<(), EngineError> {
        self.enter().await?;
        let mut collections = self.collections.write().unwrap();
        let c = collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection))?;

        if let Some(bad) = points.iter().find(|p| p.vector.len() != c.dimension) {
            return Err(EngineError::Http {
                status: 400,
                body: format!(
                    "wrong vector dimension: expected {}, got {}",
                    c.dimension,
                    bad.vector.len()
                ),
            });
        }

        // Serialize everything first so a bad payload leaves the batch unapplied.
        let encoded = points
            .iter()
            .map(|p| {
                serde_json::to_value(&p.payload)
                    .map(|payload| (p.id.to_string(), p.vector.clone(), payload))
                    .map_err(|e| EngineError::Decode(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (id, vector, payload) in encoded {
            c.points.insert(id, StoredPoint { vector, payload });
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, EngineError> {
        self.enter().await?;
        let bypass = self.bypass_filter.load(Ordering::SeqCst);
        let collections = self.collections.read().unwrap();
        let c = collections
            .get(collection)
            .ok_or_else(|| not_found(collection))?;

        let mut hits: Vec<ScoredPoint> = c
            .points
            .iter()
            .filter(|(_, p)| {
                bypass
                    || serde_json::from_value::<PointPayload>(p.payload.clone())
                        .map(|payload| filter.matches(&payload))
                        .unwrap_or(false)
            })
            .map(|(id, p)| ScoredPoint {
                id: id.clone(),
                score: score(c.distance, vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}
