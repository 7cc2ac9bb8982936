//! Index engine abstraction.
//!
//! Searches take a `SearchFilter`, which can only be built with the
//! mandatory tenant pair, so an unscoped query is not expressible through
//! this trait.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use vecguard_filter::SearchFilter;
use vecguard_types::{Distance, PointId, ValidatedPoint};

use crate::error::EngineError;

/// Payload index type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldSchema {
    Keyword,
    Integer,
    Float,
    Datetime,
}

impl FieldSchema {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Datetime => "datetime",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "keyword" => Some(Self::Keyword),
            "integer" => Some(Self::Integer),
            "float" => Some(Self::Float),
            "datetime" => Some(Self::Datetime),
            _ => None,
        }
    }
}

/// A payload field index to provision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIndex {
    pub field: String,
    pub schema: FieldSchema,
    /// Mark the field as the tenant partition key.
    pub is_tenant: bool,
}

impl FieldIndex {
    pub fn new(field: impl Into<String>, schema: FieldSchema) -> Self {
        Self {
            field: field.into(),
            schema,
            is_tenant: false,
        }
    }

    pub fn tenant(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            schema: FieldSchema::Keyword,
            is_tenant: true,
        }
    }
}

/// Everything needed to create a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: usize,
    pub distance: Distance,
    pub indexes: Vec<FieldIndex>,
}

/// Engine-reported collection health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionHealth {
    Green,
    /// Optimizing or indexing in the background.
    Yellow,
    Red,
    Unknown,
}

impl CollectionHealth {
    pub fn parse(s: &str) -> Self {
        match s {
            "green" => Self::Green,
            "yellow" => Self::Yellow,
            "red" => Self::Red,
            _ => Self::Unknown,
        }
    }
}

/// Current collection parameters as reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub dimension: usize,
    /// `None` when the engine reports a metric this service does not know.
    pub distance: Option<Distance>,
    pub indexed_fields: BTreeMap<String, FieldSchema>,
    pub points_count: u64,
    pub status: CollectionHealth,
}

/// A raw search hit. The payload is returned undecoded so the caller can
/// check it independently of the engine's filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait IndexEngine: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Liveness probe.
    async fn health(&self) -> Result<(), EngineError>;

    /// `None` when the collection does not exist.
    async fn collection_info(&self, collection: &str)
        -> Result<Option<CollectionInfo>, EngineError>;

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), EngineError>;

    async fn create_field_index(
        &self,
        collection: &str,
        index: &FieldIndex,
    ) -> Result<(), EngineError>;

    /// Subset of `ids` already stored.
    async fn existing_ids(
        &self,
        collection: &str,
        ids: &[PointId],
    ) -> Result<HashSet<PointId>, EngineError>;

    /// Insert or overwrite points. Returns once the points are searchable.
    async fn upsert(&self, collection: &str, points: &[ValidatedPoint]) -> Result<(), EngineError>;

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, EngineError>;
}
