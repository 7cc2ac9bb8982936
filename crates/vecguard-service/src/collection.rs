//! Collection lifecycle: create on first start, validate afterwards.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use vecguard_engine::{
    CollectionInfo, CollectionSpec, FieldIndex, FieldSchema, IndexEngine, ResiliencePolicy,
};
use vecguard_types::{payload_fields, CollectionSettings, IsolationError};

/// Payload indexes every collection must carry.
pub fn required_indexes() -> Vec<FieldIndex> {
    vec![
        FieldIndex::tenant(payload_fields::PROJECT_ID),
        FieldIndex::new(payload_fields::LANGUAGE, FieldSchema::Keyword),
        FieldIndex::new(payload_fields::KIND, FieldSchema::Keyword),
        FieldIndex::new(payload_fields::CREATED_AT, FieldSchema::Integer),
    ]
}

/// Outcome of `ensure_collection_ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionStatus {
    /// The collection did not exist and was created with all indexes.
    Created,
    /// Existing collection matched configuration.
    Ready,
    /// Existing collection was missing indexes, which were created.
    Repaired { created_indexes: Vec<String> },
}

pub struct CollectionManager {
    engine: Arc<dyn IndexEngine>,
    policy: ResiliencePolicy,
    settings: CollectionSettings,
    timeout: Duration,
}

impl CollectionManager {
    pub fn new(
        engine: Arc<dyn IndexEngine>,
        policy: ResiliencePolicy,
        settings: CollectionSettings,
        timeout: Duration,
    ) -> Self {
        Self {
            engine,
            policy,
            settings,
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn spec(&self) -> CollectionSpec {
        CollectionSpec {
            name: self.settings.name.clone(),
            dimension: self.settings.dimension,
            distance: self.settings.distance,
            indexes: required_indexes(),
        }
    }

    pub async fn inspect(&self) -> Result<Option<CollectionInfo>, IsolationError> {
        let name = &self.settings.name;
        self.policy
            .execute("collection_info", Some(self.timeout), || {
                self.engine.collection_info(name)
            })
            .await
    }

    /// Create the collection if missing, otherwise validate it and add any
    /// missing index. Idempotent.
    pub async fn ensure_collection_ready(&self) -> Result<CollectionStatus, IsolationError> {
        let info = match self.inspect().await? {
            Some(info) => info,
            None => match self.create().await {
                Ok(()) => return Ok(CollectionStatus::Created),
                // Another instance created it between our check and create.
                Err(IsolationError::Engine { status: 409, .. }) => {
                    self.inspect().await?.ok_or_else(|| IsolationError::SchemaIncompatible {
                        collection: self.settings.name.clone(),
                        reason: "collection vanished during creation".into(),
                    })?
                }
                Err(e) => return Err(e),
            },
        };

        self.check_compatibility(&info)?;

        let missing = self.missing_indexes(&info);
        if missing.is_empty() {
            info!(collection = %self.settings.name, points = info.points_count, "Collection ready");
            return Ok(CollectionStatus::Ready);
        }

        let mut created_indexes = Vec::with_capacity(missing.len());
        for index in &missing {
            warn!(
                collection = %self.settings.name,
                field = %index.field,
                "Creating missing payload index"
            );
            let name = &self.settings.name;
            self.policy
                .execute("create_field_index", Some(self.timeout), || {
                    self.engine.create_field_index(name, index)
                })
                .await?;
            created_indexes.push(index.field.clone());
        }
        Ok(CollectionStatus::Repaired { created_indexes })
    }

    async fn create(&self) -> Result<(), IsolationError> {
        let spec = self.spec();
        info!(
            collection = %spec.name,
            dimension = spec.dimension,
            distance = spec.distance.engine_name(),
            "Collection missing, creating"
        );
        self.policy
            .execute("create_collection", Some(self.timeout), || {
                self.engine.create_collection(&spec)
            })
            .await
    }

    /// Dimension, distance and index types must match configuration.
    pub fn check_compatibility(&self, info: &CollectionInfo) -> Result<(), IsolationError> {
        let incompatible = |reason: String| {
            error!(collection = %self.settings.name, %reason, "Collection schema incompatible");
            Err(IsolationError::SchemaIncompatible {
                collection: self.settings.name.clone(),
                reason,
            })
        };

        if info.dimension != self.settings.dimension {
            return incompatible(format!(
                "vector dimension is {}, configured {}",
                info.dimension, self.settings.dimension
            ));
        }
        if info.distance != Some(self.settings.distance) {
            return incompatible(format!(
                "distance metric is {}, configured {}",
                info.distance.map(|d| d.engine_name()).unwrap_or("unknown"),
                self.settings.distance.engine_name()
            ));
        }
        for index in required_indexes() {
            if let Some(actual) = info.indexed_fields.get(&index.field) {
                if *actual != index.schema {
                    return incompatible(format!(
                        "field {} is indexed as {}, expected {}",
                        index.field,
                        actual.as_str(),
                        index.schema.as_str()
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn missing_indexes(&self, info: &CollectionInfo) -> Vec<FieldIndex> {
        required_indexes()
            .into_iter()
            .filter(|i| !info.indexed_fields.contains_key(&i.field))
            .collect()
    }
}
