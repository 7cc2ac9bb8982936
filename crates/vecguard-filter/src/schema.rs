//! Point schema validation.
//!
//! Pure checks run before any network call. Each error names the offending
//! field.

use chrono::Utc;
use vecguard_types::{
    payload_fields, ContentHash, IsolationError, Language, PointId, PointKind, PointMetadata,
    PointPayload, ProjectId, ValidatedPoint, VectorPoint,
};

use crate::hash::{content_hash, normalize_text};

pub const MAX_TAGS: usize = 32;
pub const MAX_TAG_LEN: usize = 64;
pub const MAX_SOURCE_SECTION_LEN: usize = 256;
pub const MAX_SOURCE_ID_LEN: usize = 256;

/// Validates points against the configured dimensionality.
#[derive(Debug, Clone, Copy)]
pub struct SchemaValidator {
    dimension: usize,
}

impl SchemaValidator {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Check a query vector: right length, finite values.
    pub fn validate_query_vector(&self, vector: &[f32]) -> Result<(), IsolationError> {
        self.check_dimension(vector)?;
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(IsolationError::InvalidQuery(
                "query vector contains non-finite values".into(),
            ));
        }
        Ok(())
    }

    pub fn validate(&self, point: &VectorPoint) -> Result<ValidatedPoint, IsolationError> {
        self.check_dimension(&point.vector)?;
        if point.vector.iter().any(|v| !v.is_finite()) {
            return Err(IsolationError::payload(
                "vector",
                "contains non-finite values",
            ));
        }

        let project_id = required(&point.project_id, payload_fields::PROJECT_ID)?;
        let project_id = ProjectId::parse_field(project_id, payload_fields::PROJECT_ID)
            .map_err(as_payload_error)?;

        let language = required(&point.language, payload_fields::LANGUAGE)?;
        let language =
            Language::parse_field(language, payload_fields::LANGUAGE).map_err(as_payload_error)?;

        let kind: PointKind = required(&point.kind, payload_fields::KIND)?.parse()?;

        let hash = match (&point.content_hash, &point.text) {
            (Some(hash), _) => ContentHash::parse(hash)?,
            (None, Some(text)) if !normalize_text(text).is_empty() => content_hash(text),
            _ => {
                return Err(IsolationError::payload(
                    payload_fields::CONTENT_HASH,
                    "either content_hash or non-empty text is required",
                ))
            }
        };

        if let Some(id) = &point.id {
            if id.is_empty() || id.len() > MAX_SOURCE_ID_LEN {
                return Err(IsolationError::payload(
                    "id",
                    format!("must be 1-{MAX_SOURCE_ID_LEN} characters"),
                ));
            }
        }

        validate_metadata(&point.metadata)?;

        let payload = PointPayload {
            project_id,
            language,
            kind,
            content_hash: hash,
            created_at: point.created_at.unwrap_or_else(Utc::now),
            source_id: point.id.clone(),
            text: point.text.clone(),
            metadata: point.metadata.clone(),
        };

        Ok(ValidatedPoint {
            id: PointId::for_key(&payload.project_id, &payload.content_hash),
            vector: point.vector.clone(),
            payload,
        })
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), IsolationError> {
        if vector.len() != self.dimension {
            return Err(IsolationError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, IsolationError> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(IsolationError::payload(field, "is required")),
    }
}

fn as_payload_error(err: IsolationError) -> IsolationError {
    match err {
        IsolationError::InvalidIsolationContext { field, reason } => {
            IsolationError::InvalidPayload { field, reason }
        }
        other => other,
    }
}

fn validate_metadata(metadata: &PointMetadata) -> Result<(), IsolationError> {
    if metadata.tags.len() > MAX_TAGS {
        return Err(IsolationError::payload(
            payload_fields::TAGS,
            format!("at most {MAX_TAGS} tags allowed, got {}", metadata.tags.len()),
        ));
    }
    if let Some(tag) = metadata
        .tags
        .iter()
        .find(|t| t.trim().is_empty() || t.len() > MAX_TAG_LEN)
    {
        return Err(IsolationError::payload(
            payload_fields::TAGS,
            format!("tag {tag:?} must be 1-{MAX_TAG_LEN} characters"),
        ));
    }

    if let Some(importance) = metadata.importance {
        if !(0.0..=1.0).contains(&importance) {
            return Err(IsolationError::payload(
                payload_fields::IMPORTANCE,
                format!("must be within [0, 1], got {importance}"),
            ));
        }
    }

    if let Some(section) = &metadata.source_section {
        if section.len() > MAX_SOURCE_SECTION_LEN {
            return Err(IsolationError::payload(
                payload_fields::SOURCE_SECTION,
                format!("must be at most {MAX_SOURCE_SECTION_LEN} characters"),
            ));
        }
    }

    if let Some(key) = metadata
        .extra
        .keys()
        .find(|k| k.is_empty() || payload_fields::RESERVED.contains(&k.as_str()))
    {
        return Err(IsolationError::payload(
            format!("{}.{key}", payload_fields::EXTRA),
            "empty or reserved extension key",
        ));
    }
    Ok(())
}
