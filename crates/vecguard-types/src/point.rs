//! Vector point types.
//!
//! `VectorPoint` is the raw, caller-supplied shape: every field may be absent
//! or malformed. `ValidatedPoint` is what comes out of schema validation and
//! is the only shape the ingestion path hands to the index engine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{Language, ProjectId};
use crate::error::IsolationError;

/// Payload field names as stored in the index engine.
pub mod payload_fields {
    pub const PROJECT_ID: &str = "project_id";
    pub const LANGUAGE: &str = "language";
    pub const KIND: &str = "kind";
    pub const CONTENT_HASH: &str = "content_hash";
    pub const CREATED_AT: &str = "created_at";
    pub const SOURCE_ID: &str = "source_id";
    pub const TEXT: &str = "text";
    pub const TAGS: &str = "tags";
    pub const IMPORTANCE: &str = "importance";
    pub const SOURCE_SECTION: &str = "source_section";
    pub const EXTRA: &str = "extra";

    /// Names a caller may not reuse as metadata extension keys.
    pub const RESERVED: &[&str] = &[
        PROJECT_ID,
        LANGUAGE,
        KIND,
        CONTENT_HASH,
        CREATED_AT,
        SOURCE_ID,
        TEXT,
        TAGS,
        IMPORTANCE,
        SOURCE_SECTION,
        EXTRA,
    ];
}

/// Closed set of content kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    Knowledge,
    Memory,
    AgentContext,
}

impl PointKind {
    pub const ALL: [PointKind; 3] = [Self::Knowledge, Self::Memory, Self::AgentContext];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Knowledge => "knowledge",
            Self::Memory => "memory",
            Self::AgentContext => "agent_context",
        }
    }
}

impl FromStr for PointKind {
    type Err = IsolationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "knowledge" => Ok(Self::Knowledge),
            "memory" => Ok(Self::Memory),
            "agent_context" => Ok(Self::AgentContext),
            other => Err(IsolationError::payload(
                payload_fields::KIND,
                format!("unknown kind {other:?}, expected knowledge, memory or agent_context"),
            )),
        }
    }
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SHA-256 digest of normalized source text, as 64 lower-case hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    pub const HEX_LEN: usize = 64;

    /// Accepts upper- or lower-case hex; stores lower-case.
    pub fn parse(raw: &str) -> Result<Self, IsolationError> {
        if raw.len() != Self::HEX_LEN || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IsolationError::payload(
                payload_fields::CONTENT_HASH,
                "must be a 64-character hex SHA-256 digest",
            ));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    /// Build from raw SHA-256 digest bytes.
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContentHash {
    type Error = IsolationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Namespace for deterministic point ids.
const POINT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2d7e_98a4_4b35_a0f2_5c3e_81d9_4b70);

/// Engine-side point identifier.
///
/// Derived from `(project_id, content_hash)`, so re-ingesting the same
/// content for the same tenant addresses the same stored point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointId(Uuid);

impl PointId {
    pub fn for_key(project_id: &ProjectId, content_hash: &ContentHash) -> Self {
        let name = format!("{}\u{1f}{}", project_id.as_str(), content_hash.as_str());
        Self(Uuid::new_v5(&POINT_ID_NAMESPACE, name.as_bytes()))
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Optional descriptive metadata. Never used for isolation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Relevance weight in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_section: Option<String>,

    /// Open extension map for caller-defined keys.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A point as supplied by the caller, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorPoint {
    /// Caller-side identifier, kept in the payload as `source_id`.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub vector: Vec<f32>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    /// Precomputed digest; computed from `text` when absent.
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: PointMetadata,
}

impl VectorPoint {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_scope(
        mut self,
        project_id: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        self.project_id = Some(project_id.into());
        self.language = Some(language.into());
        self
    }

    pub fn with_kind(mut self, kind: PointKind) -> Self {
        self.kind = Some(kind.as_str().to_string());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_metadata(mut self, metadata: PointMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Payload stored alongside each vector in the index engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub project_id: ProjectId,
    pub language: Language,
    pub kind: PointKind,
    pub content_hash: ContentHash,
    /// Stored as epoch milliseconds so the engine can range-filter it.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub metadata: PointMetadata,
}

impl PointPayload {
    /// Deterministic engine id for this payload's dedup key.
    pub fn point_id(&self) -> PointId {
        PointId::for_key(&self.project_id, &self.content_hash)
    }
}

/// A point that passed schema validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPoint {
    pub id: PointId,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// One search result returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: PointId,
    pub score: f32,
    pub payload: PointPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(c: char) -> ContentHash {
        ContentHash::parse(&c.to_string().repeat(64)).unwrap()
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("agent_context".parse::<PointKind>().unwrap(), PointKind::AgentContext);
        let err = "note".parse::<PointKind>().unwrap_err();
        assert_eq!(err.field(), Some("kind"));
    }

    #[test]
    fn test_content_hash_normalizes_case() {
        let h = ContentHash::parse(&"AB".repeat(32)).unwrap();
        assert_eq!(h.as_str(), "ab".repeat(32));
        assert!(ContentHash::parse("abc").is_err());
        assert!(ContentHash::parse(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_point_id_is_deterministic_per_tenant() {
        let a = ProjectId::parse("alpha").unwrap();
        let b = ProjectId::parse("beta").unwrap();
        assert_eq!(PointId::for_key(&a, &hash('a')), PointId::for_key(&a, &hash('a')));
        assert_ne!(PointId::for_key(&a, &hash('a')), PointId::for_key(&b, &hash('a')));
        assert_ne!(PointId::for_key(&a, &hash('a')), PointId::for_key(&a, &hash('b')));
    }

    #[test]
    fn test_payload_json_shape() {
        let payload = PointPayload {
            project_id: ProjectId::parse("alpha").unwrap(),
            language: Language::parse("en").unwrap(),
            kind: PointKind::Memory,
            content_hash: hash('c'),
            created_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            source_id: Some("doc-1".into()),
            text: None,
            metadata: PointMetadata {
                tags: vec!["intro".into()],
                importance: Some(0.5),
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["project_id"], "alpha");
        assert_eq!(json["kind"], "memory");
        assert_eq!(json["created_at"], 1_700_000_000_000i64);
        assert_eq!(json["tags"][0], "intro");
        assert!(json.get("text").is_none());

        let back: PointPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_payload_with_foreign_language_fails_decode() {
        let json = serde_json::json!({
            "project_id": "alpha",
            "language": "klingon",
            "kind": "memory",
            "content_hash": "c".repeat(64),
            "created_at": 0,
        });
        assert!(serde_json::from_value::<PointPayload>(json).is_err());
    }
}
