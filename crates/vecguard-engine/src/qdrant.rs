//! Qdrant REST implementation of `IndexEngine`.

use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;
use vecguard_filter::{Condition, SearchFilter};
use vecguard_types::{Distance, EngineSettings, PointId, ValidatedPoint};

use crate::engine::{
    CollectionHealth, CollectionInfo, CollectionSpec, FieldIndex, FieldSchema, IndexEngine,
    ScoredPoint,
};
use crate::error::EngineError;

/// Bytes of an error body kept for logs.
const MAX_ERROR_BODY: usize = 512;

/// Qdrant HTTP client.
pub struct QdrantEngine {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    timeout_ms: u64,
}

impl QdrantEngine {
    pub fn new(settings: &EngineSettings) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().map(SecretString::from),
            timeout_ms: settings.request_timeout_ms,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a request with the optional API key header.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key.expose_secret());
        }
        req
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, EngineError> {
        let resp = req
            .send()
            .await
            .map_err(|e| EngineError::from_reqwest(e, self.timeout_ms))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let mut body = resp.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut end = MAX_ERROR_BODY;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }
        Err(EngineError::Http {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, EngineError> {
        let resp = self.send(req).await?;
        resp.json::<T>()
            .await
            .map_err(|e| EngineError::Decode(e.to_string()))
    }
}

#[derive(Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Deserialize)]
struct CollectionResult {
    #[serde(default)]
    status: String,
    #[serde(default)]
    points_count: Option<u64>,
    config: CollectionConfig,
    #[serde(default)]
    payload_schema: BTreeMap<String, PayloadSchemaInfo>,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Deserialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Deserialize)]
struct PayloadSchemaInfo {
    data_type: String,
}

#[derive(Serialize)]
struct CreateCollectionRequest {
    vectors: VectorConfig,
}

#[derive(Serialize)]
struct VectorConfig {
    size: usize,
    distance: &'static str,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    points: Vec<UpsertPoint<'a>>,
}

#[derive(Serialize)]
struct UpsertPoint<'a> {
    id: Uuid,
    vector: &'a [f32],
    payload: Value,
}

#[derive(Serialize)]
struct RetrieveRequest {
    ids: Vec<Uuid>,
    with_payload: bool,
    with_vector: bool,
}

#[derive(Deserialize)]
struct RetrievedPoint {
    id: Value,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    filter: Value,
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchResult {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

/// Render a filter as a Qdrant `{"must": [...]}` clause.
pub fn filter_to_json(filter: &SearchFilter) -> Value {
    let must: Vec<Value> = filter
        .conditions()
        .into_iter()
        .map(|condition| match condition {
            Condition::Keyword { field, value } => json!({
                "key": field,
                "match": { "value": value }
            }),
            Condition::AnyKeyword { field, values } => json!({
                "key": field,
                "match": { "any": values }
            }),
            Condition::Range { field, gte, lt } => {
                let mut range = serde_json::Map::new();
                if let Some(v) = gte {
                    range.insert("gte".into(), json!(v));
                }
                if let Some(v) = lt {
                    range.insert("lt".into(), json!(v));
                }
                json!({ "key": field, "range": range })
            }
        })
        .collect();
    json!({ "must": must })
}

fn field_schema_json(index: &FieldIndex) -> Value {
    if index.is_tenant {
        json!({ "type": index.schema.as_str(), "is_tenant": true })
    } else {
        json!(index.schema.as_str())
    }
}

fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl IndexEngine for QdrantEngine {
    fn name(&self) -> &'static str {
        "qdrant"
    }

    async fn health(&self) -> Result<(), EngineError> {
        self.send(self.request(Method::GET, "/healthz")).await?;
        Ok(())
    }

    async fn collection_info(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionInfo>, EngineError> {
        let req = self.request(Method::GET, &format!("/collections/{collection}"));
        let resp: QdrantResponse<CollectionResult> = match self.send_json(req).await {
            Ok(resp) => resp,
            Err(EngineError::Http { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let result = resp.result;
        Ok(Some(CollectionInfo {
            dimension: result.config.params.vectors.size,
            distance: Distance::from_engine_name(&result.config.params.vectors.distance),
            indexed_fields: result
                .payload_schema
                .into_iter()
                .filter_map(|(field, info)| FieldSchema::parse(&info.data_type).map(|s| (field, s)))
                .collect(),
            points_count: result.points_count.unwrap_or(0),
            status: CollectionHealth::parse(&result.status),
        }))
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), EngineError> {
        let body = CreateCollectionRequest {
            vectors: VectorConfig {
                size: spec.dimension,
                distance: spec.distance.engine_name(),
            },
        };
        self.send(
            self.request(Method::PUT, &format!("/collections/{}", spec.name))
                .json(&body),
        )
        .await?;
        info!(
            collection = %spec.name,
            dimension = spec.dimension,
            distance = spec.distance.engine_name(),
            "Created collection"
        );

        for index in &spec.indexes {
            self.create_field_index(&spec.name, index).await?;
        }
        Ok(())
    }

    async fn create_field_index(
        &self,
        collection: &str,
        index: &FieldIndex,
    ) -> Result<(), EngineError> {
        let body = json!({
            "field_name": index.field,
            "field_schema": field_schema_json(index),
        });
        self.send(
            self.request(
                Method::PUT,
                &format!("/collections/{collection}/index?wait=true"),
            )
            .json(&body),
        )
        .await?;
        debug!(
            collection,
            field = %index.field,
            schema = index.schema.as_str(),
            "Created payload index"
        );
        Ok(())
    }

    async fn existing_ids(
        &self,
        collection: &str,
        ids: &[PointId],
    ) -> Result<HashSet<PointId>, EngineError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let body = RetrieveRequest {
            ids: ids.iter().map(|id| *id.as_uuid()).collect(),
            with_payload: false,
            with_vector: false,
        };
        let resp: QdrantResponse<Vec<RetrievedPoint>> = self
            .send_json(
                self.request(Method::POST, &format!("/collections/{collection}/points"))
                    .json(&body),
            )
            .await?;

        Ok(resp
            .result
            .iter()
            .filter_map(|p| Uuid::parse_str(&id_to_string(&p.id)).ok())
            .map(PointId::from_uuid)
            .collect())
    }

    async fn upsert(&self, collection: &str, points: &[ValidatedPoint]) -> Result<(), EngineError> {
        if points.is_empty() {
            return Ok(());
        }
        let start = Instant::now();
        let points = points
            .iter()
            .map(|p| {
                Ok(UpsertPoint {
                    id: *p.id.as_uuid(),
                    vector: &p.vector,
                    payload: serde_json::to_value(&p.payload)
                        .map_err(|e| EngineError::Decode(e.to_string()))?,
                })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;
        let count = points.len();

        self.send(
            self.request(
                Method::PUT,
                &format!("/collections/{collection}/points?wait=true"),
            )
            .json(&UpsertRequest { points }),
        )
        .await?;

        debug!(
            collection,
            count,
            duration_ms = start.elapsed().as_millis() as u64,
            "Upserted points"
        );
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, EngineError> {
        let body = SearchRequest {
            vector,
            filter: filter_to_json(filter),
            limit,
            with_payload: true,
        };
        let resp: QdrantResponse<Vec<SearchResult>> = self
            .send_json(
                self.request(
                    Method::POST,
                    &format!("/collections/{collection}/points/search"),
                )
                .json(&body),
            )
            .await?;

        Ok(resp
            .result
            .into_iter()
            .map(|r| ScoredPoint {
                id: id_to_string(&r.id),
                score: r.score,
                payload: r.payload.unwrap_or(Value::Null),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use pretty_assertions::assert_eq;
    use vecguard_filter::{build_mandatory_filter, build_search_filter, Refinements};
    use vecguard_types::{IsolationContext, PointKind};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine(server: &MockServer, api_key: Option<&str>) -> QdrantEngine {
        QdrantEngine::new(&EngineSettings {
            url: format!("{}/", server.uri()),
            api_key: api_key.map(str::to_string),
            request_timeout_ms: 2_000,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_filter_json_mandatory_pair() {
        let filter = build_mandatory_filter("acme", "en").unwrap();
        assert_eq!(
            filter_to_json(&filter),
            json!({
                "must": [
                    { "key": "project_id", "match": { "value": "acme" } },
                    { "key": "language", "match": { "value": "en" } }
                ]
            })
        );
    }

    #[test]
    fn test_filter_json_refinements() {
        let ctx = IsolationContext::parse("acme", "en").unwrap();
        let filter = build_search_filter(
            &ctx,
            Refinements::new()
                .kinds([PointKind::Memory, PointKind::AgentContext])
                .created_after(DateTime::from_timestamp_millis(1_000).unwrap()),
        )
        .unwrap();
        let value = filter_to_json(&filter);
        assert_eq!(
            value["must"][2],
            json!({ "key": "kind", "match": { "any": ["memory", "agent_context"] } })
        );
        assert_eq!(
            value["must"][3],
            json!({ "key": "created_at", "range": { "gte": 1000.0 } })
        );
    }

    #[tokio::test]
    async fn test_collection_info_missing_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/vector_memory"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "status": { "error": "Not found: Collection `vector_memory` doesn't exist!" }
            })))
            .mount(&server)
            .await;

        let info = engine(&server, None)
            .collection_info("vector_memory")
            .await
            .unwrap();
        assert!(info.is_none());
    }

    #[tokio::test]
    async fn test_collection_info_parses_schema() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/vector_memory"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {
                    "status": "green",
                    "points_count": 42,
                    "config": { "params": { "vectors": { "size": 1536, "distance": "Cosine" } } },
                    "payload_schema": {
                        "project_id": { "data_type": "keyword", "points": 42 },
                        "created_at": { "data_type": "integer", "points": 42 }
                    }
                },
                "status": "ok",
                "time": 0.001
            })))
            .mount(&server)
            .await;

        let info = engine(&server, None)
            .collection_info("vector_memory")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.dimension, 1536);
        assert_eq!(info.distance, Some(Distance::Cosine));
        assert_eq!(info.points_count, 42);
        assert_eq!(info.status, CollectionHealth::Green);
        assert_eq!(
            info.indexed_fields.get("created_at"),
            Some(&FieldSchema::Integer)
        );
    }

    #[tokio::test]
    async fn test_create_tenant_index_sends_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/collections/vector_memory/index"))
            .and(query_param("wait", "true"))
            .and(header("api-key", "secret"))
            .and(body_partial_json(json!({
                "field_name": "project_id",
                "field_schema": { "type": "keyword", "is_tenant": true }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "operation_id": 1, "status": "completed" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        engine(&server, Some("secret"))
            .create_field_index("vector_memory", &FieldIndex::tenant("project_id"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_search_sends_filter_and_parses_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/vector_memory/points/search"))
            .and(body_partial_json(json!({
                "filter": { "must": [
                    { "key": "project_id", "match": { "value": "acme" } },
                    { "key": "language", "match": { "value": "en" } }
                ] },
                "limit": 5,
                "with_payload": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [
                    { "id": "6f1c2d7e-98a4-4b35-a0f2-5c3e81d94b70", "version": 3, "score": 0.91,
                      "payload": { "project_id": "acme" } }
                ]
            })))
            .mount(&server)
            .await;

        let filter = build_mandatory_filter("acme", "en").unwrap();
        let hits = engine(&server, None)
            .search("vector_memory", &[0.1, 0.2], &filter, 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "6f1c2d7e-98a4-4b35-a0f2-5c3e81d94b70");
        assert!((hits[0].score - 0.91).abs() < f32::EPSILON);
        assert_eq!(hits[0].payload["project_id"], "acme");
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/healthz"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = engine(&server, None).health().await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, EngineError::Http { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_existing_ids_parses_uuids() {
        let server = MockServer::start().await;
        let known = Uuid::from_u128(7);
        Mock::given(method("POST"))
            .and(path("/collections/vector_memory/points"))
            .and(body_partial_json(json!({ "with_payload": false, "with_vector": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [ { "id": known.to_string() } ]
            })))
            .mount(&server)
            .await;

        let ids = [PointId::from_uuid(known), PointId::from_uuid(Uuid::from_u128(8))];
        let existing = engine(&server, None)
            .existing_ids("vector_memory", &ids)
            .await
            .unwrap();
        assert_eq!(existing.len(), 1);
        assert!(existing.contains(&PointId::from_uuid(known)));
    }
}
