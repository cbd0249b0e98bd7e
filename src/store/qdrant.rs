//! HTTP backend for Qdrant.

use super::backend::VectorBackend;
use super::scroller::stream_objects;
use super::types::{
    CollectionInfoResponse, CollectionKind, ListCollectionsResponse, NewObject, PointResponse,
    QueryResponse, QueryResponseResult, ScoredObject, StoreError, StoredObject,
};
use async_trait::async_trait;
use futures_util::{TryStreamExt, pin_mut};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value, json};

/// Lightweight HTTP client implementing [`VectorBackend`] against Qdrant's REST API.
pub struct QdrantBackend {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl QdrantBackend {
    /// Construct a backend for the Qdrant instance at `url`.
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self, StoreError> {
        let client = Client::builder().user_agent("brochure-rag/0.1").build()?;
        let base_url = normalize_base_url(url).map_err(StoreError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = %api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized Qdrant HTTP client"
        );
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success(
        &self,
        collection: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, StoreError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let error = status_error(collection, response).await;
        tracing::error!(collection, error = %error, "Qdrant request failed");
        Err(error)
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    async fn collection_kind(&self, name: &str) -> Result<Option<CollectionKind>, StoreError> {
        let response = self
            .request(Method::GET, &format!("collections/{name}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let info: CollectionInfoResponse = response.json().await?;
                Ok(Some(kind_from_vectors(info.result.config.params.vectors)))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = StoreError::UnexpectedStatus { status, body };
                tracing::error!(
                    collection = name,
                    error = %error,
                    "Collection existence check failed"
                );
                Err(error)
            }
        }
    }

    async fn create_collection(&self, name: &str, kind: CollectionKind) -> Result<(), StoreError> {
        let body = match kind {
            CollectionKind::Vectorized { size } => json!({
                "vectors": {
                    "size": size,
                    "distance": "Cosine"
                }
            }),
            CollectionKind::Raw => json!({ "vectors": {} }),
        };

        let response = self
            .request(Method::PUT, &format!("collections/{name}"))
            .json(&body)
            .send()
            .await?;
        self.ensure_success(name, response).await?;
        tracing::debug!(collection = name, ?kind, "Collection created");
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        let response = self
            .request(Method::DELETE, &format!("collections/{name}"))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.ensure_success(name, response).await?;
        tracing::debug!(collection = name, "Collection deleted");
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let response = self.request(Method::GET, "collections").send().await?;
        let response = self.ensure_success("*", response).await?;
        let payload: ListCollectionsResponse = response.json().await?;
        Ok(payload
            .result
            .collections
            .into_iter()
            .map(|collection| collection.name)
            .collect())
    }

    async fn fetch_object(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<StoredObject>, StoreError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection}/points/{id}"))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            // Qdrant answers 404 for both a missing point and a missing collection.
            if body.contains("Collection") {
                return Err(StoreError::CollectionNotFound(collection.to_string()));
            }
            return Ok(None);
        }

        let response = self.ensure_success(collection, response).await?;
        let payload: PointResponse = response.json().await?;
        Ok(payload.result.map(|point| StoredObject {
            id: point.id.map(stringify_point_id).unwrap_or_else(|| id.to_string()),
            properties: point.payload.unwrap_or_default(),
        }))
    }

    async fn write_object(&self, collection: &str, object: NewObject) -> Result<(), StoreError> {
        let vector = match object.vector {
            Some(vector) => json!(vector),
            None => json!({}),
        };
        let body = json!({
            "points": [{
                "id": object.id,
                "vector": vector,
                "payload": object.properties,
            }]
        });

        let response = self
            .request(Method::PUT, &format!("collections/{collection}/points"))
            .query(&[("wait", true)])
            .json(&body)
            .send()
            .await?;
        self.ensure_success(collection, response).await?;
        tracing::debug!(collection, id = %object.id, "Point written");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
    ) -> Result<Vec<ScoredObject>, StoreError> {
        let body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
            "with_vector": true,
        });

        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection}/points/query"),
            )
            .json(&body)
            .send()
            .await?;
        let response = self.ensure_success(collection, response).await?;

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };
        Ok(points
            .into_iter()
            .map(|point| ScoredObject {
                id: stringify_point_id(point.id),
                score: point.score,
                vector: point.vector.and_then(vector_from_value),
                properties: point.payload.unwrap_or_default(),
            })
            .collect())
    }

    async fn scan(&self, collection: &str) -> Result<Vec<StoredObject>, StoreError> {
        let stream = stream_objects(self, collection);
        pin_mut!(stream);
        let mut objects = Vec::new();
        while let Some(object) = stream.try_next().await? {
            objects.push(object);
        }
        tracing::debug!(collection, objects = objects.len(), "Collection scanned");
        Ok(objects)
    }
}

/// Map a failed response to a [`StoreError`], recognising missing collections.
pub(crate) async fn status_error(collection: &str, response: reqwest::Response) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        StoreError::CollectionNotFound(collection.to_string())
    } else {
        StoreError::UnexpectedStatus { status, body }
    }
}

fn kind_from_vectors(vectors: Option<Value>) -> CollectionKind {
    match vectors {
        Some(Value::Object(params)) => match params.get("size").and_then(Value::as_u64) {
            Some(size) => CollectionKind::Vectorized { size },
            None => CollectionKind::Raw,
        },
        _ => CollectionKind::Raw,
    }
}

fn vector_from_value(value: Value) -> Option<Vec<f32>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_f64().map(|number| number as f32))
            .collect(),
        Value::Object(named) => named.into_iter().find_map(|(_, inner)| vector_from_value(inner)),
        _ => None,
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

pub(crate) fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

pub(crate) fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Object(map) => uuid_field(&map).unwrap_or_else(|| Value::Object(map).to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn uuid_field(map: &Map<String, Value>) -> Option<String> {
    map.get("uuid").map(|value| match value {
        Value::String(uuid) => uuid.clone(),
        other => other.to_string(),
    })
}
