//! HTTP surface for brochure-rag.
//!
//! - `POST /question` – Answer a question about an ingested document. The answer is streamed
//!   back as `text/plain` in the order the model produces it.
//! - `GET /collections` – List collections known to the vector store.
//! - `POST /collections` – Create a processed/originals collection pair (idempotent).
//! - `DELETE /collections/:name` – Delete a collection pair.
//! - `GET /metrics` – Ingestion and retrieval counters.

use crate::answer::{AnswerError, AnswerPipeline, AnswerStream, Message};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::store::{CollectionPair, VectorStoreClient, VectorStoreError};
use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Operations the router needs from the application.
#[async_trait]
pub trait RagApi: Send + Sync {
    /// Stream an answer to `question` grounded in `collection`.
    async fn answer(
        &self,
        question: &str,
        history: &[Message],
        collection: &str,
    ) -> Result<AnswerStream, AnswerError>;

    /// Names of every collection in the store.
    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError>;

    /// Ensure the collection pair `name` exists.
    async fn create_collection(&self, name: &str) -> Result<CollectionPair, VectorStoreError>;

    /// Delete the collection pair `name`.
    async fn delete_collection(&self, name: &str) -> Result<(), VectorStoreError>;

    /// Current pipeline counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;

    /// Collection answered when a request does not name one.
    fn default_collection(&self) -> &str;
}

/// Production [`RagApi`] wiring the answer pipeline and the vector store together.
pub struct RagService {
    pipeline: AnswerPipeline,
    store: Arc<VectorStoreClient>,
    metrics: Arc<PipelineMetrics>,
    default_collection: String,
}

impl RagService {
    /// Construct the service.
    pub fn new(
        pipeline: AnswerPipeline,
        store: Arc<VectorStoreClient>,
        metrics: Arc<PipelineMetrics>,
        default_collection: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            store,
            metrics,
            default_collection: default_collection.into(),
        }
    }
}

#[async_trait]
impl RagApi for RagService {
    async fn answer(
        &self,
        question: &str,
        history: &[Message],
        collection: &str,
    ) -> Result<AnswerStream, AnswerError> {
        self.pipeline.answer(question, history, collection).await
    }

    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        self.store.list_collections().await
    }

    async fn create_collection(&self, name: &str) -> Result<CollectionPair, VectorStoreError> {
        self.store.create_collection_pair(name).await
    }

    async fn delete_collection(&self, name: &str) -> Result<(), VectorStoreError> {
        self.store.delete_collection_pair(name).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn default_collection(&self) -> &str {
        &self.default_collection
    }
}

/// Build the HTTP router.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: RagApi + 'static,
{
    Router::new()
        .route("/question", post(ask_question::<S>))
        .route(
            "/collections",
            get(list_collections::<S>).post(create_collection::<S>),
        )
        .route("/collections/:name", delete(delete_collection::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(service)
}

/// Request body for `POST /question`.
#[derive(Deserialize)]
struct QuestionRequest {
    question: String,
    #[serde(default)]
    history: Vec<Message>,
    /// Optional override of the configured document set.
    #[serde(default)]
    collection: Option<String>,
}

/// Answer a question; the body streams the model output as it arrives.
///
/// Failures before the first fragment map to an error status. A failure mid-stream aborts
/// the body.
async fn ask_question<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<QuestionRequest>,
) -> Result<Response, AppError>
where
    S: RagApi,
{
    let QuestionRequest {
        question,
        history,
        collection,
    } = request;
    if question.trim().is_empty() {
        return Err(AppError::BadRequest("question must not be empty".into()));
    }
    let collection = collection.unwrap_or_else(|| service.default_collection().to_string());

    let stream = service
        .answer(&question, &history, &collection)
        .await
        .map_err(|error| AppError::Answer { collection, error })?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response())
}

#[derive(Serialize)]
struct CollectionsResponse {
    collections: Vec<String>,
}

async fn list_collections<S>(
    State(service): State<Arc<S>>,
) -> Result<Json<CollectionsResponse>, AppError>
where
    S: RagApi,
{
    let mut collections = service.list_collections().await?;
    collections.sort();
    Ok(Json(CollectionsResponse { collections }))
}

/// Request body for `POST /collections`.
#[derive(Deserialize)]
struct CreateCollectionRequest {
    name: String,
}

async fn create_collection<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<CreateCollectionRequest>,
) -> Result<Json<CollectionPair>, AppError>
where
    S: RagApi,
{
    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("collection name must not be empty".into()));
    }
    let pair = service.create_collection(name).await?;
    tracing::info!(
        collection = %pair.processed,
        originals = %pair.originals,
        "Collection pair ready"
    );
    Ok(Json(pair))
}

async fn delete_collection<S>(
    State(service): State<Arc<S>>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError>
where
    S: RagApi,
{
    service.delete_collection(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: RagApi,
{
    Json(service.metrics_snapshot())
}

enum AppError {
    BadRequest(String),
    Answer {
        collection: String,
        error: AnswerError,
    },
    Store(VectorStoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            Self::Answer { collection, error } if error.is_collection_not_found() => {
                tracing::info!(collection, "Question for a document that is not indexed");
                (
                    StatusCode::NOT_FOUND,
                    format!("document not indexed: {collection}"),
                )
                    .into_response()
            }
            Self::Answer { collection, error } => {
                tracing::error!(collection, error = %error, "Failed to answer question");
                (StatusCode::BAD_GATEWAY, error.to_string()).into_response()
            }
            Self::Store(error) => {
                tracing::error!(error = %error, "Vector store request failed");
                (StatusCode::BAD_GATEWAY, error.to_string()).into_response()
            }
        }
    }
}

impl From<VectorStoreError> for AppError {
    fn from(inner: VectorStoreError) -> Self {
        Self::Store(inner)
    }
}
