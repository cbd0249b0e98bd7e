//! Shared types used by the store backends and the vector store client.

use crate::document::ProcessedDocument;
use crate::embedding::{EmbeddingClientError, classify_status};
use crate::retry::{RetryClass, Retryable};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors returned by a [`super::VectorBackend`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Store responded with an unexpected status code.
    #[error("Unexpected store response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the store.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// The requested collection does not exist.
    #[error("Collection `{0}` not found")]
    CollectionNotFound(String),
}

impl Retryable for StoreError {
    fn retry_class(&self) -> RetryClass {
        match self {
            Self::Http(error) if error.is_timeout() || error.is_connect() || error.is_request() => {
                RetryClass::Transient
            }
            Self::UnexpectedStatus { status, .. } => classify_status(*status),
            Self::InvalidUrl(_) | Self::Http(_) | Self::CollectionNotFound(_) => RetryClass::Fatal,
        }
    }
}

/// Errors surfaced by [`super::VectorStoreClient`].
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// Backend request failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The collection's vectorizer failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// An object with the same id but different content already exists.
    #[error("Conflicting object {id} already stored in `{collection}`")]
    Conflict {
        /// Collection holding the existing object.
        collection: String,
        /// Colliding identifier.
        id: String,
    },
    /// A document without embeddable text was sent to a vectorized collection.
    #[error("Document has no embeddable content for vectorized collection `{0}`")]
    NotVectorizable(String),
    /// Document did not serialize to a JSON object.
    #[error("Document must serialize to a JSON object: {0}")]
    InvalidDocument(String),
    /// Stored payload could not be decoded.
    #[error("Malformed object {id} in `{collection}`: {reason}")]
    Malformed {
        /// Collection holding the object.
        collection: String,
        /// Object identifier.
        id: String,
        /// Decoder message.
        reason: String,
    },
}

impl VectorStoreError {
    /// Whether this error means ingestion never ran for the collection.
    pub fn is_collection_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::CollectionNotFound(_)))
    }
}

impl Retryable for VectorStoreError {
    fn retry_class(&self) -> RetryClass {
        match self {
            Self::Store(error) => error.retry_class(),
            Self::Embedding(error) => error.retry_class(),
            _ => RetryClass::Fatal,
        }
    }
}

/// Vector configuration of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Embedded with vectors of `size` dimensions, cosine distance.
    Vectorized {
        /// Vector dimensionality.
        size: u64,
    },
    /// Raw payload storage without vectors.
    Raw,
}

/// An object as stored in a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    /// Store identifier (hyphenated UUID).
    pub id: String,
    /// Stored payload.
    pub properties: Map<String, Value>,
}

/// Nearest-neighbour hit returned by a backend search.
#[derive(Debug, Clone)]
pub struct ScoredObject {
    /// Store identifier.
    pub id: String,
    /// Cosine similarity reported by the store.
    pub score: f32,
    /// Stored vector, when requested and available.
    pub vector: Option<Vec<f32>>,
    /// Stored payload.
    pub properties: Map<String, Value>,
}

/// Object ready to be written.
#[derive(Debug, Clone)]
pub struct NewObject {
    /// Identifier to write under.
    pub id: String,
    /// Payload.
    pub properties: Map<String, Value>,
    /// Vector for vectorized collections.
    pub vector: Option<Vec<f32>>,
}

/// Result of a single insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Identifier the object is stored under.
    pub id: String,
    /// `true` when identical content was already present and nothing was written.
    pub duplicate: bool,
}

/// Result of [`super::VectorStoreClient::insert_with_original`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairOutcome {
    /// Insert into the originals collection.
    pub original: InsertOutcome,
    /// Insert into the processed collection.
    pub processed: InsertOutcome,
}

/// Names of a processed/originals collection pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionPair {
    /// Vectorized collection holding processed documents.
    pub processed: String,
    /// Raw collection holding originals.
    pub originals: String,
}

/// Ephemeral similarity-search hit with its vector and distance.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalCandidate {
    /// Store identifier of the processed object.
    pub id: String,
    /// Decoded processed document.
    pub document: ProcessedDocument,
    /// Stored embedding.
    pub vector: Vec<f32>,
    /// Cosine distance to the query (lower is more relevant).
    pub distance: f32,
}

#[derive(Deserialize)]
pub(crate) struct ListCollectionsResponse {
    pub(crate) result: ListCollectionsResult,
}

#[derive(Deserialize)]
pub(crate) struct ListCollectionsResult {
    pub(crate) collections: Vec<CollectionDescription>,
}

#[derive(Deserialize)]
pub(crate) struct CollectionDescription {
    pub(crate) name: String,
}

#[derive(Deserialize)]
pub(crate) struct CollectionInfoResponse {
    pub(crate) result: CollectionInfo,
}

#[derive(Deserialize)]
pub(crate) struct CollectionInfo {
    pub(crate) config: CollectionConfig,
}

#[derive(Deserialize)]
pub(crate) struct CollectionConfig {
    pub(crate) params: CollectionParams,
}

#[derive(Deserialize)]
pub(crate) struct CollectionParams {
    #[serde(default)]
    pub(crate) vectors: Option<Value>,
}

#[derive(Deserialize)]
pub(crate) struct QueryResponse {
    pub(crate) result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
pub(crate) struct QueryPoint {
    pub(crate) id: Value,
    pub(crate) score: f32,
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
    #[serde(default)]
    pub(crate) vector: Option<Value>,
}

#[derive(Deserialize)]
pub(crate) struct PointResponse {
    pub(crate) result: Option<RecordPoint>,
}

#[derive(Deserialize)]
pub(crate) struct ScrollResponse {
    pub(crate) result: ScrollResult,
}

#[derive(Deserialize)]
pub(crate) struct ScrollResult {
    #[serde(default)]
    pub(crate) points: Vec<RecordPoint>,
    #[serde(default)]
    pub(crate) next_page_offset: Option<Value>,
}

#[derive(Deserialize)]
pub(crate) struct RecordPoint {
    #[serde(default)]
    pub(crate) id: Option<Value>,
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
}
