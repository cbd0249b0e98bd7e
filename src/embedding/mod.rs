//! Embedding client abstraction and adapters.
//!
//! The vector store client owns one of these and uses it as the collection's vectorizer:
//! processed documents are embedded on insert and query text is embedded on search.

use crate::config::{Config, EmbeddingProvider};
use crate::openai::create_client;
use crate::retry::{RetryClass, Retryable};
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// HTTP layer failed before receiving a response.
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// OpenAI-compatible API call failed.
    #[error("OpenAI embedding request failed: {0}")]
    OpenAi(#[from] OpenAIError),
    /// Provider responded with an unexpected status code.
    #[error("Unexpected embedding response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

impl Retryable for EmbeddingClientError {
    fn retry_class(&self) -> RetryClass {
        match self {
            Self::GenerationFailed(_) => RetryClass::Fatal,
            Self::Http(error) | Self::OpenAi(OpenAIError::Reqwest(error)) => {
                classify_transport(error)
            }
            // async-openai already backs off on rate limits and server errors.
            Self::OpenAi(_) => RetryClass::Fatal,
            Self::UnexpectedStatus { status, .. } => classify_status(*status),
        }
    }
}

fn classify_transport(error: &reqwest::Error) -> RetryClass {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        RetryClass::Transient
    } else {
        RetryClass::Fatal
    }
}

/// Shared status classification for remote model/storage services.
pub(crate) fn classify_status(status: StatusCode) -> RetryClass {
    if status == StatusCode::TOO_MANY_REQUESTS {
        RetryClass::RateLimited
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        RetryClass::Transient
    } else {
        RetryClass::Fatal
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied chunk of text.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        self.generate_embeddings(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                EmbeddingClientError::GenerationFailed("provider returned no vectors".into())
            })
    }
}

/// Deterministic embedder that hashes bytes into a normalized vector.
///
/// Useful offline and in tests: identical text always maps to the identical vector, and texts
/// sharing most of their bytes land close together.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Construct an embedder producing `dimension`-sized vectors.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % dimension;
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashingEmbedder {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        Ok(texts
            .iter()
            .map(|text| Self::encode(text, self.dimension))
            .collect())
    }
}

/// Embeddings served by a local Ollama runtime (`POST /api/embed`).
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbeddingClient {
    /// Construct a client for `model` at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, EmbeddingClientError> {
        let http = Client::builder().user_agent("brochure-rag/embed").build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
        })
    }
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let expected = texts.len();
        tracing::debug!(model = %self.model, texts = expected, "Requesting Ollama embeddings");
        let response = self
            .http
            .post(format!("{}/api/embed", self.base_url.trim_end_matches('/')))
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::UnexpectedStatus { status, body });
        }

        let payload: OllamaEmbedResponse = response.json().await?;
        ensure_count(payload.embeddings, expected)
    }
}

/// Embeddings served by an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct OpenAiEmbeddingClient {
    client: async_openai::Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbeddingClient {
    /// Construct a client for `model`, authenticating with `api_key` when present.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, EmbeddingClientError> {
        let base_url: String = base_url.into();
        Ok(Self {
            client: create_client(&base_url, api_key.as_deref(), "brochure-rag/embed")?,
            model: model.into(),
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let expected = texts.len();
        tracing::debug!(model = %self.model, texts = expected, "Requesting OpenAI embeddings");
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::StringArray(texts))
            .build()?;
        let response = self.client.embeddings().create(request).await?;

        let mut data = response.data;
        data.sort_by_key(|item| item.index);
        ensure_count(data.into_iter().map(|item| item.embedding).collect(), expected)
    }
}

fn ensure_count(
    vectors: Vec<Vec<f32>>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
    if vectors.len() == expected {
        Ok(vectors)
    } else {
        Err(EmbeddingClientError::GenerationFailed(format!(
            "expected {expected} vectors, provider returned {}",
            vectors.len()
        )))
    }
}

/// Build an embedding client suitable for the current configuration.
pub fn build_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Building embedding client"
    );
    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::Hash => Arc::new(HashingEmbedder::new(config.embedding_dimension)),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            config.ollama_url.clone(),
            config.embedding_model.clone(),
        )?),
        EmbeddingProvider::OpenAI => Arc::new(OpenAiEmbeddingClient::new(
            config.openai_base_url.clone(),
            config.openai_api_key.clone(),
            config.embedding_model.clone(),
        )?),
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(16);
        let first = embedder.embed("Large Hadron Collider").await.expect("vector");
        let second = embedder.embed("Large Hadron Collider").await.expect("vector");
        assert_eq!(first, second);
        let norm: f32 = first.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hashing_embedder_rejects_zero_dimension() {
        let error = HashingEmbedder::new(0)
            .embed("text")
            .await
            .expect_err("zero dimension");
        assert!(matches!(error, EmbeddingClientError::GenerationFailed(_)));
    }

    #[tokio::test]
    async fn ollama_client_parses_embeddings() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/embed")
                    .body_contains("\"model\":\"nomic-embed-text\"");
                then.status(200).json_body(json!({
                    "embeddings": [[0.1, 0.2], [0.3, 0.4]]
                }));
            })
            .await;

        let client =
            OllamaEmbeddingClient::new(server.base_url(), "nomic-embed-text").expect("client");
        let vectors = client
            .generate_embeddings(vec!["a".into(), "b".into()])
            .await
            .expect("vectors");

        mock.assert();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn openai_client_orders_by_index_and_sends_key() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/embeddings")
                    .header("authorization", "Bearer sk-test")
                    .body_contains("\"model\":\"text-embedding-3-small\"");
                then.status(200).json_body(json!({
                    "object": "list",
                    "model": "text-embedding-3-small",
                    "data": [
                        { "object": "embedding", "index": 1, "embedding": [2.0] },
                        { "object": "embedding", "index": 0, "embedding": [1.0] }
                    ],
                    "usage": { "prompt_tokens": 2, "total_tokens": 2 }
                }));
            })
            .await;

        let client = OpenAiEmbeddingClient::new(
            server.base_url(),
            Some("sk-test".into()),
            "text-embedding-3-small",
        )
        .expect("client");
        let vectors = client
            .generate_embeddings(vec!["a".into(), "b".into()])
            .await
            .expect("vectors");

        mock.assert();
        assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
    }

    #[tokio::test]
    async fn openai_api_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(400).json_body(json!({
                    "error": {
                        "message": "The model `missing` does not exist",
                        "type": "invalid_request_error",
                        "param": null,
                        "code": "model_not_found"
                    }
                }));
            })
            .await;

        let client =
            OpenAiEmbeddingClient::new(server.base_url(), Some("sk-test".into()), "missing")
                .expect("client");
        let error = client.embed("x").await.expect_err("400");
        assert!(matches!(error, EmbeddingClientError::OpenAi(OpenAIError::ApiError(_))));
        assert_eq!(error.retry_class(), RetryClass::Fatal);
    }

    #[tokio::test]
    async fn rate_limited_responses_classify_as_rate_limited() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(429).body("slow down");
            })
            .await;

        let client = OllamaEmbeddingClient::new(server.base_url(), "m").expect("client");
        let error = client.embed("x").await.expect_err("429");
        assert_eq!(error.retry_class(), RetryClass::RateLimited);
    }
}
