//! Table summaries and image captions generated by a local Ollama runtime.
//!
//! Text elements are embedded as-is; only tables and images go through a model before they
//! reach the vectorized collection.

use crate::answer::SECTION_SEPARATOR;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

/// System preamble used for table summaries.
pub const TABLE_PREAMBLE: &str = "You are an assistant tasked with summarizing tables.";
/// Request used for table summaries.
pub const TABLE_REQUEST: &str = "Give a concise summary of the table.";
/// Prompt sent with every image.
pub const IMAGE_REQUEST: &str =
    "Describe this image in a few sentences, including any text, numbers or labels it shows.";

/// Errors surfaced while summarizing elements.
#[derive(Debug, Error)]
pub enum SummarizationError {
    /// Provider was unreachable.
    #[error("Summarization provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate summary: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Turns tables and images into embeddable text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Concise summary of a table rendered as text.
    async fn summarize_table(&self, table: &str) -> Result<String, SummarizationError>;

    /// Caption for a base64-encoded image.
    async fn caption_image(&self, image_base64: &str) -> Result<String, SummarizationError>;
}

/// User prompt for a table summary.
pub fn table_prompt(table: &str) -> String {
    format!("QUERY: {TABLE_REQUEST}\n{SECTION_SEPARATOR}\nTABLE: {table}\n{SECTION_SEPARATOR}\n")
}

/// Summarizer backed by Ollama's `POST /api/generate`.
pub struct OllamaSummarizer {
    http: Client,
    base_url: String,
    text_model: String,
    image_model: String,
}

impl OllamaSummarizer {
    /// Construct a summarizer using `text_model` for tables and `image_model` for images.
    pub fn new(
        base_url: impl Into<String>,
        text_model: impl Into<String>,
        image_model: impl Into<String>,
    ) -> Result<Self, SummarizationError> {
        let http = Client::builder()
            .user_agent("brochure-rag/summary")
            .build()
            .map_err(|error| SummarizationError::ProviderUnavailable(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            text_model: text_model.into(),
            image_model: image_model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }

    async fn generate(&self, payload: Value) -> Result<String, SummarizationError> {
        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                SummarizationError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SummarizationError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizationError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            SummarizationError::InvalidResponse(format!(
                "failed to decode Ollama response: {error}"
            ))
        })?;

        if !body.done {
            return Err(SummarizationError::InvalidResponse(
                "Ollama response incomplete".into(),
            ));
        }

        let summary = body.response.trim().to_string();
        if summary.is_empty() {
            return Err(SummarizationError::GenerationFailed(
                "model returned an empty summary".into(),
            ));
        }
        Ok(summary)
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn summarize_table(&self, table: &str) -> Result<String, SummarizationError> {
        tracing::debug!(model = %self.text_model, chars = table.len(), "Summarizing table");
        self.generate(json!({
            "model": self.text_model,
            "system": TABLE_PREAMBLE,
            "prompt": table_prompt(table),
            "stream": false,
            "options": {
                // Lower temperature for deterministic summaries.
                "temperature": 0.1,
            }
        }))
        .await
    }

    async fn caption_image(&self, image_base64: &str) -> Result<String, SummarizationError> {
        tracing::debug!(model = %self.image_model, "Captioning image");
        self.generate(json!({
            "model": self.image_model,
            "prompt": IMAGE_REQUEST,
            "images": [image_base64],
            "stream": false,
            "options": {
                "temperature": 0.1,
            }
        }))
        .await
    }
}
