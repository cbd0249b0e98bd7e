//! Document partitioning through an Unstructured-compatible HTTP service.

use crate::document::{Element, ElementKind};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const ELEMENTS_FILE: &str = "elements.json";

/// Errors raised while partitioning a document.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// Reading the document or the cache failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// HTTP layer failed.
    #[error("Partition request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Service responded with an unexpected status code.
    #[error("Unexpected partition response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Element list could not be decoded.
    #[error("Malformed element list: {0}")]
    InvalidResponse(String),
}

/// One categorized element as emitted by the partitioner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawElement {
    /// Partitioner category (`Table`, `CompositeElement`, `Image`, ...).
    #[serde(rename = "type")]
    pub category: String,
    /// Extraction id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    /// Extracted text.
    #[serde(default)]
    pub text: String,
    /// Extra per-element data.
    #[serde(default)]
    pub metadata: RawMetadata,
}

/// Subset of element metadata used by ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMetadata {
    /// Base64 image payload for `Image` elements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
}

/// Produces categorized elements from a document on disk.
#[async_trait]
pub trait Partitioner: Send + Sync {
    /// Partition the document at `path`, preserving document order.
    async fn partition(&self, path: &Path) -> Result<Vec<RawElement>, PartitionError>;
}

/// Elements grouped into tagged variants.
#[derive(Debug, Default, PartialEq)]
pub struct GroupedElements {
    /// Elements in document order.
    pub elements: Vec<Element>,
    /// Records dropped for an unknown category or empty payload.
    pub skipped: usize,
}

impl GroupedElements {
    /// Number of elements of `kind`.
    pub fn count(&self, kind: ElementKind) -> usize {
        self.elements
            .iter()
            .filter(|element| element.kind() == kind)
            .count()
    }
}

/// Map partitioner records onto [`Element`] variants, keeping document order.
pub fn group_elements(raw: &[RawElement]) -> GroupedElements {
    let mut grouped = GroupedElements::default();
    for record in raw {
        let kind = match record.category.as_str() {
            "Table" | "TableChunk" => ElementKind::Table,
            "CompositeElement" | "NarrativeText" | "Text" | "Title" | "ListItem" => {
                ElementKind::Text
            }
            "Image" => ElementKind::Image,
            other => {
                tracing::debug!(category = other, "Skipping element with unsupported category");
                grouped.skipped += 1;
                continue;
            }
        };

        let content = match kind {
            ElementKind::Image => record.metadata.image_base64.clone().unwrap_or_default(),
            ElementKind::Text | ElementKind::Table => record.text.trim().to_string(),
        };
        if content.is_empty() {
            grouped.skipped += 1;
            continue;
        }

        grouped
            .elements
            .push(Element::new(kind, record.element_id.clone(), content));
    }
    grouped
}

/// Client for the Unstructured `general/v0/general` endpoint with an on-disk element cache.
pub struct UnstructuredPartitioner {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    cache_dir: PathBuf,
}

impl UnstructuredPartitioner {
    /// Construct a partitioner caching results under `cache_dir`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        cache_dir: impl Into<PathBuf>,
    ) -> Result<Self, PartitionError> {
        let http = Client::builder().user_agent("brochure-rag/partition").build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
            cache_dir: cache_dir.into(),
        })
    }

    fn cache_path(&self, document: &Path) -> PathBuf {
        let stem = document
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        self.cache_dir.join(stem).join(ELEMENTS_FILE)
    }

    async fn load_cached(&self, cache: &Path) -> Result<Option<Vec<RawElement>>, PartitionError> {
        match tokio::fs::read(cache).await {
            Ok(bytes) => {
                let elements = serde_json::from_slice(&bytes)
                    .map_err(|err| PartitionError::InvalidResponse(err.to_string()))?;
                tracing::info!(cache = %cache.display(), "Loaded cached elements");
                Ok(Some(elements))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PartitionError::Io {
                path: cache.to_path_buf(),
                source,
            }),
        }
    }

    async fn save_cache(
        &self,
        cache: &Path,
        elements: &[RawElement],
    ) -> Result<(), PartitionError> {
        let io_error = |source| PartitionError::Io {
            path: cache.to_path_buf(),
            source,
        };
        if let Some(parent) = cache.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let body = serde_json::to_vec_pretty(elements)
            .map_err(|err| PartitionError::InvalidResponse(err.to_string()))?;
        tokio::fs::write(cache, body).await.map_err(io_error)
    }
}

#[async_trait]
impl Partitioner for UnstructuredPartitioner {
    async fn partition(&self, path: &Path) -> Result<Vec<RawElement>, PartitionError> {
        let cache = self.cache_path(path);
        if let Some(elements) = self.load_cached(&cache).await? {
            return Ok(elements);
        }

        let bytes = tokio::fs::read(path).await.map_err(|source| PartitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        tracing::info!(file = %file_name, bytes = bytes.len(), "Partitioning document");

        let form = Form::new()
            .part("files", Part::bytes(bytes).file_name(file_name))
            .text("strategy", "hi_res")
            .text("chunking_strategy", "by_title")
            .text("pdf_infer_table_structure", "true")
            .text("languages", "eng")
            .text("extract_image_block_types", "[\"Image\"]");

        let mut request = self
            .http
            .post(format!(
                "{}/general/v0/general",
                self.base_url.trim_end_matches('/')
            ))
            .multipart(form);
        if let Some(key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            request = request.header("unstructured-api-key", key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, "Partition service rejected document");
            return Err(PartitionError::UnexpectedStatus { status, body });
        }

        let elements: Vec<RawElement> = response
            .json()
            .await
            .map_err(|err| PartitionError::InvalidResponse(err.to_string()))?;
        if !elements.is_empty() {
            self.save_cache(&cache, &elements).await?;
        }
        Ok(elements)
    }
}
