use super::partition::{Partitioner, PartitionError, group_elements};
use super::registry::{Registry, RegistryError};
use super::summarize::{SummarizationError, Summarizer};
use crate::document::{Element, ElementKind, ProcessedDocument};
use crate::metrics::PipelineMetrics;
use crate::store::{VectorStoreClient, VectorStoreError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors that abort ingestion of a file.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Path has no usable file name.
    #[error("Cannot ingest {0}: not a file path")]
    InvalidPath(PathBuf),
    /// Partitioning failed.
    #[error(transparent)]
    Partition(#[from] PartitionError),
    /// Table summary or image caption failed.
    #[error(transparent)]
    Summarization(#[from] SummarizationError),
    /// Vector store failed for a reason other than a content conflict.
    #[error(transparent)]
    Store(#[from] VectorStoreError),
    /// Registry bookkeeping failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Counters describing one ingested file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    /// Text elements found.
    pub texts: usize,
    /// Table elements found.
    pub tables: usize,
    /// Image elements found.
    pub images: usize,
    /// Element pairs newly written.
    pub inserted: usize,
    /// Element pairs already present with identical content.
    pub duplicates: usize,
    /// Elements skipped because their id held different content.
    pub conflicts: usize,
    /// Partitioner records dropped as unsupported or empty.
    pub skipped: usize,
    /// `true` when the file was already registered and nothing was done.
    pub already_ingested: bool,
}

/// Partition, summarize and store documents as processed/original pairs.
pub struct IngestService {
    partitioner: Arc<dyn Partitioner>,
    summarizer: Arc<dyn Summarizer>,
    store: Arc<VectorStoreClient>,
    registry: Arc<Registry>,
    metrics: Arc<PipelineMetrics>,
}

impl IngestService {
    /// Construct an ingestion service.
    pub fn new(
        partitioner: Arc<dyn Partitioner>,
        summarizer: Arc<dyn Summarizer>,
        store: Arc<VectorStoreClient>,
        registry: Arc<Registry>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            partitioner,
            summarizer,
            store,
            registry,
            metrics,
        }
    }

    /// Ingest the document at `path` into the collection pair named `collection`.
    ///
    /// Files already in the registry are skipped unless `force` is set. A conflicting element
    /// is counted and skipped; any other failure aborts the file before it is registered.
    pub async fn ingest_file(
        &self,
        path: &Path,
        collection: &str,
        force: bool,
    ) -> Result<IngestOutcome, IngestError> {
        let file_id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| IngestError::InvalidPath(path.to_path_buf()))?;

        if !force && self.registry.file_exists(&file_id)? {
            tracing::info!(file = %file_id, "File already ingested; skipping");
            return Ok(IngestOutcome {
                already_ingested: true,
                ..IngestOutcome::default()
            });
        }

        let raw = self.partitioner.partition(path).await?;
        let grouped = group_elements(&raw);
        let mut outcome = IngestOutcome {
            texts: grouped.count(ElementKind::Text),
            tables: grouped.count(ElementKind::Table),
            images: grouped.count(ElementKind::Image),
            skipped: grouped.skipped,
            ..IngestOutcome::default()
        };
        tracing::info!(
            file = %file_id,
            texts = outcome.texts,
            tables = outcome.tables,
            images = outcome.images,
            skipped = outcome.skipped,
            "Partitioned document"
        );

        let pair = self.store.create_collection_pair(collection).await?;

        for element in &grouped.elements {
            let processed = self.process(element).await?;
            let stored = match self
                .store
                .insert_with_original(&pair.processed, &pair.originals, &processed, element, None)
                .await
            {
                Ok(stored) => stored,
                Err(VectorStoreError::Conflict { collection, id }) => {
                    tracing::warn!(file = %file_id, collection, id, "Skipping conflicting element");
                    outcome.conflicts += 1;
                    continue;
                }
                Err(error) => return Err(error.into()),
            };

            if stored.original.duplicate && stored.processed.duplicate {
                outcome.duplicates += 1;
            } else {
                outcome.inserted += 1;
            }
            let element_id = element.id().unwrap_or(stored.original.id.as_str());
            self.registry.store_element(&file_id, element_id, element)?;
        }

        self.registry.register_file(&file_id)?;
        self.metrics.record_file(
            outcome.inserted as u64,
            outcome.duplicates as u64,
            outcome.conflicts as u64,
        );
        tracing::info!(
            file = %file_id,
            collection,
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            conflicts = outcome.conflicts,
            "Ingestion completed"
        );
        Ok(outcome)
    }

    async fn process(&self, element: &Element) -> Result<ProcessedDocument, IngestError> {
        let content = match element.kind() {
            ElementKind::Text => element.content().to_string(),
            ElementKind::Table => self.summarizer.summarize_table(element.content()).await?,
            ElementKind::Image => self.summarizer.caption_image(element.content()).await?,
        };
        Ok(ProcessedDocument::new(element.kind(), content))
    }
}
