use super::{ReferenceResolver, RetrievalError, select_diverse};
use crate::document::{Element, ProcessedDocument};
use crate::store::{VectorStoreClient, originals_collection_name};
use std::sync::Arc;

/// Separator placed between original contents in an assembled context.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Runs search, re-ranking and reference resolution to produce prompt-ready context.
pub struct ContextAssembler {
    store: Arc<VectorStoreClient>,
    resolver: ReferenceResolver,
}

impl ContextAssembler {
    /// Construct an assembler over `store`.
    pub fn new(store: Arc<VectorStoreClient>, resolver: ReferenceResolver) -> Self {
        Self { store, resolver }
    }

    /// Originals for the `k` most relevant-and-diverse hits among the `top_k` nearest.
    ///
    /// Candidates whose original cannot be found are dropped.
    pub async fn retrieve(
        &self,
        query: &str,
        collection: &str,
        top_k: usize,
        k: usize,
        lambda: f32,
    ) -> Result<Vec<Element>, RetrievalError> {
        let candidates = self.store.query(collection, query, top_k).await?;
        let found = candidates.len();
        let selected = select_diverse(candidates, k, lambda);
        tracing::debug!(
            collection,
            candidates = found,
            selected = selected.len(),
            "Re-ranked retrieval candidates"
        );

        let documents: Vec<ProcessedDocument> = selected
            .into_iter()
            .map(|candidate| candidate.document)
            .collect();
        let originals = self
            .resolver
            .resolve_all(&documents, &originals_collection_name(collection))
            .await?;
        Ok(originals.into_iter().flatten().collect())
    }

    /// Context string for `query`: resolved originals joined by [`CONTEXT_SEPARATOR`].
    ///
    /// An empty string is a valid result when nothing matches.
    pub async fn assemble_context(
        &self,
        query: &str,
        collection: &str,
        top_k: usize,
        k: usize,
        lambda: f32,
    ) -> Result<String, RetrievalError> {
        let originals = self.retrieve(query, collection, top_k, k, lambda).await?;
        Ok(originals
            .iter()
            .map(Element::content)
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR))
    }
}
