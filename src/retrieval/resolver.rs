use super::{ReferenceLookup, RetrievalError};
use crate::document::{Element, ProcessedDocument};
use crate::metrics::PipelineMetrics;
use crate::store::{StoredObject, VectorStoreClient, VectorStoreError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Maps processed records back to their originals through the stored `reference` id.
pub struct ReferenceResolver {
    store: Arc<VectorStoreClient>,
    lookup: ReferenceLookup,
    metrics: Arc<PipelineMetrics>,
}

impl ReferenceResolver {
    /// Construct a resolver using `lookup` as its strategy.
    pub fn new(
        store: Arc<VectorStoreClient>,
        lookup: ReferenceLookup,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            store,
            lookup,
            metrics,
        }
    }

    /// Resolve one processed record. `Ok(None)` means the original is missing.
    pub async fn resolve(
        &self,
        processed: &ProcessedDocument,
        reference_collection: &str,
    ) -> Result<Option<Element>, RetrievalError> {
        let Some(reference) = processed.reference.as_deref() else {
            self.report_orphan(reference_collection, None);
            return Ok(None);
        };

        if self.lookup == ReferenceLookup::Direct
            && let Some(object) = self.fetch_direct(reference_collection, reference).await?
        {
            return decode(reference_collection, object).map(Some);
        }

        let index = self.index(reference_collection).await?;
        self.lookup_in(&index, reference_collection, reference)
    }

    /// Resolve a batch, scanning the originals collection at most once.
    pub async fn resolve_all(
        &self,
        processed: &[ProcessedDocument],
        reference_collection: &str,
    ) -> Result<Vec<Option<Element>>, RetrievalError> {
        if processed.is_empty() {
            return Ok(Vec::new());
        }

        let mut resolved: Vec<Option<Element>> = Vec::with_capacity(processed.len());
        let mut pending = Vec::new();
        for (position, document) in processed.iter().enumerate() {
            let direct = match (self.lookup, document.reference.as_deref()) {
                (ReferenceLookup::Direct, Some(reference)) => {
                    self.fetch_direct(reference_collection, reference).await?
                }
                _ => None,
            };
            match direct {
                Some(object) => resolved.push(Some(decode(reference_collection, object)?)),
                None => {
                    resolved.push(None);
                    pending.push(position);
                }
            }
        }

        if pending.is_empty() {
            return Ok(resolved);
        }

        let index = self.index(reference_collection).await?;
        for position in pending {
            resolved[position] = match processed[position].reference.as_deref() {
                Some(reference) => self.lookup_in(&index, reference_collection, reference)?,
                None => {
                    self.report_orphan(reference_collection, None);
                    None
                }
            };
        }
        Ok(resolved)
    }

    /// Point lookup by id. Store ids are always UUIDs, so any other reference cannot name a
    /// stored original and is left to the scan fallback.
    async fn fetch_direct(
        &self,
        reference_collection: &str,
        reference: &str,
    ) -> Result<Option<StoredObject>, RetrievalError> {
        if Uuid::parse_str(reference).is_err() {
            tracing::debug!(reference, "Reference is not a point id; skipping direct fetch");
            return Ok(None);
        }
        Ok(self.store.fetch(reference_collection, reference).await?)
    }

    async fn index(
        &self,
        reference_collection: &str,
    ) -> Result<HashMap<String, StoredObject>, RetrievalError> {
        let objects = self.store.scan(reference_collection).await?;
        tracing::debug!(
            collection = reference_collection,
            objects = objects.len(),
            "Built reference index"
        );
        Ok(objects
            .into_iter()
            .map(|object| (object.id.clone(), object))
            .collect())
    }

    fn lookup_in(
        &self,
        index: &HashMap<String, StoredObject>,
        reference_collection: &str,
        reference: &str,
    ) -> Result<Option<Element>, RetrievalError> {
        match index.get(reference) {
            Some(object) => decode(reference_collection, object.clone()).map(Some),
            None => {
                self.report_orphan(reference_collection, Some(reference));
                Ok(None)
            }
        }
    }

    fn report_orphan(&self, reference_collection: &str, reference: Option<&str>) {
        self.metrics.record_orphan_reference();
        tracing::warn!(
            collection = reference_collection,
            reference = reference.unwrap_or("<none>"),
            "Processed record references a missing original"
        );
    }
}

fn decode(collection: &str, object: StoredObject) -> Result<Element, RetrievalError> {
    let element: Element = serde_json::from_value(Value::Object(object.properties)).map_err(
        |err| VectorStoreError::Malformed {
            collection: collection.to_string(),
            id: object.id.clone(),
            reason: err.to_string(),
        },
    )?;
    Ok(element.with_id(Some(object.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ElementKind;
    use crate::embedding::HashingEmbedder;
    use crate::retry::RetryPolicy;
    use crate::store::{InMemoryBackend, QdrantBackend};
    use httpmock::{
        Method::{GET, POST},
        MockServer,
    };
    use serde_json::json;

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        store: Arc<VectorStoreClient>,
        metrics: Arc<PipelineMetrics>,
    }

    async fn fixture() -> Fixture {
        let backend = Arc::new(InMemoryBackend::new());
        let store = Arc::new(VectorStoreClient::new(
            backend.clone(),
            Arc::new(HashingEmbedder::new(8)),
            8,
            RetryPolicy::immediate(2),
        ));
        store.create_collection_pair("docs").await.expect("pair");
        Fixture {
            backend,
            store,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    #[tokio::test]
    async fn resolves_by_scan_and_by_direct_fetch() {
        let fx = fixture().await;
        let original = Element::new(ElementKind::Table, None, "energy | 6.8 TeV");
        let outcome = fx
            .store
            .insert_with_original(
                "docs",
                "Originals_docs",
                &ProcessedDocument::new(ElementKind::Table, "Beam energy table"),
                &original,
                None,
            )
            .await
            .expect("insert");
        let processed = ProcessedDocument::new(ElementKind::Table, "Beam energy table")
            .with_reference(outcome.original.id.clone());

        for lookup in [ReferenceLookup::Scan, ReferenceLookup::Direct] {
            let resolver = ReferenceResolver::new(fx.store.clone(), lookup, fx.metrics.clone());
            let element = resolver
                .resolve(&processed, "Originals_docs")
                .await
                .expect("resolve")
                .expect("found");
            assert_eq!(element.content(), "energy | 6.8 TeV");
            assert_eq!(element.id(), Some(outcome.original.id.as_str()));
        }
    }

    #[tokio::test]
    async fn direct_lookup_falls_back_to_scan() {
        let fx = fixture().await;
        let original = Element::new(ElementKind::Text, None, "Tunnel length 27 km");
        let id = fx
            .store
            .insert("Originals_docs", &original, None)
            .await
            .expect("insert")
            .id;
        fx.backend.set_point_lookups(false);

        let resolver =
            ReferenceResolver::new(fx.store.clone(), ReferenceLookup::Direct, fx.metrics.clone());
        let processed = ProcessedDocument::new(ElementKind::Text, "Tunnel").with_reference(id);
        let element = resolver
            .resolve(&processed, "Originals_docs")
            .await
            .expect("resolve");
        assert_eq!(
            element.map(|element| element.content().to_string()),
            Some("Tunnel length 27 km".to_string())
        );
    }

    #[tokio::test]
    async fn missing_original_is_absent_and_counted() {
        let fx = fixture().await;
        let resolver =
            ReferenceResolver::new(fx.store.clone(), ReferenceLookup::Scan, fx.metrics.clone());
        let orphan = ProcessedDocument::new(ElementKind::Text, "x").with_reference("missing-id");
        let unlinked = ProcessedDocument::new(ElementKind::Text, "y");

        let resolved = resolver
            .resolve_all(&[orphan, unlinked], "Originals_docs")
            .await
            .expect("resolve");
        assert_eq!(resolved, vec![None, None]);
        assert_eq!(fx.metrics.snapshot().orphan_references, 2);
    }

    #[tokio::test]
    async fn direct_lookup_of_non_uuid_reference_is_an_orphan_against_qdrant() {
        let server = MockServer::start_async().await;
        let point = server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/Originals_docs/points/missing-id");
                then.status(400).json_body(json!({
                    "status": {
                        "error": "Format error in JSON body: Unable to parse UUID: missing-id"
                    }
                }));
            })
            .await;
        let scroll = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/Originals_docs/points/scroll");
                then.status(200).json_body(json!({
                    "result": { "points": [], "next_page_offset": null }
                }));
            })
            .await;

        let backend = QdrantBackend::new(&server.base_url(), None).expect("backend");
        let store = Arc::new(VectorStoreClient::new(
            Arc::new(backend),
            Arc::new(HashingEmbedder::new(8)),
            8,
            RetryPolicy::immediate(2),
        ));
        let metrics = Arc::new(PipelineMetrics::new());
        let resolver = ReferenceResolver::new(store, ReferenceLookup::Direct, metrics.clone());
        let orphan = ProcessedDocument::new(ElementKind::Text, "x").with_reference("missing-id");

        let resolved = resolver
            .resolve(&orphan, "Originals_docs")
            .await
            .expect("orphan resolves as absent");
        assert_eq!(resolved, None);
        let batch = resolver
            .resolve_all(std::slice::from_ref(&orphan), "Originals_docs")
            .await
            .expect("batch resolves");
        assert_eq!(batch, vec![None]);

        point.assert_hits_async(0).await;
        scroll.assert_hits_async(2).await;
        assert_eq!(metrics.snapshot().orphan_references, 2);
    }

    #[tokio::test]
    async fn missing_originals_collection_is_an_error() {
        let fx = fixture().await;
        let resolver =
            ReferenceResolver::new(fx.store.clone(), ReferenceLookup::Scan, fx.metrics.clone());
        let processed = ProcessedDocument::new(ElementKind::Text, "x").with_reference("abc");
        let error = resolver
            .resolve(&processed, "Originals_ghost")
            .await
            .expect_err("missing collection");
        assert!(error.is_collection_not_found());
    }
}
