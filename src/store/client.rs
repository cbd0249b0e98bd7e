//! Vector store client: collection pairs, idempotent inserts, similarity queries.

use super::backend::VectorBackend;
use super::ids::{canonicalize, content_id, point_id};
use super::types::{
    CollectionKind, CollectionPair, InsertOutcome, NewObject, PairOutcome, RetrievalCandidate,
    StoreError, StoredObject, VectorStoreError,
};
use crate::document::{Element, ProcessedDocument, StoreDocument};
use crate::embedding::EmbeddingClient;
use crate::retry::RetryPolicy;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Prefix of the raw collection paired with every processed collection.
pub const ORIGINALS_PREFIX: &str = "Originals_";

/// Name of the originals collection paired with `name`.
pub fn originals_collection_name(name: &str) -> String {
    format!("{ORIGINALS_PREFIX}{name}")
}

/// Client over a [`VectorBackend`] that owns the collection's vectorizer and retry policy.
///
/// Cheap to share behind an `Arc`; every call checks out its own HTTP connection, which is
/// released when the call returns or fails.
pub struct VectorStoreClient {
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn EmbeddingClient>,
    dimension: u64,
    retry: RetryPolicy,
}

impl VectorStoreClient {
    /// Construct a client embedding into `dimension`-sized vectors.
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn EmbeddingClient>,
        dimension: u64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            embedder,
            dimension,
            retry,
        }
    }

    /// Ensure `name` (vectorized) and `Originals_<name>` (raw) both exist.
    ///
    /// Each member is checked independently, so a half-created pair is completed.
    pub async fn create_collection_pair(
        &self,
        name: &str,
    ) -> Result<CollectionPair, VectorStoreError> {
        let pair = CollectionPair {
            processed: name.to_string(),
            originals: originals_collection_name(name),
        };
        self.ensure_collection(&pair.originals, CollectionKind::Raw)
            .await?;
        self.ensure_collection(
            &pair.processed,
            CollectionKind::Vectorized {
                size: self.dimension,
            },
        )
        .await?;
        Ok(pair)
    }

    async fn ensure_collection(
        &self,
        name: &str,
        kind: CollectionKind,
    ) -> Result<(), VectorStoreError> {
        self.retry
            .run("ensure collection", || async move {
                if self.backend.collection_kind(name).await?.is_some() {
                    tracing::debug!(collection = name, "Collection already exists");
                    return Ok(());
                }
                tracing::info!(collection = name, ?kind, "Creating collection");
                if let Err(error) = self.backend.create_collection(name, kind).await {
                    // A concurrent creator may have won the race between the check and the create.
                    if self.backend.collection_kind(name).await?.is_some() {
                        tracing::info!(collection = name, "Collection already exists");
                        return Ok(());
                    }
                    return Err(VectorStoreError::from(error));
                }
                Ok::<_, VectorStoreError>(())
            })
            .await
    }

    /// Delete both members of the pair named `name`.
    pub async fn delete_collection_pair(&self, name: &str) -> Result<(), VectorStoreError> {
        let originals = originals_collection_name(name);
        for collection in [name, originals.as_str()] {
            self.retry
                .run("delete collection", || async move {
                    self.backend.delete_collection(collection).await?;
                    Ok::<_, VectorStoreError>(())
                })
                .await?;
            tracing::info!(collection, "Collection deleted");
        }
        Ok(())
    }

    /// Names of every collection known to the store.
    pub async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        self.retry
            .run("list collections", || async move {
                Ok::<_, VectorStoreError>(self.backend.list_collections().await?)
            })
            .await
    }

    /// Insert `document` into `collection`, returning its store id.
    ///
    /// The id is `explicit_id` (normalized) when given, otherwise derived from the content.
    /// Re-inserting identical content is a logged no-op returning the existing id; different
    /// content under an existing id is a [`VectorStoreError::Conflict`].
    pub async fn insert<D: StoreDocument>(
        &self,
        collection: &str,
        document: &D,
        explicit_id: Option<&str>,
    ) -> Result<InsertOutcome, VectorStoreError> {
        let properties = match canonicalize(&serde_json::to_value(document).map_err(|err| {
            VectorStoreError::InvalidDocument(err.to_string())
        })?) {
            Value::Object(map) => map,
            other => return Err(VectorStoreError::InvalidDocument(other.to_string())),
        };
        let id = match explicit_id {
            Some(explicit) => point_id(explicit),
            None => content_id(&Value::Object(properties.clone())),
        };

        self.retry
            .run("insert", || {
                self.try_insert(collection, &id, &properties, document.embedding_text())
            })
            .await
    }

    async fn try_insert(
        &self,
        collection: &str,
        id: &str,
        properties: &Map<String, Value>,
        embedding_text: Option<&str>,
    ) -> Result<InsertOutcome, VectorStoreError> {
        let kind = self
            .backend
            .collection_kind(collection)
            .await?
            .ok_or_else(|| {
                VectorStoreError::Store(StoreError::CollectionNotFound(
                    collection.to_string(),
                ))
            })?;

        if let Some(existing) = self.backend.fetch_object(collection, id).await? {
            let existing = canonicalize(&Value::Object(existing.properties));
            if existing == Value::Object(properties.clone()) {
                tracing::info!(collection, id, "Object already exists; skipping insert");
                return Ok(InsertOutcome {
                    id: id.to_string(),
                    duplicate: true,
                });
            }
            tracing::warn!(collection, id, "Object id already holds different content");
            return Err(VectorStoreError::Conflict {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }

        let vector = match kind {
            CollectionKind::Vectorized { .. } => {
                let text = embedding_text
                    .ok_or_else(|| VectorStoreError::NotVectorizable(collection.to_string()))?;
                Some(self.embedder.embed(text).await?)
            }
            CollectionKind::Raw => None,
        };

        self.backend
            .write_object(
                collection,
                NewObject {
                    id: id.to_string(),
                    properties: properties.clone(),
                    vector,
                },
            )
            .await?;
        tracing::debug!(collection, id, "Object inserted");
        Ok(InsertOutcome {
            id: id.to_string(),
            duplicate: false,
        })
    }

    /// Store `original` in `reference_collection`, then `processed` in `collection` pointing at it.
    ///
    /// The original is written first so a stored processed document always has a resolvable
    /// reference. `explicit_id` (or the element's own id) names the original.
    pub async fn insert_with_original(
        &self,
        collection: &str,
        reference_collection: &str,
        processed: &ProcessedDocument,
        original: &Element,
        explicit_id: Option<&str>,
    ) -> Result<PairOutcome, VectorStoreError> {
        let original_id = explicit_id.or_else(|| original.id());
        let original_outcome = self
            .insert(reference_collection, &original.to_stored(), original_id)
            .await?;
        let linked = processed.with_reference(original_outcome.id.clone());
        let processed_outcome = self.insert(collection, &linked, None).await?;
        Ok(PairOutcome {
            original: original_outcome,
            processed: processed_outcome,
        })
    }

    /// Up to `top_k` nearest processed documents to `query_text`, with vectors and distances.
    pub async fn query(
        &self,
        collection: &str,
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalCandidate>, VectorStoreError> {
        self.retry
            .run("check collection", || async move {
                if self.backend.collection_kind(collection).await?.is_none() {
                    return Err(VectorStoreError::Store(StoreError::CollectionNotFound(
                        collection.to_string(),
                    )));
                }
                Ok::<_, VectorStoreError>(())
            })
            .await?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = self
            .retry
            .run("embed query", || async move {
                Ok::<_, VectorStoreError>(self.embedder.embed(query_text).await?)
            })
            .await?;
        let vector = &vector;
        let hits = self
            .retry
            .run("query", || async move {
                Ok::<_, VectorStoreError>(
                    self.backend.search(collection, vector.clone(), top_k).await?,
                )
            })
            .await?;

        hits.into_iter()
            .map(|hit| {
                let document: ProcessedDocument =
                    serde_json::from_value(Value::Object(hit.properties)).map_err(|err| {
                        VectorStoreError::Malformed {
                            collection: collection.to_string(),
                            id: hit.id.clone(),
                            reason: err.to_string(),
                        }
                    })?;
                Ok(RetrievalCandidate {
                    id: hit.id,
                    document,
                    vector: hit.vector.unwrap_or_default(),
                    distance: 1.0 - hit.score,
                })
            })
            .collect()
    }

    /// Single object lookup by store id.
    pub async fn fetch(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<StoredObject>, VectorStoreError> {
        self.retry
            .run("fetch", || async move {
                Ok::<_, VectorStoreError>(self.backend.fetch_object(collection, id).await?)
            })
            .await
    }

    /// Every object in `collection`.
    pub async fn scan(&self, collection: &str) -> Result<Vec<StoredObject>, VectorStoreError> {
        self.retry
            .run("scan", || async move {
                Ok::<_, VectorStoreError>(self.backend.scan(collection).await?)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ElementKind;
    use crate::embedding::HashingEmbedder;
    use crate::store::memory::InMemoryBackend;
    use crate::store::types::ScoredObject;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn client(backend: Arc<InMemoryBackend>, retry: RetryPolicy) -> VectorStoreClient {
        VectorStoreClient::new(backend, Arc::new(HashingEmbedder::new(16)), 16, retry)
    }

    #[tokio::test]
    async fn pair_creation_is_idempotent_and_completes_half_pairs() {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .create_collection("Originals_docs", CollectionKind::Raw)
            .await
            .expect("pre-existing originals");
        let store = client(backend.clone(), RetryPolicy::immediate(3));

        let pair = store.create_collection_pair("docs").await.expect("pair");
        store.create_collection_pair("docs").await.expect("again");

        assert_eq!(pair.originals, "Originals_docs");
        assert_eq!(
            backend.collection_kind("docs").await.expect("kind"),
            Some(CollectionKind::Vectorized { size: 16 })
        );
        let mut names = store.list_collections().await.expect("list");
        names.sort();
        assert_eq!(names, vec!["Originals_docs".to_string(), "docs".to_string()]);
    }

    #[tokio::test]
    async fn identical_insert_returns_same_id_without_second_write() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = client(backend.clone(), RetryPolicy::immediate(3));
        store.create_collection_pair("docs").await.expect("pair");

        let doc = ProcessedDocument::new(ElementKind::Text, "Beam energy is 6.8 TeV");
        let first = store.insert("docs", &doc, None).await.expect("first");
        let second = store.insert("docs", &doc, None).await.expect("second");

        assert_eq!(first.id, second.id);
        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(backend.object_count("docs").await, Some(1));
        assert_eq!(backend.write_attempts(), 1);
    }

    #[tokio::test]
    async fn different_content_under_explicit_id_conflicts() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = client(backend, RetryPolicy::immediate(3));
        store.create_collection_pair("docs").await.expect("pair");

        let first = Element::new(ElementKind::Table, None, "a | b");
        let second = Element::new(ElementKind::Table, None, "c | d");
        store
            .insert("Originals_docs", &first, Some("tbl-1"))
            .await
            .expect("first");
        let error = store
            .insert("Originals_docs", &second, Some("tbl-1"))
            .await
            .expect_err("conflict");
        assert!(matches!(error, VectorStoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn transient_write_failures_are_retried_to_the_same_id() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = client(backend.clone(), RetryPolicy::immediate(5));
        store.create_collection_pair("docs").await.expect("pair");
        let doc = ProcessedDocument::new(ElementKind::Text, "Magnets");
        let expected = content_id(&serde_json::to_value(&doc).expect("json"));

        backend
            .fail_next_writes(2, StatusCode::SERVICE_UNAVAILABLE)
            .await;
        let outcome = store.insert("docs", &doc, None).await.expect("inserted");

        assert_eq!(outcome.id, expected);
        assert_eq!(backend.write_attempts(), 3);
        assert_eq!(backend.object_count("docs").await, Some(1));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_error() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = client(backend.clone(), RetryPolicy::immediate(2));
        store.create_collection_pair("docs").await.expect("pair");
        backend
            .fail_next_writes(5, StatusCode::BAD_GATEWAY)
            .await;

        let doc = ProcessedDocument::new(ElementKind::Text, "Cryogenics");
        let error = store.insert("docs", &doc, None).await.expect_err("gave up");
        assert!(matches!(error, VectorStoreError::Store(_)));
        assert_eq!(backend.write_attempts(), 2);
    }

    #[tokio::test]
    async fn insert_with_original_links_processed_to_original() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = client(backend, RetryPolicy::immediate(3));
        store.create_collection_pair("docs").await.expect("pair");

        let original = Element::new(ElementKind::Image, None, "aGVsbG8=");
        let processed = ProcessedDocument::new(ElementKind::Image, "A dipole magnet");
        let outcome = store
            .insert_with_original("docs", "Originals_docs", &processed, &original, None)
            .await
            .expect("pair insert");

        let stored = store
            .fetch("Originals_docs", &outcome.original.id)
            .await
            .expect("fetch")
            .expect("original present");
        assert_eq!(stored.properties["type"], "image");
        assert!(stored.properties.get("id").is_none());

        let hits = store.query("docs", "A dipole magnet", 1).await.expect("query");
        assert_eq!(
            hits[0].document.reference.as_deref(),
            Some(outcome.original.id.as_str())
        );
        assert!(hits[0].distance.abs() < 1e-5);
        assert_eq!(hits[0].vector.len(), 16);
    }

    #[tokio::test]
    async fn query_on_missing_collection_is_not_found() {
        let store = client(Arc::new(InMemoryBackend::new()), RetryPolicy::immediate(3));
        let error = store.query("ghost", "anything", 3).await.expect_err("missing");
        assert!(error.is_collection_not_found());
        let error = store.query("ghost", "anything", 0).await.expect_err("missing");
        assert!(error.is_collection_not_found());

        store.create_collection_pair("docs").await.expect("pair");
        assert!(store.query("docs", "anything", 0).await.expect("empty").is_empty());
    }

    /// Backend whose creates always lose to a writer that got there first.
    struct RacingBackend {
        inner: InMemoryBackend,
        creates: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl VectorBackend for RacingBackend {
        async fn collection_kind(
            &self,
            name: &str,
        ) -> Result<Option<CollectionKind>, StoreError> {
            self.inner.collection_kind(name).await
        }

        async fn create_collection(
            &self,
            name: &str,
            kind: CollectionKind,
        ) -> Result<(), StoreError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            self.inner.create_collection(name, kind).await?;
            Err(StoreError::UnexpectedStatus {
                status: StatusCode::CONFLICT,
                body: format!("Collection `{name}` already exists!"),
            })
        }

        async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
            self.inner.delete_collection(name).await
        }

        async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
            self.inner.list_collections().await
        }

        async fn fetch_object(
            &self,
            collection: &str,
            id: &str,
        ) -> Result<Option<StoredObject>, StoreError> {
            self.inner.fetch_object(collection, id).await
        }

        async fn write_object(
            &self,
            collection: &str,
            object: NewObject,
        ) -> Result<(), StoreError> {
            self.inner.write_object(collection, object).await
        }

        async fn search(
            &self,
            collection: &str,
            vector: Vec<f32>,
            limit: usize,
        ) -> Result<Vec<ScoredObject>, StoreError> {
            self.inner.search(collection, vector, limit).await
        }

        async fn scan(
            &self,
            collection: &str,
        ) -> Result<Vec<StoredObject>, StoreError> {
            self.inner.scan(collection).await
        }
    }

    #[tokio::test]
    async fn pair_creation_tolerates_losing_the_create_race() {
        let backend = Arc::new(RacingBackend {
            inner: InMemoryBackend::new(),
            creates: AtomicUsize::new(0),
        });
        let store = VectorStoreClient::new(
            backend.clone(),
            Arc::new(HashingEmbedder::new(16)),
            16,
            RetryPolicy::immediate(1),
        );

        let pair = store.create_collection_pair("docs").await.expect("pair");

        assert_eq!(pair.processed, "docs");
        assert_eq!(backend.creates.load(Ordering::SeqCst), 2);
        let mut names = store.list_collections().await.expect("list");
        names.sort();
        assert_eq!(names, vec!["Originals_docs".to_string(), "docs".to_string()]);
    }

    #[tokio::test]
    async fn images_cannot_enter_vectorized_collections() {
        let store = client(Arc::new(InMemoryBackend::new()), RetryPolicy::immediate(3));
        store.create_collection_pair("docs").await.expect("pair");
        let image = Element::new(ElementKind::Image, None, "aGVsbG8=");
        let error = store.insert("docs", &image, None).await.expect_err("no text");
        assert!(matches!(error, VectorStoreError::NotVectorizable(_)));
    }
}
