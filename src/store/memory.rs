//! In-process backend used by unit and integration tests.

use super::backend::VectorBackend;
use super::types::{CollectionKind, NewObject, ScoredObject, StoreError, StoredObject};
use crate::retrieval::cosine_similarity;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};

struct MemoryObject {
    id: String,
    properties: Map<String, Value>,
    vector: Option<Vec<f32>>,
}

struct MemoryCollection {
    kind: CollectionKind,
    objects: Vec<MemoryObject>,
}

/// Backend holding collections in memory, with write fault injection.
#[derive(Default)]
pub struct InMemoryBackend {
    collections: RwLock<BTreeMap<String, MemoryCollection>>,
    write_faults: Mutex<VecDeque<StatusCode>>,
    write_attempts: AtomicUsize,
    point_lookups_disabled: AtomicBool,
}

impl InMemoryBackend {
    /// Empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with `status` before touching any data.
    pub async fn fail_next_writes(&self, count: usize, status: StatusCode) {
        let mut faults = self.write_faults.lock().await;
        faults.extend(std::iter::repeat_n(status, count));
    }

    /// Number of write calls received, failed ones included.
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    /// When disabled, lookups by id report every object as missing.
    pub fn set_point_lookups(&self, enabled: bool) {
        self.point_lookups_disabled.store(!enabled, Ordering::SeqCst);
    }

    /// Number of objects in `collection`, or `None` if it does not exist.
    pub async fn object_count(&self, collection: &str) -> Option<usize> {
        let collections = self.collections.read().await;
        collections.get(collection).map(|entry| entry.objects.len())
    }
}

#[async_trait]
impl VectorBackend for InMemoryBackend {
    async fn collection_kind(&self, name: &str) -> Result<Option<CollectionKind>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections.get(name).map(|entry| entry.kind))
    }

    async fn create_collection(&self, name: &str, kind: CollectionKind) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(StoreError::UnexpectedStatus {
                status: StatusCode::CONFLICT,
                body: format!("Collection `{name}` already exists"),
            });
        }
        collections.insert(
            name.to_string(),
            MemoryCollection {
                kind,
                objects: Vec::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        self.collections.write().await.remove(name);
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.collections.read().await.keys().cloned().collect())
    }

    async fn fetch_object(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<StoredObject>, StoreError> {
        let collections = self.collections.read().await;
        let entry = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        if self.point_lookups_disabled.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(entry
            .objects
            .iter()
            .find(|object| object.id == id)
            .map(|object| StoredObject {
                id: object.id.clone(),
                properties: object.properties.clone(),
            }))
    }

    async fn write_object(&self, collection: &str, object: NewObject) -> Result<(), StoreError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.write_faults.lock().await.pop_front() {
            return Err(StoreError::UnexpectedStatus {
                status,
                body: "injected fault".to_string(),
            });
        }

        let mut collections = self.collections.write().await;
        let entry = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

        let vector = match (entry.kind, object.vector) {
            (CollectionKind::Vectorized { size }, Some(vector)) => {
                if vector.len() as u64 != size {
                    return Err(StoreError::UnexpectedStatus {
                        status: StatusCode::BAD_REQUEST,
                        body: format!("expected dim {size}, got {}", vector.len()),
                    });
                }
                Some(vector)
            }
            (CollectionKind::Vectorized { .. }, None) => {
                return Err(StoreError::UnexpectedStatus {
                    status: StatusCode::BAD_REQUEST,
                    body: "missing vector".to_string(),
                });
            }
            (CollectionKind::Raw, _) => None,
        };

        let stored = MemoryObject {
            id: object.id,
            properties: object.properties,
            vector,
        };
        match entry.objects.iter_mut().find(|existing| existing.id == stored.id) {
            Some(existing) => *existing = stored,
            None => entry.objects.push(stored),
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
    ) -> Result<Vec<ScoredObject>, StoreError> {
        let collections = self.collections.read().await;
        let entry = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        if entry.kind == CollectionKind::Raw {
            return Err(StoreError::UnexpectedStatus {
                status: StatusCode::BAD_REQUEST,
                body: format!("Collection `{collection}` has no vectors"),
            });
        }

        let mut hits: Vec<ScoredObject> = entry
            .objects
            .iter()
            .filter_map(|object| {
                let stored = object.vector.as_ref()?;
                Some(ScoredObject {
                    id: object.id.clone(),
                    score: cosine_similarity(&vector, stored),
                    vector: Some(stored.clone()),
                    properties: object.properties.clone(),
                })
            })
            .collect();
        // Stable sort keeps insertion order among equal scores.
        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scan(&self, collection: &str) -> Result<Vec<StoredObject>, StoreError> {
        let collections = self.collections.read().await;
        let entry = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        Ok(entry
            .objects
            .iter()
            .map(|object| StoredObject {
                id: object.id.clone(),
                properties: object.properties.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(id: &str, content: &str, vector: Option<Vec<f32>>) -> NewObject {
        let mut properties = Map::new();
        properties.insert("content".into(), json!(content));
        NewObject {
            id: id.into(),
            properties,
            vector,
        }
    }

    #[tokio::test]
    async fn search_orders_by_similarity() {
        let backend = InMemoryBackend::new();
        backend
            .create_collection("docs", CollectionKind::Vectorized { size: 2 })
            .await
            .expect("create");
        backend
            .write_object("docs", object("far", "far", Some(vec![0.0, 1.0])))
            .await
            .expect("write");
        backend
            .write_object("docs", object("near", "near", Some(vec![1.0, 0.1])))
            .await
            .expect("write");

        let hits = backend.search("docs", vec![1.0, 0.0], 5).await.expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "near");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn injected_faults_fail_writes_in_order() {
        let backend = InMemoryBackend::new();
        backend
            .create_collection("raw", CollectionKind::Raw)
            .await
            .expect("create");
        backend
            .fail_next_writes(1, StatusCode::SERVICE_UNAVAILABLE)
            .await;

        let first = backend.write_object("raw", object("a", "x", None)).await;
        assert!(matches!(
            first,
            Err(StoreError::UnexpectedStatus { status, .. })
                if status == StatusCode::SERVICE_UNAVAILABLE
        ));
        backend
            .write_object("raw", object("a", "x", None))
            .await
            .expect("second write");
        assert_eq!(backend.write_attempts(), 2);
        assert_eq!(backend.object_count("raw").await, Some(1));
    }

    #[tokio::test]
    async fn missing_collection_is_reported() {
        let backend = InMemoryBackend::new();
        assert!(matches!(
            backend.scan("ghost").await,
            Err(StoreError::CollectionNotFound(_))
        ));
        assert_eq!(backend.collection_kind("ghost").await.expect("kind"), None);
    }

    #[tokio::test]
    async fn disabled_point_lookups_hide_objects() {
        let backend = InMemoryBackend::new();
        backend
            .create_collection("raw", CollectionKind::Raw)
            .await
            .expect("create");
        backend
            .write_object("raw", object("a", "x", None))
            .await
            .expect("write");
        backend.set_point_lookups(false);
        assert_eq!(backend.fetch_object("raw", "a").await.expect("fetch"), None);
        assert_eq!(backend.scan("raw").await.expect("scan").len(), 1);
    }
}
