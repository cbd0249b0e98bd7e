use super::types::{CollectionKind, NewObject, ScoredObject, StoreError, StoredObject};
use async_trait::async_trait;

/// Raw storage operations the vector store client is built on.
///
/// Implementations perform no retries and no id assignment; both live in
/// [`super::VectorStoreClient`].
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Vector configuration of `name`, or `None` when the collection does not exist.
    async fn collection_kind(&self, name: &str) -> Result<Option<CollectionKind>, StoreError>;

    /// Create `name` with the given vector configuration.
    async fn create_collection(&self, name: &str, kind: CollectionKind) -> Result<(), StoreError>;

    /// Delete `name`; deleting a missing collection is not an error.
    async fn delete_collection(&self, name: &str) -> Result<(), StoreError>;

    /// Names of all collections.
    async fn list_collections(&self) -> Result<Vec<String>, StoreError>;

    /// Fetch a single object by id.
    async fn fetch_object(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<StoredObject>, StoreError>;

    /// Write (upsert) an object.
    async fn write_object(&self, collection: &str, object: NewObject) -> Result<(), StoreError>;

    /// Nearest neighbours of `vector`, best first, with their stored vectors.
    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
    ) -> Result<Vec<ScoredObject>, StoreError>;

    /// Every object in the collection.
    async fn scan(&self, collection: &str) -> Result<Vec<StoredObject>, StoreError>;
}
