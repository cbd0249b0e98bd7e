//! Vector store access: backends, content-derived ids and the retrying client.

mod backend;
mod client;
pub mod ids;
mod memory;
mod qdrant;
mod scroller;
mod types;

pub use backend::VectorBackend;
pub use client::{ORIGINALS_PREFIX, VectorStoreClient, originals_collection_name};
pub use memory::InMemoryBackend;
pub use qdrant::QdrantBackend;
pub use types::{
    CollectionKind, CollectionPair, InsertOutcome, NewObject, PairOutcome, RetrievalCandidate,
    ScoredObject, StoreError, StoredObject, VectorStoreError,
};
