//! Query-time retrieval: similarity search, diversity re-ranking and reference resolution.

mod context;
mod mmr;
mod resolver;

pub use crate::store::RetrievalCandidate;
pub use context::{CONTEXT_SEPARATOR, ContextAssembler};
pub use mmr::{cosine_similarity, select_diverse};
pub use resolver::ReferenceResolver;

use crate::store::VectorStoreError;
use thiserror::Error;

/// How the resolver locates an original from a processed record's reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferenceLookup {
    /// Scan the originals collection once per call and match ids exactly.
    #[default]
    Scan,
    /// Fetch by id, falling back to a scan when the store does not return the object.
    Direct,
}

impl std::str::FromStr for ReferenceLookup {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scan" => Ok(Self::Scan),
            "direct" => Ok(Self::Direct),
            _ => Err(()),
        }
    }
}

/// Errors raised while assembling context.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The underlying store call failed.
    #[error(transparent)]
    Store(#[from] VectorStoreError),
}

impl RetrievalError {
    /// Whether the queried collection was never ingested.
    pub fn is_collection_not_found(&self) -> bool {
        match self {
            Self::Store(error) => error.is_collection_not_found(),
        }
    }
}
