use std::env;
use std::sync::Arc;

use brochure_rag::document::{Element, ElementKind, ProcessedDocument};
use brochure_rag::embedding::{EmbeddingClient, HashingEmbedder, OllamaEmbeddingClient};
use brochure_rag::retrieval::{ContextAssembler, ReferenceLookup, ReferenceResolver};
use brochure_rag::metrics::PipelineMetrics;
use brochure_rag::retry::RetryPolicy;
use brochure_rag::store::{QdrantBackend, VectorStoreClient};

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn live_store() -> Arc<VectorStoreClient> {
    let backend = QdrantBackend::new(
        &env_or("QDRANT_URL", "http://127.0.0.1:6333"),
        env::var("QDRANT_API_KEY").ok(),
    )
    .expect("qdrant client");
    Arc::new(VectorStoreClient::new(
        Arc::new(backend),
        Arc::new(HashingEmbedder::new(64)),
        64,
        RetryPolicy::immediate(3),
    ))
}

#[tokio::test]
#[ignore = "Requires live Qdrant"]
async fn live_qdrant_pair_roundtrip() {
    let store = live_store();
    let name = "brochure_rag_live_validation";
    store.create_collection_pair(name).await.expect("pair");

    let original = Element::new(ElementKind::Text, None, "The LHC ring is 27 km long.");
    let processed = ProcessedDocument::new(ElementKind::Text, "LHC ring length");
    let first = store
        .insert_with_original(name, &format!("Originals_{name}"), &processed, &original, None)
        .await
        .expect("insert");
    let again = store
        .insert_with_original(name, &format!("Originals_{name}"), &processed, &original, None)
        .await
        .expect("reinsert");
    assert_eq!(first.original.id, again.original.id);
    assert_eq!(first.processed.id, again.processed.id);
    assert!(again.processed.duplicate);

    let resolver = ReferenceResolver::new(
        store.clone(),
        ReferenceLookup::Direct,
        Arc::new(PipelineMetrics::new()),
    );
    let context = ContextAssembler::new(store.clone(), resolver)
        .assemble_context("LHC ring length", name, 5, 3, 0.5)
        .await
        .expect("context");
    assert_eq!(context, "The LHC ring is 27 km long.");

    store.delete_collection_pair(name).await.expect("cleanup");
}

#[tokio::test]
#[ignore = "Requires live Ollama embeddings"]
async fn live_ollama_embedding_roundtrip() {
    let client = OllamaEmbeddingClient::new(
        env_or("OLLAMA_URL", "http://127.0.0.1:11434"),
        env_or("EMBEDDING_MODEL", "nomic-embed-text"),
    )
    .expect("ollama client");
    let vectors = client
        .generate_embeddings(vec!["brochure-rag live embedding".to_string()])
        .await
        .expect("failed to request embeddings from provider");
    assert_eq!(vectors.len(), 1, "expected one embedding per input");
    let dimension: usize = env_or("EMBEDDING_DIMENSION", "768")
        .parse()
        .expect("dimension");
    assert_eq!(vectors[0].len(), dimension, "embedding dimension mismatch");
}
