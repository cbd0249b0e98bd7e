#![deny(missing_docs)]

//! Retrieval-augmented question answering over PDF brochures.

/// Question answering: prompts, chat models and the streaming pipeline.
pub mod answer;
/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Document elements and processed documents.
pub mod document;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// PDF partitioning, summarization and storage of element pairs.
pub mod ingest;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counters.
pub mod metrics;
/// OpenAI-compatible API client construction.
mod openai;
/// Similarity search, MMR re-ranking and context assembly.
pub mod retrieval;
/// Retry policy for remote calls.
pub mod retry;
/// Vector store backends and client.
pub mod store;
