use super::chat::{ChatModel, ChatModelError};
use super::prompt::{Message, build_prompt};
use crate::config::Config;
use crate::metrics::PipelineMetrics;
use crate::retrieval::{ContextAssembler, RetrievalError};
use futures_core::Stream;
use futures_util::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Lazy, finite sequence of answer fragments in generation order.
pub type AnswerStream = Pin<Box<dyn Stream<Item = Result<String, AnswerError>> + Send>>;

/// Errors raised while answering a question.
#[derive(Debug, Error)]
pub enum AnswerError {
    /// Context assembly failed.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    /// The chat model failed to start or broke mid-stream.
    #[error(transparent)]
    Model(#[from] ChatModelError),
}

impl AnswerError {
    /// Whether the question targeted a document that was never ingested.
    pub fn is_collection_not_found(&self) -> bool {
        matches!(self, Self::Retrieval(error) if error.is_collection_not_found())
    }
}

/// Search and re-ranking knobs applied to every question.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalSettings {
    /// Nearest neighbours fetched before re-ranking.
    pub top_k: usize,
    /// Passages kept after re-ranking.
    pub k: usize,
    /// Relevance/diversity trade-off in `[0, 1]`.
    pub lambda: f32,
}

impl RetrievalSettings {
    /// Settings taken from the configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval_top_k,
            k: config.retrieval_k,
            lambda: config.mmr_lambda,
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 10,
            k: 3,
            lambda: 0.5,
        }
    }
}

/// Turns a question into a streamed model answer grounded in retrieved context.
pub struct AnswerPipeline {
    assembler: ContextAssembler,
    model: Arc<dyn ChatModel>,
    settings: RetrievalSettings,
    metrics: Arc<PipelineMetrics>,
}

impl AnswerPipeline {
    /// Construct a pipeline.
    pub fn new(
        assembler: ContextAssembler,
        model: Arc<dyn ChatModel>,
        settings: RetrievalSettings,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            assembler,
            model,
            settings,
            metrics,
        }
    }

    /// Answer `question` against `collection`.
    ///
    /// Retrieval and the model request complete before this returns, so their failures are
    /// reported here; only generation itself is deferred to the returned stream. Dropping the
    /// stream stops generation.
    pub async fn answer(
        &self,
        question: &str,
        history: &[Message],
        collection: &str,
    ) -> Result<AnswerStream, AnswerError> {
        let RetrievalSettings { top_k, k, lambda } = self.settings;
        let context = self
            .assembler
            .assemble_context(question, collection, top_k, k, lambda)
            .await?;
        if context.is_empty() {
            tracing::info!(collection, "No context found for question");
        }

        let messages = build_prompt(question, history, &context);
        let stream = self.model.stream_chat(messages).await?;
        self.metrics.record_question();
        tracing::info!(
            collection,
            context_chars = context.len(),
            history = history.len(),
            "Streaming answer"
        );
        Ok(Box::pin(
            stream.map(|fragment| fragment.map_err(AnswerError::from)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::chat::ChatStream;
    use crate::answer::prompt::Role;
    use crate::document::{Element, ElementKind, ProcessedDocument};
    use crate::embedding::HashingEmbedder;
    use crate::retrieval::{ReferenceLookup, ReferenceResolver};
    use crate::retry::RetryPolicy;
    use crate::store::{InMemoryBackend, VectorStoreClient};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct EchoModel {
        seen: Mutex<Vec<Vec<Message>>>,
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn stream_chat(&self, messages: Vec<Message>) -> Result<ChatStream, ChatModelError> {
            self.seen.lock().expect("lock").push(messages);
            let fragments: Vec<Result<String, ChatModelError>> = vec![
                Ok("Twenty".to_string()),
                Ok("-seven".to_string()),
                Err(ChatModelError::Provider("cut off".into())),
            ];
            Ok(Box::pin(futures_util::stream::iter(fragments)))
        }
    }

    async fn pipeline(model: Arc<EchoModel>) -> (Arc<VectorStoreClient>, AnswerPipeline) {
        let store = Arc::new(VectorStoreClient::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(HashingEmbedder::new(16)),
            16,
            RetryPolicy::immediate(2),
        ));
        let metrics = Arc::new(PipelineMetrics::new());
        let resolver =
            ReferenceResolver::new(store.clone(), ReferenceLookup::Scan, metrics.clone());
        let assembler = ContextAssembler::new(store.clone(), resolver);
        (
            store,
            AnswerPipeline::new(assembler, model, RetrievalSettings::default(), metrics),
        )
    }

    #[tokio::test]
    async fn streams_fragments_and_surfaces_model_failure() {
        let model = Arc::new(EchoModel::default());
        let (store, pipeline) = pipeline(model.clone()).await;
        store.create_collection_pair("docs").await.expect("pair");
        store
            .insert_with_original(
                "docs",
                "Originals_docs",
                &ProcessedDocument::new(ElementKind::Text, "LHC circumference"),
                &Element::new(ElementKind::Text, None, "The LHC is 27 km around."),
                None,
            )
            .await
            .expect("insert");

        let history = [Message::new(Role::User, "Hello")];
        let stream = pipeline
            .answer("How long is the LHC?", &history, "docs")
            .await
            .expect("stream");
        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_deref().expect("first"), "Twenty");
        assert_eq!(items[1].as_deref().expect("second"), "-seven");
        assert!(matches!(items[2], Err(AnswerError::Model(_))));

        let seen = model.seen.lock().expect("lock");
        let user = &seen[0][1].content;
        assert!(user.contains("user: Hello"));
        assert!(user.contains("CONTEXT: The LHC is 27 km around."));
        assert!(user.ends_with("QUESTION: How long is the LHC?"));
    }

    #[tokio::test]
    async fn early_drop_stops_consumption() {
        let model = Arc::new(EchoModel::default());
        let (store, pipeline) = pipeline(model).await;
        store.create_collection_pair("docs").await.expect("pair");

        let mut stream = pipeline.answer("Q", &[], "docs").await.expect("stream");
        let first = stream.next().await.expect("item").expect("fragment");
        drop(stream);
        assert_eq!(first, "Twenty");
    }

    #[test]
    fn settings_follow_config() {
        let mut config = crate::config::test_config();
        config.retrieval_top_k = 20;
        config.mmr_lambda = 0.25;
        let settings = RetrievalSettings::from_config(&config);
        assert_eq!(
            settings,
            RetrievalSettings {
                top_k: 20,
                k: 3,
                lambda: 0.25
            }
        );
    }

    #[tokio::test]
    async fn missing_collection_fails_before_streaming() {
        let (_, pipeline) = pipeline(Arc::new(EchoModel::default())).await;
        let error = match pipeline.answer("Q", &[], "never-ingested").await {
            Ok(_) => panic!("expected failure"),
            Err(error) => error,
        };
        assert!(error.is_collection_not_found());
    }
}
