use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::retrieval::ReferenceLookup;
use crate::retry::RetryPolicy;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration, loaded once at process start and passed by reference.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Qdrant instance (local or hosted).
    pub qdrant_url: String,
    /// Optional API key required by hosted Qdrant clusters.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to vectorize processed documents and queries.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Provider used for streamed answer generation.
    pub chat_provider: ChatProvider,
    /// Chat/completion model identifier.
    pub chat_model: String,
    /// Model used to summarize tables during ingestion.
    pub text_to_text_model: String,
    /// Multimodal model used to caption images during ingestion.
    pub image_to_text_model: String,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// API key for hosted OpenAI-compatible endpoints.
    pub openai_api_key: Option<String>,
    /// Base URL for OpenAI-compatible endpoints.
    pub openai_base_url: String,
    /// Document-partitioning service endpoint.
    pub unstructured_url: String,
    /// Optional API key for the partitioning service.
    pub unstructured_api_key: Option<String>,
    /// Directory where partitioner output is cached per file.
    pub elements_cache_dir: PathBuf,
    /// SQLite database holding original element content.
    pub registry_path: PathBuf,
    /// Document set answered by the chat endpoint when none is given.
    pub default_collection: String,
    /// Number of nearest candidates requested from the store.
    pub retrieval_top_k: usize,
    /// Number of candidates kept after diversity re-ranking.
    pub retrieval_k: usize,
    /// MMR trade-off between relevance (0.0) and diversity (1.0).
    pub mmr_lambda: f32,
    /// How processed records are mapped back to their originals.
    pub reference_lookup: ReferenceLookup,
    /// Insert attempts before a transient failure is surfaced.
    pub retry_max_attempts: u32,
    /// Pause between transient retries.
    pub retry_delay: Duration,
    /// Pause after the store signals rate limiting.
    pub rate_limit_delay: Duration,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
    /// Deterministic byte-hashing embedder for offline use.
    Hash,
}

/// Supported chat backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI-compatible chat completions.
    OpenAI,
}

impl Config {
    /// Load `.env` (when present) and then the configuration from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        tracing::debug!(
            qdrant_url = %config.qdrant_url,
            default_collection = %config.default_collection,
            embedding_provider = ?config.embedding_provider,
            chat_provider = ?config.chat_provider,
            reference_lookup = ?config.reference_lookup,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mmr_lambda: f32 = parse_or("MMR_LAMBDA", 0.5)?;
        if !(0.0..=1.0).contains(&mmr_lambda) {
            return Err(ConfigError::InvalidValue("MMR_LAMBDA".into()));
        }

        Ok(Self {
            qdrant_url: load_env_or("QDRANT_URL", "http://127.0.0.1:6333"),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider: load_env_or("EMBEDDING_PROVIDER", "ollama")
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".into()))?,
            embedding_model: load_env_or("EMBEDDING_MODEL", "nomic-embed-text"),
            embedding_dimension: parse_or("EMBEDDING_DIMENSION", 768)?,
            chat_provider: load_env_or("CHAT_PROVIDER", "ollama")
                .parse()
                .map_err(|()| ConfigError::InvalidValue("CHAT_PROVIDER".into()))?,
            chat_model: load_env("CHAT_MODEL")?,
            text_to_text_model: load_env_or("TEXT_TO_TEXT_MODEL", "llama3"),
            image_to_text_model: load_env_or("IMAGE_TO_TEXT_MODEL", "llava"),
            ollama_url: load_env_or("OLLAMA_URL", "http://127.0.0.1:11434"),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_or("OPENAI_BASE_URL", "https://api.openai.com"),
            unstructured_url: load_env_or("UNSTRUCTURED_URL", "http://127.0.0.1:8000"),
            unstructured_api_key: load_env_optional("UNSTRUCTURED_API_KEY"),
            elements_cache_dir: load_env_or("ELEMENTS_CACHE_DIR", "output").into(),
            registry_path: load_env_or("REGISTRY_PATH", "data/originals.sqlite").into(),
            default_collection: load_env("DEFAULT_COLLECTION")?,
            retrieval_top_k: parse_or("RETRIEVAL_TOP_K", 10)?,
            retrieval_k: parse_or("RETRIEVAL_K", 3)?,
            mmr_lambda,
            reference_lookup: load_env_or("REFERENCE_LOOKUP", "scan")
                .parse()
                .map_err(|()| ConfigError::InvalidValue("REFERENCE_LOOKUP".into()))?,
            retry_max_attempts: parse_or("RETRY_MAX_ATTEMPTS", 5)?,
            retry_delay: Duration::from_secs(parse_or("RETRY_DELAY_SECS", 5)?),
            rate_limit_delay: Duration::from_secs(parse_or("RATE_LIMIT_DELAY_SECS", 60)?),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }

    /// Retry policy applied to vector-store writes.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            delay: self.retry_delay,
            rate_limit_delay: self.rate_limit_delay,
        }
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_or(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hash" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for ChatProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Baseline configuration shared by unit tests.
#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        qdrant_url: "http://127.0.0.1:6333".into(),
        qdrant_api_key: None,
        embedding_provider: EmbeddingProvider::Hash,
        embedding_model: "test-model".into(),
        embedding_dimension: 32,
        chat_provider: ChatProvider::Ollama,
        chat_model: "llama3".into(),
        text_to_text_model: "llama3".into(),
        image_to_text_model: "llava".into(),
        ollama_url: "http://127.0.0.1:11434".into(),
        openai_api_key: None,
        openai_base_url: "https://api.openai.com".into(),
        unstructured_url: "http://127.0.0.1:8000".into(),
        unstructured_api_key: None,
        elements_cache_dir: "output".into(),
        registry_path: "data/originals.sqlite".into(),
        default_collection: "LHC_Brochure_2021".into(),
        retrieval_top_k: 10,
        retrieval_k: 3,
        mmr_lambda: 0.5,
        reference_lookup: ReferenceLookup::Scan,
        retry_max_attempts: 5,
        retry_delay: Duration::from_secs(5),
        rate_limit_delay: Duration::from_secs(60),
        server_port: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_parse_case_insensitively() {
        assert_eq!("Ollama".parse::<EmbeddingProvider>(), Ok(EmbeddingProvider::Ollama));
        assert_eq!("OPENAI".parse::<ChatProvider>(), Ok(ChatProvider::OpenAI));
        assert_eq!("hash".parse::<EmbeddingProvider>(), Ok(EmbeddingProvider::Hash));
        assert!("cohere".parse::<ChatProvider>().is_err());
    }

    #[test]
    fn retry_policy_never_allows_zero_attempts() {
        let config = test_config();
        let policy = Config {
            retry_max_attempts: 0,
            ..config
        }
        .retry_policy();
        assert_eq!(policy.max_attempts, 1);
    }
}
