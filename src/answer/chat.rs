//! Streaming chat-completion clients.
//!
//! Ollama answers with NDJSON; network chunks are reassembled into whole lines before decoding,
//! so every yielded fragment is complete UTF-8 text. OpenAI-compatible servers are driven
//! through `async-openai`'s server-sent event stream. Dropping the returned stream drops the
//! upstream response and with it the generation.

use super::prompt::{Message, Role};
use crate::config::{ChatProvider, Config};
use crate::openai::create_client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, CreateChatCompletionStreamResponse,
};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Lazy sequence of generated text fragments.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, ChatModelError>> + Send>>;

/// Errors raised by chat-completion providers.
#[derive(Debug, Error)]
pub enum ChatModelError {
    /// HTTP layer failed.
    #[error("Chat request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// OpenAI-compatible API call failed.
    #[error("OpenAI chat request failed: {0}")]
    OpenAi(#[from] OpenAIError),
    /// Provider responded with an unexpected status code.
    #[error("Unexpected chat response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Provider reported an error inside the stream.
    #[error("Chat provider error: {0}")]
    Provider(String),
    /// Stream content could not be decoded.
    #[error("Malformed chat stream: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by chat-completion backends.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start generating a reply to `messages`.
    ///
    /// Request-level failures are returned before any fragment is produced.
    async fn stream_chat(&self, messages: Vec<Message>) -> Result<ChatStream, ChatModelError>;
}

/// Splits a byte stream into complete lines.
#[derive(Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append `chunk` and drain every completed line.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, ChatModelError> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(position) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=position).collect();
            lines.push(decode_line(&line[..line.len() - 1])?);
        }
        Ok(lines)
    }

    /// Trailing line without a newline terminator, if any.
    pub(crate) fn finish(&mut self) -> Result<Option<String>, ChatModelError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let rest = std::mem::take(&mut self.pending);
        decode_line(&rest).map(Some)
    }
}

fn decode_line(bytes: &[u8]) -> Result<String, ChatModelError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|err| ChatModelError::InvalidResponse(err.to_string()))?;
    Ok(text.trim_end_matches('\r').to_string())
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ChatModelError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::error!(status = %status, body = %body, "Chat request rejected");
    Err(ChatModelError::UnexpectedStatus { status, body })
}

/// Chat served by Ollama's streaming `POST /api/chat`.
pub struct OllamaChatModel {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaChatModel {
    /// Construct a client for `model` at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ChatModelError> {
        let http = Client::builder().user_agent("brochure-rag/chat").build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
        })
    }
}

#[derive(Deserialize)]
struct OllamaChatLine {
    #[serde(default)]
    message: Option<OllamaChatMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaChatMessage {
    #[serde(default)]
    content: String,
}

fn parse_ollama_line(line: &str) -> Result<Option<String>, ChatModelError> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    let parsed: OllamaChatLine = serde_json::from_str(line)
        .map_err(|err| ChatModelError::InvalidResponse(err.to_string()))?;
    if let Some(error) = parsed.error {
        return Err(ChatModelError::Provider(error));
    }
    Ok(parsed
        .message
        .map(|message| message.content)
        .filter(|content| !content.is_empty()))
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    async fn stream_chat(&self, messages: Vec<Message>) -> Result<ChatStream, ChatModelError> {
        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            "Starting Ollama chat stream"
        );
        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url.trim_end_matches('/')))
            .json(&json!({ "model": self.model, "messages": messages, "stream": true }))
            .send()
            .await?;
        let response = ensure_success(response).await?;

        Ok(Box::pin(try_stream! {
            let mut lines = LineBuffer::default();
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                for line in lines.push(&chunk)? {
                    if let Some(text) = parse_ollama_line(&line)? {
                        yield text;
                    }
                }
            }
            if let Some(line) = lines.finish()? {
                if let Some(text) = parse_ollama_line(&line)? {
                    yield text;
                }
            }
        }))
    }
}

/// Chat served by an OpenAI-compatible `POST /v1/chat/completions` endpoint.
pub struct OpenAiChatModel {
    client: async_openai::Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChatModel {
    /// Construct a client for `model`, authenticating with `api_key` when present.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, ChatModelError> {
        let base_url: String = base_url.into();
        Ok(Self {
            client: create_client(&base_url, api_key.as_deref(), "brochure-rag/chat")?,
            model: model.into(),
        })
    }
}

fn request_message(message: &Message) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    let content = message.content.clone();
    Ok(match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()?
            .into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()?
            .into(),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()?
            .into(),
    })
}

fn chunk_text(chunk: CreateChatCompletionStreamResponse) -> Option<String> {
    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();
    (!text.is_empty()).then_some(text)
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn stream_chat(&self, messages: Vec<Message>) -> Result<ChatStream, ChatModelError> {
        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            "Starting OpenAI chat stream"
        );
        let messages = messages
            .iter()
            .map(request_message)
            .collect::<Result<Vec<_>, _>>()?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()?;
        let mut upstream = self.client.chat().create_stream(request).await?;

        // The event source connects on first poll, so a rejected request only shows up as the
        // first item.
        let first = match upstream.next().await {
            Some(Ok(chunk)) => Some(chunk),
            Some(Err(error)) => {
                tracing::error!(error = %error, "OpenAI chat request rejected");
                return Err(error.into());
            }
            None => None,
        };

        Ok(Box::pin(try_stream! {
            if let Some(text) = first.and_then(chunk_text) {
                yield text;
            }
            while let Some(chunk) = upstream.next().await {
                let chunk = chunk.map_err(ChatModelError::from)?;
                if let Some(text) = chunk_text(chunk) {
                    yield text;
                }
            }
        }))
    }
}

/// Build the chat model selected by the configuration.
pub fn build_chat_model(config: &Config) -> Result<Arc<dyn ChatModel>, ChatModelError> {
    tracing::debug!(
        provider = ?config.chat_provider,
        model = %config.chat_model,
        "Building chat model"
    );
    let model: Arc<dyn ChatModel> = match config.chat_provider {
        ChatProvider::Ollama => Arc::new(OllamaChatModel::new(
            config.ollama_url.clone(),
            config.chat_model.clone(),
        )?),
        ChatProvider::OpenAI => Arc::new(OpenAiChatModel::new(
            config.openai_base_url.clone(),
            config.openai_api_key.clone(),
            config.chat_model.clone(),
        )?),
    };
    Ok(model)
}
