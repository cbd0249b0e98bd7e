//! Question answering: prompt construction and streamed model output.

mod chat;
mod pipeline;
mod prompt;

pub use chat::{
    ChatModel, ChatModelError, ChatStream, OllamaChatModel, OpenAiChatModel, build_chat_model,
};
pub use pipeline::{AnswerError, AnswerPipeline, AnswerStream, RetrievalSettings};
pub use prompt::{Message, Role, SECTION_SEPARATOR, SYSTEM_PROMPT, build_prompt};
