use serde::{Deserialize, Serialize};

/// Instruction sent as the system message of every question.
pub const SYSTEM_PROMPT: &str = "You are an assistant answering questions about a document. \
Use only the provided context. \
If the context does not contain the answer, say that you do not know.";

/// Separator between prompt sections.
pub const SECTION_SEPARATOR: &str = "====================";

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instruction preamble.
    System,
    /// The person asking.
    User,
    /// The model.
    Assistant,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Author.
    pub role: Role,
    /// Text of the turn.
    pub content: String,
}

impl Message {
    /// Build a message.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Messages for a question: the system instruction and one user turn carrying
/// the serialized history, the retrieved context and the question.
pub fn build_prompt(question: &str, history: &[Message], context: &str) -> Vec<Message> {
    let mut user = String::new();
    if !history.is_empty() {
        user.push_str("HISTORY:\n");
        for turn in history {
            user.push_str(turn.role.label());
            user.push_str(": ");
            user.push_str(&turn.content);
            user.push('\n');
        }
        user.push_str(SECTION_SEPARATOR);
        user.push('\n');
    }
    user.push_str("CONTEXT: ");
    user.push_str(context);
    user.push('\n');
    user.push_str(SECTION_SEPARATOR);
    user.push('\n');
    user.push_str("QUESTION: ");
    user.push_str(question);

    vec![
        Message::new(Role::System, SYSTEM_PROMPT),
        Message::new(Role::User, user),
    ]
}
