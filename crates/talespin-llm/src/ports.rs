//! Backend port for text generation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmRole;

/// Errors a backend can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    /// The request could not be sent or the backend answered with an error.
    #[error("LLM request failed: {0}")]
    RequestFailed(String),

    /// The backend answered with something that is not a chat completion.
    #[error("invalid LLM response: {0}")]
    InvalidResponse(String),

    /// The request did not complete in time.
    #[error("LLM request timed out: {0}")]
    Timeout(String),

    /// No backend is configured for this role.
    #[error("LLM backend unavailable: {0}")]
    Unavailable(String),
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The engine, speaking for the player.
    User,
    /// A previous model answer.
    Assistant,
}

/// One message of a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
}

impl ChatMessage {
    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// A chat completion request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LlmRequest {
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// System prompt.
    pub system_prompt: Option<String>,
    /// Pipeline role that issued the request. Backends may ignore it.
    pub purpose: Option<LlmRole>,
    /// Model override; backends use their default when absent.
    pub model: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Completion length cap.
    pub max_tokens: Option<u32>,
    /// Ask the backend for a JSON object response.
    pub json_mode: bool,
}

impl LlmRequest {
    /// Creates a request from a conversation.
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Requests structured JSON output.
    #[must_use]
    pub fn with_json_mode(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// A chat completion answer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LlmResponse {
    /// Generated text.
    pub content: String,
    /// Total tokens billed, when the backend reports usage.
    pub total_tokens: Option<u32>,
}

/// Port for text-generation backends.
#[async_trait]
pub trait LlmPort: Send + Sync {
    /// Generates one completion.
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}
