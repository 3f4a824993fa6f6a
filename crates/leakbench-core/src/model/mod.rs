//! Model provider abstraction and the tool-calling message protocol.
//!
//! The wire shapes here follow the Anthropic Messages API so a request can be
//! serialized without an intermediate conversion layer.
//!
//! # Modules
//!
//! - [`anthropic`]: `AnthropicProvider` over `reqwest`
//! - [`error`]: `ProviderError` / `ProviderErrorKind`
//! - [`retry`]: `RetryPolicy`, `call_with_retry()`

pub mod anthropic;
pub mod error;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use error::{ProviderError, ProviderErrorKind};
pub use retry::{call_with_retry, RetryPolicy};

/// Message author.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One segment of a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    /// Block types this harness does not act on (e.g. thinking).
    #[serde(other)]
    Unsupported,
}

/// A role-tagged message in the dialogue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }
}

/// A tool advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// One model call.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    pub tools: &'a [ToolDefinition],
    pub messages: &'a [Message],
}

/// The model's reply for one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelResponse {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

impl ModelResponse {
    /// Tool-call segments, in response order.
    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => {
                Some((id.as_str(), name.as_str(), input))
            }
            _ => None,
        })
    }
}

/// A chat-completion backend with tool calling.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, request: &ModelRequest<'_>) -> Result<ModelResponse, ProviderError>;
}
