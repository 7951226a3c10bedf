//! Provider gateway: a single [`Provider`] trait unifying heterogeneous
//! vendor wire protocols behind one chat/stream interface.

mod anthropic;
mod copilot;
mod mock;
mod openai;
mod sse;

pub use anthropic::AnthropicProvider;
pub use copilot::CopilotProvider;
pub use mock::MockProvider;
pub use openai::{OpenAiProvider, OpenRouterProvider};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::tools::ToolDefinition;
use crate::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn of conversation sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
    /// Set on `Role::Tool` messages: which tool call this result answers.
    pub tool_call_id: Option<String>,
    /// Set on `Role::Assistant` messages that requested tool calls.
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ProviderMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Result of a non-streaming [`Provider::chat`] call: accumulated text plus
/// any tool calls requested, in the order the provider emitted them.
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
}

/// Token counts for one chat turn. Non-streaming responses report this
/// directly; streaming responses accumulate it from `message_delta` /
/// the final chunk and attach it to the terminal [`StreamEvent::Done`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishReason {
    #[default]
    Stop,
    ToolCalls,
    Length,
}

/// One increment of a streamed response. `Done` is always the last event a
/// stream yields and carries whatever usage the vendor reported.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Text(String),
    ToolCall(ToolCall),
    Error(String),
    Done(FinishReason, Option<Usage>),
}

/// Unifies Anthropic block-completion, OpenAI-shaped chat-completions, and
/// scripted-mock wire protocols behind one interface. `chat` and `stream`
/// both take the same request shape; `stream` additionally requires the
/// caller to drain a [`StreamEvent`] stream to completion.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(
        &self,
        messages: &[ProviderMessage],
        tools: &[ToolDefinition],
    ) -> Result<ProviderResponse>;

    async fn stream(
        &self,
        messages: &[ProviderMessage],
        tools: &[ToolDefinition],
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn one_user_message(content: &str) -> Vec<ProviderMessage> {
        vec![ProviderMessage::user(content)]
    }
}
