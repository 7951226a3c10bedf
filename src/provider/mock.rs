//! Scripted provider for tests: queued chat responses and streamed event
//! sequences (simple completion, provider error, streaming tool call).

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use super::{Provider, ProviderMessage, ProviderResponse, StreamEvent};
use crate::tools::ToolDefinition;
use crate::{RatchetError, Result};

enum ScriptedChat {
    Response(ProviderResponse),
    Error(String),
}

pub struct MockProvider {
    alias: String,
    chat_script: Mutex<VecDeque<ScriptedChat>>,
    stream_script: Mutex<VecDeque<Vec<Result<StreamEvent>>>>,
}

impl MockProvider {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            chat_script: Mutex::new(VecDeque::new()),
            stream_script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_chat_response(&self, response: ProviderResponse) {
        self.chat_script
            .lock()
            .expect("mock provider lock poisoned")
            .push_back(ScriptedChat::Response(response));
    }

    pub fn push_chat_error(&self, message: impl Into<String>) {
        self.chat_script
            .lock()
            .expect("mock provider lock poisoned")
            .push_back(ScriptedChat::Error(message.into()));
    }

    pub fn push_stream(&self, events: Vec<Result<StreamEvent>>) {
        self.stream_script
            .lock()
            .expect("mock provider lock poisoned")
            .push_back(events);
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.alias
    }

    async fn chat(&self, _messages: &[ProviderMessage], _tools: &[ToolDefinition]) -> Result<ProviderResponse> {
        let next = self
            .chat_script
            .lock()
            .expect("mock provider lock poisoned")
            .pop_front();
        match next {
            Some(ScriptedChat::Response(r)) => Ok(r),
            Some(ScriptedChat::Error(message)) => Err(RatchetError::Upstream { status: 500, body: message }),
            None => Err(RatchetError::Protocol(format!("{}: no scripted chat response queued", self.alias))),
        }
    }

    async fn stream(
        &self,
        _messages: &[ProviderMessage],
        _tools: &[ToolDefinition],
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let events = self
            .stream_script
            .lock()
            .expect("mock provider lock poisoned")
            .pop_front()
            .ok_or_else(|| RatchetError::Protocol(format!("{}: no scripted stream queued", self.alias)))?;
        Ok(Box::pin(futures_util::stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FinishReason, ToolCall};
    use futures_util::StreamExt;

    #[tokio::test]
    async fn chat_returns_queued_response() {
        let provider = MockProvider::new("mock");
        provider.push_chat_response(ProviderResponse {
            text: "hello".into(),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            usage: None,
        });
        let response = provider.chat(&[], &[]).await.unwrap();
        assert_eq!(response.text, "hello");
    }

    #[tokio::test]
    async fn chat_with_no_script_is_a_protocol_error() {
        let provider = MockProvider::new("mock");
        assert!(provider.chat(&[], &[]).await.is_err());
    }

    #[tokio::test]
    async fn stream_replays_scripted_events_in_order() {
        let provider = MockProvider::new("mock");
        provider.push_stream(vec![
            Ok(StreamEvent::Text("partial".into())),
            Ok(StreamEvent::ToolCall(ToolCall {
                id: "1".into(),
                name: "search".into(),
                arguments: serde_json::json!({}),
            })),
            Ok(StreamEvent::Done(FinishReason::ToolCalls, None)),
        ]);
        let events: Vec<_> = provider.stream(&[], &[]).await.unwrap().collect().await;
        assert_eq!(events.len(), 3);
    }
}
