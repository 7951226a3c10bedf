//! GitHub Copilot's chat-completions variant: identical wire format to
//! [`super::OpenAiProvider`] plus a fixed `Copilot-Integration-Id` header.
//! Delegates entirely to the shared chat-completions codec rather than
//! duplicating the SSE parser.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use super::{OpenAiProvider, Provider, ProviderMessage, ProviderResponse, StreamEvent};
use crate::tools::ToolDefinition;
use crate::Result;

const COPILOT_BASE_URL: &str = "https://api.githubcopilot.com";
const COPILOT_INTEGRATION_ID: &str = "vscode-chat";

pub struct CopilotProvider {
    inner: OpenAiProvider,
}

impl CopilotProvider {
    pub fn new(alias: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>, max_tokens: u32) -> Self {
        let inner = OpenAiProvider::new(alias, model, api_key, max_tokens)
            .with_base_url(COPILOT_BASE_URL)
            .with_extra_header("Copilot-Integration-Id", COPILOT_INTEGRATION_ID);
        Self { inner }
    }
}

#[async_trait]
impl Provider for CopilotProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn chat(&self, messages: &[ProviderMessage], tools: &[ToolDefinition]) -> Result<ProviderResponse> {
        self.inner.chat(messages, tools).await
    }

    async fn stream(
        &self,
        messages: &[ProviderMessage],
        tools: &[ToolDefinition],
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.inner.stream(messages, tools).await
    }
}
