//! OpenAI-shaped chat-completions wire format: `POST /v1/chat/completions`,
//! a `Bearer` authorization header, a flat message list, and `role: "tool"`
//! tool-result messages.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use super::sse::{sse_payloads, SseItem, ToolCallAccumulator};
use super::{FinishReason, Provider, ProviderMessage, ProviderResponse, Role, StreamEvent, ToolCall, Usage};
use crate::tools::ToolDefinition;
use crate::{RatchetError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api";

pub struct OpenAiProvider {
    alias: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    extra_headers: Vec<(String, String)>,
}

impl OpenAiProvider {
    pub fn new(alias: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            alias: alias.into(),
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            api_key: api_key.into(),
            max_tokens,
            extra_headers: Vec::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub(crate) fn with_extra_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    fn role_str(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    fn message_to_json(message: &ProviderMessage) -> Value {
        let mut body = json!({
            "role": Self::role_str(message.role),
            "content": message.content,
        });
        if let Some(id) = &message.tool_call_id {
            body["tool_call_id"] = json!(id);
        }
        if let Some(calls) = &message.tool_calls {
            body["tool_calls"] = json!(calls
                .iter()
                .map(|c| json!({
                    "id": c.id,
                    "type": "function",
                    "function": {
                        "name": c.name,
                        "arguments": c.arguments.to_string(),
                    },
                }))
                .collect::<Vec<_>>());
        }
        body
    }

    fn build_request(&self, messages: &[ProviderMessage], tools: &[ToolDefinition], stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": messages.iter().map(Self::message_to_json).collect::<Vec<_>>(),
            "stream": stream,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    },
                }))
                .collect::<Vec<_>>());
        }
        body
    }

    async fn post(&self, body: Value) -> Result<reqwest::Response> {
        let mut req = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);
        for (name, value) in &self.extra_headers {
            req = req.header(name.as_str(), value.as_str());
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RatchetError::Upstream { status: status.as_u16(), body: text });
        }
        Ok(resp)
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<ChatUsage> for Usage {
    fn from(u: ChatUsage) -> Self {
        Usage { input_tokens: u.prompt_tokens, output_tokens: u.completion_tokens }
    }
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChatToolCall>,
}

#[derive(Deserialize)]
struct ChatToolCall {
    id: String,
    function: ChatFunctionCall,
}

#[derive(Deserialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

fn decode_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("length") => FinishReason::Length,
        _ => FinishReason::Stop,
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.alias
    }

    async fn chat(&self, messages: &[ProviderMessage], tools: &[ToolDefinition]) -> Result<ProviderResponse> {
        let body = self.build_request(messages, tools, false);
        let resp = self.post(body).await?;
        let parsed: ChatCompletion = resp.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RatchetError::Protocol("empty choices array".into()))?;

        let mut tool_calls = Vec::with_capacity(choice.message.tool_calls.len());
        for call in choice.message.tool_calls {
            let arguments = serde_json::from_str(&call.function.arguments)?;
            tool_calls.push(ToolCall { id: call.id, name: call.function.name, arguments });
        }

        Ok(ProviderResponse {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            finish_reason: decode_finish_reason(choice.finish_reason.as_deref()),
            usage: parsed.usage.map(Usage::from),
        })
    }

    async fn stream(
        &self,
        messages: &[ProviderMessage],
        tools: &[ToolDefinition],
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_request(messages, tools, true);
        let resp = self.post(body).await?;

        let payloads = sse_payloads(resp.bytes_stream());
        let mut accumulator = ToolCallAccumulator::new();
        let mut pending_finish = None;
        let mut pending_usage = Usage::default();
        let mut finished = false;

        let events = payloads.flat_map(move |payload| {
            let events = match payload {
                Err(e) => vec![Err(e)],
                Ok(SseItem::Data(raw)) => decode_chat_chunk(
                    &raw,
                    &mut accumulator,
                    &mut pending_finish,
                    &mut pending_usage,
                    &mut finished,
                ),
                Ok(SseItem::Done) => finalize_stream(&mut accumulator, &mut pending_finish, &mut pending_usage, &mut finished),
            };
            futures_util::stream::iter(events)
        });
        Ok(Box::pin(events))
    }
}

/// Finalizes any still-pending tool call and emits the terminal `Done`
/// event. Idempotent once `finished` is set, so a vendor that sends both
/// `finish_reason` and closes with `[DONE]` doesn't emit two terminal
/// events.
fn finalize_stream(
    accumulator: &mut ToolCallAccumulator,
    pending_finish: &mut Option<FinishReason>,
    pending_usage: &mut Usage,
    finished: &mut bool,
) -> Vec<Result<StreamEvent>> {
    if *finished {
        return vec![];
    }
    *finished = true;
    let accumulated = std::mem::take(accumulator);
    let mut events: Vec<Result<StreamEvent>> = match accumulated.finish() {
        Ok(calls) => calls.into_iter().map(|c| Ok(StreamEvent::ToolCall(c))).collect(),
        Err(e) => vec![Err(e)],
    };
    let usage = std::mem::take(pending_usage);
    events.push(Ok(StreamEvent::Done(pending_finish.take().unwrap_or_default(), Some(usage))));
    events
}

fn decode_chat_chunk(
    raw: &str,
    accumulator: &mut ToolCallAccumulator,
    pending_finish: &mut Option<FinishReason>,
    pending_usage: &mut Usage,
    finished: &mut bool,
) -> Vec<Result<StreamEvent>> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return vec![Err(RatchetError::from(e))],
    };

    if let Some(usage) = value.get("usage") {
        if let Some(input) = usage.get("prompt_tokens").and_then(Value::as_u64) {
            pending_usage.input_tokens = input as u32;
        }
        if let Some(output) = usage.get("completion_tokens").and_then(Value::as_u64) {
            pending_usage.output_tokens = output as u32;
        }
    }

    let choice = match value.get("choices").and_then(|c| c.get(0)) {
        Some(c) => c,
        None => return vec![],
    };
    let delta = choice.get("delta");
    let mut events = Vec::new();

    if let Some(content) = delta.and_then(|d| d.get("content")).and_then(Value::as_str) {
        if !content.is_empty() {
            events.push(Ok(StreamEvent::Text(content.to_string())));
        }
    }

    if let Some(tool_calls) = delta.and_then(|d| d.get("tool_calls")).and_then(Value::as_array) {
        for call in tool_calls {
            let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
            if let Some(id) = call.get("id").and_then(Value::as_str) {
                let name = call
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                accumulator.start(index, id, name);
            }
            if let Some(args) = call
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
            {
                accumulator.push_argument_delta(index, args);
            }
        }
    }

    if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
        *pending_finish = Some(decode_finish_reason(Some(reason)));
        events.extend(finalize_stream(accumulator, pending_finish, pending_usage, finished));
    }

    events
}

/// `openrouter` is a distinct vendor type in the provider config but shares
/// OpenAI's chat-completions wire format exactly; only the default base URL
/// differs.
pub struct OpenRouterProvider;

impl OpenRouterProvider {
    pub fn build(alias: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>, max_tokens: u32) -> OpenAiProvider {
        OpenAiProvider::new(alias, model, api_key, max_tokens).with_base_url(OPENROUTER_BASE_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_chat_chunk_extracts_text_delta() {
        let mut acc = ToolCallAccumulator::new();
        let mut pending_finish = None;
        let mut pending_usage = Usage::default();
        let mut finished = false;
        let raw = r#"{"choices":[{"delta":{"content":"hi"}}]}"#;
        let events = decode_chat_chunk(raw, &mut acc, &mut pending_finish, &mut pending_usage, &mut finished);
        assert!(matches!(events.as_slice(), [Ok(StreamEvent::Text(t))] if t == "hi"));
    }

    #[test]
    fn decode_chat_chunk_emits_tool_call_and_done_on_finish_reason() {
        let mut acc = ToolCallAccumulator::new();
        acc.start(0, "call_1", "lookup");
        acc.push_argument_delta(0, "{}");
        let mut pending_finish = None;
        let mut pending_usage = Usage::default();
        let mut finished = false;
        let raw = r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#;
        let events = decode_chat_chunk(raw, &mut acc, &mut pending_finish, &mut pending_usage, &mut finished);
        assert!(matches!(events[0], Ok(StreamEvent::ToolCall(_))));
        assert!(matches!(events[1], Ok(StreamEvent::Done(FinishReason::ToolCalls, _))));
    }

    #[test]
    fn decode_chat_chunk_captures_usage_from_final_chunk() {
        let mut acc = ToolCallAccumulator::new();
        let mut pending_finish = None;
        let mut pending_usage = Usage::default();
        let mut finished = false;
        let raw = r#"{"choices":[{"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":12,"completion_tokens":34}}"#;
        let events = decode_chat_chunk(raw, &mut acc, &mut pending_finish, &mut pending_usage, &mut finished);
        match events.as_slice() {
            [Ok(StreamEvent::Done(FinishReason::Stop, Some(usage)))] => {
                assert_eq!(usage.input_tokens, 12);
                assert_eq!(usage.output_tokens, 34);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }
}
